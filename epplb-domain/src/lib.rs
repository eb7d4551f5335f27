//! Core types for the epplb EPP load balancer.
//!
//! This crate defines the vocabulary of the system. The proxy binary, the
//! TLS connector and the link simulator all speak these types.
//!
//! # Structure
//!
//! - [`error`]     — [`EppError`] and [`Result<T>`] alias
//! - [`frame`]     — length-prefixed [`Frame`] codec ([`read_frame`], [`write_frame`])
//! - [`message`]   — [`Message`], lazily parsed EPP documents and canned responses
//! - [`transport`] — [`Duplex`] streams and the [`ConnectionFactory`] trait

mod error;
mod frame;
mod message;
mod transport;

// --- error
pub use error::{EppError, Result};

// --- frame
pub use frame::{read_frame, write_frame, Frame};

// --- message
pub use message::{
    // ---
    response,
    EppResult,
    Message,
    NS_EPP10,
};

// --- transport
pub use transport::{
    // ---
    ConnectionFactory,
    ConnectionFactoryPtr,
    Duplex,
    DuplexPtr,
};
