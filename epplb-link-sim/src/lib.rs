//! In-process mock upstream for epplb unit and integration testing.
//!
//! [`LinkSimFactory`] implements [`epplb_domain::ConnectionFactory`] using
//! tokio duplex pipes instead of real sockets. A scripted EPP server runs on
//! the far end of each pipe; [`LinkSimConfig`] controls injected faults:
//!
//! - Refused connections
//! - Hang-up before the greeting
//! - Hang-up on the first N logins or commands
//! - Random hang-ups with a deterministic RNG seed
//! - Rejected logins (code 2200)
//!
//! # Quick start
//!
//! ```rust
//! use epplb_link_sim::{LinkSimConfig, LinkSimFactory};
//!
//! let factory = LinkSimFactory::new(LinkSimConfig::flaky_login(1));
//! let stats = factory.stats();
//! assert_eq!(stats.connections(), 0);
//! ```

mod config;
mod server;
mod transport;

// --- public API
pub use config::LinkSimConfig;
pub use server::{greeting, LinkSimStats};
pub use transport::LinkSimFactory;
