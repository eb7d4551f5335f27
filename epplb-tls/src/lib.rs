//! mTLS upstream transport for epplb.
//!
//! Implements [`epplb_domain::ConnectionFactory`] over TCP + `rustls`.
//!
//! # Quick start
//!
//! ```ignore
//! use epplb_tls::{TlsConnector, TlsMaterial};
//!
//! let material = TlsMaterial {
//!     cert: "crt.pem".into(),
//!     key: "key.pem".into(),
//!     ca: "ca.pem".into(),
//! };
//! let factory = TlsConnector::new("epp.example.net:700", "epp.example.net", &material)?;
//! let stream = factory.create().await?;
//! ```

mod connector;
mod error;
mod tls;

pub use connector::TlsConnector;
pub use error::TlsError;
pub use tls::{client_config, load_certs, load_key, TlsMaterial};
