//! Error types for `epplb-tls`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    // ---
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("failed to read {}: {source}", path.display())]
    Pem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("invalid server name: {0}")]
    ServerName(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {addr} failed: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Bridge to epplb_domain::EppError
// ---------------------------------------------------------------------------

impl From<TlsError> for epplb_domain::EppError {
    // ---
    fn from(e: TlsError) -> Self {
        epplb_domain::EppError::Transport(e.to_string())
    }
}
