use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::error::Result;

// ---------------------------------------------------------------------------
// Duplex
// ---------------------------------------------------------------------------

/// An authenticated, bidirectional byte stream to one upstream server.
///
/// Blanket-implemented for every `AsyncRead + AsyncWrite` stream, so TLS
/// streams and in-process pipes both qualify.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Duplex for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

// ---

/// Convenience type alias for a heap-allocated [`Duplex`] stream.
pub type DuplexPtr = Box<dyn Duplex>;

// ---------------------------------------------------------------------------
// ConnectionFactory
// ---------------------------------------------------------------------------

/// Produces fresh upstream connections for the pool.
///
/// Implementations: `epplb_tls::TlsConnector`, `epplb_link_sim::LinkSimFactory`.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    // ---
    /// Open a new connection. An error leaves the pool slot unfilled; the
    /// next acquisition tries again.
    async fn create(&self) -> Result<DuplexPtr>;

    /// Human-readable upstream identity for logs.
    fn describe(&self) -> String;
}

// ---

/// Convenience type alias for a shared [`ConnectionFactory`].
pub type ConnectionFactoryPtr = std::sync::Arc<dyn ConnectionFactory>;
