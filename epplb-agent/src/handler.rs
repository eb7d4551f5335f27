//! [`ProxyHandler`] — drives one [`Protocol`] per downstream connection and
//! fails over to a fresh pooled upstream when the current one dies.
//!
//! The retry budget is per downstream session. Each failover replays only
//! the command that was in flight, never the whole session.

use std::net::SocketAddr;

// ---

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::Instrument;
use uuid::Uuid;

// ---

use epplb_domain::{EppError, Result};

// ---

use super::{ConnectionHandler, Protocol, UpstreamPool};

// ---------------------------------------------------------------------------
// ProxyHandler
// ---------------------------------------------------------------------------

pub struct ProxyHandler {
    // ---
    pool: UpstreamPool,
    max_retries: u32,
}

// ---

impl ProxyHandler {
    // ---
    pub fn new(pool: UpstreamPool, max_retries: u32) -> Self {
        Self { pool, max_retries }
    }

    pub fn pool(&self) -> &UpstreamPool {
        &self.pool
    }

    // ---

    /// Serve one downstream connection to completion.
    ///
    /// A downstream hang-up is a clean end. An upstream failure evicts the
    /// upstream and resumes on a replacement until `max_retries` is spent.
    /// Pool errors and downstream I/O errors are returned as-is.
    pub async fn handle<D>(&self, downstream: D) -> Result<()>
    where
        D: AsyncRead + AsyncWrite + Unpin,
    {
        // ---
        let mut upstream = self.pool.get().await?;
        tracing::debug!(upstream = %upstream.id(), "upstream acquired");

        let mut protocol = Protocol::new(upstream.clone(), downstream);
        let mut outcome = protocol.talk().await;
        let mut retries = 0u32;

        loop {
            match outcome {
                Ok(()) | Err(EppError::Disconnected) => break,

                Err(EppError::RetryableUpstream { source, failed }) => {
                    tracing::warn!(
                        upstream = %upstream.id(),
                        attempt = retries + 1,
                        replay = failed.as_ref().map(|m| m.command()).unwrap_or("none"),
                        "upstream failed: {source}",
                    );
                    self.pool.mark_unusable(upstream).await;

                    if retries >= self.max_retries {
                        return Err(EppError::RetriesExhausted {
                            attempts: retries + 1,
                        });
                    }
                    retries += 1;

                    upstream = self.pool.get().await?;
                    tracing::debug!(upstream = %upstream.id(), "failing over");

                    protocol.rebind(upstream.clone());
                    outcome = protocol.resume(failed).await;
                }

                Err(e) => return Err(e),
            }
        }

        let status = self.pool.status();
        tracing::debug!(
            retries,
            pool_size = status.size,
            pool_available = status.available,
            pool_evicted = status.evicted,
            "session finished",
        );
        Ok(())
    }
}

// ---

#[async_trait]
impl ConnectionHandler for ProxyHandler {
    // ---
    async fn handle_connection(&self, conn: TcpStream, peer: SocketAddr) -> Result<()> {
        // ---
        let span = tracing::info_span!("session", %peer, id = %Uuid::new_v4());

        async move {
            tracing::info!("downstream connected");
            conn.set_nodelay(true)?;

            let result = self.handle(conn).await;
            match &result {
                Ok(()) => tracing::info!("downstream closed"),
                Err(e) => tracing::warn!("session ended: {e}"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
