//! [`UpstreamPool`] — bounded pool of [`UpstreamSession`]s.
//!
//! Built on `deadpool::managed`. Connections are created on demand up to
//! `max_size` through the configured [`epplb_domain::ConnectionFactory`]. A connection
//! taken out with [`UpstreamPool::mark_unusable`] never goes back; the pool
//! shrinks by one and the next acquisition dials a replacement.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---

use deadpool::managed::{self, Object};

// ---

use epplb_domain::{ConnectionFactoryPtr, EppError, Result};

// ---

use super::UpstreamSession;

/// A checked-out upstream. Returned to the pool on drop.
pub type PooledUpstream = Object<UpstreamManager>;

// ---------------------------------------------------------------------------
// PoolConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolConfig {
    // ---
    /// Upper bound on live upstream connections.
    pub max_size: usize,

    /// Keepalive interval handed to every new session. `None` disables it.
    pub keepalive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            keepalive: Some(Duration::from_secs(300)),
        }
    }
}

// ---------------------------------------------------------------------------
// UpstreamManager
// ---------------------------------------------------------------------------

pub struct UpstreamManager {
    // ---
    factory: ConnectionFactoryPtr,
    keepalive: Option<Duration>,
}

impl managed::Manager for UpstreamManager {
    // ---
    type Type = UpstreamSession;
    type Error = EppError;

    async fn create(&self) -> std::result::Result<UpstreamSession, EppError> {
        // ---
        let stream = self.factory.create().await?;
        let session = UpstreamSession::new(stream, self.keepalive);
        tracing::debug!(upstream = %session.id(), target = %self.factory.describe(), "upstream connection created");
        Ok(session)
    }

    async fn recycle(
        &self,
        session: &mut UpstreamSession,
        _: &managed::Metrics,
    ) -> managed::RecycleResult<EppError> {
        // ---
        if session.is_broken() {
            tracing::debug!(upstream = %session.id(), "discarding broken upstream connection");
            return Err(managed::RecycleError::Backend(EppError::SessionClosed));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PoolStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    /// Live connections, idle or checked out.
    pub size: usize,
    pub available: usize,
    /// Connections discarded through [`UpstreamPool::mark_unusable`].
    pub evicted: usize,
}

// ---------------------------------------------------------------------------
// UpstreamPool
// ---------------------------------------------------------------------------

/// Cheap-clone handle shared by every session task.
#[derive(Clone)]
pub struct UpstreamPool {
    // ---
    pool: managed::Pool<UpstreamManager>,
    evicted: Arc<AtomicUsize>,
}

// ---

impl UpstreamPool {
    // ---
    pub fn new(factory: ConnectionFactoryPtr, config: PoolConfig) -> Result<Self> {
        // ---
        let manager = UpstreamManager {
            factory,
            keepalive: config.keepalive,
        };

        let pool = managed::Pool::builder(manager)
            .max_size(config.max_size)
            .build()
            .map_err(|e| EppError::Pool(e.to_string()))?;

        Ok(Self {
            pool,
            evicted: Arc::new(AtomicUsize::new(0)),
        })
    }

    // ---

    /// Check out an upstream, dialing a new one if none is idle.
    ///
    /// Waits while the pool is at capacity with every connection in use.
    pub async fn get(&self) -> Result<PooledUpstream> {
        self.pool
            .get()
            .await
            .map_err(|e| EppError::Pool(e.to_string()))
    }

    // ---

    /// Open `count` connections (capped at `max_size`) and read their
    /// greetings, then leave them idle in the pool.
    pub async fn warm(&self, count: usize) -> Result<()> {
        // ---
        let count = count.min(self.pool.status().max_size);
        let mut held = Vec::with_capacity(count);

        for _ in 0..count {
            let upstream = self.get().await?;
            upstream.connect().await?;
            held.push(upstream);
        }

        tracing::info!(connections = held.len(), "upstream pool warmed");
        Ok(())
    }

    // ---

    /// Remove `upstream` from the pool for good and close it.
    pub async fn mark_unusable(&self, upstream: PooledUpstream) {
        // ---
        let session = Object::take(upstream);
        self.evicted.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(upstream = %session.id(), "upstream marked unusable");
        session.close().await;
    }

    // ---

    pub fn status(&self) -> PoolStatus {
        // ---
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            evicted: self.evicted.load(Ordering::SeqCst),
        }
    }

    // ---

    /// Close the pool, then log out and close every idle upstream.
    ///
    /// Only connections already in the pool are touched; nothing new is
    /// dialed. Connections still checked out are dropped when their sessions
    /// return them.
    pub async fn drain(&self) {
        // ---
        let idle = self.pool.retain(|_, _| false).removed;
        self.pool.close();

        for session in &idle {
            if session.is_logged_in().await {
                match session.logout().await {
                    Ok(_) => tracing::debug!(upstream = %session.id(), "upstream logged out"),
                    Err(e) => tracing::warn!(upstream = %session.id(), "upstream logout failed: {e}"),
                }
            }
            session.close().await;
        }

        tracing::info!(drained = idle.len(), "upstream pool closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
