//! [`Server`] — downstream accept loop.
//!
//! Each accepted connection is handed to a [`ConnectionHandler`] on its own
//! task. Stopping closes the listener first, then waits for every in-flight
//! session to finish on its own.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

// ---

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

// ---

use epplb_domain::Result;

/// Pause after a failed accept so a persistent error (fd exhaustion, say)
/// does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// ConnectionHandler
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    // ---
    /// Serve one downstream connection until it ends.
    async fn handle_connection(&self, conn: TcpStream, peer: SocketAddr) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct Server {
    // ---
    listener: TcpListener,
    accept_timeout: Duration,
}

// ---

impl Server {
    // ---
    pub async fn bind(addr: SocketAddr, accept_timeout: Duration) -> Result<Self> {
        // ---
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            accept_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    // ---

    /// Accept until `stop` flips to `true`, then drain.
    ///
    /// Every accept waits at most `accept_timeout`, so a stop request is
    /// noticed within one timeout even on an idle listener.
    pub async fn serve<H>(self, handler: Arc<H>, mut stop: watch::Receiver<bool>)
    where
        H: ConnectionHandler,
    {
        // ---
        let mut sessions = JoinSet::new();

        while !*stop.borrow_and_update() {
            // Reap finished sessions so the set does not grow unbounded.
            while sessions.try_join_next().is_some() {}

            let accepted = match tokio::time::timeout(self.accept_timeout, self.listener.accept()).await {
                Err(_elapsed) => continue,
                Ok(accepted) => accepted,
            };

            let (conn, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    pause_after_accept_error(&e, &mut stop).await;
                    continue;
                }
            };

            let handler = handler.clone();
            sessions.spawn(async move {
                if let Err(e) = handler.handle_connection(conn, peer).await {
                    tracing::debug!(%peer, "connection error: {e}");
                }
            });
        }

        drop(self.listener);
        tracing::info!(in_flight = sessions.len(), "listener closed, waiting for sessions");

        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                tracing::error!("session task failed: {e}");
            }
        }
        tracing::info!("all sessions finished");
    }

    // ---

    /// Run [`Server::serve`] on a background task.
    pub fn spawn<H>(self, handler: Arc<H>) -> Result<ServerHandle>
    where
        H: ConnectionHandler,
    {
        // ---
        let local_addr = self.local_addr()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(self.serve(handler, stop_rx));

        Ok(ServerHandle {
            local_addr,
            stop_tx,
            join,
        })
    }
}

// ---

/// Log `e` and wait out [`ACCEPT_ERROR_BACKOFF`], or less if a stop arrives.
async fn pause_after_accept_error(e: &std::io::Error, stop: &mut watch::Receiver<bool>) {
    // ---
    tracing::error!(backoff_ms = ACCEPT_ERROR_BACKOFF.as_millis() as u64, "error accepting connection: {e}");

    tokio::select! {
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
        Ok(()) = stop.changed() => {}
    }
}

// ---------------------------------------------------------------------------
// ServerHandle
// ---------------------------------------------------------------------------

pub struct ServerHandle {
    // ---
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    // ---
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait until every in-flight session is done.
    pub async fn stop(self) {
        // ---
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::error!("accept loop failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
