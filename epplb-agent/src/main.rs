//! epplb daemon.
//!
//! Terminates downstream EPP sessions and multiplexes them onto a bounded pool
//! of mTLS upstream connections. When an upstream dies mid-session the command
//! in flight is replayed on a fresh one, invisibly to the downstream client.
//!
//! Usage:
//!   epplb --listen 0.0.0.0:10700 --upstream epp.example.net:700 \
//!         --cert crt.pem --key key.pem --ca ca.pem

use std::sync::Arc;

// ---

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---

use epplb_tls::TlsConnector;

// ---

mod config;
mod handler;
mod pool;
mod protocol;
mod server;
mod upstream;

#[cfg(test)]
mod testing;

// ---

use config::Config;

// Gateway re-exports; siblings import via super::Symbol
pub use handler::ProxyHandler;
pub use pool::{PoolConfig, UpstreamPool};
pub use protocol::Protocol;
pub use server::{ConnectionHandler, Server};
pub use upstream::UpstreamSession;

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---

    let cfg = Config::parse();
    cfg.validate().map_err(anyhow::Error::msg)?;

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(!no_color)
        .init();

    let server_name = cfg.server_name();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        upstream = %cfg.upstream,
        %server_name,
        "epplb starting",
    );

    // Upstream side: TLS factory, then a warm pool.
    let connector = TlsConnector::new(&cfg.upstream, &server_name, &cfg.tls_material())
        .with_context(|| format!("loading TLS material for {}", cfg.upstream))?;

    let pool = UpstreamPool::new(
        Arc::new(connector),
        PoolConfig {
            max_size: cfg.max_connections,
            keepalive: cfg.keepalive(),
        },
    )?;

    pool.warm(cfg.min_connections)
        .await
        .with_context(|| format!("connecting to upstream {}", cfg.upstream))?;

    // Downstream side.
    let server = Server::bind(cfg.listen, cfg.accept_timeout())
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;

    let handler = Arc::new(ProxyHandler::new(pool, cfg.max_retries));
    let handle = server.spawn(handler.clone())?;
    info!(listen = %handle.local_addr(), "accepting downstream clients");

    tokio::signal::ctrl_c().await?;
    info!("closing listener and waiting for clients to finish");

    handle.stop().await;

    let pool = handler.pool();
    let status = pool.status();
    info!(
        size = status.size,
        available = status.available,
        evicted = status.evicted,
        "pool status at shutdown",
    );
    pool.drain().await;

    info!("shut down");
    Ok(())
}
