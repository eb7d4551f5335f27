//! [`TlsConnector`] — the upstream [`ConnectionFactory`].

use std::sync::Arc;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;

use epplb_domain::{
    // ---
    ConnectionFactory,
    DuplexPtr,
    Result,
};

use crate::error::TlsError;
use crate::tls::{client_config, TlsMaterial};

// ---------------------------------------------------------------------------
// TlsConnector
// ---------------------------------------------------------------------------

/// Dials `addr` over TCP and performs the TLS handshake, presenting the
/// registrar client certificate.
pub struct TlsConnector {
    // ---
    addr: String,
    server_name: ServerName<'static>,
    connector: tokio_rustls::TlsConnector,
}

// ---

impl TlsConnector {
    // ---
    /// Load `material` from disk and build a connector for `addr`.
    ///
    /// `server_name` is the name the upstream certificate must carry.
    pub fn new(addr: &str, server_name: &str, material: &TlsMaterial) -> std::result::Result<Self, TlsError> {
        // ---
        let cfg = client_config(material)?;
        Self::with_config(addr, server_name, cfg)
    }

    // ---

    /// Build a connector from an already assembled client config.
    pub fn with_config(
        addr: &str,
        server_name: &str,
        cfg: rustls::ClientConfig,
    ) -> std::result::Result<Self, TlsError> {
        // ---
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::ServerName(server_name.to_string()))?;

        Ok(Self {
            addr: addr.to_string(),
            server_name,
            connector: tokio_rustls::TlsConnector::from(Arc::new(cfg)),
        })
    }
}

// ---

#[async_trait]
impl ConnectionFactory for TlsConnector {
    // ---
    async fn create(&self) -> Result<DuplexPtr> {
        // ---
        let tcp = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| TlsError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        tcp.set_nodelay(true).ok();

        let stream = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|source| TlsError::Handshake {
                addr: self.addr.clone(),
                source,
            })?;

        tracing::debug!(addr = %self.addr, "upstream TLS session established");

        Ok(Box::new(stream))
    }

    // ---

    fn describe(&self) -> String {
        self.addr.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
