//! TLS client configuration for upstream EPP connections.
//!
//! EPP registries authenticate registrars with client certificates, so the
//! client config always carries a cert + key and trusts only the CA bundle
//! it was given.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::TlsError;

// ---------------------------------------------------------------------------
// TlsMaterial
// ---------------------------------------------------------------------------

/// Paths to the PEM files the client presents and trusts.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    // ---
    /// Client certificate chain.
    pub cert: PathBuf,

    /// Private key for `cert`.
    pub key: PathBuf,

    /// CA certificates used to verify the upstream server.
    pub ca: PathBuf,
}

// ---------------------------------------------------------------------------
// PEM loading
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })
}

// ---

/// Load every certificate in the PEM file at `path`.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    // ---
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

// ---

/// Load the first private key (PKCS#1, PKCS#8 or SEC1) in `path`.
pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    // ---
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Pem {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

// ---------------------------------------------------------------------------
// Client TLS config
// ---------------------------------------------------------------------------

/// Build a `rustls::ClientConfig` that presents the registrar certificate
/// and trusts only the configured CA bundle.
pub fn client_config(material: &TlsMaterial) -> Result<rustls::ClientConfig, TlsError> {
    // ---
    let mut roots = rustls::RootCertStore::empty();
    for ca in load_certs(&material.ca)? {
        roots.add(ca)?;
    }

    let certs = load_certs(&material.cert)?;
    let key = load_key(&material.key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let cfg = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(Arc::new(roots))
        .with_client_auth_cert(certs, key)?;

    Ok(cfg)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
