//! CLI configuration for `epplb`.
//!
//! Usage:
//!   epplb --upstream epp.example.net:700 --cert crt.pem --key key.pem --ca ca.pem
//!   epplb --listen 127.0.0.1:10700 --max-connections 4 --keepalive-secs 0

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

// ---

use epplb_tls::TlsMaterial;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "epplb", about = "EPP load balancer with transparent upstream failover")]
pub struct Config {
    // ---
    /// TCP address downstream EPP clients connect to.
    #[arg(long, default_value = "0.0.0.0:10700")]
    pub listen: SocketAddr,

    /// Upstream EPP server as `host:port`.
    #[arg(long, default_value = "epp-ote.verisign-grs.com:700")]
    pub upstream: String,

    /// Name the upstream certificate is verified against.
    /// Defaults to the host part of `--upstream`.
    #[arg(long)]
    pub server_name: Option<String>,

    /// PEM encoded client certificate.
    #[arg(long, default_value = "crt.pem")]
    pub cert: PathBuf,

    /// PEM encoded private key for `--cert`.
    #[arg(long, default_value = "key.pem")]
    pub key: PathBuf,

    /// PEM encoded CA certificate(s) trusted for the upstream.
    #[arg(long, default_value = "ca.pem")]
    pub ca: PathBuf,

    /// Maximum number of pooled upstream connections.
    #[arg(long, default_value_t = 8)]
    pub max_connections: usize,

    /// Upstream connections opened before accepting downstream clients.
    #[arg(long, default_value_t = 1)]
    pub min_connections: usize,

    /// Failovers allowed per downstream session.
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Idle seconds before an upstream gets a `<hello>`. 0 disables.
    #[arg(long, default_value_t = 300)]
    pub keepalive_secs: u64,

    /// Deadline of each accept call, bounding how long a stop takes to notice.
    #[arg(long, default_value_t = 10)]
    pub accept_timeout_ms: u64,
}

// ---

impl Config {
    // ---
    /// Reject combinations clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        // ---
        if self.max_connections == 0 {
            return Err("--max-connections must be at least 1".into());
        }
        if self.min_connections > self.max_connections {
            return Err(format!(
                "--min-connections ({}) exceeds --max-connections ({})",
                self.min_connections, self.max_connections
            ));
        }
        if self.accept_timeout_ms == 0 {
            return Err("--accept-timeout-ms must be at least 1".into());
        }
        if self.server_name().is_empty() {
            return Err(format!("cannot derive a server name from --upstream {}", self.upstream));
        }
        Ok(())
    }

    // ---

    /// `--server-name`, or the host part of `--upstream`.
    pub fn server_name(&self) -> String {
        // ---
        if let Some(name) = &self.server_name {
            return name.clone();
        }

        let host = match self.upstream.rsplit_once(':') {
            Some((host, _port)) => host,
            None => self.upstream.as_str(),
        };
        host.trim_start_matches('[').trim_end_matches(']').to_string()
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn tls_material(&self) -> TlsMaterial {
        TlsMaterial {
            cert: self.cert.clone(),
            key: self.key.clone(),
            ca: self.ca.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("epplb").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        // ---
        let cfg = parse(&[]);
        assert_eq!(cfg.listen, "0.0.0.0:10700".parse().unwrap());
        assert_eq!(cfg.upstream, "epp-ote.verisign-grs.com:700");
        assert_eq!(cfg.server_name(), "epp-ote.verisign-grs.com");
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.min_connections, 1);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.keepalive(), Some(Duration::from_secs(300)));
        assert_eq!(cfg.accept_timeout(), Duration::from_millis(10));
        assert_eq!(cfg.tls_material().ca, PathBuf::from("ca.pem"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn explicit_server_name_wins() {
        let cfg = parse(&["--upstream", "10.0.0.1:700", "--server-name", "epp.example.net"]);
        assert_eq!(cfg.server_name(), "epp.example.net");
    }

    #[test]
    fn server_name_strips_ipv6_brackets() {
        let cfg = parse(&["--upstream", "[::1]:700"]);
        assert_eq!(cfg.server_name(), "::1");
    }

    #[test]
    fn zero_keepalive_disables() {
        assert_eq!(parse(&["--keepalive-secs", "0"]).keepalive(), None);
    }

    #[test]
    fn min_above_max_is_rejected() {
        let cfg = parse(&["--max-connections", "2", "--min-connections", "3"]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_listen_address_fails_parse() {
        assert!(Config::try_parse_from(["epplb", "--listen", "nowhere"]).is_err());
    }
}
