//! Configuration management
//!
//! Handles loading and validating proxy configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub udp: UdpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server (listener) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the SOCKS5 server binds for both TCP and UDP
    pub bind_addr: SocketAddr,
}

/// Upstream (chained) proxy configuration.
///
/// When `addr` is unset, the engine dials the target network directly
/// (`DirectDialer`). When set, the engine speaks SOCKS5 client-role to the
/// named upstream proxy for every CONNECT/UDP ASSOCIATE (`ChainedDialer`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpstreamConfig {
    /// `host:port` of an upstream SOCKS5 proxy to chain through
    pub addr: Option<String>,
    /// Username offered to the upstream proxy, if it requires auth
    pub user: Option<String>,
    /// Password offered to the upstream proxy, if it requires auth
    pub pass: Option<String>,
}

/// UDP relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UdpConfig {
    /// Datagram read buffer size
    #[serde(default = "default_udp_buf_size")]
    pub buf_size: usize,
    /// Idle timeout before a NAT session is evicted, in seconds
    #[serde(default = "default_udp_idle_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            buf_size: default_udp_buf_size(),
            idle_timeout_secs: default_udp_idle_secs(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable the metrics endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Metrics server bind address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_udp_buf_size() -> usize {
    65536
}
fn default_udp_idle_secs() -> u64 {
    120
}
fn default_metrics_addr() -> SocketAddr {
    "127.0.0.1:9090".parse().unwrap()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&contents).with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.udp.idle_timeout_secs == 0 {
            anyhow::bail!("udp.idle_timeout_secs must be > 0");
        }
        if self.udp.buf_size < 262 {
            // must fit at least the largest SOCKS5 UDP header (3 + 259) plus a byte of payload
            anyhow::bail!("udp.buf_size must be large enough to hold a SOCKS5 UDP header");
        }
        if let Some(user) = &self.upstream.user {
            if user.is_empty() || user.len() > 255 {
                anyhow::bail!("upstream.user must be 1-255 bytes");
            }
        }
        if let Some(pass) = &self.upstream.pass {
            if pass.len() > 255 {
                anyhow::bail!("upstream.pass must be at most 255 bytes");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_defaults() {
        let udp = UdpConfig::default();
        assert_eq!(udp.idle_timeout_secs, 120);
        assert_eq!(udp.buf_size, 65536);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:1080"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr.port(), 1080);
        assert!(config.upstream.addr.is_none());
        assert_eq!(config.udp.idle_timeout_secs, 120);
    }

    #[test]
    fn test_validate_rejects_empty_user() {
        let config = Config {
            server: ServerConfig {
                bind_addr: "127.0.0.1:1080".parse().unwrap(),
            },
            upstream: UpstreamConfig {
                addr: Some("10.0.0.1:1080".to_string()),
                user: Some(String::new()),
                pass: None,
            },
            udp: UdpConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(config.validate().is_err());
    }
}
