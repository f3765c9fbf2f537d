//! Server configuration loaded from TOML.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP listen address for newline-delimited JSON events
    pub tcp_addr: SocketAddr,
    /// UDP listen address for one JSON event per datagram
    pub udp_addr: SocketAddr,
    /// Number of worker loops serving connections
    pub threads: usize,
    /// Seconds between ingest statistics log lines
    pub stats_interval_secs: f32,
    /// Default processing graph settings
    pub pipeline: PipelineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: SocketAddr::from(([127, 0, 0, 1], 5555)),
            udp_addr: SocketAddr::from(([127, 0, 0, 1], 5555)),
            threads: 4,
            stats_interval_secs: 60.0,
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Settings of the default processing graph.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// State-change notices let through per host and service per interval
    pub throttle_count: usize,
    /// Throttle interval in seconds
    pub throttle_secs: i64,
    /// Seconds a critical state must hold before it is reported as stable
    pub stable_secs: i64,
    /// Critical host count that raises the fleet-wide alert
    pub critical_hosts: usize,
    /// Ttl for events that carry none
    pub default_ttl_secs: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            throttle_count: 5,
            throttle_secs: 60,
            stable_secs: 30,
            critical_hosts: 3,
            default_ttl_secs: 60.0,
        }
    }
}

impl ServerConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parses and validates a configuration document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges the loops and combinators rely on.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            bail!("threads must be at least 1");
        }
        if !(self.stats_interval_secs.is_finite() && self.stats_interval_secs > 0.0) {
            bail!("stats_interval_secs must be a positive number of seconds");
        }

        let pipeline = &self.pipeline;
        if pipeline.throttle_secs <= 0 {
            bail!("pipeline.throttle_secs must be positive");
        }
        if pipeline.stable_secs < 0 {
            bail!("pipeline.stable_secs must not be negative");
        }
        if pipeline.critical_hosts == 0 {
            bail!("pipeline.critical_hosts must be at least 1");
        }
        if !(pipeline.default_ttl_secs.is_finite() && pipeline.default_ttl_secs >= 0.0) {
            bail!("pipeline.default_ttl_secs must be a non-negative number of seconds");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = ServerConfig::from_toml(
            r#"
            tcp_addr = "0.0.0.0:7000"
            threads = 2

            [pipeline]
            critical_hosts = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.tcp_addr.port(), 7000);
        assert_eq!(config.threads, 2);
        assert_eq!(config.pipeline.critical_hosts, 10);
        assert_eq!(config.pipeline.throttle_secs, 60);
        assert_eq!(config.udp_addr, ServerConfig::default().udp_addr);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(ServerConfig::from_toml("thread = 4").is_err());
        assert!(ServerConfig::from_toml("[pipeline]\nthrottle = 1").is_err());
    }

    #[test]
    fn test_validation() {
        assert!(ServerConfig::from_toml("threads = 0").is_err());
        assert!(ServerConfig::from_toml("stats_interval_secs = 0.0").is_err());
        assert!(ServerConfig::from_toml("[pipeline]\nthrottle_secs = 0").is_err());
        assert!(ServerConfig::from_toml("[pipeline]\nstable_secs = -1").is_err());
        assert!(ServerConfig::from_toml("[pipeline]\ncritical_hosts = 0").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ServerConfig::load(Path::new("/nonexistent/vigil.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
