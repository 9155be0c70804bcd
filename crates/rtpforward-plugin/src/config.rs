//! Plugin configuration
//!
//! Defaults, then `janus.plugin.rtpforward.toml` from the gateway's
//! configuration directory, then `RTPFORWARD_*` environment variables.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// File looked up in the configuration directory handed over at init
pub const CONFIG_FILE: &str = "janus.plugin.rtpforward.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watchdog sweep interval
    pub gc_interval_ms: u64,
    /// How long a destroyed session stays reachable before it is reclaimed
    pub grace_period_ms: u64,
    /// Relay RTCP sent back by the receiver toward the browser
    pub feedback_relay: bool,
    /// Read timeout of the feedback relay worker
    pub feedback_poll_ms: u64,
    /// Outbound interface for multicast targets
    pub multicast_interface: Ipv4Addr,
    /// Tracing filter used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gc_interval_ms: 500,
            grace_period_ms: 5000,
            feedback_relay: false,
            feedback_poll_ms: 250,
            multicast_interface: Ipv4Addr::LOCALHOST,
            log_filter: "rtpforward=info".to_string(),
        }
    }
}

impl Config {
    pub fn load(config_dir: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(dir) = config_dir {
            let path = dir.join(CONFIG_FILE);
            tracing::debug!("Looking for configuration in {:?}", path);
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("RTPFORWARD").try_parsing(true))
            .build()?;
        let config: Config = settings.try_deserialize()?;

        anyhow::ensure!(config.gc_interval_ms > 0, "gc_interval_ms must be positive");
        anyhow::ensure!(config.feedback_poll_ms > 0, "feedback_poll_ms must be positive");

        Ok(config)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms.max(1))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn feedback_poll(&self) -> Duration {
        Duration::from_millis(self.feedback_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(dir.path())).unwrap();
        assert_eq!(config.gc_interval(), Duration::from_millis(500));
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert!(!config.feedback_relay);
        assert_eq!(config.multicast_interface, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "gc_interval_ms = 100\nfeedback_relay = true\nmulticast_interface = \"127.0.0.2\"\n",
        )
        .unwrap();

        let config = Config::load(Some(dir.path())).unwrap();
        assert_eq!(config.gc_interval_ms, 100);
        assert!(config.feedback_relay);
        assert_eq!(config.multicast_interface, Ipv4Addr::new(127, 0, 0, 2));
        // untouched keys keep their defaults
        assert_eq!(config.grace_period_ms, 5000);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "gc_interval_ms = 0\n").unwrap();
        assert!(Config::load(Some(dir.path())).is_err());
    }
}
