//! TOML Configuration for the Node Binary
//!
//! Optional file-based settings, every field falls back to a sensible
//! default so a bare `ipcrf_node` run works. CLI flags override whatever
//! the file says.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use common::NodeRole;

fn default_srate() -> f64 {
    1.92e6
}

fn default_queue_capacity() -> usize {
    radio::config::DEFAULT_QUEUE_CAPACITY
}

fn default_time_scale() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level configuration file structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Radio device configuration
    #[serde(default)]
    pub device: DeviceSection,
    /// Logging configuration
    #[serde(default)]
    pub log: LogSection,
}

/// Radio device configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceSection {
    /// Node role selecting the rendezvous direction
    #[serde(default)]
    pub role: NodeRole,
    /// Server rendezvous path override
    pub server_sock: Option<PathBuf>,
    /// Client rendezvous path override
    pub client_sock: Option<PathBuf>,
    /// Sample rate in Hz, both directions
    #[serde(default = "default_srate")]
    pub srate: f64,
    /// Transmit gain in dB
    #[serde(default)]
    pub tx_gain: f64,
    /// Receive gain in dB
    #[serde(default)]
    pub rx_gain: f64,
    /// Receive ring capacity in subframes
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// TTI step multiplier, 1 runs at real time
    #[serde(default = "default_time_scale")]
    pub time_scale: u32,
    /// SCHED_RR priority for the receive worker
    pub realtime_priority: Option<u8>,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            role: NodeRole::default(),
            server_sock: None,
            client_sock: None,
            srate: default_srate(),
            tx_gain: 0.0,
            rx_gain: 0.0,
            queue_capacity: default_queue_capacity(),
            time_scale: default_time_scale(),
            realtime_priority: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogSection {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Load and parse a configuration file.
pub fn load(path: &Path) -> Result<NodeConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("cannot parse config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg: NodeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.device.role, NodeRole::Loopback);
        assert_eq!(cfg.device.srate, 1.92e6);
        assert_eq!(cfg.device.queue_capacity, 20);
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn test_partial_config_parses() {
        let cfg: NodeConfig = toml::from_str(
            r#"
            [device]
            role = "base-station"
            srate = 11.52e6
            realtime_priority = 40

            [log]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.device.role, NodeRole::BaseStation);
        assert_eq!(cfg.device.srate, 11.52e6);
        assert_eq!(cfg.device.realtime_priority, Some(40));
        assert_eq!(cfg.log.level, "debug");
    }
}
