// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Watchdog configuration.
//!
//! Loaded once at startup from a JSON file (or assembled from CLI flags);
//! never reloaded while the process runs.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Placeholder substituted with the relay identifier in the PLC command.
pub const RELAY_PLACEHOLDER: &str = "{relay}";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One entry of the static slave -> relay map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveRecord {
    /// Address the slave connects from.
    pub slave_ip: IpAddr,

    /// PLC relay wired to the slave's power.
    pub relay: String,
}

impl SlaveRecord {
    pub fn new(slave_ip: IpAddr, relay: impl Into<String>) -> Self {
        Self {
            slave_ip,
            relay: relay.into(),
        }
    }
}

/// PLC endpoint and command settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// PLC host name or IP address.
    #[serde(default = "default_plc_address")]
    pub address: String,

    /// PLC TCP port.
    #[serde(default = "default_plc_port")]
    pub port: u16,

    /// Command sent per reset; `{relay}` is replaced by the relay id.
    #[serde(default = "default_command_template")]
    pub command_template: String,

    /// Connect + send budget (milliseconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// How long to wait for an (ignored) reply (milliseconds).
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,

    /// Maximum reply bytes drained before closing.
    #[serde(default = "default_reply_buffer")]
    pub reply_buffer_bytes: usize,
}

fn default_plc_address() -> String {
    "192.168.0.99".to_string()
}

fn default_plc_port() -> u16 {
    8501
}

fn default_command_template() -> String {
    "RS {relay}\r\n".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_reply_timeout() -> u64 {
    1000
}

fn default_reply_buffer() -> usize {
    1024
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            address: default_plc_address(),
            port: default_plc_port(),
            command_template: default_command_template(),
            connect_timeout_ms: default_connect_timeout(),
            reply_timeout_ms: default_reply_timeout(),
            reply_buffer_bytes: default_reply_buffer(),
        }
    }
}

impl PlcConfig {
    /// `host:port` string used to connect.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Watchdog master configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port slaves report to (default: 50000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Silence after which a slave is reset (seconds)
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Liveness scan cadence (milliseconds)
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,

    /// Close a slave connection after this long without bytes (seconds)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Longest accepted protocol line, terminator excluded (bytes)
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    /// Minimum gap between two monitor-driven resets of one relay (seconds).
    /// 0 re-triggers on every tick until the slave reports again.
    #[serde(default)]
    pub reset_cooldown_secs: u64,

    /// Restore reset counters from the counts log at startup
    #[serde(default = "default_true")]
    pub reload_counts: bool,

    /// Append-only `<relay> <count>` log
    #[serde(default = "default_reset_counts_path")]
    pub reset_counts_path: PathBuf,

    /// Directory holding `smart_<relay>.jsonl` files
    #[serde(default = "default_telemetry_dir")]
    pub telemetry_dir: PathBuf,

    /// Operational log file (stdout only when unset)
    #[serde(default = "default_log_file")]
    pub log_file: Option<PathBuf>,

    /// PLC settings
    #[serde(default)]
    pub plc: PlcConfig,

    /// Static slave -> relay map
    #[serde(default)]
    pub slaves: Vec<SlaveRecord>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    50000
}

fn default_heartbeat_timeout() -> u64 {
    180
}

fn default_check_interval() -> u64 {
    1000
}

fn default_idle_timeout() -> u64 {
    10
}

fn default_max_line_bytes() -> usize {
    1024 * 1024 // 1 MB
}

fn default_true() -> bool {
    true
}

fn default_reset_counts_path() -> PathBuf {
    PathBuf::from("reset_counts.txt")
}

fn default_telemetry_dir() -> PathBuf {
    PathBuf::from("smart_logs")
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("master.log"))
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            check_interval_ms: default_check_interval(),
            idle_timeout_secs: default_idle_timeout(),
            max_line_bytes: default_max_line_bytes(),
            reset_cooldown_secs: 0,
            reload_counts: true,
            reset_counts_path: default_reset_counts_path(),
            telemetry_dir: default_telemetry_dir(),
            log_file: default_log_file(),
            plc: PlcConfig::default(),
            slaves: Vec::new(),
        }
    }
}

impl WatchdogConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sample configuration with the six-slave bench layout.
    pub fn sample() -> Self {
        let slaves = (0..6u8)
            .map(|i| {
                SlaveRecord::new(
                    IpAddr::V4(Ipv4Addr::new(192, 168, 0, 100 + i)),
                    format!("R{}", 500 + u32::from(i)),
                )
            })
            .collect();
        Self {
            slaves,
            ..Default::default()
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reset_cooldown(&self) -> Duration {
        Duration::from_secs(self.reset_cooldown_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port cannot be 0".into()));
        }
        if self.heartbeat_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout_secs cannot be 0".into(),
            ));
        }
        if self.check_interval_ms == 0 {
            return Err(ConfigError::Invalid("check_interval_ms cannot be 0".into()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("idle_timeout_secs cannot be 0".into()));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::Invalid("max_line_bytes cannot be 0".into()));
        }
        if !self.plc.command_template.contains(RELAY_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "plc.command_template must contain {}",
                RELAY_PLACEHOLDER
            )));
        }
        if self.slaves.is_empty() {
            return Err(ConfigError::Invalid("No slaves configured".into()));
        }

        let mut seen = HashSet::new();
        for slave in &self.slaves {
            if slave.relay.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Slave {} has an empty relay id",
                    slave.slave_ip
                )));
            }
            if !seen.insert(slave.slave_ip) {
                return Err(ConfigError::Invalid(format!(
                    "Slave {} is listed more than once",
                    slave.slave_ip
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatchdogConfig::default();
        assert_eq!(config.port, 50000);
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(180));
        assert_eq!(config.check_interval(), Duration::from_secs(1));
        assert_eq!(config.reset_cooldown_secs, 0);
        assert!(config.reload_counts);
        assert_eq!(config.plc.command_template, "RS {relay}\r\n");
        // No slaves yet.
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = WatchdogConfig::sample();
        assert_eq!(config.slaves.len(), 6);
        assert_eq!(config.slaves[0].relay, "R500");
        assert_eq!(config.slaves[5].slave_ip.to_string(), "192.168.0.105");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.json");

        let config = WatchdogConfig::sample();
        config.to_file(&path).unwrap();
        let loaded = WatchdogConfig::from_file(&path).unwrap();

        assert_eq!(loaded.slaves, config.slaves);
        assert_eq!(loaded.plc.port, 8501);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "port": 6000,
            "plc": { "address": "10.0.0.1" },
            "slaves": [ { "slave_ip": "10.0.0.5", "relay": "R9" } ]
        }"#;
        let config: WatchdogConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.plc.address, "10.0.0.1");
        assert_eq!(config.plc.port, 8501);
        assert_eq!(config.heartbeat_timeout_secs, 180);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_port_zero() {
        let config = WatchdogConfig {
            port: 0,
            ..WatchdogConfig::sample()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_duplicate_slave() {
        let mut config = WatchdogConfig::sample();
        let dup = config.slaves[0].clone();
        config.slaves.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_validation_template_without_placeholder() {
        let mut config = WatchdogConfig::sample();
        config.plc.command_template = "RS\r\n".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = WatchdogConfig::from_file(Path::new("/nonexistent/watchdog.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
