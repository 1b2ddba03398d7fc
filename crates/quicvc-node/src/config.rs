// ============================================
// File: crates/quicvc-node/src/config.rs
// ============================================
//! # Node Configuration
//!
//! ## Creation Reason
//! One TOML file drives identity, listen address, handshake and
//! liveness timers for both the CLI and embedding applications.
//!
//! ## Main Functionality
//! - `NodeConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Per-section defaults and validation
//!
//! ## Configuration Sections
//! - `identity`: device label and key file
//! - `network`: UDP listen address
//! - `handshake`: handshake timeout
//! - `heartbeat`: probe interval and idle timeout
//! - `limits`: connection limits
//! - `logging`: log level
//!
//! ## Example Configuration
//! ```toml
//! [identity]
//! device_id = "laptop"
//! key_file = "quicvc_identity.json"
//!
//! [network]
//! listen_addr = "0.0.0.0:49497"
//!
//! [handshake]
//! timeout_ms = 5000
//!
//! [heartbeat]
//! interval_secs = 20
//! idle_timeout_secs = 60
//!
//! [limits]
//! max_connections = 256
//!
//! [logging]
//! level = "info"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every section is optional; missing sections take defaults
//! - Validate config before starting a listener
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{NodeError, Result};

/// Default UDP port for local QUICVC discovery.
pub const DEFAULT_PORT: u16 = 49497;

// ============================================
// NodeConfig
// ============================================

/// Main node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Local identity.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Handshake configuration.
    #[serde(default)]
    pub handshake: HandshakeConfig,

    /// Liveness configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!(path = %path_str, "Loading configuration");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NodeError::config_load(&path_str, e.to_string()))?;

        let config = Self::parse(&content)
            .map_err(|e| NodeError::config_load(&path_str, e.to_string()))?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    /// Returns error if parsing or validation fails.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| NodeError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        self.identity.validate()?;
        self.handshake.validate()?;
        self.heartbeat.validate()?;
        self.limits.validate()?;
        Ok(())
    }

    /// Serializes configuration to a TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

// ============================================
// IdentityConfig
// ============================================

/// Identity configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Local device label.
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Path to the identity key file.
    #[serde(default = "default_key_file")]
    pub key_file: String,
}

fn default_device_id() -> String {
    "quicvc-device".to_string()
}

fn default_key_file() -> String {
    "quicvc_identity.json".to_string()
}

impl IdentityConfig {
    fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(NodeError::config_invalid(
                "identity.device_id",
                "cannot be empty",
            ));
        }
        Ok(())
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            key_file: default_key_file(),
        }
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// UDP listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

// ============================================
// HandshakeConfig
// ============================================

/// Handshake configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// How long `connect` waits for `established`.
    #[serde(default = "default_handshake_timeout")]
    pub timeout_ms: u64,
}

fn default_handshake_timeout() -> u64 {
    5000
}

impl HandshakeConfig {
    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(NodeError::config_invalid(
                "handshake.timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Returns the timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_handshake_timeout(),
        }
    }
}

// ============================================
// HeartbeatConfig
// ============================================

/// Liveness configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between heartbeat probes.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,

    /// Seconds without inbound traffic before a connection is closed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_heartbeat_interval() -> u64 {
    20
}

fn default_idle_timeout() -> u64 {
    60
}

impl HeartbeatConfig {
    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(NodeError::config_invalid(
                "heartbeat.interval_secs",
                "must be greater than 0",
            ));
        }

        if self.idle_timeout_secs <= self.interval_secs {
            return Err(NodeError::config_invalid(
                "heartbeat.idle_timeout_secs",
                "must be greater than heartbeat.interval_secs",
            ));
        }

        Ok(())
    }

    /// Returns the probe interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Returns the idle timeout.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

// ============================================
// LimitsConfig
// ============================================

/// Resource limits configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent connections per listener or manager.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    256
}

impl LimitsConfig {
    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(NodeError::config_invalid(
                "limits.max_connections",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.listen_addr.port(), DEFAULT_PORT);
        assert_eq!(config.handshake.timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_config_format() {
        let toml = r#"
            [identity]
            device_id = "laptop"
            key_file = "/tmp/id.json"

            [network]
            listen_addr = "127.0.0.1:40000"

            [handshake]
            timeout_ms = 1500

            [heartbeat]
            interval_secs = 5
            idle_timeout_secs = 30

            [limits]
            max_connections = 8

            [logging]
            level = "debug"
        "#;

        let config = NodeConfig::parse(toml).unwrap();
        assert_eq!(config.identity.device_id, "laptop");
        assert_eq!(config.network.listen_addr.port(), 40000);
        assert_eq!(config.handshake.timeout_ms, 1500);
        assert_eq!(config.heartbeat.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.limits.max_connections, 8);
    }

    #[test]
    fn test_partial_config_takes_defaults() {
        let config = NodeConfig::parse("[handshake]\ntimeout_ms = 100\n").unwrap();
        assert_eq!(config.heartbeat.interval_secs, 20);
        assert_eq!(config.identity.device_id, "quicvc-device");
    }

    #[test]
    fn test_validation_failures() {
        assert!(NodeConfig::parse("[handshake]\ntimeout_ms = 0\n").is_err());
        assert!(NodeConfig::parse("[limits]\nmax_connections = 0\n").is_err());
        assert!(NodeConfig::parse("[identity]\ndevice_id = \"  \"\n").is_err());
        assert!(
            NodeConfig::parse("[heartbeat]\ninterval_secs = 30\nidle_timeout_secs = 30\n").is_err()
        );
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = NodeConfig::default();
        let reparsed = NodeConfig::parse(&config.to_toml()).unwrap();
        assert_eq!(reparsed.limits.max_connections, config.limits.max_connections);
    }
}
