//! Session Configuration
//!
//! This module consolidates the configuration structures used by the session
//! runtime: timer bounds, bootstrap nodes and retry policy, channel buffer
//! sizes and file transfer limits. Everything is serde-serializable so hosts
//! can load it from a TOML file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{SessionError, SessionResult};
use crate::types::PublicKey;

// ----------------------------------------------------------------------------
// Timer Configuration
// ----------------------------------------------------------------------------

/// Bounds applied to the engine's recommended iteration interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Lower bound, keeps the tick loop from busy-looping
    pub min_interval_ms: u64,
    /// Upper bound on the time between two iterations
    pub max_interval_ms: u64,
    /// Interval used before the engine made a recommendation
    pub initial_interval_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 5,
            max_interval_ms: 1000,
            initial_interval_ms: 50,
        }
    }
}

impl TimerConfig {
    /// Clamp an engine recommendation into the configured bounds
    pub fn clamp(&self, recommended_ms: u64) -> u64 {
        recommended_ms.clamp(self.min_interval_ms, self.max_interval_ms)
    }
}

// ----------------------------------------------------------------------------
// Bootstrap Configuration
// ----------------------------------------------------------------------------

/// A relay node used to join the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapNode {
    pub host: String,
    pub port: u16,
    pub public_key: PublicKey,
}

impl BootstrapNode {
    pub fn new<H: Into<String>>(host: H, port: u16, public_key: PublicKey) -> Self {
        Self {
            host: host.into(),
            port,
            public_key,
        }
    }
}

/// Bootstrap nodes plus the retry policy used when none can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Relay nodes, tried in order
    pub nodes: Vec<BootstrapNode>,
    /// Maximum bootstrap calls per connect attempt
    pub max_attempts: u32,
    /// First retry delay after bootstrap exhaustion
    pub retry_initial_ms: u64,
    /// Backoff ceiling
    pub retry_max_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            max_attempts: 4,
            retry_initial_ms: 2_000,
            retry_max_ms: 60_000,
        }
    }
}

impl BootstrapConfig {
    pub fn with_nodes(nodes: Vec<BootstrapNode>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    /// Validate the bootstrap configuration
    pub fn validate(&self) -> SessionResult<()> {
        if self.nodes.is_empty() {
            return Err(SessionError::config_error("at least one bootstrap node is required"));
        }
        if self.max_attempts == 0 {
            return Err(SessionError::config_error("bootstrap max_attempts must be positive"));
        }
        if self.retry_initial_ms == 0 || self.retry_initial_ms > self.retry_max_ms {
            return Err(SessionError::config_error(
                "bootstrap retry delays must satisfy 0 < initial <= max",
            ));
        }
        if self.nodes.iter().any(|node| node.host.is_empty() || node.port == 0) {
            return Err(SessionError::config_error("bootstrap node needs a host and a port"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the channels into the serialized context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for the command channel (callers → session task)
    pub command_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,
        }
    }
}

// ----------------------------------------------------------------------------
// Transfer Configuration
// ----------------------------------------------------------------------------

/// Limits applied to file transfers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Largest file accepted by `send_file`
    pub max_file_size: u64,
    /// Largest chunk read from an upload source in one request
    pub max_chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_file_size: 4 * 1024 * 1024 * 1024, // 4GB
            max_chunk_size: 1371,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timer: TimerConfig,
    pub bootstrap: BootstrapConfig,
    pub channels: ChannelConfig,
    pub transfers: TransferConfig,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration tuned for tests: fast timer and short retry delays
    pub fn testing() -> Self {
        Self {
            timer: TimerConfig {
                min_interval_ms: 1,
                max_interval_ms: 100,
                initial_interval_ms: 10,
            },
            bootstrap: BootstrapConfig {
                nodes: Vec::new(),
                max_attempts: 2,
                retry_initial_ms: 10,
                retry_max_ms: 80,
            },
            channels: ChannelConfig {
                command_buffer_size: 100,
            },
            transfers: TransferConfig::default(),
        }
    }

    pub fn with_timer(mut self, timer: TimerConfig) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: BootstrapConfig) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_channels(mut self, channels: ChannelConfig) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_transfers(mut self, transfers: TransferConfig) -> Self {
        self.transfers = transfers;
        self
    }

    /// Validate the configuration. Bootstrap nodes are checked at connect time.
    pub fn validate(&self) -> SessionResult<()> {
        if self.timer.min_interval_ms == 0 {
            return Err(SessionError::config_error("timer min_interval_ms must be positive"));
        }
        if self.timer.min_interval_ms > self.timer.max_interval_ms {
            return Err(SessionError::config_error(
                "timer min_interval_ms must not exceed max_interval_ms",
            ));
        }
        if self.channels.command_buffer_size == 0 {
            return Err(SessionError::config_error("command_buffer_size must be positive"));
        }
        if self.transfers.max_chunk_size == 0 {
            return Err(SessionError::config_error("max_chunk_size must be positive"));
        }
        Ok(())
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> SessionResult<Self> {
        let config: SessionConfig = toml::from_str(text)
            .map_err(|e| SessionError::config_error(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> SessionResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> BootstrapNode {
        BootstrapNode::new("node.example.org", 33445, PublicKey::new([0x11; 32]))
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(SessionConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_timer_clamp() {
        let timer = TimerConfig {
            min_interval_ms: 10,
            max_interval_ms: 200,
            initial_interval_ms: 50,
        };
        assert_eq!(timer.clamp(0), 10);
        assert_eq!(timer.clamp(50), 50);
        assert_eq!(timer.clamp(5000), 200);
    }

    #[test]
    fn test_invalid_timer_bounds() {
        let config = SessionConfig::default().with_timer(TimerConfig {
            min_interval_ms: 100,
            max_interval_ms: 10,
            initial_interval_ms: 50,
        });
        assert!(matches!(
            config.validate(),
            Err(SessionError::Configuration { .. })
        ));
    }

    #[test]
    fn test_bootstrap_validation() {
        assert!(BootstrapConfig::default().validate().is_err());
        assert!(BootstrapConfig::with_nodes(vec![node()]).validate().is_ok());

        let mut config = BootstrapConfig::with_nodes(vec![node()]);
        config.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let text = r#"
            [timer]
            min_interval_ms = 20
            max_interval_ms = 500

            [bootstrap]
            max_attempts = 3

            [[bootstrap.nodes]]
            host = "node.example.org"
            port = 33445
            public_key = "1111111111111111111111111111111111111111111111111111111111111111"
        "#;

        let config = SessionConfig::from_toml_str(text).unwrap();
        assert_eq!(config.timer.min_interval_ms, 20);
        assert_eq!(config.timer.max_interval_ms, 500);
        assert_eq!(config.timer.initial_interval_ms, 50);
        assert_eq!(config.bootstrap.max_attempts, 3);
        assert_eq!(config.bootstrap.nodes, vec![node()]);
        assert_eq!(config.channels, ChannelConfig::default());
    }

    #[test]
    fn test_from_toml_rejects_bad_key() {
        let text = r#"
            [[bootstrap.nodes]]
            host = "node.example.org"
            port = 33445
            public_key = "not-hex"
        "#;
        assert!(SessionConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "[channels]\ncommand_buffer_size = 7\n").unwrap();

        let config = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(config.channels.command_buffer_size, 7);

        let missing = SessionConfig::load_from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(SessionError::Io(_))));
    }
}
