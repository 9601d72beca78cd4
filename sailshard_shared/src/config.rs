//! Configuration system.
//!
//! Loads server/client configuration from JSON strings (file IO left to app).
//! Every field has a default, so a partial document only overrides what it names.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lines::DEFAULT_MAX_LINE_LEN;
use crate::net::{max_frame_len, DEFAULT_PORT};

/// Highest accepted tick rate. Keeps the tick period at one millisecond or
/// more.
pub const MAX_TICK_HZ: u32 = 1000;

/// Broadcast server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:27015`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Tick broadcasts per second.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Frames that may wait in one connection's outbound queue before the
    /// connection is dropped as too slow.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// Upper bound for a single socket write.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// How long a handler waits for queue space for one echo reply.
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,
    /// Longest accepted client line in bytes.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server address, e.g. `127.0.0.1:27015`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Longest accepted inbound frame. Must cover a server line limit after
    /// JSON escaping, see [`max_frame_len`].
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_listen_addr() -> String {
    format!("0.0.0.0:{}", DEFAULT_PORT)
}

fn default_server_addr() -> String {
    format!("127.0.0.1:{}", DEFAULT_PORT)
}

fn default_tick_hz() -> u32 {
    20
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_write_timeout_ms() -> u64 {
    1000
}

fn default_echo_timeout_ms() -> u64 {
    1000
}

fn default_max_line_len() -> usize {
    DEFAULT_MAX_LINE_LEN
}

fn default_max_frame_len() -> usize {
    max_frame_len(DEFAULT_MAX_LINE_LEN)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            tick_hz: default_tick_hz(),
            outbound_capacity: default_outbound_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            echo_timeout_ms: default_echo_timeout_ms(),
            max_line_len: default_max_line_len(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_hz == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.tick_hz > MAX_TICK_HZ {
            return Err(ConfigError::TickRateTooHigh(self.tick_hz));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Zero("outbound_capacity"));
        }
        if self.max_line_len == 0 {
            return Err(ConfigError::Zero("max_line_len"));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Zero("write_timeout_ms"));
        }
        Ok(())
    }

    /// Interval between two ticks.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.tick_hz.clamp(1, MAX_TICK_HZ)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroTickRate,
    TickRateTooHigh(u32),
    Zero(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroTickRate => write!(f, "tick_hz must be greater than zero"),
            ConfigError::TickRateTooHigh(hz) => {
                write!(f, "tick_hz {} exceeds the maximum of {}", hz, MAX_TICK_HZ)
            }
            ConfigError::Zero(field) => write!(f, "{} must be greater than zero", field),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_server() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:27015");
        assert_eq!(cfg.tick_hz, 20);
        assert_eq!(cfg.tick_period(), Duration::from_millis(50));
        assert!(cfg.validate().is_ok());
        assert_eq!(ClientConfig::default().server_addr, "127.0.0.1:27015");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ServerConfig::from_json_str(r#"{"tick_hz": 64, "listen_addr": "127.0.0.1:0"}"#)
            .unwrap();
        assert_eq!(cfg.tick_hz, 64);
        assert_eq!(cfg.listen_addr, "127.0.0.1:0");
        assert_eq!(cfg.outbound_capacity, 256);
        assert_eq!(cfg.max_line_len, DEFAULT_MAX_LINE_LEN);
    }

    #[test]
    fn zero_values_are_rejected() {
        let cfg = ServerConfig {
            tick_hz: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTickRate));

        let cfg = ServerConfig {
            outbound_capacity: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("outbound_capacity")));
    }

    #[test]
    fn excessive_tick_rate_is_rejected() {
        let cfg = ServerConfig {
            tick_hz: 2_000_000_000,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::TickRateTooHigh(2_000_000_000))
        );
        assert_eq!(cfg.tick_period(), Duration::from_millis(1));

        let fastest = ServerConfig {
            tick_hz: MAX_TICK_HZ,
            ..Default::default()
        };
        assert!(fastest.validate().is_ok());
        assert_eq!(fastest.tick_period(), Duration::from_millis(1));
    }

    #[test]
    fn client_config_from_json() {
        let cfg = ClientConfig::from_json_str(r#"{"server_addr": "10.0.0.2:27015"}"#).unwrap();
        assert_eq!(cfg.server_addr, "10.0.0.2:27015");
        assert_eq!(cfg.max_frame_len, max_frame_len(DEFAULT_MAX_LINE_LEN));
        assert!(cfg.max_frame_len > 6 * DEFAULT_MAX_LINE_LEN);
    }
}
