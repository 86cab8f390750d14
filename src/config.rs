//! Driver configuration
//!
//! Read from `~/.config/doorlock/config.toml` (or `--config`). Every field is
//! optional; a missing file means defaults.
//!
//! ```toml
//! room_target = "oasyss_000201"
//! entrance_target = "oasyss_0009999"
//! prefix = "unist"
//!
//! [timing]
//! scan_timeout_ms = 10000
//! byte_delay_ms = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use doorlock_session::SessionConfig;
use doorlock_transport::protocol::device;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Timing overrides; unset fields keep the session defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_disconnect_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrance_disconnect_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Complete driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Advertised name of the per-room lock
    pub room_target: String,
    /// Advertised name of the shared entrance device
    pub entrance_target: String,
    /// Name prefix for generic discovery
    pub prefix: String,
    pub timing: TimingConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            room_target: device::ROOM_LOCK.to_string(),
            entrance_target: device::ENTRANCE.to_string(),
            prefix: device::NAME_PREFIX.to_string(),
            timing: TimingConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("doorlock")
            .join("config.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Session timing with this config's overrides applied
    pub fn session_config(&self) -> SessionConfig {
        let t = &self.timing;
        let ms = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        let base = SessionConfig::default();

        let mut config = SessionConfig {
            scan_timeout: ms(t.scan_timeout_ms, base.scan_timeout),
            connect_timeout: ms(t.connect_timeout_ms, base.connect_timeout),
            settle_delay: ms(t.settle_delay_ms, base.settle_delay),
            auto_disconnect_delay: ms(t.auto_disconnect_delay_ms, base.auto_disconnect_delay),
            entrance_disconnect_delay: ms(
                t.entrance_disconnect_delay_ms,
                base.entrance_disconnect_delay,
            ),
            send: base.send,
        };
        config.send.byte_delay = ms(t.byte_delay_ms, base.send.byte_delay);
        config.send.retry_delay = ms(t.retry_delay_ms, base.send.retry_delay);
        config.send.max_retries = t.max_retries.unwrap_or(base.send.max_retries);
        config
    }
}
