//! Configuration module for the acquisition bridge
//!
//! This module handles engine configuration including:
//! - Event channel capacity and backpressure timeouts
//! - Frame buffer growth policy
//! - Engine policies (overwrite handling, session retention)
//! - Logging for the demo binary
//!
//! # Data Location
//!
//! The default configuration file lives in the platform data directory
//! under `dev.mda-bridge`:
//! - **Linux**: `~/.local/share/dev.mda-bridge/config.toml`
//! - **macOS**: `~/Library/Application Support/dev.mda-bridge/config.toml`
//! - **Windows**: `%APPDATA%\dev.mda-bridge\config.toml`
//!
//! # Formats
//!
//! Files ending in `.json` are read and written as JSON; anything else is
//! treated as TOML.
//!
//! # Example
//!
//! ```ignore
//! use mda_bridge::config::BridgeConfig;
//!
//! let mut config = BridgeConfig::load_or_default(None);
//! config.channel.capacity = 4096;
//! config.save("bridge.toml")?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.mda-bridge";

/// Default configuration filename
pub const CONFIG_FILE: &str = "config.toml";

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default configuration file
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub channel: ChannelSettings,

    #[serde(default)]
    pub buffer: BufferSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

impl BridgeConfig {
    /// Load a configuration file from disk and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                BridgeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                BridgeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or the default location when `None`, falling back to defaults on any error
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(p) => p,
            None => return Self::default(),
        };
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Self::default();
        }

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BridgeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| BridgeError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| BridgeError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            BridgeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.channel.capacity == 0 {
            return Err(BridgeError::Config(
                "channel.capacity must be at least 1".to_string(),
            ));
        }
        if !(self.buffer.growth_factor > 1.0) {
            return Err(BridgeError::Config(format!(
                "buffer.growth_factor must be greater than 1.0 (got {})",
                self.buffer.growth_factor
            )));
        }
        if self.buffer.max_slots == 0 {
            return Err(BridgeError::Config(
                "buffer.max_slots must be at least 1".to_string(),
            ));
        }
        if self.engine.notification_capacity == 0 {
            return Err(BridgeError::Config(
                "engine.notification_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        BridgeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");

        let mut config = BridgeConfig::default();
        config.channel.capacity = 64;
        config.engine.overwrite_policy = OverwritePolicy::FlagAnomaly;
        config.save(&path).unwrap();

        let loaded = BridgeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bridge.json");

        let mut config = BridgeConfig::default();
        config.buffer.growth_factor = 1.5;
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.trim_start().starts_with('{'));
        assert_eq!(BridgeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[channel]\ncapacity = 8\n").unwrap();

        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.channel.capacity, 8);
        assert_eq!(config.buffer, BufferSettings::default());
    }

    #[test]
    fn test_invalid_growth_factor_rejected() {
        let mut config = BridgeConfig::default();
        config.buffer.growth_factor = 1.0;
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_load_or_default_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        assert_eq!(BridgeConfig::load_or_default(Some(&path)), BridgeConfig::default());
    }
}
