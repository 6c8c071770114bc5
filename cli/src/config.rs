// Configuration management for the fleetlink CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/fleetlink/config.json
// - Linux: ~/.config/fleetlink/config.json
// - Windows: %APPDATA%\fleetlink\config.json

use anyhow::{Context, Result};
use fleetlink_core::ExchangeConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Exchange settings shared with the core
    #[serde(flatten)]
    pub exchange: ExchangeConfig,

    /// Spool transport root (defaults to the data directory)
    pub spool_dir: Option<String>,

    /// Minimum milliseconds between sends on one channel
    pub flood_interval_ms: Option<u64>,
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("fleetlink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("fleetlink");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        let config = if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn spool_dir(&self) -> Result<PathBuf> {
        match &self.spool_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Ok(Self::data_dir()?.join("spool")),
        }
    }

    pub fn state_dir() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("state"))
    }

    pub fn flood_interval(&self) -> Option<Duration> {
        self.flood_interval_ms.map(Duration::from_millis)
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "sender" => self.exchange.sender = value.to_string(),
            "emergency_receiver" => self.exchange.emergency_receiver = value.to_string(),
            "file_key" => self.exchange.file_key = value.to_string(),
            "kdf_rounds" => {
                self.exchange.kdf_rounds = value.parse().context("Invalid number")?;
            }
            "scratch_dir" => self.exchange.scratch_dir = PathBuf::from(value),
            "project_name" => self.exchange.project_name = value.to_string(),
            "project_link" => {
                self.exchange.project_link = (!value.is_empty()).then(|| value.to_string());
            }
            "spool_dir" => {
                self.spool_dir = (!value.is_empty()).then(|| value.to_string());
            }
            "flood_interval_ms" => {
                self.flood_interval_ms = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().context("Invalid number")?)
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.exchange
            .validate()
            .with_context(|| format!("Rejected value for {}", key))?;
        self.save()?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values (file key masked)
    pub fn list(&self) -> Vec<(String, String)> {
        let c = &self.exchange;
        vec![
            ("sender".to_string(), c.sender.clone()),
            ("emergency_receiver".to_string(), c.emergency_receiver.clone()),
            ("file_key".to_string(), "********".to_string()),
            ("kdf_rounds".to_string(), c.kdf_rounds.to_string()),
            ("scratch_dir".to_string(), c.scratch_dir.display().to_string()),
            ("project_name".to_string(), c.project_name.clone()),
            (
                "project_link".to_string(),
                c.project_link.clone().unwrap_or_else(|| "(none)".to_string()),
            ),
            ("exchange_channel".to_string(), c.channels.exchange.to_string()),
            ("hide_channel".to_string(), c.channels.hide.to_string()),
            ("critical_channel".to_string(), c.channels.critical.to_string()),
            ("logging_channel".to_string(), c.channels.logging.to_string()),
            ("debug_channel".to_string(), c.channels.debug.to_string()),
            (
                "spool_dir".to_string(),
                self.spool_dir.clone().unwrap_or_else(|| "(auto)".to_string()),
            ),
            (
                "flood_interval_ms".to_string(),
                self.flood_interval_ms
                    .map(|ms| ms.to_string())
                    .unwrap_or_else(|| "(off)".to_string()),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.exchange.sender, "CLEAN");
        assert!(config.spool_dir.is_none());
        assert!(config.flood_interval().is_none());
    }

    #[test]
    fn test_flattened_json() {
        let config: Config =
            serde_json::from_str(r#"{"sender": "NOSPAM", "flood_interval_ms": 250}"#).unwrap();
        assert_eq!(config.exchange.sender, "NOSPAM");
        assert_eq!(config.flood_interval(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_file_key_masked() {
        let config = Config::default();
        assert_eq!(config.get("file_key").as_deref(), Some("********"));
    }
}
