//! Exchange configuration
//!
//! Settings every exchange participant needs:
//! - Its own identity (excluded from every outgoing `to` list)
//! - The exchange, hide, and operator-facing channels
//! - The receiver registry
//! - Scratch area and shared file key for side-channel transfers

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::crypto::DEFAULT_KDF_ROUNDS;
use crate::exchange::registry::{
    ReceiverRegistry, TOPIC_BAD, TOPIC_DECLARE, TOPIC_SCORE, TOPIC_WATCH,
};
use crate::transport::{ChannelId, ExchangeChannels};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Sender identity must not be empty")]
    EmptySender,

    #[error("Exchange and hide channel must differ, both are {0}")]
    SameExchangeAndHide(ChannelId),

    #[error("File key must not be empty")]
    EmptyFileKey,

    #[error("Empty receiver identity in topic {0}")]
    EmptyReceiver(String),

    #[error("Emergency receiver must not be empty")]
    EmptyEmergencyReceiver,
}

// ============================================================================
// CONFIG TYPES
// ============================================================================

/// Channels this process talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Primary data exchange channel
    pub exchange: ChannelId,
    /// Fallback exchange channel used after failover
    pub hide: ChannelId,
    /// Operator alerts
    pub critical: ChannelId,
    /// Evidence records
    pub logging: ChannelId,
    /// Debug notices
    pub debug: ChannelId,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            exchange: ChannelId(-1001),
            hide: ChannelId(-1002),
            critical: ChannelId(-1003),
            logging: ChannelId(-1004),
            debug: ChannelId(-1005),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// This process's identity
    pub sender: String,

    pub channels: ChannelConfig,

    /// Topic → receivers
    pub receivers: ReceiverRegistry,

    /// Peer told when failover happens
    pub emergency_receiver: String,

    /// Staging area for encrypted transfers
    pub scratch_dir: PathBuf,

    /// Passphrase shared by all peers for side-channel files
    pub file_key: String,

    /// PBKDF2 rounds for newly encrypted files
    pub kdf_rounds: u32,

    /// Word types whose regex counters can be shared
    pub regex_topics: Vec<String>,

    /// Shown in operator-facing texts
    pub project_name: String,
    pub project_link: Option<String>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            sender: "CLEAN".to_string(),
            channels: ChannelConfig::default(),
            receivers: ReceiverRegistry::new()
                .with_topic(TOPIC_DECLARE, ["ANALYZE", "CLEAN", "LANG", "NOSPAM", "USER"])
                .with_topic(TOPIC_BAD, ["ANALYZE", "CAPTCHA", "LANG", "NOSPAM", "USER", "WATCH"])
                .with_topic(TOPIC_WATCH, ["ANALYZE", "CAPTCHA", "LANG", "NOSPAM", "USER"])
                .with_topic(TOPIC_SCORE, ["ANALYZE", "CAPTCHA", "LANG", "NOSPAM", "USER"]),
            emergency_receiver: "EMERGENCY".to_string(),
            scratch_dir: std::env::temp_dir().join("fleetlink").join("tmp"),
            file_key: "change-me".to_string(),
            kdf_rounds: DEFAULT_KDF_ROUNDS,
            regex_topics: vec!["ad".to_string(), "con".to_string()],
            project_name: "Fleetlink".to_string(),
            project_link: None,
        }
    }
}

impl ExchangeConfig {
    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sender.trim().is_empty() {
            return Err(ConfigError::EmptySender);
        }

        if self.channels.exchange == self.channels.hide {
            return Err(ConfigError::SameExchangeAndHide(self.channels.exchange));
        }

        if self.file_key.is_empty() {
            return Err(ConfigError::EmptyFileKey);
        }

        if self.emergency_receiver.trim().is_empty() {
            return Err(ConfigError::EmptyEmergencyReceiver);
        }

        for (topic, receivers) in self.receivers.topics() {
            if receivers.iter().any(|r| r.trim().is_empty()) {
                return Err(ConfigError::EmptyReceiver(topic.to_string()));
            }
        }

        Ok(())
    }

    /// Primary/degraded channel pair for the coordinator
    pub fn exchange_channels(&self) -> ExchangeChannels {
        ExchangeChannels::new(self.channels.exchange, self.channels.hide)
    }
}
