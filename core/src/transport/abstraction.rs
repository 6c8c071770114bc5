//! Transport abstraction for the exchange layer
//!
//! The exchange rides on a chat-style channel transport that was never
//! designed for message passing. This module names the narrow surface
//! the coordinator needs from it: send text, send a document, forward a
//! message. Rate limits and hard failures are reported as distinct
//! error variants so callers can tell them apart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Identifier of a channel/chat on the underlying transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of a message inside a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Category of a message observed in a group.
///
/// Only matters for evidence forwarding: some categories must never be
/// forwarded verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    Text,
    Photo,
    Video,
    Animation,
    Audio,
    Document,
    Sticker,
    Contact,
    Location,
    Venue,
    VideoNote,
    Voice,
    Game,
    Service,
}

impl MessageCategory {
    /// Categories that may expose private data of the sender
    pub fn is_privacy_sensitive(self) -> bool {
        matches!(
            self,
            MessageCategory::Contact
                | MessageCategory::Location
                | MessageCategory::Venue
                | MessageCategory::VideoNote
                | MessageCategory::Voice
        )
    }

    /// Categories the transport refuses to forward into a channel
    pub fn is_channel_unforwardable(self) -> bool {
        matches!(self, MessageCategory::Game | MessageCategory::Service)
    }

    /// Whether a verbatim forward may be attempted at all
    pub fn is_forwardable(self) -> bool {
        !self.is_privacy_sensitive() && !self.is_channel_unforwardable()
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageCategory::Text => "text",
            MessageCategory::Photo => "photo",
            MessageCategory::Video => "video",
            MessageCategory::Animation => "animation",
            MessageCategory::Audio => "audio",
            MessageCategory::Document => "document",
            MessageCategory::Sticker => "sticker",
            MessageCategory::Contact => "contact",
            MessageCategory::Location => "location",
            MessageCategory::Venue => "venue",
            MessageCategory::VideoNote => "video_note",
            MessageCategory::Voice => "voice",
            MessageCategory::Game => "game",
            MessageCategory::Service => "service",
        };
        write!(f, "{}", name)
    }
}

/// Author of a source message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
}

impl UserInfo {
    /// Display name as "first last", trimmed
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last).trim().to_string(),
            _ => self.first_name.trim().to_string(),
        }
    }
}

/// A message seen in a group, as handed to evidence forwarding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMessage {
    pub chat_id: ChannelId,
    pub message_id: MessageId,
    pub from_user: UserInfo,
    pub category: MessageCategory,
    /// Name of the original author when this message is itself a forward
    pub forward_name: Option<String>,
    pub text: Option<String>,
}

/// Errors reported by a transport call
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportError {
    /// Flood control: retry after the advertised wait
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Channel unusable or unreachable; never retried in place
    #[error("Send failed: {0}")]
    Hard(String),
}

impl TransportError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TransportError::RateLimited { .. })
    }
}

/// Chat-style transport primitives consumed by the exchange layer.
///
/// Implementations must not retry rate limits themselves; they report
/// `RateLimited` and let the flood-aware sender wait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeTransport: Send + Sync {
    /// Send a text message, optionally as a reply
    async fn send_message(
        &self,
        channel: ChannelId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError>;

    /// Send a file with a caption
    async fn send_document(
        &self,
        channel: ChannelId,
        path: &Path,
        caption: &str,
    ) -> Result<MessageId, TransportError>;

    /// Forward an existing message verbatim
    async fn forward_message(
        &self,
        message: &SourceMessage,
        target: ChannelId,
    ) -> Result<MessageId, TransportError>;
}
