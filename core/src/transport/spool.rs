//! Spool transport — a directory-backed channel transport
//!
//! Every channel is a subdirectory of the spool root named after the
//! channel id. Sending writes one JSON record per message (documents are
//! copied next to their record). A channel whose directory is missing is
//! unusable, which is reported as a hard failure.
//!
//! An optional minimum interval per channel emulates flood control: a
//! send that comes too early is refused with the remaining wait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::abstraction::{
    ChannelId, ExchangeTransport, MessageCategory, MessageId, SourceMessage, TransportError,
};

const RECORD_EXT: &str = "json";
const ATTACHMENT_EXT: &str = "bin";

/// What a spooled record holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpoolEntry {
    Text {
        text: String,
        reply_to: Option<MessageId>,
    },
    Document {
        caption: String,
        attachment: String,
        original_name: Option<String>,
    },
    Forward {
        source_chat: ChannelId,
        source_message: MessageId,
        category: MessageCategory,
        text: Option<String>,
    },
}

/// One message in a spooled channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolRecord {
    pub id: MessageId,
    pub channel: ChannelId,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: SpoolEntry,
}

pub struct SpoolTransport {
    root: PathBuf,
    min_interval: Option<Duration>,
    last_send: Mutex<HashMap<ChannelId, Instant>>,
    next_id: AtomicI64,
}

impl SpoolTransport {
    /// Create a spool transport rooted at `root` (must already exist)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            min_interval: None,
            last_send: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(Utc::now().timestamp_micros()),
        }
    }

    /// Refuse sends on a channel closer together than `interval`
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = Some(interval);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory backing a channel
    pub fn channel_dir(&self, channel: ChannelId) -> PathBuf {
        self.root.join(channel.to_string())
    }

    /// Make a channel usable by creating its directory
    pub fn open_channel(&self, channel: ChannelId) -> std::io::Result<()> {
        std::fs::create_dir_all(self.channel_dir(channel))
    }

    /// Whether a channel directory exists
    pub fn is_open(&self, channel: ChannelId) -> bool {
        self.channel_dir(channel).is_dir()
    }

    /// All records of a channel, oldest first
    pub fn read_channel(&self, channel: ChannelId) -> std::io::Result<Vec<SpoolRecord>> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(self.channel_dir(channel))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let contents = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<SpoolRecord>(&contents) {
                Ok(record) => records.push(record),
                Err(e) => debug!("Skipping unreadable spool record {}: {}", path.display(), e),
            }
        }
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    fn check_flood(&self, channel: ChannelId) -> Result<(), TransportError> {
        let Some(interval) = self.min_interval else {
            return Ok(());
        };

        let now = Instant::now();
        let mut last_send = self.last_send.lock();
        if let Some(last) = last_send.get(&channel) {
            let elapsed = now.duration_since(*last);
            if elapsed < interval {
                return Err(TransportError::RateLimited {
                    retry_after: interval - elapsed,
                });
            }
        }
        last_send.insert(channel, now);
        Ok(())
    }

    fn open_dir(&self, channel: ChannelId) -> Result<PathBuf, TransportError> {
        let dir = self.channel_dir(channel);
        if !dir.is_dir() {
            return Err(TransportError::Hard(format!("channel {} is unavailable", channel)));
        }
        Ok(dir)
    }

    async fn write_record(
        &self,
        dir: &Path,
        channel: ChannelId,
        id: MessageId,
        entry: SpoolEntry,
    ) -> Result<MessageId, TransportError> {
        let record = SpoolRecord {
            id,
            channel,
            sent_at: Utc::now(),
            entry,
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| TransportError::Hard(format!("record encoding failed: {}", e)))?;

        let path = dir.join(format!("{}.{}", id, RECORD_EXT));
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| TransportError::Hard(format!("write {} failed: {}", path.display(), e)))?;

        debug!("Spooled message {} to channel {}", id, channel);
        Ok(id)
    }

    fn allocate_id(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ExchangeTransport for SpoolTransport {
    async fn send_message(
        &self,
        channel: ChannelId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError> {
        let dir = self.open_dir(channel)?;
        self.check_flood(channel)?;

        let id = self.allocate_id();
        let entry = SpoolEntry::Text {
            text: text.to_string(),
            reply_to,
        };
        self.write_record(&dir, channel, id, entry).await
    }

    async fn send_document(
        &self,
        channel: ChannelId,
        path: &Path,
        caption: &str,
    ) -> Result<MessageId, TransportError> {
        let dir = self.open_dir(channel)?;
        self.check_flood(channel)?;

        let id = self.allocate_id();
        let attachment = format!("{}.{}", id, ATTACHMENT_EXT);
        tokio::fs::copy(path, dir.join(&attachment))
            .await
            .map_err(|e| TransportError::Hard(format!("attach {} failed: {}", path.display(), e)))?;

        let entry = SpoolEntry::Document {
            caption: caption.to_string(),
            attachment,
            original_name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        };
        self.write_record(&dir, channel, id, entry).await
    }

    async fn forward_message(
        &self,
        message: &SourceMessage,
        target: ChannelId,
    ) -> Result<MessageId, TransportError> {
        let dir = self.open_dir(target)?;
        self.check_flood(target)?;

        let id = self.allocate_id();
        let entry = SpoolEntry::Forward {
            source_chat: message.chat_id,
            source_message: message.message_id,
            category: message.category,
            text: message.text.clone(),
        };
        self.write_record(&dir, target, id, entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::abstraction::UserInfo;

    const CHANNEL: ChannelId = ChannelId(-100);

    fn spool() -> (tempfile::TempDir, SpoolTransport) {
        let dir = tempfile::tempdir().unwrap();
        let transport = SpoolTransport::new(dir.path());
        (dir, transport)
    }

    #[tokio::test]
    async fn test_missing_channel_is_hard_failure() {
        let (_dir, transport) = spool();
        let result = transport.send_message(CHANNEL, "hello", None).await;
        assert!(matches!(result, Err(TransportError::Hard(_))));
    }

    #[tokio::test]
    async fn test_text_roundtrip_through_spool() {
        let (_dir, transport) = spool();
        transport.open_channel(CHANNEL).unwrap();

        let first = transport.send_message(CHANNEL, "one", None).await.unwrap();
        let second = transport.send_message(CHANNEL, "two", Some(first)).await.unwrap();
        assert!(second > first);

        let records = transport.read_channel(CHANNEL).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1].entry,
            SpoolEntry::Text {
                text: "two".to_string(),
                reply_to: Some(first),
            }
        );
    }

    #[tokio::test]
    async fn test_document_copied_with_caption() {
        let (dir, transport) = spool();
        transport.open_channel(CHANNEL).unwrap();

        let src = dir.path().join("payload.dat");
        std::fs::write(&src, b"payload bytes").unwrap();

        let id = transport.send_document(CHANNEL, &src, "caption").await.unwrap();
        let records = transport.read_channel(CHANNEL).unwrap();

        match &records[0].entry {
            SpoolEntry::Document { caption, attachment, original_name } => {
                assert_eq!(caption, "caption");
                assert_eq!(original_name.as_deref(), Some("payload.dat"));
                let copied = std::fs::read(transport.channel_dir(CHANNEL).join(attachment)).unwrap();
                assert_eq!(copied, b"payload bytes");
            }
            other => panic!("Wrong entry kind: {:?}", other),
        }
        assert_eq!(records[0].id, id);
    }

    #[tokio::test]
    async fn test_forward_records_source() {
        let (_dir, transport) = spool();
        transport.open_channel(CHANNEL).unwrap();

        let message = SourceMessage {
            chat_id: ChannelId(-500),
            message_id: MessageId(77),
            from_user: UserInfo {
                id: 9,
                first_name: "Eve".to_string(),
                last_name: None,
            },
            category: MessageCategory::Photo,
            forward_name: None,
            text: Some("look".to_string()),
        };

        transport.forward_message(&message, CHANNEL).await.unwrap();
        let records = transport.read_channel(CHANNEL).unwrap();
        assert!(matches!(
            records[0].entry,
            SpoolEntry::Forward { source_message: MessageId(77), .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_reports_remaining_wait() {
        let dir = tempfile::tempdir().unwrap();
        let transport = SpoolTransport::new(dir.path()).with_min_interval(Duration::from_secs(5));
        transport.open_channel(CHANNEL).unwrap();

        transport.send_message(CHANNEL, "first", None).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        match transport.send_message(CHANNEL, "second", None).await {
            Err(TransportError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(3));
            }
            other => panic!("Expected rate limit, got {:?}", other),
        }
    }
}
