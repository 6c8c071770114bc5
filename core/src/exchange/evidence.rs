//! Evidence and debug notices for operators
//!
//! Evidence goes to the logging channel: the offending message is
//! forwarded verbatim and a descriptive record is posted as a reply.
//! Messages that may carry private data (contacts, locations, voice...)
//! or that a channel cannot hold (games, service messages) are never
//! forwarded; only the record is posted.
//!
//! Both paths use the same flood discipline as the exchange itself.

use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use crate::tasks::BackgroundTasks;
use crate::transport::{
    send_with_backoff, ChannelId, ExchangeTransport, MessageId, SourceMessage, TransportError,
};

/// Content types whose evidence is already on record elsewhere
const UNFORWARDED_TYPES: [&str; 2] = ["bmd", "ser"];

/// What is being reported about a message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceReport {
    /// Action taken ("ban", "delete", ...)
    pub level: String,
    /// Rule that matched
    pub rule: String,
    /// Detected content type code, if any
    pub content_type: Option<String>,
    /// User score, for score-based rules
    pub score: Option<f64>,
    /// Add the user's and forward source's names (name-based rules)
    pub include_names: bool,
    /// Free-form note, used when no built-in note applies
    pub more: Option<String>,
}

impl EvidenceReport {
    pub fn new(level: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            rule: rule.into(),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_names(mut self) -> Self {
        self.include_names = true;
        self
    }

    pub fn with_more(mut self, more: impl Into<String>) -> Self {
        self.more = Some(more.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvidenceOutcome {
    /// Content type needs no evidence
    Skipped,
    /// Only the record was posted
    Recorded { record: MessageId },
    /// Message forwarded; record posted as a reply unless that failed
    Forwarded {
        forwarded: MessageId,
        record: Option<MessageId>,
    },
    /// Hard transport failure
    Failed(TransportError),
}

/// Group a debug notice refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: ChannelId,
    pub title: String,
    pub link: Option<String>,
}

#[derive(Clone)]
pub struct EvidenceLog {
    transport: Arc<dyn ExchangeTransport>,
    logging_channel: ChannelId,
    debug_channel: ChannelId,
    sender: String,
    project_name: String,
    project_link: Option<String>,
    tasks: BackgroundTasks,
}

impl EvidenceLog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn ExchangeTransport>,
        logging_channel: ChannelId,
        debug_channel: ChannelId,
        sender: impl Into<String>,
        project_name: impl Into<String>,
        project_link: Option<String>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            transport,
            logging_channel,
            debug_channel,
            sender: sender.into(),
            project_name: project_name.into(),
            project_link,
            tasks,
        }
    }

    /// Post evidence about `message` to the logging channel
    pub async fn forward_evidence(
        &self,
        message: &SourceMessage,
        report: &EvidenceReport,
    ) -> EvidenceOutcome {
        if let Some(kind) = report.content_type.as_deref() {
            if UNFORWARDED_TYPES.contains(&kind) {
                return EvidenceOutcome::Skipped;
            }
        }

        let text = self.evidence_text(message, report);

        if !message.category.is_forwardable() {
            info!(
                "Not forwarding {} message {} from {}",
                message.category, message.message_id, message.chat_id
            );
            return match self.post(self.logging_channel, &text, None).await {
                Ok(record) => EvidenceOutcome::Recorded { record },
                Err(e) => {
                    warn!("Evidence record failed: {}", e);
                    EvidenceOutcome::Failed(e)
                }
            };
        }

        let forwarded = match send_with_backoff(|| {
            self.transport.forward_message(message, self.logging_channel)
        })
        .await
        {
            Ok(id) => id,
            Err(e) => {
                info!("Forward evidence message failed: {}", e);
                return EvidenceOutcome::Failed(e);
            }
        };

        let record = match self
            .post(self.logging_channel, &text, Some(forwarded))
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Evidence record for {} failed: {}", forwarded, e);
                None
            }
        };

        EvidenceOutcome::Forwarded { forwarded, record }
    }

    /// Tell the debug channel what was done in a group, in the background
    pub fn send_debug(
        &self,
        group: &GroupInfo,
        action: &str,
        uid: i64,
        mid: MessageId,
        content_type: Option<&str>,
    ) {
        let mut text = self.debug_header(group);
        let _ = writeln!(text, "User ID: `{}`", uid);
        let _ = writeln!(text, "Action: `{}`", action);
        let _ = writeln!(
            text,
            "Message: {}",
            general_link(&mid.to_string(), Some(&message_link(group.id, mid)))
        );
        if let Some(kind) = content_type {
            let _ = writeln!(text, "Content type: `{}`", kind);
        }

        let transport = self.transport.clone();
        let channel = self.debug_channel;
        self.tasks.spawn("debug-notice", async move {
            if let Err(e) = send_with_backoff(|| transport.send_message(channel, &text, None)).await {
                warn!("Debug notice failed: {}", e);
            }
        });
    }

    async fn post(
        &self,
        channel: ChannelId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError> {
        send_with_backoff(|| self.transport.send_message(channel, text, reply_to)).await
    }

    fn evidence_text(&self, message: &SourceMessage, report: &EvidenceReport) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "Project: `{}`", self.sender);
        let _ = writeln!(text, "User ID: `{}`", message.from_user.id);
        let _ = writeln!(text, "Level: `{}`", report.level);
        let _ = writeln!(text, "Rule: `{}`", report.rule);

        if let Some(kind) = &report.content_type {
            let _ = writeln!(text, "Content type: `{}`", kind);
        }

        if let Some(score) = report.score {
            let _ = writeln!(text, "User score: `{:.1}`", score);
        }

        if report.include_names {
            let name = message.from_user.full_name();
            if !name.is_empty() {
                let _ = writeln!(text, "User name: `{}`", name);
            }
            if let Some(forward_name) = message.forward_name.as_deref() {
                if !forward_name.is_empty() && forward_name != name {
                    let _ = writeln!(text, "Forward name: `{}`", forward_name);
                }
            }
        }

        if let Some(more) = more_note(message, report) {
            let _ = writeln!(text, "More: `{}`", more);
        }

        text
    }

    fn debug_header(&self, group: &GroupInfo) -> String {
        format!(
            "Project: {}\nGroup name: {}\nGroup ID: `{}`\n",
            general_link(&self.project_name, self.project_link.as_deref()),
            general_link(&group.title, group.link.as_deref()),
            group.id
        )
    }
}

fn more_note<'a>(message: &SourceMessage, report: &'a EvidenceReport) -> Option<&'a str> {
    match report.content_type.as_deref() {
        Some("sde") => return Some("User asked to delete all of their messages"),
        Some("pur") => return Some("Admin asked to purge these messages"),
        _ => {}
    }

    if message.category.is_privacy_sensitive() {
        Some("Not forwarded, may involve privacy")
    } else if message.category.is_channel_unforwardable() {
        Some("This kind of message cannot be forwarded to a channel")
    } else {
        report.more.as_deref()
    }
}

/// Markdown link, or plain text without a target
fn general_link(text: &str, link: Option<&str>) -> String {
    match link {
        Some(link) if !link.is_empty() => format!("[{}]({})", text, link),
        _ => format!("`{}`", text),
    }
}

/// Public link to a message in a supergroup
fn message_link(chat: ChannelId, mid: MessageId) -> String {
    let id = chat.0.to_string();
    let internal = id.strip_prefix("-100").unwrap_or(id.trim_start_matches('-'));
    format!("https://t.me/c/{}/{}", internal, mid)
}
