// Domain actions — pre-shaped payloads handed to the broadcaster
//
// Each action resolves its receivers from the registry (or a fixed
// peer), shapes the payload and shares it. Local bookkeeping happens
// before the network send and never blocks it.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::coordinator::{Broadcaster, ShareOutcome, ShareRequest};
use super::registry::{ReceiverRegistry, TOPIC_BAD, TOPIC_DECLARE, TOPIC_SCORE, TOPIC_WATCH};
use crate::envelope::{Payload, ReceiverSet};
use crate::store::{collection_name, DeclaredMessages, RegexCounters, UserStore};
use crate::ExchangeError;

/// Peer that handles help requests
pub const HELP_RECEIVER: &str = "USER";
/// Peer that collects regex counters
pub const REGEX_RECEIVER: &str = "REGEX";

/// Kind of watch-list entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchKind {
    Ban,
    Delete,
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchKind::Ban => write!(f, "ban"),
            WatchKind::Delete => write!(f, "delete"),
        }
    }
}

/// Which messages a delete help request covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    /// Only the given group
    #[default]
    Single,
    /// Every group
    Global,
}

/// What a help request asks the USER peer to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpLevel {
    Ban,
    Delete(DeleteScope),
}

impl HelpLevel {
    fn label(self) -> &'static str {
        match self {
            HelpLevel::Ban => "ban",
            HelpLevel::Delete(_) => "delete",
        }
    }
}

#[derive(Serialize)]
struct BadUser {
    id: i64,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct WatchUser<'a> {
    id: i64,
    #[serde(rename = "type")]
    kind: WatchKind,
    until: &'a str,
}

#[derive(Serialize)]
struct Score {
    id: i64,
    score: f64,
}

#[derive(Serialize)]
struct Declaration {
    group_id: i64,
    message_id: i64,
}

#[derive(Serialize)]
struct HelpRequest {
    group_id: i64,
    user_id: i64,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    scope: Option<DeleteScope>,
}

/// Round to one decimal place, as scores are shared
pub fn round_score(score: f64) -> f64 {
    (score * 10.0).round() / 10.0
}

/// Domain-level sharing on top of a [`Broadcaster`]
#[derive(Clone)]
pub struct ExchangeActions {
    broadcaster: Broadcaster,
    registry: ReceiverRegistry,
    users: Arc<UserStore>,
    declared: Arc<DeclaredMessages>,
    counters: Arc<RegexCounters>,
}

impl ExchangeActions {
    pub fn new(
        broadcaster: Broadcaster,
        registry: ReceiverRegistry,
        users: Arc<UserStore>,
        declared: Arc<DeclaredMessages>,
        counters: Arc<RegexCounters>,
    ) -> Self {
        Self {
            broadcaster,
            registry,
            users,
            declared,
            counters,
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn users(&self) -> &Arc<UserStore> {
        &self.users
    }

    pub fn declared(&self) -> &Arc<DeclaredMessages> {
        &self.declared
    }

    pub fn counters(&self) -> &Arc<RegexCounters> {
        &self.counters
    }

    async fn share_record<T: Serialize>(
        &self,
        receivers: ReceiverSet,
        action: &str,
        action_type: &str,
        record: &T,
    ) -> Result<ShareOutcome, ExchangeError> {
        let data = Payload::record(record)?;
        let request = ShareRequest::new(receivers, action, action_type).with_data(data);
        self.broadcaster.share(request).await
    }

    /// Report a bad user to the "bad" topic
    pub async fn share_bad_user(&self, uid: i64) -> Result<ShareOutcome, ExchangeError> {
        let record = BadUser { id: uid, kind: "user" };
        self.share_record(self.registry.resolve(TOPIC_BAD), "add", "bad", &record)
            .await
    }

    /// Put a user on the watch list until `until` (opaque to this layer)
    pub async fn share_watch_user(
        &self,
        kind: WatchKind,
        uid: i64,
        until: &str,
    ) -> Result<ShareOutcome, ExchangeError> {
        let record = WatchUser {
            id: uid,
            kind,
            until,
        };
        self.share_record(self.registry.resolve(TOPIC_WATCH), "add", "watch", &record)
            .await
    }

    /// Recompute this process's score for `uid`, persist, then share it.
    ///
    /// A persistence failure is logged and the score is shared anyway.
    pub async fn update_score(&self, uid: i64) -> Result<ShareOutcome, ExchangeError> {
        let score = self.users.refresh_score(uid, self.broadcaster.sender());
        if let Err(e) = self.users.save() {
            warn!("Failed to persist score of {}: {}", uid, e);
        }

        let record = Score {
            id: uid,
            score: round_score(score),
        };
        debug!("Sharing score {} for user {}", record.score, uid);
        self.share_record(self.registry.resolve(TOPIC_SCORE), "update", "score", &record)
            .await
    }

    /// Mark a message as handled here and tell the "declare" topic
    pub async fn declare_message(
        &self,
        gid: i64,
        mid: i64,
    ) -> Result<ShareOutcome, ExchangeError> {
        self.declared.declare(gid, mid);
        let record = Declaration {
            group_id: gid,
            message_id: mid,
        };
        self.share_record(
            self.registry.resolve(TOPIC_DECLARE),
            "update",
            "declare",
            &record,
        )
        .await
    }

    /// Ask the USER peer to ban a user or delete their messages
    pub async fn ask_for_help(
        &self,
        level: HelpLevel,
        gid: i64,
        uid: i64,
    ) -> Result<ShareOutcome, ExchangeError> {
        let scope = match level {
            HelpLevel::Delete(scope) => Some(scope),
            HelpLevel::Ban => None,
        };
        let record = HelpRequest {
            group_id: gid,
            user_id: uid,
            scope,
        };
        let receivers: ReceiverSet = [HELP_RECEIVER].into_iter().collect();
        self.share_record(receivers, "help", level.label(), &record)
            .await
    }

    /// Send a topic's regex counters to the REGEX peer as an encrypted file.
    ///
    /// Empty collections are not sent. The staged file is removed by the
    /// broadcaster once the share is settled.
    pub async fn share_regex_count(&self, topic: &str) -> Result<ShareOutcome, ExchangeError> {
        let counts = self.counters.snapshot(topic)?;
        if counts.is_empty() {
            debug!("No {} counts to share", topic);
            return Ok(ShareOutcome::NothingToShare);
        }

        let receivers = [REGEX_RECEIVER]
            .into_iter()
            .collect::<ReceiverSet>()
            .without(self.broadcaster.sender());
        if receivers.is_empty() {
            return Ok(ShareOutcome::NoReceivers);
        }

        let file = self.broadcaster.scratch().data_to_file(&counts).await?;
        let request = ShareRequest::new(receivers, "regex", "count")
            .with_data(collection_name(topic))
            .with_file(file);
        self.broadcaster.share(request).await
    }
}
