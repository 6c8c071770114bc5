// Receiver registry — which peers listen to which topic

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::envelope::ReceiverSet;

/// Topic for message declarations
pub const TOPIC_DECLARE: &str = "declare";
/// Topic for bad-user reports
pub const TOPIC_BAD: &str = "bad";
/// Topic for watch-list updates
pub const TOPIC_WATCH: &str = "watch";
/// Topic for score updates
pub const TOPIC_SCORE: &str = "score";

/// Read-only topic → receivers mapping loaded from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiverRegistry {
    topics: BTreeMap<String, ReceiverSet>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style topic registration
    pub fn with_topic<I, S>(mut self, topic: &str, receivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics
            .insert(topic.to_string(), receivers.into_iter().collect());
        self
    }

    /// Receivers of a topic; unconfigured topics have none
    pub fn resolve(&self, topic: &str) -> ReceiverSet {
        self.topics.get(topic).cloned().unwrap_or_default()
    }

    pub fn topics(&self) -> impl Iterator<Item = (&str, &ReceiverSet)> {
        self.topics.iter().map(|(k, v)| (k.as_str(), v))
    }
}
