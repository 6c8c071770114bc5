// Regex counters — per-topic hit counts shared with the REGEX peer
//
// Topics are fixed when the process starts. Each topic has its own lock
// so counting in one word type never blocks another.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use super::backend::StoreError;

/// Hit count per pattern
pub type PatternCounts = BTreeMap<String, u64>;

#[derive(Debug, Default)]
pub struct RegexCounters {
    topics: HashMap<String, RwLock<PatternCounts>>,
}

impl RegexCounters {
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics
                .into_iter()
                .map(|t| (t.into(), RwLock::new(PatternCounts::new())))
                .collect(),
        }
    }

    fn topic(&self, topic: &str) -> Result<&RwLock<PatternCounts>, StoreError> {
        self.topics
            .get(topic)
            .ok_or_else(|| StoreError::UnknownTopic(topic.to_string()))
    }

    /// Count one hit of `pattern`, returning the new count
    pub fn record(&self, topic: &str, pattern: &str) -> Result<u64, StoreError> {
        let mut counts = self.topic(topic)?.write();
        let count = counts.entry(pattern.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    /// Copy of a topic's counts
    pub fn snapshot(&self, topic: &str) -> Result<PatternCounts, StoreError> {
        Ok(self.topic(topic)?.read().clone())
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Known topics, sorted
    pub fn topics(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.topics.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Name peers use for a topic's counter collection
pub fn collection_name(topic: &str) -> String {
    format!("{}_words", topic)
}
