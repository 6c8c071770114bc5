// Envelope types — the unit peers exchange over the shared channel

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::codec::EnvelopeError;

/// Payload carried in an envelope's `data` field.
///
/// Peers only understand four shapes. Anything else must be rejected
/// before it reaches the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Pure signal (e.g. the failover notice)
    Flag(bool),
    /// Plain integer value
    Integer(i64),
    /// Free-form string (e.g. a counter collection name)
    Text(String),
    /// Record with stable key order
    Record(Map<String, Value>),
}

impl Payload {
    /// Build a record payload from any serializable struct.
    ///
    /// Field order follows the struct declaration. Values that do not
    /// serialize to a JSON object are rejected.
    pub fn record<T: Serialize>(value: &T) -> Result<Self, EnvelopeError> {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Ok(Payload::Record(map)),
            Ok(other) => Err(EnvelopeError::UnsupportedPayload(kind_of(&other).to_string())),
            Err(e) => Err(EnvelopeError::Serialization(e.to_string())),
        }
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Payload::Flag(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Payload::Integer(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Ordered, duplicate-free set of receiver identities.
///
/// Insertion order is kept because it is the order of the `to` list on
/// the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiverSet(Vec<String>);

impl ReceiverSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a receiver. Returns false if it was already present.
    pub fn insert(&mut self, identity: impl Into<String>) -> bool {
        let identity = identity.into();
        if self.0.contains(&identity) {
            return false;
        }
        self.0.push(identity);
        true
    }

    /// Remove a receiver if present (idempotent)
    pub fn remove(&mut self, identity: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|r| r != identity);
        before != self.0.len()
    }

    /// Copy of this set with `identity` removed
    pub fn without(&self, identity: &str) -> Self {
        let mut copy = self.clone();
        copy.remove(identity);
        copy
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.0.iter().any(|r| r == identity)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for ReceiverSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = ReceiverSet::new();
        for identity in iter {
            set.insert(identity);
        }
        set
    }
}

/// A structured fact exchanged between peers.
///
/// Field order is the wire order: `from`, `to`, `action`, `type`, `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identity of the originating process
    pub from: String,
    /// Remaining receivers, sender excluded
    pub to: ReceiverSet,
    /// Coarse verb ("add", "update", "backup", "regex", "help")
    pub action: String,
    /// Verb qualifier ("bad", "watch", "score", "hide", "count", ...)
    #[serde(rename = "type")]
    pub action_type: String,
    /// Payload, `null` for pure signals
    #[serde(default)]
    pub data: Option<Payload>,
}

impl Envelope {
    pub fn new(
        from: impl Into<String>,
        to: ReceiverSet,
        action: impl Into<String>,
        action_type: impl Into<String>,
        data: Option<Payload>,
    ) -> Self {
        Self {
            from: from.into(),
            to,
            action: action.into(),
            action_type: action_type.into(),
            data,
        }
    }

    /// Whether a peer with `identity` should act on this envelope
    pub fn is_addressed_to(&self, identity: &str) -> bool {
        self.to.contains(identity)
    }
}
