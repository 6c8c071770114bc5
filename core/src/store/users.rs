// Users — per-user detection history and peer scores
//
// Scores from every peer are kept side by side; this process only ever
// writes its own entry. The whole map is flushed as one blob.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use super::backend::{StateBackend, StoreError};

/// Namespace the user map is flushed under
pub const USERS_NAMESPACE: &str = "user_ids";

/// Score contributed by each detection
pub const SCORE_PER_DETECTION: f64 = 0.6;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Groups the user was detected in
    pub detected: BTreeSet<i64>,
    /// Score per peer (lower-cased peer identity)
    pub score: BTreeMap<String, f64>,
}

pub struct UserStore {
    users: RwLock<HashMap<i64, UserRecord>>,
    backend: Arc<dyn StateBackend>,
}

impl UserStore {
    /// Load the user map from `backend`, starting empty if nothing was saved
    pub fn load(backend: Arc<dyn StateBackend>) -> Result<Self, StoreError> {
        let users = match backend.get(USERS_NAMESPACE)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => HashMap::new(),
        };

        Ok(Self {
            users: RwLock::new(users),
            backend,
        })
    }

    /// Record a detection of `uid` in `gid`. Returns false if already known.
    pub fn add_detection(&self, uid: i64, gid: i64) -> bool {
        self.users.write().entry(uid).or_default().detected.insert(gid)
    }

    pub fn detection_count(&self, uid: i64) -> usize {
        self.users
            .read()
            .get(&uid)
            .map(|r| r.detected.len())
            .unwrap_or(0)
    }

    /// Recompute this peer's score for `uid` from its detections.
    ///
    /// Returns the unrounded score.
    pub fn refresh_score(&self, uid: i64, peer: &str) -> f64 {
        let mut users = self.users.write();
        let record = users.entry(uid).or_default();
        let score = record.detected.len() as f64 * SCORE_PER_DETECTION;
        record.score.insert(peer.to_lowercase(), score);
        score
    }

    pub fn record(&self, uid: i64) -> Option<UserRecord> {
        self.users.read().get(&uid).cloned()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    /// Flush the whole map to the backend
    pub fn save(&self) -> Result<(), StoreError> {
        let bytes = {
            let users = self.users.read();
            bincode::serialize(&*users).map_err(|e| StoreError::Serialization(e.to_string()))?
        };
        self.backend.put(USERS_NAMESPACE, &bytes)?;
        self.backend.flush()?;
        debug!("Saved {} ({} bytes)", USERS_NAMESPACE, bytes.len());
        Ok(())
    }
}
