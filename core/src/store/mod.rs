// Store module — local state the exchange actions read and update

pub mod backend;
pub mod declared;
pub mod regex;
pub mod users;

pub use backend::{MemoryStorage, SledStorage, StateBackend, StoreError};
pub use declared::DeclaredMessages;
pub use regex::{collection_name, PatternCounts, RegexCounters};
pub use users::{UserRecord, UserStore, SCORE_PER_DETECTION, USERS_NAMESPACE};
