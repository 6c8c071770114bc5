// Exchange module — peer-to-peer sharing over the broadcast channel

pub mod actions;
pub mod coordinator;
pub mod evidence;
pub mod registry;

pub use actions::{
    round_score, DeleteScope, ExchangeActions, HelpLevel, WatchKind, HELP_RECEIVER,
    REGEX_RECEIVER,
};
pub use coordinator::{Broadcaster, FileTransfer, ShareOutcome, ShareRequest};
pub use evidence::{EvidenceLog, EvidenceOutcome, EvidenceReport, GroupInfo};
pub use registry::{ReceiverRegistry, TOPIC_BAD, TOPIC_DECLARE, TOPIC_SCORE, TOPIC_WATCH};
