// Fleetlink Core — exchange protocol for a fleet of cooperating bots
//
// Peers share facts (bad users, watch entries, scores, declarations,
// regex counters) as envelopes on one rate-limited broadcast channel.
// When that channel becomes unusable the fleet moves to a hide channel
// and stays there until restart.

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod exchange;
pub mod store;
pub mod tasks;
pub mod transport;

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub use config::{ChannelConfig, ConfigError, ExchangeConfig};
pub use crypto::{FileCodec, FileCodecError, ScratchDir};
pub use envelope::{format_envelope, parse_envelope, Envelope, EnvelopeError, Payload, ReceiverSet};
pub use exchange::{
    Broadcaster, DeleteScope, EvidenceLog, EvidenceOutcome, EvidenceReport, ExchangeActions,
    GroupInfo, HelpLevel, ReceiverRegistry, ShareOutcome, ShareRequest, WatchKind,
};
pub use store::{DeclaredMessages, MemoryStorage, RegexCounters, SledStorage, StateBackend, UserStore};
pub use tasks::BackgroundTasks;
pub use transport::{
    ChannelId, ChannelMode, ExchangeTransport, FailoverState, MessageCategory, MessageId,
    SourceMessage, SpoolTransport, TransportError, UserInfo,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors surfaced to callers of the exchange layer.
///
/// Transport failures are not here: they are absorbed by flood waits and
/// failover and reported through [`ShareOutcome`].
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    FileCodec(#[from] FileCodecError),

    #[error(transparent)]
    Store(#[from] store::StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// NODE
// ============================================================================

/// One exchange participant: broadcaster, domain actions and evidence log
/// wired from a single configuration.
pub struct ExchangeNode {
    config: ExchangeConfig,
    actions: ExchangeActions,
    evidence: EvidenceLog,
    tasks: BackgroundTasks,
}

impl ExchangeNode {
    pub fn open(
        config: ExchangeConfig,
        transport: Arc<dyn ExchangeTransport>,
        backend: Arc<dyn StateBackend>,
    ) -> Result<Self, ExchangeError> {
        config.validate()?;

        let tasks = BackgroundTasks::new();
        let broadcaster = Broadcaster::from_config(&config, transport.clone(), tasks.clone())?;
        let users = Arc::new(UserStore::load(backend)?);
        let actions = ExchangeActions::new(
            broadcaster,
            config.receivers.clone(),
            users,
            Arc::new(DeclaredMessages::new()),
            Arc::new(RegexCounters::new(config.regex_topics.iter().cloned())),
        );
        let evidence = EvidenceLog::new(
            transport,
            config.channels.logging,
            config.channels.debug,
            config.sender.clone(),
            config.project_name.clone(),
            config.project_link.clone(),
            tasks.clone(),
        );

        info!(
            "Exchange node {} ready on channel {}",
            config.sender, config.channels.exchange
        );

        Ok(Self {
            config,
            actions,
            evidence,
            tasks,
        })
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn actions(&self) -> &ExchangeActions {
        &self.actions
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        self.actions.broadcaster()
    }

    pub fn evidence(&self) -> &EvidenceLog {
        &self.evidence
    }

    pub fn is_degraded(&self) -> bool {
        self.broadcaster().failover().is_degraded()
    }

    /// Wait for background work and flush local state
    pub async fn shutdown(&self) {
        self.tasks.drain().await;
        if let Err(e) = self.actions.users().save() {
            warn!("Failed to save users on shutdown: {}", e);
        }
    }
}
