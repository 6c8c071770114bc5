//! Broadcast coordinator — the exchange protocol core
//!
//! Turns a share request into one envelope on the exchange channel:
//! strips this process from the receivers, picks the channel according
//! to the failover state, serializes, optionally stages an encrypted
//! file, and delivers through the flood-aware sender.
//!
//! A hard failure on the primary channel degrades the process to the
//! hide channel (once), tells the emergency receiver and the operators,
//! and re-dispatches the same request in the background.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ExchangeConfig;
use crate::crypto::{delete_file, FileCodec, ScratchDir};
use crate::envelope::{format_envelope, Payload, ReceiverSet};
use crate::tasks::BackgroundTasks;
use crate::transport::{
    send_with_backoff, ChannelId, ChannelMode, ExchangeChannels, ExchangeTransport,
    FailoverState, MessageId, TransportError,
};
use crate::ExchangeError;

/// File to send alongside an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    /// File to transfer; scratch files are deleted after success
    pub source: PathBuf,
    /// Encrypt into a fresh scratch copy before sending
    pub encrypt: bool,
}

/// One logical share call
#[derive(Debug, Clone, PartialEq)]
pub struct ShareRequest {
    pub receivers: ReceiverSet,
    pub action: String,
    pub action_type: String,
    pub data: Option<Payload>,
    pub file: Option<FileTransfer>,
}

impl ShareRequest {
    pub fn new(
        receivers: ReceiverSet,
        action: impl Into<String>,
        action_type: impl Into<String>,
    ) -> Self {
        Self {
            receivers,
            action: action.into(),
            action_type: action_type.into(),
            data: None,
            file: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Payload>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Attach a file, encrypted by default
    pub fn with_file(mut self, source: impl Into<PathBuf>) -> Self {
        self.file = Some(FileTransfer {
            source: source.into(),
            encrypt: true,
        });
        self
    }

    /// Send an attached file as-is
    pub fn unencrypted(mut self) -> Self {
        if let Some(file) = self.file.as_mut() {
            file.encrypt = false;
        }
        self
    }

    fn validate(&self) -> Result<(), ExchangeError> {
        if self.action.is_empty() || self.action_type.is_empty() {
            return Err(ExchangeError::InvalidArgument(
                "action and action type must not be empty".to_string(),
            ));
        }
        if self.receivers.iter().any(str::is_empty) {
            return Err(ExchangeError::InvalidArgument(
                "receiver identities must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// What happened to a share call
#[derive(Debug, Clone, PartialEq)]
pub enum ShareOutcome {
    /// Nobody left to address after removing this process
    NoReceivers,
    /// Nothing to share (e.g. empty counter collection)
    NothingToShare,
    /// Delivered on `channel`
    Delivered {
        channel: ChannelId,
        message_id: MessageId,
    },
    /// Primary channel failed; the request was re-issued in the background
    Redispatched {
        failed_channel: ChannelId,
        error: TransportError,
    },
    /// Hide channel failed too; nothing more is attempted
    Undelivered {
        channel: ChannelId,
        error: TransportError,
    },
}

impl ShareOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ShareOutcome::Delivered { .. })
    }
}

/// One delivery attempt
struct Attempt {
    mode: ChannelMode,
    channel: ChannelId,
    result: Result<MessageId, TransportError>,
}

/// Shares envelopes with peer processes
#[derive(Clone)]
pub struct Broadcaster {
    sender: Arc<str>,
    channels: ExchangeChannels,
    critical_channel: ChannelId,
    emergency_receiver: Arc<str>,
    transport: Arc<dyn ExchangeTransport>,
    failover: Arc<FailoverState>,
    codec: FileCodec,
    scratch: ScratchDir,
    tasks: BackgroundTasks,
}

impl Broadcaster {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sender: &str,
        channels: ExchangeChannels,
        critical_channel: ChannelId,
        emergency_receiver: &str,
        transport: Arc<dyn ExchangeTransport>,
        codec: FileCodec,
        scratch: ScratchDir,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            sender: Arc::from(sender),
            channels,
            critical_channel,
            emergency_receiver: Arc::from(emergency_receiver),
            transport,
            failover: Arc::new(FailoverState::new()),
            codec,
            scratch,
            tasks,
        }
    }

    /// Build from configuration, creating the scratch directory
    pub fn from_config(
        config: &ExchangeConfig,
        transport: Arc<dyn ExchangeTransport>,
        tasks: BackgroundTasks,
    ) -> Result<Self, ExchangeError> {
        let scratch = ScratchDir::open(&config.scratch_dir)?;
        let codec = FileCodec::new(&config.file_key).with_rounds(config.kdf_rounds);
        Ok(Self::new(
            &config.sender,
            config.exchange_channels(),
            config.channels.critical,
            &config.emergency_receiver,
            transport,
            codec,
            scratch,
            tasks,
        ))
    }

    /// Share a failover state with other components
    pub fn with_failover(mut self, failover: Arc<FailoverState>) -> Self {
        self.failover = failover;
        self
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn failover(&self) -> &Arc<FailoverState> {
        &self.failover
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Channel new sends go to
    pub fn current_channel(&self) -> ChannelId {
        self.channels.select(self.failover.mode())
    }

    /// Share `request` with its receivers.
    ///
    /// Errors only for invalid arguments, unserializable payloads and
    /// file staging failures. Transport failures are part of the outcome.
    ///
    /// A scratch source never outlives the share: it is deleted after
    /// delivery, after a final failure, or by the pending re-dispatch.
    pub async fn share(&self, request: ShareRequest) -> Result<ShareOutcome, ExchangeError> {
        let source = request.file.as_ref().map(|f| f.source.clone());
        let outcome = self.share_once(request).await;
        match (&outcome, source) {
            (Ok(ShareOutcome::Delivered { .. } | ShareOutcome::Redispatched { .. }), _)
            | (_, None) => {}
            (_, Some(source)) => self.discard_scratch(source),
        }
        outcome
    }

    async fn share_once(&self, request: ShareRequest) -> Result<ShareOutcome, ExchangeError> {
        request.validate()?;

        let mut request = request;
        request.receivers.remove(&self.sender);
        if request.receivers.is_empty() {
            debug!(
                "No receivers left for {}/{}, nothing sent",
                request.action, request.action_type
            );
            return Ok(ShareOutcome::NoReceivers);
        }

        let attempt = self.dispatch(&request).await?;
        let error = match attempt.result {
            Ok(message_id) => {
                return Ok(ShareOutcome::Delivered {
                    channel: attempt.channel,
                    message_id,
                })
            }
            Err(error) => error,
        };

        if attempt.mode == ChannelMode::Degraded {
            warn!(
                "Share {}/{} failed on hide channel {}: {}",
                request.action, request.action_type, attempt.channel, error
            );
            return Ok(ShareOutcome::Undelivered {
                channel: attempt.channel,
                error,
            });
        }

        warn!(
            "Share {}/{} failed on exchange channel {}: {}",
            request.action, request.action_type, attempt.channel, error
        );
        if self.failover.try_degrade() {
            self.announce_failover().await;
        }

        let this = self.clone();
        self.tasks.spawn("redispatch", async move {
            this.redispatch(request).await;
        });

        Ok(ShareOutcome::Redispatched {
            failed_channel: attempt.channel,
            error,
        })
    }

    async fn redispatch(&self, request: ShareRequest) {
        match self.dispatch(&request).await {
            Ok(Attempt {
                channel,
                result: Ok(message_id),
                ..
            }) => {
                info!(
                    "Re-dispatched {}/{} to channel {} as {}",
                    request.action, request.action_type, channel, message_id
                );
                return;
            }
            Ok(Attempt {
                channel,
                result: Err(e),
                ..
            }) => warn!(
                "Re-dispatch of {}/{} to channel {} failed: {}",
                request.action, request.action_type, channel, e
            ),
            Err(e) => warn!(
                "Re-dispatch of {}/{} aborted: {}",
                request.action, request.action_type, e
            ),
        }

        // Last attempt for this request
        if let Some(file) = request.file {
            self.discard_scratch(file.source);
        }
    }

    /// Delete `path` in the background if it lives in the scratch area
    fn discard_scratch(&self, path: PathBuf) {
        if self.scratch.contains(&path) {
            self.tasks.spawn("delete-scratch", async move {
                delete_file(path).await;
            });
        }
    }

    /// Resolve the channel, serialize and deliver once (with flood waits)
    async fn dispatch(&self, request: &ShareRequest) -> Result<Attempt, ExchangeError> {
        let mode = self.failover.mode();
        let channel = self.channels.select(mode);

        let text = format_envelope(
            &self.sender,
            &request.receivers,
            &request.action,
            &request.action_type,
            request.data.as_ref(),
        )
        .map_err(|e| {
            warn!(
                "Cannot serialize {}/{}: {}",
                request.action, request.action_type, e
            );
            ExchangeError::from(e)
        })?;

        let result = match &request.file {
            Some(file) => self.send_file(channel, file, &text).await?,
            None => {
                send_with_backoff(|| self.transport.send_message(channel, &text, None)).await
            }
        };

        Ok(Attempt {
            mode,
            channel,
            result,
        })
    }

    async fn send_file(
        &self,
        channel: ChannelId,
        file: &FileTransfer,
        caption: &str,
    ) -> Result<Result<MessageId, TransportError>, ExchangeError> {
        // Always a fresh scratch path: a re-dispatch must not reuse a copy
        // that was already consumed.
        let working = if file.encrypt {
            let dst = self.scratch.new_path();
            if let Err(e) = self.codec.encrypt_file(&file.source, &dst).await {
                self.discard_scratch(dst);
                return Err(e.into());
            }
            dst
        } else {
            file.source.clone()
        };

        let result =
            send_with_backoff(|| self.transport.send_document(channel, &working, caption)).await;

        if working != file.source {
            self.discard_scratch(working);
        }
        if result.is_ok() {
            self.discard_scratch(file.source.clone());
        }

        Ok(result)
    }

    /// Tell the emergency receiver and the operators that exchange moved
    /// to the hide channel. Failures are logged only.
    async fn announce_failover(&self) {
        let mut receivers: ReceiverSet = [self.emergency_receiver.to_string()].into_iter().collect();
        receivers.remove(&self.sender);

        if !receivers.is_empty() {
            let notice = ShareRequest::new(receivers, "backup", "hide").with_data(true);
            match self.dispatch(&notice).await {
                Ok(Attempt { result: Ok(_), .. }) => {
                    info!("Notified {} of failover", self.emergency_receiver)
                }
                Ok(Attempt { result: Err(e), .. }) => {
                    warn!("Failover notice to {} failed: {}", self.emergency_receiver, e)
                }
                Err(e) => warn!("Failover notice could not be built: {}", e),
            }
        }

        let text = format!(
            "Project: `{}`\nSituation: `exchange channel unusable`\nAction: `switched to hide channel`\n",
            self.sender
        );
        let transport = self.transport.clone();
        let channel = self.critical_channel;
        self.tasks.spawn("failover-alert", async move {
            if let Err(e) = send_with_backoff(|| transport.send_message(channel, &text, None)).await {
                warn!("Failover alert to channel {} failed: {}", channel, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockExchangeTransport;
    use crate::envelope::parse_envelope;
    use mockall::predicate::eq;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    const EXCHANGE: ChannelId = ChannelId(-1);
    const HIDE: ChannelId = ChannelId(-2);
    const CRITICAL: ChannelId = ChannelId(-3);

    fn broadcaster(transport: MockExchangeTransport, dir: &tempfile::TempDir) -> Broadcaster {
        Broadcaster::new(
            "CLEAN",
            ExchangeChannels::new(EXCHANGE, HIDE),
            CRITICAL,
            "EMERGENCY",
            Arc::new(transport),
            FileCodec::new("key").with_rounds(10),
            ScratchDir::open(dir.path().join("tmp")).unwrap(),
            BackgroundTasks::new(),
        )
    }

    fn receivers(ids: &[&str]) -> ReceiverSet {
        ids.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_only_self_means_no_transport_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockExchangeTransport::new();
        transport.expect_send_message().times(0);
        transport.expect_send_document().times(0);

        let b = broadcaster(transport, &dir);
        let outcome = b
            .share(ShareRequest::new(receivers(&["CLEAN"]), "add", "bad"))
            .await
            .unwrap();
        assert_eq!(outcome, ShareOutcome::NoReceivers);
    }

    #[tokio::test]
    async fn test_self_stripped_from_to_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockExchangeTransport::new();
        transport
            .expect_send_message()
            .withf(|channel, text, reply_to| {
                let envelope = parse_envelope(text).unwrap();
                *channel == EXCHANGE
                    && reply_to.is_none()
                    && envelope.from == "CLEAN"
                    && envelope.to.as_slice() == ["USER".to_string()]
            })
            .times(1)
            .returning(|_, _, _| Ok(MessageId(10)));

        let b = broadcaster(transport, &dir);
        let outcome = b
            .share(ShareRequest::new(receivers(&["CLEAN", "USER"]), "add", "bad"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ShareOutcome::Delivered {
                channel: EXCHANGE,
                message_id: MessageId(10)
            }
        );
    }

    #[tokio::test]
    async fn test_already_degraded_failure_does_not_flap() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockExchangeTransport::new();
        transport
            .expect_send_message()
            .with(eq(HIDE), mockall::predicate::always(), eq(None))
            .times(1)
            .returning(|_, _, _| Err(TransportError::Hard("hide gone".into())));

        let b = broadcaster(transport, &dir);
        assert!(b.failover().try_degrade());

        let outcome = b
            .share(ShareRequest::new(receivers(&["USER"]), "add", "bad"))
            .await
            .unwrap();
        assert!(matches!(outcome, ShareOutcome::Undelivered { channel, .. } if channel == HIDE));
        b.tasks().drain().await;
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let b = broadcaster(MockExchangeTransport::new(), &dir);

        let result = b
            .share(ShareRequest::new(receivers(&["USER", ""]), "add", "bad"))
            .await;
        assert!(matches!(result, Err(ExchangeError::InvalidArgument(_))));

        let result = b.share(ShareRequest::new(receivers(&["USER"]), "", "bad")).await;
        assert!(matches!(result, Err(ExchangeError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockExchangeTransport::new();
        transport.expect_send_document().times(0);

        let b = broadcaster(transport, &dir);
        let request = ShareRequest::new(receivers(&["REGEX"]), "regex", "count")
            .with_file(dir.path().join("missing.json"));
        assert!(matches!(
            b.share(request).await,
            Err(ExchangeError::FileCodec(_))
        ));
    }

    #[tokio::test]
    async fn test_undelivered_file_leaves_no_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockExchangeTransport::new();
        transport
            .expect_send_document()
            .times(1)
            .returning(|_, _, _| Err(TransportError::Hard("hide gone".into())));

        let b = broadcaster(transport, &dir);
        assert!(b.failover().try_degrade());
        let source = b.scratch().new_path();
        tokio::fs::write(&source, b"{}").await.unwrap();

        let request = ShareRequest::new(receivers(&["REGEX"]), "regex", "count").with_file(&source);
        let outcome = b.share(request).await.unwrap();
        assert!(matches!(outcome, ShareOutcome::Undelivered { .. }));
        b.tasks().drain().await;

        assert_eq!(std::fs::read_dir(b.scratch().root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unaddressed_scratch_file_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockExchangeTransport::new();
        transport.expect_send_document().times(0);

        let b = broadcaster(transport, &dir);
        let source = b.scratch().new_path();
        tokio::fs::write(&source, b"{}").await.unwrap();
        let outside = dir.path().join("mine.json");
        tokio::fs::write(&outside, b"{}").await.unwrap();

        for file in [&source, &outside] {
            let request = ShareRequest::new(receivers(&["CLEAN"]), "regex", "count").with_file(file);
            assert_eq!(b.share(request).await.unwrap(), ShareOutcome::NoReceivers);
        }
        b.tasks().drain().await;

        assert!(!source.exists());
        assert!(outside.exists());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_sender_never_addressed(
            mut ids in proptest::collection::vec("[A-Z]{1,6}", 0..6),
            position in 0usize..6,
        ) {
            let at = position.min(ids.len());
            ids.insert(at, "CLEAN".to_string());

            let dir = tempfile::tempdir().unwrap();
            let sent = Arc::new(Mutex::new(Vec::<String>::new()));
            let sink = sent.clone();
            let mut transport = MockExchangeTransport::new();
            transport.expect_send_message().returning(move |_, text, _| {
                sink.lock().push(text.to_string());
                Ok(MessageId(1))
            });

            let b = broadcaster(transport, &dir);
            let request = ShareRequest::new(ids.iter().cloned().collect(), "add", "bad");
            let outcome = tokio_test::block_on(b.share(request)).unwrap();

            let others = ids.iter().filter(|id| *id != "CLEAN").count();
            let sent = sent.lock();
            if others == 0 {
                prop_assert_eq!(outcome, ShareOutcome::NoReceivers);
                prop_assert!(sent.is_empty());
            } else {
                prop_assert!(outcome.is_delivered());
                prop_assert_eq!(sent.len(), 1);
                let envelope = parse_envelope(&sent[0]).unwrap();
                prop_assert!(!envelope.to.contains("CLEAN"));
            }
        }
    }
}
