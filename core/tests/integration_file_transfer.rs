// Integration test: encrypted side-channel file transfers
//
// This test verifies that:
// - A file attached to a share arrives encrypted and decrypts to the
//   original bytes with the shared fleet key
// - Scratch files involved in a successful transfer are deleted
// - Files outside the scratch area are never touched
// - A failed transfer keeps the source for the re-dispatch, which
//   encrypts into a fresh scratch copy
// - A re-dispatch that fails as well still cleans the scratch area

use fleetlink_core::transport::{ExchangeChannels, SpoolEntry};
use fleetlink_core::{
    parse_envelope, BackgroundTasks, Broadcaster, ChannelId, FileCodec, ReceiverSet, ScratchDir,
    ShareOutcome, ShareRequest, SpoolTransport,
};
use std::path::PathBuf;
use std::sync::Arc;

const EXCHANGE: ChannelId = ChannelId(-1001);
const HIDE: ChannelId = ChannelId(-1002);
const CRITICAL: ChannelId = ChannelId(-1003);

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    spool: Arc<SpoolTransport>,
    codec: FileCodec,
    broadcaster: Broadcaster,
}

fn fixture(open: &[ChannelId]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let spool = Arc::new(SpoolTransport::new(root.join("spool")));
    for channel in open {
        spool.open_channel(*channel).unwrap();
    }
    let codec = FileCodec::new("fleet key").with_rounds(1_000);
    let broadcaster = Broadcaster::new(
        "CLEAN",
        ExchangeChannels::new(EXCHANGE, HIDE),
        CRITICAL,
        "EMERGENCY",
        spool.clone(),
        codec.clone(),
        ScratchDir::open(root.join("tmp")).unwrap(),
        BackgroundTasks::new(),
    );
    Fixture {
        _dir: dir,
        root,
        spool,
        codec,
        broadcaster,
    }
}

fn regex_receivers() -> ReceiverSet {
    ["REGEX"].into_iter().collect()
}

fn scratch_entries(f: &Fixture) -> usize {
    std::fs::read_dir(f.broadcaster.scratch().root())
        .unwrap()
        .count()
}

#[tokio::test]
async fn test_encrypted_transfer_round_trip() {
    let f = fixture(&[EXCHANGE, HIDE, CRITICAL]);
    let original = br#"{"(?i)free money": 12, "t\\.me/joinchat": 3}"#.to_vec();
    let source = f.broadcaster.scratch().new_path();
    tokio::fs::write(&source, &original).await.unwrap();

    let request = ShareRequest::new(regex_receivers(), "regex", "count")
        .with_data("ad_words")
        .with_file(&source);
    let outcome = f.broadcaster.share(request).await.unwrap();
    assert!(outcome.is_delivered());
    f.broadcaster.tasks().drain().await;

    let records = f.spool.read_channel(EXCHANGE).unwrap();
    assert_eq!(records.len(), 1);
    let SpoolEntry::Document {
        caption,
        attachment,
        ..
    } = &records[0].entry
    else {
        panic!("expected a document, got {:?}", records[0].entry);
    };

    let envelope = parse_envelope(caption).unwrap();
    assert_eq!(envelope.to.as_slice(), ["REGEX"]);
    assert_eq!(envelope.action, "regex");

    let sent = f.spool.channel_dir(EXCHANGE).join(attachment);
    let sent_bytes = std::fs::read(&sent).unwrap();
    assert_ne!(sent_bytes, original, "attachment must be encrypted");

    let decrypted = f.root.join("decrypted.json");
    f.codec.decrypt_file(&sent, &decrypted).await.unwrap();
    assert_eq!(std::fs::read(&decrypted).unwrap(), original);

    assert!(!source.exists(), "scratch source deleted");
    assert_eq!(scratch_entries(&f), 0, "encrypted working copy deleted");
}

#[tokio::test]
async fn test_non_scratch_source_is_kept() {
    let f = fixture(&[EXCHANGE, HIDE, CRITICAL]);
    let source = f.root.join("persistent.txt");
    std::fs::write(&source, b"keep me").unwrap();

    let request = ShareRequest::new(regex_receivers(), "regex", "count").with_file(&source);
    assert!(f.broadcaster.share(request).await.unwrap().is_delivered());
    f.broadcaster.tasks().drain().await;

    assert_eq!(std::fs::read(&source).unwrap(), b"keep me");
    assert_eq!(scratch_entries(&f), 0);
}

#[tokio::test]
async fn test_unencrypted_transfer_sends_verbatim() {
    let f = fixture(&[EXCHANGE, HIDE, CRITICAL]);
    let source = f.root.join("plain.txt");
    std::fs::write(&source, b"plain").unwrap();

    let request = ShareRequest::new(regex_receivers(), "regex", "count")
        .with_file(&source)
        .unencrypted();
    assert!(f.broadcaster.share(request).await.unwrap().is_delivered());
    f.broadcaster.tasks().drain().await;

    let records = f.spool.read_channel(EXCHANGE).unwrap();
    let SpoolEntry::Document { attachment, .. } = &records[0].entry else {
        panic!("expected a document");
    };
    let sent = std::fs::read(f.spool.channel_dir(EXCHANGE).join(attachment)).unwrap();
    assert_eq!(sent, b"plain");
    assert!(source.exists());
}

#[tokio::test]
async fn test_failed_transfer_redispatches_with_fresh_copy() {
    // Exchange channel directory missing: first attempt fails hard
    let f = fixture(&[HIDE, CRITICAL]);
    let original = b"counts".to_vec();
    let source = f.broadcaster.scratch().new_path();
    tokio::fs::write(&source, &original).await.unwrap();

    let request = ShareRequest::new(regex_receivers(), "regex", "count").with_file(&source);
    let outcome = f.broadcaster.share(request).await.unwrap();
    assert!(matches!(outcome, ShareOutcome::Redispatched { .. }));
    f.broadcaster.tasks().drain().await;

    let documents: Vec<String> = f
        .spool
        .read_channel(HIDE)
        .unwrap()
        .into_iter()
        .filter_map(|r| match r.entry {
            SpoolEntry::Document { attachment, .. } => Some(attachment),
            _ => None,
        })
        .collect();
    assert_eq!(documents.len(), 1);

    let decrypted = f.root.join("out.json");
    f.codec
        .decrypt_file(&f.spool.channel_dir(HIDE).join(&documents[0]), &decrypted)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&decrypted).unwrap(), original);

    assert!(!source.exists());
    assert_eq!(scratch_entries(&f), 0, "no scratch copy left behind");
}

#[tokio::test]
async fn test_failed_redispatch_cleans_scratch() {
    // Neither exchange nor hide channel exists
    let f = fixture(&[CRITICAL]);
    let source = f.broadcaster.scratch().new_path();
    tokio::fs::write(&source, b"counts").await.unwrap();

    let request = ShareRequest::new(regex_receivers(), "regex", "count").with_file(&source);
    let outcome = f.broadcaster.share(request).await.unwrap();
    assert!(matches!(outcome, ShareOutcome::Redispatched { .. }));
    f.broadcaster.tasks().drain().await;

    assert!(!f.spool.is_open(HIDE));
    assert!(!source.exists());
    assert_eq!(scratch_entries(&f), 0);
}

#[tokio::test]
async fn test_wrong_key_cannot_decrypt() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("plain");
    let sealed = dir.path().join("sealed");
    std::fs::write(&plain, b"secret counts").unwrap();

    FileCodec::new("fleet key")
        .with_rounds(1_000)
        .encrypt_file(&plain, &sealed)
        .await
        .unwrap();

    let result = FileCodec::new("other key")
        .decrypt_file(&sealed, &dir.path().join("out"))
        .await;
    assert!(result.is_err());
}
