//! Batch timestamping through the public API, and persistence across a
//! store reopen.

use std::sync::Arc;
use std::time::Duration;

use messagelog::core::{DigestAlgorithm, SequenceId, TimestampBatch, TimestampStatus};
use messagelog::store::{SqliteStore, Store};
use messagelog::timestamp::tsa::memory::MemoryTsaMode;
use messagelog::timestamp::{
    verify_batch_signature, BackoffConfig, LocalSigner, TimestampConfig, TimestampError,
};
use messagelog::{ArchiveOutcome, BatchOutcome, MessageLog, MessageLogError, PreviousDigest};
use messagelog_testkit::{sample_exchange, verify_all_vectors, TestFixture};

fn quick_retry() -> TimestampConfig {
    TimestampConfig {
        backoff: BackoffConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        ..TimestampConfig::default()
    }
}

fn message_log(fixture: &TestFixture, timestamp: TimestampConfig) -> MessageLog {
    MessageLog::new(
        fixture.store.clone(),
        fixture.globalconf.clone(),
        timestamp,
        fixture.archive_config(),
    )
}

async fn log_sample(log: &MessageLog, count: u32) {
    for n in 1..=count {
        log.log_exchange(sample_exchange(n)).await.unwrap();
    }
}

#[tokio::test]
async fn test_partial_coverage_confirms_nothing() {
    let fixture = TestFixture::new();
    let log = message_log(&fixture, quick_retry());
    log_sample(&log, 4).await;

    // A token over only the first half of the batch.
    let pending = fixture.store.list_pending(10).await.unwrap();
    let half = TimestampBatch::from_records(&pending[..2], DigestAlgorithm::Sha256);
    fixture.tsa.set_mode(MemoryTsaMode::CoverOnly(half.imprint()));

    let err = log.run_timestamper_once().await.unwrap_err();
    assert!(matches!(
        err,
        MessageLogError::Timestamp(TimestampError::ProtocolViolation { .. })
    ));

    let counts = log.status_counts().await.unwrap();
    assert_eq!((counts.pending, counts.confirmed), (4, 0));
    for id in 1..=4 {
        let record = log.get_record(SequenceId(id)).await.unwrap().unwrap();
        assert_eq!(record.status, TimestampStatus::Pending);
        assert!(record.timestamp.is_none());
    }

    fixture.tsa.set_mode(MemoryTsaMode::Grant);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(
        log.run_timestamper_once().await.unwrap(),
        BatchOutcome::Confirmed { records: 4, .. }
    ));

    let first = log.get_record(SequenceId(1)).await.unwrap().unwrap();
    let evidence = first.timestamp.unwrap();
    assert_eq!(evidence.member_digests.len(), 4);
    for id in 2..=4 {
        let record = log.get_record(SequenceId(id)).await.unwrap().unwrap();
        assert_eq!(record.status, TimestampStatus::Confirmed);
        assert_eq!(record.timestamp.unwrap().token, evidence.token);
    }
}

#[tokio::test]
async fn test_unavailable_tsa_backs_off() {
    let fixture = TestFixture::new();
    let log = message_log(&fixture, TimestampConfig::default());
    log_sample(&log, 2).await;
    fixture.tsa.set_mode(MemoryTsaMode::Unavailable);

    let err = log.run_timestamper_once().await.unwrap_err();
    assert!(matches!(
        err,
        MessageLogError::Timestamp(TimestampError::TsaUnavailable { .. })
    ));
    assert_eq!(fixture.tsa.calls(), 1);

    // The default backoff is seconds long; the next round does not call out.
    assert!(matches!(
        log.run_timestamper_once().await.unwrap(),
        BatchOutcome::Deferred(_)
    ));
    assert_eq!(fixture.tsa.calls(), 1);
    assert_eq!(log.status_counts().await.unwrap().pending, 2);
}

#[tokio::test]
async fn test_signed_batch_digest_is_kept() {
    let fixture = TestFixture::new();
    let signer = Arc::new(LocalSigner::generate());
    let key = signer.verifying_key();
    let config = TimestampConfig {
        sign_batch_digest: true,
        ..TimestampConfig::default()
    };
    let log = message_log(&fixture, config).with_signer(signer);
    log_sample(&log, 3).await;

    log.run_timestamper_once().await.unwrap();

    let evidence = log.get_record(SequenceId(2)).await.unwrap().unwrap().timestamp.unwrap();
    let signature = evidence.token.batch_signature.unwrap();
    assert!(verify_batch_signature(
        &key,
        evidence.batch_digest.as_bytes(),
        &signature
    ));
}

#[tokio::test]
async fn test_sqlite_chain_survives_reopen() {
    let fixture = TestFixture::new();
    let db = fixture.path().join("messagelog.db");

    let (name, digest, path) = {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db).unwrap());
        let log = MessageLog::new(
            store,
            fixture.globalconf.clone(),
            TimestampConfig::default(),
            fixture.archive_config(),
        );
        log_sample(&log, 3).await;
        log.run_timestamper_once().await.unwrap();
        match log.run_archiver_once().await.unwrap() {
            ArchiveOutcome::Built(built) => (built.name, built.last_digest, built.path),
            other => panic!("expected an archive, got {:?}", other),
        }
    };

    let store = Arc::new(SqliteStore::open(&db).unwrap());
    let state = store.chain_state().await.unwrap();
    assert_eq!(state.last_archive_name, name);
    assert_eq!(state.last_digest, digest);
    assert!(store.has_archive(&name).await.unwrap());

    let archives = store.list_archives().await.unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].first_sequence, SequenceId(1));
    assert_eq!(archives[0].last_sequence, SequenceId(3));

    let verified = messagelog::archive::verify(&path, &PreviousDigest::First).unwrap();
    assert_eq!(verified, state.last_digest);

    let log = MessageLog::new(
        store,
        fixture.globalconf.clone(),
        TimestampConfig::default(),
        fixture.archive_config(),
    );
    assert_eq!(log.log_exchange(sample_exchange(4)).await.unwrap(), SequenceId(4));
    assert_eq!(log.status_counts().await.unwrap().archived, 3);
}

#[test]
fn test_golden_vectors() {
    for (name, matches, computed) in verify_all_vectors() {
        assert!(matches, "vector '{}' computed {}", name, computed);
    }
}
