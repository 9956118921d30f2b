//! End-to-end archive tests: log, timestamp, archive, then verify the files
//! offline the way an auditor would.

use std::path::Path;

use messagelog::archive::{
    verify, verify_bytes, verify_chain, verify_with_key, ArchiveConfig, BuiltArchive,
    EncryptionPolicy, EvidenceContainer, X25519SecretKey,
};
use messagelog::core::{DigestAlgorithm, LinkingInfo, SequenceId, LINKING_INFO_NAME};
use messagelog::{ArchiveOutcome, MessageLog, MessageLogError, PreviousDigest, VerifyError};
use messagelog_testkit::tamper::{flip_byte, read_entry, remove_entry, replace_entry, swap_contents};
use messagelog_testkit::{sample_exchange, TestFixture};

fn message_log(fixture: &TestFixture, archive: ArchiveConfig) -> MessageLog {
    MessageLog::new(
        fixture.store.clone(),
        fixture.globalconf.clone(),
        fixture.timestamp_config(),
        archive,
    )
}

/// Log `count` exchanges numbered from `start`, timestamp them and build one archive.
async fn archive_exchanges(log: &MessageLog, start: u32, count: u32) -> BuiltArchive {
    for n in start..start + count {
        log.log_exchange(sample_exchange(n)).await.unwrap();
    }
    log.run_timestamper_once().await.unwrap();
    match log.run_archiver_once().await.unwrap() {
        ArchiveOutcome::Built(built) => built,
        other => panic!("expected an archive, got {:?}", other),
    }
}

fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

#[tokio::test]
async fn test_archive_verifies_to_chain_state() {
    let fixture = TestFixture::new();
    let log = message_log(&fixture, fixture.archive_config());

    let built = archive_exchanges(&log, 1, 3).await;
    let state = log.chain_state().await.unwrap();

    assert_eq!(built.record_count, 3);
    assert_eq!(state.last_archive_name, built.name);
    assert_eq!(verify(&built.path, &PreviousDigest::First).unwrap(), state.last_digest);
    assert_eq!(log.status_counts().await.unwrap().archived, 3);
}

#[tokio::test]
async fn test_sha512_archive_round_trip() {
    let fixture = TestFixture::with_algorithm(DigestAlgorithm::Sha512);
    let log = message_log(&fixture, fixture.archive_config());

    let built = archive_exchanges(&log, 1, 2).await;
    let digest = verify(&built.path, &PreviousDigest::First).unwrap();

    assert_eq!(digest.len(), DigestAlgorithm::Sha512.hex_len());
    assert_eq!(digest, built.last_digest);
}

#[tokio::test]
async fn test_second_archive_chains_onto_first() {
    let fixture = TestFixture::new();
    let log = message_log(&fixture, fixture.archive_config());

    let first = archive_exchanges(&log, 1, 2).await;
    let second = archive_exchanges(&log, 3, 2).await;

    let first_digest = verify(&first.path, &PreviousDigest::First).unwrap();
    let second_digest =
        verify(&second.path, &PreviousDigest::Digest(first_digest.clone())).unwrap();
    assert_eq!(second_digest, log.chain_state().await.unwrap().last_digest);

    let info = LinkingInfo::parse(
        std::str::from_utf8(&read_entry(&read(&second.path), LINKING_INFO_NAME).unwrap()).unwrap(),
    )
    .unwrap();
    assert_eq!(info.previous_digest.as_deref(), Some(first_digest.as_str()));
    assert_eq!(info.previous_archive_name.as_deref(), Some(first.name.as_str()));

    // Seeding the second archive as the first ever must fail.
    let err = verify(&second.path, &PreviousDigest::First).unwrap_err();
    assert!(matches!(err, VerifyError::ChainContinuityViolation { .. }));

    assert_eq!(
        verify_chain(&[&first.path, &second.path], &PreviousDigest::First, None).unwrap(),
        second_digest
    );
}

#[tokio::test]
async fn test_deleted_archive_breaks_chain() {
    let fixture = TestFixture::new();
    let config = ArchiveConfig {
        max_records_per_archive: 1,
        ..fixture.archive_config()
    };
    let log = message_log(&fixture, config);

    let a = archive_exchanges(&log, 1, 1).await;
    let b = archive_exchanges(&log, 2, 1).await;
    let c = archive_exchanges(&log, 3, 1).await;

    verify_chain(&[&a.path, &b.path, &c.path], &PreviousDigest::First, None).unwrap();

    let err = verify_chain(&[&a.path, &c.path], &PreviousDigest::First, None).unwrap_err();
    assert_eq!(err.path, c.path);
    assert!(matches!(err.error, VerifyError::ChainContinuityViolation { .. }));

    let err = verify_chain(&[&b.path, &a.path], &PreviousDigest::First, None).unwrap_err();
    assert_eq!(err.path, b.path);
}

#[tokio::test]
async fn test_tampered_container_is_named() {
    let fixture = TestFixture::new();
    let log = message_log(&fixture, fixture.archive_config());
    let built = archive_exchanges(&log, 1, 3).await;

    let victim = SequenceId(2).container_name();
    let tampered = flip_byte(&read(&built.path), &victim, 40).unwrap();

    match verify_bytes(&tampered, &PreviousDigest::First) {
        Err(VerifyError::EntryDigestMismatch { entry, .. }) => assert_eq!(entry, victim),
        other => panic!("expected a digest mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reordered_containers_are_detected() {
    let fixture = TestFixture::new();
    let log = message_log(&fixture, fixture.archive_config());
    let built = archive_exchanges(&log, 1, 3).await;

    let swapped = swap_contents(
        &read(&built.path),
        &SequenceId(1).container_name(),
        &SequenceId(2).container_name(),
    )
    .unwrap();

    match verify_bytes(&swapped, &PreviousDigest::First) {
        Err(VerifyError::EntryDigestMismatch { entry, .. }) => {
            assert_eq!(entry, SequenceId(1).container_name())
        }
        other => panic!("expected a digest mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_linking_info_is_malformed() {
    let fixture = TestFixture::new();
    let log = message_log(&fixture, fixture.archive_config());
    let built = archive_exchanges(&log, 1, 2).await;

    let stripped = remove_entry(&read(&built.path), LINKING_INFO_NAME).unwrap();
    let err = verify_bytes(&stripped, &PreviousDigest::First).unwrap_err();
    assert!(matches!(err, VerifyError::MalformedArchive(_)));
    assert_eq!(err.category(), "MalformedArchive");
}

#[tokio::test]
async fn test_unsupported_algorithm_is_reported_before_hashing() {
    let fixture = TestFixture::new();
    let log = message_log(&fixture, fixture.archive_config());
    let built = archive_exchanges(&log, 1, 2).await;

    let bytes = read(&built.path);
    let info = String::from_utf8(read_entry(&bytes, LINKING_INFO_NAME).unwrap()).unwrap();
    let md5 = info.replacen("SHA-256", "MD5", 1);
    let rewritten = replace_entry(&bytes, LINKING_INFO_NAME, md5).unwrap();

    let err = verify_bytes(&rewritten, &PreviousDigest::First).unwrap_err();
    assert!(matches!(err, VerifyError::DigestAlgorithmUnsupported(ref name) if name == "MD5"));
}

#[tokio::test]
async fn test_containers_carry_batch_evidence() {
    let fixture = TestFixture::new();
    let log = message_log(&fixture, fixture.archive_config());
    let built = archive_exchanges(&log, 1, 3).await;

    let bytes = read(&built.path);
    for id in 1..=3 {
        let container =
            EvidenceContainer::parse(&read_entry(&bytes, &SequenceId(id).container_name()).unwrap())
                .unwrap();
        let record = log.get_record(SequenceId(id)).await.unwrap().unwrap();

        assert_eq!(container.sequence_id, SequenceId(id));
        assert_eq!(container.message_digest, record.message_digest);
        assert_eq!(container.member_digests.len(), 3);
        assert!(container.batch_is_consistent());
        assert_eq!(container.request, sample_exchange(id as u32).request);
    }
}

#[tokio::test]
async fn test_encrypted_archive_round_trip() {
    let fixture = TestFixture::new();
    let secret = X25519SecretKey::generate();
    let key_file = fixture.path().join("recipient.pub");
    std::fs::write(&key_file, secret.public_key().to_hex()).unwrap();

    let config = ArchiveConfig {
        encryption: Some(EncryptionPolicy {
            recipient_key_file: key_file,
            mandatory: true,
        }),
        ..fixture.archive_config()
    };
    let log = message_log(&fixture, config);
    let built = archive_exchanges(&log, 1, 2).await;

    assert!(built.encrypted);
    assert!(built.path.to_string_lossy().ends_with(".zip.enc"));
    assert!(!built.name.ends_with(".enc"));

    let digest = verify_with_key(&built.path, &PreviousDigest::First, Some(&secret)).unwrap();
    assert_eq!(digest, log.chain_state().await.unwrap().last_digest);

    let err = verify_with_key(&built.path, &PreviousDigest::First, None).unwrap_err();
    assert!(matches!(err, VerifyError::Decryption(_)));

    let other = X25519SecretKey::generate();
    let err = verify_with_key(&built.path, &PreviousDigest::First, Some(&other)).unwrap_err();
    assert!(matches!(err, VerifyError::Decryption(_)));
}

#[tokio::test]
async fn test_mandatory_encryption_without_key_withholds_archive() {
    let fixture = TestFixture::new();
    let config = ArchiveConfig {
        encryption: Some(EncryptionPolicy {
            recipient_key_file: fixture.path().join("missing.pub"),
            mandatory: true,
        }),
        ..fixture.archive_config()
    };
    let log = message_log(&fixture, config);
    for n in 1..=2 {
        log.log_exchange(sample_exchange(n)).await.unwrap();
    }
    log.run_timestamper_once().await.unwrap();

    let err = log.run_archiver_once().await.unwrap_err();
    assert!(matches!(err, MessageLogError::Archive(_)));

    let counts = log.status_counts().await.unwrap();
    assert_eq!(counts.confirmed, 2);
    assert_eq!(counts.archived, 0);
    assert!(log.chain_state().await.unwrap().is_genesis());
}
