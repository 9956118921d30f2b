//! Property: however the log is split into archives, the files verify in
//! order and the last one ends at the stored chain state.

use proptest::prelude::*;

use messagelog::archive::{verify_chain, ArchiveConfig};
use messagelog::{ArchiveOutcome, MessageLog, PreviousDigest};
use messagelog_testkit::generators::digest_algorithm;
use messagelog_testkit::{sample_exchange, TestFixture};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn test_any_split_verifies_in_order(
        algorithm in digest_algorithm(),
        rounds in prop::collection::vec(1u32..5, 1..4),
        max_per_archive in 1usize..4,
    ) {
        let ((_copies, files), expected) = runtime().block_on(async {
            let fixture = TestFixture::with_algorithm(algorithm);
            let config = ArchiveConfig {
                max_records_per_archive: max_per_archive,
                ..fixture.archive_config()
            };
            let log = MessageLog::new(
                fixture.store.clone(),
                fixture.globalconf.clone(),
                fixture.timestamp_config(),
                config,
            );

            let mut next = 1;
            let mut paths = Vec::new();
            for count in rounds {
                for _ in 0..count {
                    log.log_exchange(sample_exchange(next)).await.unwrap();
                    next += 1;
                }
                log.run_timestamper_once().await.unwrap();
                while let ArchiveOutcome::Built(built) = log.run_archiver_once().await.unwrap() {
                    paths.push(built.path);
                }
            }

            let counts = log.status_counts().await.unwrap();
            assert_eq!(counts.archived, u64::from(next - 1));
            let expected = log.chain_state().await.unwrap().last_digest;
            // Keep the files: the fixture directory goes away with the fixture.
            let copies = tempfile::tempdir().unwrap();
            let kept: Vec<_> = paths
                .iter()
                .map(|p| {
                    let target = copies.path().join(p.file_name().unwrap());
                    std::fs::copy(p, &target).unwrap();
                    target
                })
                .collect();
            ((copies, kept), expected)
        });

        let digest = verify_chain(&files, &PreviousDigest::First, None).unwrap();
        prop_assert_eq!(digest, expected);
    }
}
