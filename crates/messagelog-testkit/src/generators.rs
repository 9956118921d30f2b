//! Proptest generators for property-based testing.

use proptest::prelude::*;

use messagelog_core::{ChainState, DigestAlgorithm, RecordInput};

/// Generate a supported digest algorithm.
pub fn digest_algorithm() -> impl Strategy<Value = DigestAlgorithm> {
    prop_oneof![
        Just(DigestAlgorithm::Sha256),
        Just(DigestAlgorithm::Sha384),
        Just(DigestAlgorithm::Sha512),
    ]
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a lowercase hex digest for `algorithm`.
pub fn hex_digest(algorithm: DigestAlgorithm) -> impl Strategy<Value = String> {
    prop::collection::vec(any::<u8>(), algorithm.output_len()).prop_map(hex::encode)
}

/// Generate a chain state: genesis or a previous archive.
pub fn chain_state() -> impl Strategy<Value = ChainState> {
    prop_oneof![
        Just(ChainState::genesis()),
        (hex_digest(DigestAlgorithm::Sha256), 1u64..1_000_000).prop_map(|(digest, last)| {
            ChainState {
                last_archive_name: format!("mlog-1-{}-{}.zip", last, &digest[..16]),
                last_digest: digest,
            }
        }),
    ]
}

/// Generate one exchange.
pub fn record_input() -> impl Strategy<Value = RecordInput> {
    (payload(512), payload(512), payload(64), payload(128))
        .prop_map(|(req, resp, sig, cert)| RecordInput::new(req, resp, sig, cert))
}

/// Generate a list of exchanges.
pub fn record_inputs(max: usize) -> impl Strategy<Value = Vec<RecordInput>> {
    prop::collection::vec(record_input(), 1..=max)
}
