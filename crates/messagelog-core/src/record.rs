//! Log records, timestamp batches, and the persisted chain pointer.
//!
//! A record is written once by the store and never edited afterwards,
//! except for its timestamp status, which only moves forward:
//! `Pending -> Confirmed -> Archived`.

use std::fmt;

use bytes::Bytes;

use crate::canonical::{batch_digest_input, canonical_message_bytes};
use crate::digest::{DigestAlgorithm, DigestEngine};

/// Monotonically increasing record identifier assigned at write time.
///
/// Sequence ids start at 1 and are gap-free; they define the total order
/// of all logged exchanges.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceId(pub u64);

impl SequenceId {
    /// Get the raw value.
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// The next id in sequence.
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Deterministic evidence container file name for this record.
    pub fn container_name(&self) -> String {
        format!("{:020}.asice", self.0)
    }
}

impl fmt::Debug for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceId({})", self.0)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SequenceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Lifecycle of a record with respect to timestamping and archiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimestampStatus {
    /// Logged, waiting for a trusted timestamp.
    Pending,
    /// Covered by a TSA token, waiting to be archived.
    Confirmed,
    /// Packaged into an archive file.
    Archived,
}

impl TimestampStatus {
    /// Storage encoding.
    pub const fn to_i64(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Confirmed => 1,
            Self::Archived => 2,
        }
    }

    /// Decode the storage encoding.
    pub const fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Confirmed),
            2 => Some(Self::Archived),
            _ => None,
        }
    }

    /// Whether `next` is a legal forward transition from `self`.
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed) | (Self::Confirmed, Self::Archived)
        )
    }
}

/// One completed message exchange as handed over by the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInput {
    pub request: Bytes,
    pub response: Bytes,
    pub signature: Bytes,
    pub signer_certificate: Bytes,
}

impl RecordInput {
    /// Create a record input from its four parts.
    pub fn new(
        request: impl Into<Bytes>,
        response: impl Into<Bytes>,
        signature: impl Into<Bytes>,
        signer_certificate: impl Into<Bytes>,
    ) -> Self {
        Self {
            request: request.into(),
            response: response.into(),
            signature: signature.into(),
            signer_certificate: signer_certificate.into(),
        }
    }

    /// The canonical message bytes that the message digest covers.
    pub fn canonical_message(&self) -> Vec<u8> {
        canonical_message_bytes(&self.request, &self.response)
    }

    /// Digest of the canonical message.
    pub fn message_digest(&self, engine: &DigestEngine) -> String {
        engine.digest(&self.canonical_message())
    }
}

/// A durably logged record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub sequence_id: SequenceId,
    /// Hex digest of the canonical message.
    pub message_digest: String,
    /// Algorithm `message_digest` was computed with.
    pub digest_algorithm: DigestAlgorithm,
    pub signature: Bytes,
    pub signer_certificate: Bytes,
    pub request: Bytes,
    pub response: Bytes,
    pub status: TimestampStatus,
    /// Present once the record is `Confirmed`.
    pub timestamp: Option<TimestampEvidence>,
    /// Present once the record is `Archived`.
    pub archive_name: Option<String>,
    /// Local time the record was logged (Unix ms).
    pub logged_at: i64,
}

impl LogRecord {
    /// The canonical message bytes (`raw_payload`).
    pub fn raw_payload(&self) -> Vec<u8> {
        canonical_message_bytes(&self.request, &self.response)
    }
}

/// A group of pending records submitted together to a TSA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampBatch {
    /// Member ids in ascending order.
    pub members: Vec<SequenceId>,
    /// Member message digests, same order as `members`.
    pub member_digests: Vec<String>,
    pub algorithm: DigestAlgorithm,
    /// Hex digest over the ordered member digests.
    pub batch_digest: String,
}

impl TimestampBatch {
    /// Build a batch from records; they are sorted by sequence id first.
    pub fn from_records(records: &[LogRecord], algorithm: DigestAlgorithm) -> Self {
        let mut sorted: Vec<&LogRecord> = records.iter().collect();
        sorted.sort_by_key(|r| r.sequence_id);

        let members = sorted.iter().map(|r| r.sequence_id).collect();
        let member_digests: Vec<String> =
            sorted.iter().map(|r| r.message_digest.clone()).collect();
        let batch_digest = compute_batch_digest(algorithm, &member_digests);

        Self {
            members,
            member_digests,
            algorithm,
            batch_digest,
        }
    }

    /// Raw bytes of the batch digest (the TSA message imprint).
    pub fn imprint(&self) -> Vec<u8> {
        hex::decode(&self.batch_digest).unwrap_or_default()
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Hex batch digest over an ordered list of member digests.
pub fn compute_batch_digest<S: AsRef<str>>(algorithm: DigestAlgorithm, member_digests: &[S]) -> String {
    DigestEngine::new(algorithm).digest(&batch_digest_input(member_digests))
}

/// What the TSA returned for a batch, plus optional local attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampToken {
    /// Name of the TSA that issued the token.
    pub tsa_name: String,
    /// DER-encoded timestamp token.
    pub token: Bytes,
    /// Signature over the batch digest, when batch signing is enabled.
    pub batch_signature: Option<Bytes>,
    /// Local confirmation time (Unix ms).
    pub confirmed_at: i64,
}

/// Timestamp evidence attached to a confirmed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampEvidence {
    pub batch_id: u64,
    pub algorithm: DigestAlgorithm,
    pub batch_digest: String,
    pub member_digests: Vec<String>,
    pub token: TimestampToken,
}

/// The durable pointer to the most recently produced archive.
///
/// The genesis state (no archive produced yet) has empty fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainState {
    pub last_digest: String,
    pub last_archive_name: String,
}

impl ChainState {
    /// State before any archive has been produced.
    pub fn genesis() -> Self {
        Self::default()
    }

    /// Whether no archive has been produced yet.
    pub fn is_genesis(&self) -> bool {
        self.last_digest.is_empty()
    }

    /// Seed for the next archive's running chain: `""` at genesis.
    pub fn chain_seed(&self) -> &str {
        &self.last_digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_is_fixed_width() {
        assert_eq!(SequenceId(42).container_name(), "00000000000000000042.asice");
        assert!(SequenceId(9).container_name() < SequenceId(10).container_name());
    }

    #[test]
    fn test_status_transitions_only_forward() {
        use TimestampStatus::*;
        assert!(Pending.can_advance_to(Confirmed));
        assert!(Confirmed.can_advance_to(Archived));
        assert!(!Pending.can_advance_to(Archived));
        assert!(!Confirmed.can_advance_to(Pending));
        assert!(!Archived.can_advance_to(Confirmed));
    }

    #[test]
    fn test_status_storage_roundtrip() {
        for status in [TimestampStatus::Pending, TimestampStatus::Confirmed, TimestampStatus::Archived] {
            assert_eq!(TimestampStatus::from_i64(status.to_i64()), Some(status));
        }
        assert_eq!(TimestampStatus::from_i64(7), None);
    }

    #[test]
    fn test_batch_sorts_members() {
        let engine = DigestEngine::new(DigestAlgorithm::Sha256);
        let make = |seq: u64| LogRecord {
            sequence_id: SequenceId(seq),
            message_digest: engine.digest(&seq.to_be_bytes()),
            digest_algorithm: DigestAlgorithm::Sha256,
            signature: Bytes::new(),
            signer_certificate: Bytes::new(),
            request: Bytes::new(),
            response: Bytes::new(),
            status: TimestampStatus::Pending,
            timestamp: None,
            archive_name: None,
            logged_at: 0,
        };

        let batch = TimestampBatch::from_records(&[make(3), make(1), make(2)], DigestAlgorithm::Sha256);
        assert_eq!(batch.members, vec![SequenceId(1), SequenceId(2), SequenceId(3)]);
        assert_eq!(batch.imprint().len(), 32);
        assert_eq!(
            batch.batch_digest,
            compute_batch_digest(DigestAlgorithm::Sha256, &batch.member_digests)
        );
    }

    #[test]
    fn test_genesis_chain_state() {
        let state = ChainState::genesis();
        assert!(state.is_genesis());
        assert_eq!(state.chain_seed(), "");
    }
}
