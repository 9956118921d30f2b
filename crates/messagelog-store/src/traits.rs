//! Store trait: the abstract interface for record persistence.
//!
//! This trait allows the message log to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use messagelog_core::{
    ChainState, DigestEngine, LogRecord, RecordInput, SequenceId, TimestampBatch, TimestampStatus,
    TimestampToken,
};

use crate::error::Result;

/// Bookkeeping row for one committed archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    /// Archive file name (as written into the next archive's linking info).
    pub name: String,
    pub first_sequence: SequenceId,
    pub last_sequence: SequenceId,
    pub record_count: u64,
    /// Final chain digest of this archive.
    pub last_digest: String,
    /// Commit time (Unix ms).
    pub created_at: i64,
}

/// The Store trait: async interface for record persistence.
///
/// # Design Notes
///
/// - **Single writer**: `append` serializes sequence id assignment so the
///   order is total and gap-free.
/// - **Atomic set transitions**: `mark_confirmed` and `mark_archived`
///   change every named record or none of them.
/// - **Chain pointer**: `ChainState` is only ever changed by
///   `mark_archived`, in the same transaction that marks the records.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Record Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Durably persist a new record and return its sequence id.
    ///
    /// The message digest is computed with `engine` before the write.
    async fn append(&self, input: &RecordInput, engine: &DigestEngine) -> Result<SequenceId>;

    /// Get a record by id.
    async fn get_record(&self, id: SequenceId) -> Result<Option<LogRecord>>;

    /// Up to `limit` pending records, ascending by sequence id.
    async fn list_pending(&self, limit: usize) -> Result<Vec<LogRecord>>;

    /// Up to `limit` confirmed but not yet archived records, ascending.
    async fn list_confirmed_unarchived(&self, limit: usize) -> Result<Vec<LogRecord>>;

    /// Count records in a given status.
    async fn count_status(&self, status: TimestampStatus) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Timestamp Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark every member of `batch` confirmed with `token`.
    ///
    /// All members must currently be `Pending` and their stored digests must
    /// match the batch; otherwise nothing changes. Returns the batch id.
    async fn mark_confirmed(&self, batch: &TimestampBatch, token: &TimestampToken) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Archive Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Read the current chain pointer.
    async fn chain_state(&self) -> Result<ChainState>;

    /// Mark `ids` archived into `archive` and advance the chain pointer.
    ///
    /// One transaction: the persisted state must equal `expected`, every id
    /// must be `Confirmed`, and then the records, the archive bookkeeping row
    /// and the chain state (`next`) are all written together.
    async fn mark_archived(
        &self,
        ids: &[SequenceId],
        archive: &ArchiveRecord,
        expected: &ChainState,
        next: &ChainState,
    ) -> Result<()>;

    /// Whether an archive with this name has been committed.
    async fn has_archive(&self, name: &str) -> Result<bool>;

    /// All committed archives, oldest first.
    async fn list_archives(&self) -> Result<Vec<ArchiveRecord>>;
}

/// Check that a set transition is well-formed before touching storage.
pub(crate) fn check_distinct(ids: &[SequenceId]) -> Result<()> {
    let mut sorted = ids.to_vec();
    sorted.sort();
    sorted.dedup();
    if sorted.len() != ids.len() {
        return Err(crate::StoreError::InvalidData(
            "duplicate sequence ids in transition".into(),
        ));
    }
    if ids.is_empty() {
        return Err(crate::StoreError::InvalidData(
            "empty transition set".into(),
        ));
    }
    Ok(())
}

/// Refuse anything but a single forward step.
pub(crate) fn check_transition(
    id: SequenceId,
    from: TimestampStatus,
    to: TimestampStatus,
) -> Result<()> {
    if from.can_advance_to(to) {
        Ok(())
    } else {
        Err(crate::StoreError::InvalidTransition {
            sequence_id: id.get(),
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        })
    }
}

/// The archive row must describe exactly the records being archived.
pub(crate) fn check_archive_row(
    ids: &[SequenceId],
    archive: &ArchiveRecord,
    next: &ChainState,
) -> Result<()> {
    let first = ids.iter().min().copied();
    let last = ids.iter().max().copied();
    if archive.name != next.last_archive_name
        || archive.last_digest != next.last_digest
        || archive.record_count != ids.len() as u64
        || first != Some(archive.first_sequence)
        || last != Some(archive.last_sequence)
    {
        return Err(crate::StoreError::InvalidData(format!(
            "archive row {} does not match the archived record set",
            archive.name
        )));
    }
    Ok(())
}

/// Get current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
