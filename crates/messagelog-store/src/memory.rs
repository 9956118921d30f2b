//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use messagelog_core::{
    ChainState, DigestEngine, LogRecord, RecordInput, SequenceId, TimestampBatch,
    TimestampEvidence, TimestampStatus, TimestampToken,
};

use crate::error::{Result, StoreError};
use crate::traits::{
    check_archive_row, check_distinct, check_transition, now_millis, ArchiveRecord, Store,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Records ordered by sequence id.
    records: BTreeMap<SequenceId, LogRecord>,

    /// Last assigned batch id.
    last_batch_id: u64,

    /// Committed archives by name.
    archives: BTreeMap<String, ArchiveRecord>,

    chain: ChainState,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }

    fn list_by_status(&self, status: TimestampStatus, limit: usize) -> Result<Vec<LogRecord>> {
        let inner = self.read()?;
        Ok(inner
            .records
            .values()
            .filter(|r| r.status == status)
            .take(limit)
            .cloned()
            .collect())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn status_of(&self, id: SequenceId) -> Result<&LogRecord> {
        self.records.get(&id).ok_or(StoreError::NotFound(id.get()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append(&self, input: &RecordInput, engine: &DigestEngine) -> Result<SequenceId> {
        let message_digest = input.message_digest(engine);
        let mut inner = self.write()?;

        let id = inner
            .records
            .keys()
            .next_back()
            .map(SequenceId::next)
            .unwrap_or(SequenceId(1));

        inner.records.insert(
            id,
            LogRecord {
                sequence_id: id,
                message_digest,
                digest_algorithm: engine.algorithm(),
                signature: input.signature.clone(),
                signer_certificate: input.signer_certificate.clone(),
                request: input.request.clone(),
                response: input.response.clone(),
                status: TimestampStatus::Pending,
                timestamp: None,
                archive_name: None,
                logged_at: now_millis(),
            },
        );

        Ok(id)
    }

    async fn get_record(&self, id: SequenceId) -> Result<Option<LogRecord>> {
        Ok(self.read()?.records.get(&id).cloned())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<LogRecord>> {
        self.list_by_status(TimestampStatus::Pending, limit)
    }

    async fn list_confirmed_unarchived(&self, limit: usize) -> Result<Vec<LogRecord>> {
        self.list_by_status(TimestampStatus::Confirmed, limit)
    }

    async fn count_status(&self, status: TimestampStatus) -> Result<u64> {
        let inner = self.read()?;
        Ok(inner.records.values().filter(|r| r.status == status).count() as u64)
    }

    async fn mark_confirmed(&self, batch: &TimestampBatch, token: &TimestampToken) -> Result<u64> {
        check_distinct(&batch.members)?;
        if batch.members.len() != batch.member_digests.len() {
            return Err(StoreError::InvalidData(
                "batch members and digests differ in length".into(),
            ));
        }

        let mut inner = self.write()?;

        // Validate everything before touching any record.
        for (id, expected_digest) in batch.members.iter().zip(&batch.member_digests) {
            let record = inner.status_of(*id)?;
            check_transition(*id, record.status, TimestampStatus::Confirmed)?;
            if &record.message_digest != expected_digest {
                return Err(StoreError::InvalidData(format!(
                    "record {} digest does not match the batch",
                    id
                )));
            }
        }

        inner.last_batch_id += 1;
        let batch_id = inner.last_batch_id;
        let evidence = TimestampEvidence {
            batch_id,
            algorithm: batch.algorithm,
            batch_digest: batch.batch_digest.clone(),
            member_digests: batch.member_digests.clone(),
            token: token.clone(),
        };

        for id in &batch.members {
            if let Some(record) = inner.records.get_mut(id) {
                record.status = TimestampStatus::Confirmed;
                record.timestamp = Some(evidence.clone());
            }
        }

        Ok(batch_id)
    }

    async fn chain_state(&self) -> Result<ChainState> {
        Ok(self.read()?.chain.clone())
    }

    async fn mark_archived(
        &self,
        ids: &[SequenceId],
        archive: &ArchiveRecord,
        expected: &ChainState,
        next: &ChainState,
    ) -> Result<()> {
        check_distinct(ids)?;
        check_archive_row(ids, archive, next)?;

        let mut inner = self.write()?;

        if &inner.chain != expected {
            return Err(StoreError::ChainStateConflict {
                expected: expected.last_archive_name.clone(),
                actual: inner.chain.last_archive_name.clone(),
            });
        }
        if inner.archives.contains_key(&archive.name) {
            return Err(StoreError::InvalidData(format!(
                "archive {} already committed",
                archive.name
            )));
        }
        for id in ids {
            let record = inner.status_of(*id)?;
            check_transition(*id, record.status, TimestampStatus::Archived)?;
        }

        for id in ids {
            if let Some(record) = inner.records.get_mut(id) {
                record.status = TimestampStatus::Archived;
                record.archive_name = Some(archive.name.clone());
            }
        }
        inner.archives.insert(archive.name.clone(), archive.clone());
        inner.chain = next.clone();

        Ok(())
    }

    async fn has_archive(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.archives.contains_key(name))
    }

    async fn list_archives(&self) -> Result<Vec<ArchiveRecord>> {
        let inner = self.read()?;
        let mut archives: Vec<ArchiveRecord> = inner.archives.values().cloned().collect();
        archives.sort_by_key(|a| a.first_sequence);
        Ok(archives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messagelog_core::DigestAlgorithm;
    use proptest::prelude::*;

    fn engine() -> DigestEngine {
        DigestEngine::new(DigestAlgorithm::Sha384)
    }

    fn exchange(n: u64) -> RecordInput {
        RecordInput::new(
            format!("<request id=\"{}\"/>", n).into_bytes(),
            format!("<response id=\"{}\"/>", n).into_bytes(),
            vec![1, 2, 3],
            vec![4, 5, 6],
        )
    }

    fn token() -> TimestampToken {
        TimestampToken {
            tsa_name: "memory".into(),
            token: bytes::Bytes::from_static(b"tst"),
            batch_signature: None,
            confirmed_at: 0,
        }
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = MemoryStore::new();
        for expected in 1..=3 {
            let id = store.append(&exchange(expected), &engine()).await.unwrap();
            assert_eq!(id, SequenceId(expected));
        }

        let record = store.get_record(SequenceId(2)).await.unwrap().unwrap();
        assert_eq!(record.digest_algorithm, DigestAlgorithm::Sha384);
        assert_eq!(record.message_digest.len(), 96);
    }

    #[tokio::test]
    async fn test_confirm_then_archive() {
        let store = MemoryStore::new();
        store.append(&exchange(1), &engine()).await.unwrap();
        store.append(&exchange(2), &engine()).await.unwrap();

        let pending = store.list_pending(10).await.unwrap();
        let batch = TimestampBatch::from_records(&pending, DigestAlgorithm::Sha384);
        let batch_id = store.mark_confirmed(&batch, &token()).await.unwrap();
        assert_eq!(batch_id, 1);

        // Confirming again is refused.
        assert!(store.mark_confirmed(&batch, &token()).await.is_err());

        let next = ChainState {
            last_digest: "aa".repeat(48),
            last_archive_name: "mlog-1-2-aaaaaaaaaaaaaaaa.zip".into(),
        };
        let archive = ArchiveRecord {
            name: next.last_archive_name.clone(),
            first_sequence: SequenceId(1),
            last_sequence: SequenceId(2),
            record_count: 2,
            last_digest: next.last_digest.clone(),
            created_at: 0,
        };
        store
            .mark_archived(&batch.members, &archive, &ChainState::genesis(), &next)
            .await
            .unwrap();

        assert_eq!(store.chain_state().await.unwrap(), next);
        assert_eq!(store.count_status(TimestampStatus::Archived).await.unwrap(), 2);
        assert!(store.list_confirmed_unarchived(10).await.unwrap().is_empty());

        // Same chain state again is now stale.
        assert!(matches!(
            store
                .mark_archived(&batch.members, &archive, &ChainState::genesis(), &next)
                .await,
            Err(StoreError::ChainStateConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_archive_row_must_match_ids() {
        let store = MemoryStore::new();
        store.append(&exchange(1), &engine()).await.unwrap();
        let batch =
            TimestampBatch::from_records(&store.list_pending(1).await.unwrap(), DigestAlgorithm::Sha384);
        store.mark_confirmed(&batch, &token()).await.unwrap();

        let next = ChainState {
            last_digest: "bb".repeat(48),
            last_archive_name: "mlog-1-1-bbbbbbbbbbbbbbbb.zip".into(),
        };
        let wrong = ArchiveRecord {
            name: next.last_archive_name.clone(),
            first_sequence: SequenceId(1),
            last_sequence: SequenceId(1),
            record_count: 5,
            last_digest: next.last_digest.clone(),
            created_at: 0,
        };
        assert!(matches!(
            store
                .mark_archived(&batch.members, &wrong, &ChainState::genesis(), &next)
                .await,
            Err(StoreError::InvalidData(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_statuses_only_move_forward(confirm_mask in proptest::collection::vec(any::<bool>(), 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = MemoryStore::new();
                for n in 0..confirm_mask.len() as u64 {
                    store.append(&exchange(n), &engine()).await.unwrap();
                }

                let pending = store.list_pending(usize::MAX).await.unwrap();
                let chosen: Vec<LogRecord> = pending
                    .into_iter()
                    .zip(&confirm_mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(r, _)| r)
                    .collect();

                if !chosen.is_empty() {
                    let batch = TimestampBatch::from_records(&chosen, DigestAlgorithm::Sha384);
                    store.mark_confirmed(&batch, &token()).await.unwrap();
                }

                let confirmed = store.count_status(TimestampStatus::Confirmed).await.unwrap();
                let pending = store.count_status(TimestampStatus::Pending).await.unwrap();
                prop_assert_eq!(confirmed as usize, chosen.len());
                prop_assert_eq!((confirmed + pending) as usize, confirm_mask.len());
                Ok(())
            })?;
        }
    }
}
