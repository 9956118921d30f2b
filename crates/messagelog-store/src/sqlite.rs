//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite
//! in WAL mode with `synchronous = FULL`, wrapped in async via
//! `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use messagelog_core::{
    ChainState, DigestAlgorithm, DigestEngine, LogRecord, RecordInput, SequenceId, TimestampBatch,
    TimestampEvidence, TimestampStatus, TimestampToken,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    check_archive_row, check_distinct, check_transition, now_millis, ArchiveRecord, Store,
};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. The mutex is also the single-writer lock
/// that serializes sequence id assignment.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        configure(&conn)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", 2)?;
    conn.pragma_update(None, "foreign_keys", 1)?;
    Ok(())
}

const RECORD_SELECT: &str = "
    SELECT r.sequence_id AS sequence_id,
           r.message_digest AS message_digest,
           r.digest_algorithm AS digest_algorithm,
           r.request AS request,
           r.response AS response,
           r.signature AS signature,
           r.signer_certificate AS signer_certificate,
           r.status AS status,
           r.archive_name AS archive_name,
           r.logged_at AS logged_at,
           r.batch_id AS batch_id,
           b.digest_algorithm AS batch_algorithm,
           b.batch_digest AS batch_digest,
           b.member_digests AS member_digests,
           b.tsa_name AS tsa_name,
           b.token AS token,
           b.batch_signature AS batch_signature,
           b.confirmed_at AS confirmed_at
    FROM records r
    LEFT JOIN timestamp_batches b ON b.batch_id = r.batch_id";

fn conversion_error(ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, ty, msg.into())
}

fn parse_algorithm(row: &Row<'_>, column: &str) -> rusqlite::Result<DigestAlgorithm> {
    let id: String = row.get(column)?;
    id.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn parse_status(code: i64) -> rusqlite::Result<TimestampStatus> {
    TimestampStatus::from_i64(code)
        .ok_or_else(|| conversion_error(Type::Integer, format!("unknown status {}", code)))
}

// Helper to convert a row to LogRecord
fn row_to_record(row: &Row<'_>) -> rusqlite::Result<LogRecord> {
    let batch_id: Option<i64> = row.get("batch_id")?;

    let timestamp = match batch_id {
        None => None,
        Some(batch_id) => {
            let members_cbor: Vec<u8> = row.get("member_digests")?;
            let member_digests: Vec<String> = ciborium::from_reader(&members_cbor[..])
                .map_err(|e| conversion_error(Type::Blob, e.to_string()))?;

            Some(TimestampEvidence {
                batch_id: batch_id as u64,
                algorithm: parse_algorithm(row, "batch_algorithm")?,
                batch_digest: row.get("batch_digest")?,
                member_digests,
                token: TimestampToken {
                    tsa_name: row.get("tsa_name")?,
                    token: Bytes::from(row.get::<_, Vec<u8>>("token")?),
                    batch_signature: row
                        .get::<_, Option<Vec<u8>>>("batch_signature")?
                        .map(Bytes::from),
                    confirmed_at: row.get("confirmed_at")?,
                },
            })
        }
    };

    Ok(LogRecord {
        sequence_id: SequenceId(row.get::<_, i64>("sequence_id")? as u64),
        message_digest: row.get("message_digest")?,
        digest_algorithm: parse_algorithm(row, "digest_algorithm")?,
        signature: Bytes::from(row.get::<_, Vec<u8>>("signature")?),
        signer_certificate: Bytes::from(row.get::<_, Vec<u8>>("signer_certificate")?),
        request: Bytes::from(row.get::<_, Vec<u8>>("request")?),
        response: Bytes::from(row.get::<_, Vec<u8>>("response")?),
        status: parse_status(row.get("status")?)?,
        timestamp,
        archive_name: row.get("archive_name")?,
        logged_at: row.get("logged_at")?,
    })
}

fn list_by_status(conn: &Connection, status: TimestampStatus, limit: usize) -> Result<Vec<LogRecord>> {
    let sql = format!(
        "{} WHERE r.status = ?1 ORDER BY r.sequence_id LIMIT ?2",
        RECORD_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params![status.to_i64(), limit as i64], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Current status and digest of a record, or `NotFound`.
fn record_status(conn: &Connection, id: SequenceId) -> Result<(TimestampStatus, String)> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT status, message_digest FROM records WHERE sequence_id = ?1",
            params![id.get() as i64],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (code, digest) = row.ok_or(StoreError::NotFound(id.get()))?;
    let status = TimestampStatus::from_i64(code)
        .ok_or_else(|| StoreError::InvalidData(format!("record {} has status {}", id, code)))?;
    Ok((status, digest))
}

fn read_chain_state(conn: &Connection) -> Result<ChainState> {
    let state = conn.query_row(
        "SELECT last_digest, last_archive_name FROM chain_state WHERE id = 1",
        [],
        |row| {
            Ok(ChainState {
                last_digest: row.get(0)?,
                last_archive_name: row.get(1)?,
            })
        },
    )?;
    Ok(state)
}

#[async_trait]
impl Store for SqliteStore {
    async fn append(&self, input: &RecordInput, engine: &DigestEngine) -> Result<SequenceId> {
        let input = input.clone();
        let message_digest = input.message_digest(engine);
        let algorithm = engine.algorithm();

        let id = self
            .run(move |conn| {
                let tx = conn.transaction()?;

                let next: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM records",
                    [],
                    |row| row.get(0),
                )?;

                tx.execute(
                    "INSERT INTO records (
                        sequence_id, message_digest, digest_algorithm, request, response,
                        signature, signer_certificate, status, logged_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        next,
                        message_digest,
                        algorithm.id(),
                        input.request.as_ref(),
                        input.response.as_ref(),
                        input.signature.as_ref(),
                        input.signer_certificate.as_ref(),
                        TimestampStatus::Pending.to_i64(),
                        now_millis(),
                    ],
                )?;

                tx.commit()?;
                Ok(SequenceId(next as u64))
            })
            .await?;

        debug!(sequence_id = id.get(), "record appended");
        Ok(id)
    }

    async fn get_record(&self, id: SequenceId) -> Result<Option<LogRecord>> {
        self.run(move |conn| {
            let sql = format!("{} WHERE r.sequence_id = ?1", RECORD_SELECT);
            conn.query_row(&sql, params![id.get() as i64], row_to_record)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<LogRecord>> {
        self.run(move |conn| list_by_status(conn, TimestampStatus::Pending, limit))
            .await
    }

    async fn list_confirmed_unarchived(&self, limit: usize) -> Result<Vec<LogRecord>> {
        self.run(move |conn| list_by_status(conn, TimestampStatus::Confirmed, limit))
            .await
    }

    async fn count_status(&self, status: TimestampStatus) -> Result<u64> {
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM records WHERE status = ?1",
                params![status.to_i64()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn mark_confirmed(&self, batch: &TimestampBatch, token: &TimestampToken) -> Result<u64> {
        let batch = batch.clone();
        let token = token.clone();
        let member_count = batch.len();

        let batch_id = self
            .run(move |conn| {
                check_distinct(&batch.members)?;
                if batch.members.len() != batch.member_digests.len() {
                    return Err(StoreError::InvalidData(
                        "batch members and digests differ in length".into(),
                    ));
                }

                let tx = conn.transaction()?;

                for (id, expected_digest) in batch.members.iter().zip(&batch.member_digests) {
                    let (status, digest) = record_status(&tx, *id)?;
                    check_transition(*id, status, TimestampStatus::Confirmed)?;
                    if &digest != expected_digest {
                        return Err(StoreError::InvalidData(format!(
                            "record {} digest does not match the batch",
                            id
                        )));
                    }
                }

                let mut members_cbor = Vec::new();
                ciborium::into_writer(&batch.member_digests, &mut members_cbor)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;

                tx.execute(
                    "INSERT INTO timestamp_batches (
                        digest_algorithm, batch_digest, member_digests, tsa_name, token,
                        batch_signature, confirmed_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        batch.algorithm.id(),
                        batch.batch_digest,
                        members_cbor,
                        token.tsa_name,
                        token.token.as_ref(),
                        token.batch_signature.as_deref(),
                        token.confirmed_at,
                    ],
                )?;
                let batch_id = tx.last_insert_rowid();

                for id in &batch.members {
                    tx.execute(
                        "UPDATE records SET status = ?1, batch_id = ?2
                         WHERE sequence_id = ?3 AND status = ?4",
                        params![
                            TimestampStatus::Confirmed.to_i64(),
                            batch_id,
                            id.get() as i64,
                            TimestampStatus::Pending.to_i64(),
                        ],
                    )?;
                }

                tx.commit()?;
                Ok(batch_id as u64)
            })
            .await?;

        info!(batch_id, records = member_count, "timestamp batch confirmed");
        Ok(batch_id)
    }

    async fn chain_state(&self) -> Result<ChainState> {
        self.run(|conn| read_chain_state(conn)).await
    }

    async fn mark_archived(
        &self,
        ids: &[SequenceId],
        archive: &ArchiveRecord,
        expected: &ChainState,
        next: &ChainState,
    ) -> Result<()> {
        let ids = ids.to_vec();
        let archive = archive.clone();
        let expected = expected.clone();
        let next = next.clone();

        self.run(move |conn| {
            check_distinct(&ids)?;
            check_archive_row(&ids, &archive, &next)?;

            let tx = conn.transaction()?;

            let current = read_chain_state(&tx)?;
            if current != expected {
                return Err(StoreError::ChainStateConflict {
                    expected: expected.last_archive_name,
                    actual: current.last_archive_name,
                });
            }

            for id in &ids {
                let (status, _) = record_status(&tx, *id)?;
                check_transition(*id, status, TimestampStatus::Archived)?;
            }

            for id in &ids {
                tx.execute(
                    "UPDATE records SET status = ?1, archive_name = ?2
                     WHERE sequence_id = ?3 AND status = ?4",
                    params![
                        TimestampStatus::Archived.to_i64(),
                        archive.name,
                        id.get() as i64,
                        TimestampStatus::Confirmed.to_i64(),
                    ],
                )?;
            }

            tx.execute(
                "INSERT INTO archives (
                    name, first_sequence, last_sequence, record_count, last_digest, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    archive.name,
                    archive.first_sequence.get() as i64,
                    archive.last_sequence.get() as i64,
                    archive.record_count as i64,
                    archive.last_digest,
                    archive.created_at,
                ],
            )?;

            tx.execute(
                "UPDATE chain_state SET last_digest = ?1, last_archive_name = ?2, updated_at = ?3
                 WHERE id = 1",
                params![next.last_digest, next.last_archive_name, now_millis()],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn has_archive(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM archives WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn list_archives(&self) -> Result<Vec<ArchiveRecord>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, first_sequence, last_sequence, record_count, last_digest, created_at
                 FROM archives ORDER BY first_sequence",
            )?;
            let archives = stmt
                .query_map([], |row| {
                    Ok(ArchiveRecord {
                        name: row.get(0)?,
                        first_sequence: SequenceId(row.get::<_, i64>(1)? as u64),
                        last_sequence: SequenceId(row.get::<_, i64>(2)? as u64),
                        record_count: row.get::<_, i64>(3)? as u64,
                        last_digest: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(archives)
        })
        .await
    }
}
