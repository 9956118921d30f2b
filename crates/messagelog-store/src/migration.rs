//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::traits::now_millis;

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Timestamp batches: one row per TSA token
        CREATE TABLE timestamp_batches (
            batch_id INTEGER PRIMARY KEY AUTOINCREMENT,
            digest_algorithm TEXT NOT NULL,
            batch_digest TEXT NOT NULL,
            member_digests BLOB NOT NULL,     -- CBOR array of hex digests, member order
            tsa_name TEXT NOT NULL,
            token BLOB NOT NULL,              -- DER timestamp token
            batch_signature BLOB,             -- nullable, present when batch signing is on
            confirmed_at INTEGER NOT NULL
        );

        -- Log records: one row per message exchange
        CREATE TABLE records (
            sequence_id INTEGER PRIMARY KEY,  -- assigned MAX+1 under the writer lock
            message_digest TEXT NOT NULL,
            digest_algorithm TEXT NOT NULL,
            request BLOB NOT NULL,
            response BLOB NOT NULL,
            signature BLOB NOT NULL,
            signer_certificate BLOB NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,  -- 0=pending, 1=confirmed, 2=archived
            batch_id INTEGER REFERENCES timestamp_batches(batch_id),
            archive_name TEXT,
            logged_at INTEGER NOT NULL
        );

        -- Committed archive files
        CREATE TABLE archives (
            name TEXT PRIMARY KEY,
            first_sequence INTEGER NOT NULL,
            last_sequence INTEGER NOT NULL,
            record_count INTEGER NOT NULL,
            last_digest TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Chain pointer: exactly one row
        CREATE TABLE chain_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_digest TEXT NOT NULL,
            last_archive_name TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        INSERT INTO chain_state (id, last_digest, last_archive_name, updated_at)
        VALUES (1, '', '', 0);

        CREATE INDEX idx_records_status ON records(status, sequence_id);
        CREATE INDEX idx_records_batch ON records(batch_id);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in ["records", "timestamp_batches", "archives", "chain_state", "schema_migrations"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);

        // The genesis chain row is created exactly once.
        let rows: u32 = conn
            .query_row("SELECT COUNT(*) FROM chain_state", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_chain_state_singleton_enforced() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let result = conn.execute(
            "INSERT INTO chain_state (id, last_digest, last_archive_name, updated_at)
             VALUES (2, 'x', 'y', 0)",
            [],
        );
        assert!(result.is_err());
    }
}
