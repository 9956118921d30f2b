//! # Message Log Store
//!
//! Durable record storage for the secure message log. Provides a trait-based
//! interface with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! Every logged exchange becomes a [`LogRecord`](messagelog_core::LogRecord)
//! with a gap-free sequence id. Records move `Pending -> Confirmed ->
//! Archived`, and the store also keeps the persisted
//! [`ChainState`](messagelog_core::ChainState) that links archive files.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`ArchiveRecord`] - Bookkeeping row for a committed archive
//!
//! ## Usage
//!
//! ```rust,no_run
//! use messagelog_core::{DigestAlgorithm, DigestEngine, RecordInput};
//! use messagelog_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("messagelog.db").unwrap();
//!     let engine = DigestEngine::new(DigestAlgorithm::Sha256);
//!
//!     let input = RecordInput::new(b"request".to_vec(), b"response".to_vec(), vec![], vec![]);
//!     let id = store.append(&input, &engine).await.unwrap();
//!     println!("logged as {}", id);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Durable before return**: `append` commits before handing back the id
//! - **All or nothing**: confirm and archive transitions cover whole sets
//! - **Compare and swap**: the chain pointer only advances from the state
//!   the archive was built on

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{ArchiveRecord, Store};
