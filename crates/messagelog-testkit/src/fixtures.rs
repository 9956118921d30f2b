//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;

use messagelog_archive::{ArchiveBuilder, ArchiveConfig};
use messagelog_core::{DigestAlgorithm, DigestEngine, RecordInput, SequenceId};
use messagelog_store::{MemoryStore, Result as StoreResult, Store};
use messagelog_timestamp::tsa::memory::MemoryTsa;
use messagelog_timestamp::{StaticGlobalConf, TimestampAuthority, TimestampBatcher, TimestampConfig};

/// A memory store, an in-memory TSA and a scratch archive directory.
pub struct TestFixture {
    pub store: Arc<MemoryStore>,
    pub tsa: Arc<MemoryTsa>,
    pub globalconf: Arc<StaticGlobalConf>,
    pub algorithm: DigestAlgorithm,
    dir: TempDir,
}

impl TestFixture {
    /// Create a SHA-256 fixture.
    pub fn new() -> Self {
        Self::with_algorithm(DigestAlgorithm::Sha256)
    }

    /// Create a fixture using `algorithm` everywhere.
    pub fn with_algorithm(algorithm: DigestAlgorithm) -> Self {
        let tsa = Arc::new(MemoryTsa::new("test-tsa"));
        let authority: Arc<dyn TimestampAuthority> = tsa.clone();
        let globalconf = Arc::new(StaticGlobalConf::new(vec![authority], algorithm));
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => panic!("cannot create fixture directory: {}", e),
        };
        Self {
            store: Arc::new(MemoryStore::new()),
            tsa,
            globalconf,
            algorithm,
            dir,
        }
    }

    /// Scratch directory owned by the fixture.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where archives are written.
    pub fn archive_dir(&self) -> PathBuf {
        self.dir.path().join("archive")
    }

    pub fn timestamp_config(&self) -> TimestampConfig {
        TimestampConfig::default()
    }

    pub fn archive_config(&self) -> ArchiveConfig {
        ArchiveConfig {
            directory: self.archive_dir(),
            digest_algorithm: self.algorithm,
            ..ArchiveConfig::default()
        }
    }

    pub fn batcher(&self) -> TimestampBatcher {
        TimestampBatcher::new(self.store.clone(), self.globalconf.clone(), self.timestamp_config())
    }

    pub fn builder(&self) -> ArchiveBuilder {
        ArchiveBuilder::new(self.store.clone(), self.archive_config())
    }

    /// Append `count` sample exchanges, numbered from `start`.
    pub async fn log_exchanges(&self, start: u32, count: u32) -> StoreResult<Vec<SequenceId>> {
        let engine = DigestEngine::new(self.algorithm);
        let mut ids = Vec::with_capacity(count as usize);
        for n in start..start + count {
            ids.push(self.store.append(&sample_exchange(n), &engine).await?);
        }
        Ok(ids)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A deterministic sample exchange.
pub fn sample_exchange(n: u32) -> RecordInput {
    RecordInput::new(
        Bytes::from(format!(
            "<Envelope><Header><id>{}</id></Header><Body><getRandom/></Body></Envelope>",
            n
        )),
        Bytes::from(format!(
            "<Envelope><Header><id>{}</id></Header><Body><data>{}</data></Body></Envelope>",
            n,
            n.wrapping_mul(2_654_435_761)
        )),
        Bytes::from(n.to_be_bytes().repeat(16)),
        Bytes::from_static(b"-----BEGIN CERTIFICATE-----\nfixture\n-----END CERTIFICATE-----\n"),
    )
}
