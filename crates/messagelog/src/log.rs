//! The MessageLog: unified API for the secure message log.
//!
//! The proxy calls [`MessageLog::log_exchange`] for every completed
//! exchange. Timestamping and archiving run as separate jobs, either driven
//! by [`spawn_jobs`](crate::jobs::spawn_jobs) or called directly.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use messagelog_archive::{ArchiveBuilder, ArchiveConfig, ArchiveOutcome};
use messagelog_core::{ChainState, DigestEngine, LogRecord, RecordInput, SequenceId, TimestampStatus};
use messagelog_store::{SqliteStore, Store};
use messagelog_timestamp::{
    BatchOutcome, GlobalConf, HttpTsa, LocalSigner, Signer, StaticGlobalConf, TimestampAuthority,
    TimestampBatcher, TimestampConfig,
};

use crate::config::MessageLogConfig;
use crate::error::{ConfigError, Result};

/// Record counts per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub confirmed: u64,
    pub archived: u64,
}

/// The message log of one Security Server node.
pub struct MessageLog {
    store: Arc<dyn Store>,
    globalconf: Arc<dyn GlobalConf>,
    batcher: TimestampBatcher,
    archiver: ArchiveBuilder,
}

impl MessageLog {
    /// Assemble a message log from its collaborators.
    pub fn new(
        store: Arc<dyn Store>,
        globalconf: Arc<dyn GlobalConf>,
        timestamp: TimestampConfig,
        archive: ArchiveConfig,
    ) -> Self {
        Self {
            batcher: TimestampBatcher::new(store.clone(), globalconf.clone(), timestamp),
            archiver: ArchiveBuilder::new(store.clone(), archive),
            store,
            globalconf,
        }
    }

    /// Use `signer` for batch digest signatures.
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.batcher = self.batcher.with_signer(signer);
        self
    }

    /// Open the SQLite store and HTTP TSAs named in `config`.
    pub fn open(config: &MessageLogConfig) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.database)?);

        let timestamp = config.timestamp_config();
        let mut tsas: Vec<Arc<dyn TimestampAuthority>> = Vec::new();
        for url in &config.timestamp.tsa_urls {
            tsas.push(Arc::new(HttpTsa::new(url.as_str(), timestamp.tsa_timeout)?));
        }
        if tsas.is_empty() {
            warn!("no TSA configured, records will stay pending");
        }
        let globalconf = Arc::new(StaticGlobalConf::new(tsas, config.digest_algorithm));

        let mut log = Self::new(store, globalconf, timestamp, config.archive_config());
        if let Some(path) = &config.timestamp.signer_key_file {
            let seed = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            log = log.with_signer(Arc::new(LocalSigner::from_seed_hex(&seed)?));
        }

        info!(
            database = %config.database.display(),
            algorithm = %config.digest_algorithm,
            archive_dir = %config.archive.directory.display(),
            "message log opened"
        );
        Ok(log)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn timestamp_config(&self) -> &TimestampConfig {
        self.batcher.config()
    }

    pub fn archive_config(&self) -> &ArchiveConfig {
        self.archiver.config()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Proxy Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Durably log one completed exchange.
    ///
    /// An error means the exchange is not provably logged; the caller must
    /// surface it rather than carry on.
    pub async fn log_exchange(&self, input: RecordInput) -> Result<SequenceId> {
        let engine = DigestEngine::new(self.globalconf.digest_algorithm());
        match self.store.append(&input, &engine).await {
            Ok(id) => {
                debug!(sequence_id = %id, algorithm = %engine.algorithm(), "exchange logged");
                Ok(id)
            }
            Err(e) => {
                error!(error = %e, "exchange could not be logged");
                Err(e.into())
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Jobs
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one timestamping round. Non-reentrant.
    pub async fn run_timestamper_once(&self) -> Result<BatchOutcome> {
        Ok(self.batcher.run_once().await?)
    }

    /// Run one archive build. Non-reentrant.
    ///
    /// With several nodes sharing one chain, the caller must make sure only
    /// one node runs this at a time.
    pub async fn run_archiver_once(&self) -> Result<ArchiveOutcome> {
        Ok(self.archiver.build_archive().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Query Operations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_record(&self, id: SequenceId) -> Result<Option<LogRecord>> {
        Ok(self.store.get_record(id).await?)
    }

    /// Current archive chain pointer.
    pub async fn chain_state(&self) -> Result<ChainState> {
        Ok(self.store.chain_state().await?)
    }

    pub async fn status_counts(&self) -> Result<StatusCounts> {
        Ok(StatusCounts {
            pending: self.store.count_status(TimestampStatus::Pending).await?,
            confirmed: self.store.count_status(TimestampStatus::Confirmed).await?,
            archived: self.store.count_status(TimestampStatus::Archived).await?,
        })
    }
}
