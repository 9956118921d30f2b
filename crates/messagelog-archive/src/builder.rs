//! ArchiveBuilder: packs confirmed records into hash-chained archive files.
//!
//! One build:
//!
//! 1. Remove stray `.part` files left by an interrupted build.
//! 2. Read up to `max_records_per_archive` confirmed records and the current
//!    [`ChainState`].
//! 3. Build one evidence container per record and chain them, seeded by the
//!    previous archive's final digest.
//! 4. Optionally encrypt, then write a uniquely named `.part` file, fsync it
//!    and link it to the archive name without replacing an existing file.
//! 5. Commit: records archived, bookkeeping row and new chain state in one
//!    store transaction. If the commit fails, the file this build created is
//!    removed unless the store records that name as committed.
//!
//! A builder never deletes or overwrites a file under an archive name. An
//! unrecorded file in the way is kept if it holds the same bytes and moved
//! aside otherwise; a name the store has committed stops the build.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use messagelog_core::{
    ChainState, DigestAlgorithm, LinkingChain, LinkingInfo, LogRecord, SequenceId,
    LINKING_INFO_NAME,
};
use messagelog_store::{ArchiveRecord, Store};

use crate::container::build_container;
use crate::encrypt::{load_public_key, ArchiveEncryptor};
use crate::error::{ArchiveError, Result};
use crate::zipfile::{write_entries, ZipEntry};

/// Suffix of archive files that were written but not yet renamed.
pub const PART_SUFFIX: &str = ".part";

/// Suffix appended to the file name of encrypted archives.
pub const ENCRYPTED_SUFFIX: &str = ".enc";

const ARCHIVE_PREFIX: &str = "mlog-";
const ARCHIVE_EXTENSION: &str = ".zip";

/// Encryption at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionPolicy {
    /// File holding the recipient's hex X25519 public key.
    pub recipient_key_file: PathBuf,
    /// Withhold archives when the key is unusable instead of writing
    /// plaintext.
    pub mandatory: bool,
}

/// Configuration for the archive builder.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Where archive files are written.
    pub directory: PathBuf,
    /// Upper bound on records per archive file.
    pub max_records_per_archive: usize,
    /// Do not build an archive with fewer records than this.
    pub min_records: usize,
    /// Chain digest algorithm written into the linking info.
    pub digest_algorithm: DigestAlgorithm,
    pub encryption: Option<EncryptionPolicy>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("archives"),
            max_records_per_archive: 1000,
            min_records: 1,
            digest_algorithm: DigestAlgorithm::default(),
            encryption: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assembly (pure)
// ─────────────────────────────────────────────────────────────────────────────

/// An archive assembled in memory, not yet written.
#[derive(Debug, Clone)]
pub struct AssembledArchive {
    /// Logical archive name, as written into the next linking info.
    pub name: String,
    /// Plaintext zip bytes.
    pub bytes: Vec<u8>,
    pub linking: LinkingInfo,
    /// Final running chain digest.
    pub last_digest: String,
    /// Archived record ids, in write order.
    pub members: Vec<SequenceId>,
}

impl AssembledArchive {
    pub fn first(&self) -> Option<SequenceId> {
        self.members.first().copied()
    }

    pub fn last(&self) -> Option<SequenceId> {
        self.members.last().copied()
    }
}

/// Deterministic archive name for a record range and final digest.
pub fn archive_name(first: SequenceId, last: SequenceId, last_digest: &str) -> String {
    let short = last_digest.get(..16).unwrap_or(last_digest);
    format!("{}{}-{}-{}{}", ARCHIVE_PREFIX, first, last, short, ARCHIVE_EXTENSION)
}

/// Whether `file_name` looks like an archive this builder writes.
pub fn is_archive_file_name(file_name: &str) -> bool {
    let logical = file_name.strip_suffix(ENCRYPTED_SUFFIX).unwrap_or(file_name);
    logical.starts_with(ARCHIVE_PREFIX) && logical.ends_with(ARCHIVE_EXTENSION)
}

/// Build the archive bytes for `records` chained onto `previous`.
///
/// Records are written in ascending sequence order; the linking info is the
/// last zip entry.
pub fn assemble_archive(
    records: &[LogRecord],
    previous: &ChainState,
    algorithm: DigestAlgorithm,
) -> Result<AssembledArchive> {
    let mut sorted: Vec<&LogRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.sequence_id);

    let (first, last) = match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) => (first.sequence_id, last.sequence_id),
        _ => return Err(ArchiveError::Empty),
    };

    let mut chain = LinkingChain::start(algorithm, previous);
    let mut entries = Vec::with_capacity(sorted.len() + 1);
    for record in &sorted {
        let name = record.sequence_id.container_name();
        let bytes = build_container(record)?;
        chain.add_entry(name.clone(), &bytes);
        entries.push(ZipEntry::new(name, bytes));
    }

    let (linking, last_digest) = chain.finish();
    entries.push(ZipEntry::new(LINKING_INFO_NAME, linking.to_text().into_bytes()));

    Ok(AssembledArchive {
        name: archive_name(first, last, &last_digest),
        bytes: write_entries(&entries)?,
        linking,
        last_digest,
        members: sorted.iter().map(|r| r.sequence_id).collect(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// An archive that was written and committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArchive {
    /// Logical name (recorded in the chain state).
    pub name: String,
    /// File on disk.
    pub path: PathBuf,
    pub last_digest: String,
    pub record_count: usize,
    pub encrypted: bool,
}

/// Result of one build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Fewer confirmed records than `min_records`.
    NotEnoughRecords { available: usize },
    Built(BuiltArchive),
}

/// Builds and commits archives.
///
/// `build_archive` is non-reentrant on one builder. In a multi-node
/// deployment sharing one chain, only one node may run builds at a time;
/// that lock lives outside this crate. The compare-and-swap on the chain
/// state refuses the loser of a race, but does not replace the lock.
pub struct ArchiveBuilder {
    store: Arc<dyn Store>,
    config: ArchiveConfig,
    running: Mutex<()>,
}

impl ArchiveBuilder {
    pub fn new(store: Arc<dyn Store>, config: ArchiveConfig) -> Self {
        Self {
            store,
            config,
            running: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Run one build.
    pub async fn build_archive(&self) -> Result<ArchiveOutcome> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| ArchiveError::AlreadyRunning)?;

        let directory = self.config.directory.clone();
        blocking(move || fs::create_dir_all(&directory).map_err(ArchiveError::from)).await?;
        self.discard_stale_parts().await?;

        let records = self
            .store
            .list_confirmed_unarchived(self.config.max_records_per_archive)
            .await?;
        if records.is_empty() || records.len() < self.config.min_records {
            debug!(available = records.len(), "not enough confirmed records to archive");
            return Ok(ArchiveOutcome::NotEnoughRecords {
                available: records.len(),
            });
        }

        let previous = self.store.chain_state().await?;
        let algorithm = self.config.digest_algorithm;
        let seed = previous.clone();
        let assembled =
            blocking(move || assemble_archive(&records, &seed, algorithm)).await?;

        let encryptor = self.encryptor()?;
        let (bytes, file_name) = match &encryptor {
            Some(encryptor) => match encryptor.encrypt(&assembled.bytes) {
                Ok(sealed) => (sealed, format!("{}{}", assembled.name, ENCRYPTED_SUFFIX)),
                Err(e) => self.plaintext_fallback(e, &assembled)?,
            },
            None => (assembled.bytes.clone(), assembled.name.clone()),
        };
        let encrypted = file_name != assembled.name;

        let path = self.config.directory.join(&file_name);
        let part = part_path(&self.config.directory, &file_name);
        let staged = part.clone();
        blocking(move || write_durably(&staged, &bytes).map_err(ArchiveError::from)).await?;

        let placed = self.place(&part, &path, &assembled.name).await;
        let staged = part.clone();
        blocking(move || remove_if_exists(&staged).map_err(ArchiveError::from)).await?;
        let placement = placed?;

        let (first, last) = match (assembled.first(), assembled.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(ArchiveError::Empty),
        };
        let row = ArchiveRecord {
            name: assembled.name.clone(),
            first_sequence: first,
            last_sequence: last,
            record_count: assembled.members.len() as u64,
            last_digest: assembled.last_digest.clone(),
            created_at: now_millis(),
        };
        let next = ChainState {
            last_digest: assembled.last_digest.clone(),
            last_archive_name: assembled.name.clone(),
        };

        if let Err(e) = self
            .store
            .mark_archived(&assembled.members, &row, &previous, &next)
            .await
        {
            self.abandon(&path, &assembled.name, placement).await;
            error!(archive = %file_name, error = %e, "archive commit failed");
            return Err(e.into());
        }

        info!(
            archive = %file_name,
            records = assembled.members.len(),
            first = %first,
            last = %last,
            last_digest = %assembled.last_digest,
            encrypted,
            "archive committed"
        );

        Ok(ArchiveOutcome::Built(BuiltArchive {
            name: assembled.name,
            path,
            last_digest: assembled.last_digest,
            record_count: assembled.members.len(),
            encrypted,
        }))
    }

    /// Resolve the recipient key for this build.
    ///
    /// The key file is read on every build so a fixed key takes effect
    /// without a restart.
    fn encryptor(&self) -> Result<Option<ArchiveEncryptor>> {
        let Some(policy) = &self.config.encryption else {
            return Ok(None);
        };
        match load_public_key(&policy.recipient_key_file) {
            Ok(key) => Ok(Some(ArchiveEncryptor::new(key))),
            Err(e) if policy.mandatory => {
                error!(error = %e, "archive encryption key unavailable, archive withheld");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "archive encryption key unavailable, writing plaintext");
                Ok(None)
            }
        }
    }

    fn plaintext_fallback(
        &self,
        e: ArchiveError,
        assembled: &AssembledArchive,
    ) -> Result<(Vec<u8>, String)> {
        match &self.config.encryption {
            Some(policy) if !policy.mandatory => {
                warn!(error = %e, archive = %assembled.name, "encryption failed, writing plaintext");
                Ok((assembled.bytes.clone(), assembled.name.clone()))
            }
            _ => {
                error!(error = %e, archive = %assembled.name, "encryption failed, archive withheld");
                Err(e)
            }
        }
    }

    /// Bring the staged file to `target` without replacing anything there.
    async fn place(&self, part: &Path, target: &Path, name: &str) -> Result<Placement> {
        for _ in 0..2 {
            let (from, to) = (part.to_path_buf(), target.to_path_buf());
            if blocking(move || link_no_clobber(&from, &to).map_err(ArchiveError::from)).await? {
                return Ok(Placement::Created);
            }

            if self.store.has_archive(name).await? {
                warn!(archive = %name, "archive name already committed, build abandoned");
                return Err(ArchiveError::AlreadyArchived(name.to_string()));
            }

            let (ours, theirs) = (part.to_path_buf(), target.to_path_buf());
            if blocking(move || same_contents(&ours, &theirs).map_err(ArchiveError::from)).await? {
                debug!(archive = %name, "reusing identical uncommitted archive file");
                return Ok(Placement::Existing);
            }

            let aside = set_aside_path(target);
            warn!(
                file = %target.display(),
                moved_to = %aside.display(),
                "unrecorded archive file in the way, moving it aside"
            );
            let from = target.to_path_buf();
            blocking(move || fs::rename(&from, &aside).map_err(ArchiveError::from)).await?;
        }

        Err(ArchiveError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} keeps reappearing", target.display()),
        )))
    }

    /// Undo the file side of a build whose commit failed.
    async fn abandon(&self, path: &Path, name: &str, placement: Placement) {
        if placement == Placement::Existing {
            return;
        }
        match self.store.has_archive(name).await {
            Ok(false) => {
                let orphan = path.to_path_buf();
                match blocking(move || remove_if_exists(&orphan).map_err(ArchiveError::from)).await {
                    Ok(()) => debug!(file = %path.display(), "removed uncommitted archive file"),
                    Err(e) => warn!(file = %path.display(), error = %e, "cannot remove uncommitted archive file"),
                }
            }
            Ok(true) => warn!(archive = %name, "archive name committed elsewhere, file kept"),
            Err(e) => warn!(archive = %name, error = %e, "commit state unknown, file kept"),
        }
    }

    /// Remove `.part` files left by interrupted builds.
    async fn discard_stale_parts(&self) -> Result<()> {
        let directory = self.config.directory.clone();
        let names = blocking(move || list_file_names(&directory).map_err(ArchiveError::from)).await?;

        for name in names.into_iter().filter(|n| is_part_file_name(n)) {
            warn!(file = %name, "discarding unfinished archive file");
            let path = self.config.directory.join(&name);
            blocking(move || remove_if_exists(&path).map_err(ArchiveError::from)).await?;
        }
        Ok(())
    }
}

/// How the archive file came to be under its final name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// This build linked its own file.
    Created,
    /// An identical uncommitted file was already there.
    Existing,
}

// ─────────────────────────────────────────────────────────────────────────────
// File system helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))?
}

/// `<dir>/<file_name>.<random>.part`, unique per build.
fn part_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(format!("{}.{:016x}{}", file_name, rand::random::<u64>(), PART_SUFFIX))
}

/// Whether `file_name` is a staged file from [`part_path`].
fn is_part_file_name(file_name: &str) -> bool {
    file_name
        .strip_suffix(PART_SUFFIX)
        .and_then(|staged| staged.rsplit_once('.'))
        .map_or(false, |(archive, _)| is_archive_file_name(archive))
}

/// Create `path` with `bytes` and fsync it.
fn write_durably(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Give `part` the name `target` unless `target` exists. Returns false if it
/// does.
fn link_no_clobber(part: &Path, target: &Path) -> std::io::Result<bool> {
    match fs::hard_link(part, target) {
        Ok(()) => {
            if let Some(parent) = target.parent() {
                sync_dir(parent)?;
            }
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

fn same_contents(a: &Path, b: &Path) -> std::io::Result<bool> {
    Ok(fs::read(a)? == fs::read(b)?)
}

/// `<target>.<millis>-<random>.aside`
fn set_aside_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(format!(".{}-{:08x}.aside", now_millis(), rand::random::<u32>()));
    PathBuf::from(name)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn list_file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
