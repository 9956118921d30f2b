//! LinkingInfo: the chain metadata stored inside every archive file.
//!
//! Grammar (lines separated by `\n`, one optional trailing `\n`):
//!
//! ```text
//! linkinginfo = header entry+
//! header      = prev-digest SP prev-name SP algorithm-id
//! entry       = entry-digest SP container-name
//! prev-digest = "-" | lowercase-hex
//! prev-name   = "-" | name
//! ```
//!
//! `prev-digest` and `prev-name` are either both `-` (first archive ever)
//! or both present.

use std::collections::HashSet;

use crate::digest::{is_hex_digest, DigestAlgorithm, DigestEngine};
use crate::error::{CoreError, Result};
use crate::record::ChainState;

/// File name of the linking info entry inside an archive.
pub const LINKING_INFO_NAME: &str = "linkinginfo";

/// Placeholder meaning "no previous value".
pub const NO_VALUE: &str = "-";

/// One `(digest, container name)` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkingEntry {
    /// Hex digest of the container bytes.
    pub digest: String,
    /// Container file name inside the archive.
    pub name: String,
}

/// Parsed linking info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkingInfo {
    /// Final chain digest of the preceding archive; `None` for the first.
    pub previous_digest: Option<String>,
    /// Name of the preceding archive; `None` for the first.
    pub previous_archive_name: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// Entries in write order.
    pub entries: Vec<LinkingEntry>,
}

impl LinkingInfo {
    /// Empty linking info chained onto `previous`.
    pub fn new(algorithm: DigestAlgorithm, previous: &ChainState) -> Self {
        let (previous_digest, previous_archive_name) = if previous.is_genesis() {
            (None, None)
        } else {
            (
                Some(previous.last_digest.clone()),
                Some(previous.last_archive_name.clone()),
            )
        };

        Self {
            previous_digest,
            previous_archive_name,
            algorithm,
            entries: Vec::new(),
        }
    }

    /// Seed of the running chain: the previous digest, or `""`.
    pub fn chain_seed(&self) -> &str {
        self.previous_digest.as_deref().unwrap_or("")
    }

    /// Serialize to the text format.
    pub fn to_text(&self) -> String {
        let mut out = format!(
            "{} {} {}\n",
            self.previous_digest.as_deref().unwrap_or(NO_VALUE),
            self.previous_archive_name.as_deref().unwrap_or(NO_VALUE),
            self.algorithm.id()
        );
        for entry in &self.entries {
            out.push_str(&entry.digest);
            out.push(' ');
            out.push_str(&entry.name);
            out.push('\n');
        }
        out
    }

    /// Parse the text format.
    ///
    /// The algorithm id is checked before any entry line is looked at, so an
    /// unsupported algorithm is always reported as such.
    pub fn parse(text: &str) -> Result<Self> {
        let body = text.strip_suffix('\n').unwrap_or(text);
        if body.is_empty() {
            return Err(malformed("empty linking info"));
        }

        let mut lines = body.split('\n');
        let header = lines.next().unwrap_or_default();
        let fields: Vec<&str> = header.split(' ').collect();
        if fields.len() != 3 || fields.iter().any(|f| f.is_empty()) {
            return Err(malformed(format!(
                "header must have exactly three fields, got {:?}",
                header
            )));
        }

        let algorithm: DigestAlgorithm = fields[2].parse()?;

        let previous_digest = match fields[0] {
            NO_VALUE => None,
            digest if is_hex_digest(digest) => Some(digest.to_string()),
            other => return Err(malformed(format!("invalid previous digest {:?}", other))),
        };
        let previous_archive_name = match fields[1] {
            NO_VALUE => None,
            name => Some(name.to_string()),
        };
        if previous_digest.is_some() != previous_archive_name.is_some() {
            return Err(malformed(
                "previous digest and previous archive name must both be present or both be '-'",
            ));
        }

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        for (index, line) in lines.enumerate() {
            let line_no = index + 2;
            let parts: Vec<&str> = line.split(' ').collect();
            if parts.len() != 2 || parts[1].is_empty() {
                return Err(malformed(format!("line {}: expected '<digest> <name>'", line_no)));
            }
            let (digest, name) = (parts[0], parts[1]);

            if digest.len() != algorithm.hex_len() || !is_hex_digest(digest) {
                return Err(malformed(format!(
                    "line {}: not a {} hex digest: {:?}",
                    line_no, algorithm, digest
                )));
            }
            if name == LINKING_INFO_NAME {
                return Err(malformed(format!("line {}: reserved name {}", line_no, name)));
            }
            if !seen.insert(name) {
                return Err(malformed(format!("line {}: duplicate entry {}", line_no, name)));
            }

            entries.push(LinkingEntry {
                digest: digest.to_string(),
                name: name.to_string(),
            });
        }

        if entries.is_empty() {
            return Err(malformed("no entries"));
        }

        Ok(Self {
            previous_digest,
            previous_archive_name,
            algorithm,
            entries,
        })
    }
}

fn malformed(msg: impl Into<String>) -> CoreError {
    CoreError::MalformedLinkingInfo(msg.into())
}

/// Accumulates entries while an archive is being assembled.
///
/// Computes per-entry digests and the running chain digest in write order.
#[derive(Debug, Clone)]
pub struct LinkingChain {
    engine: DigestEngine,
    info: LinkingInfo,
    running: String,
}

impl LinkingChain {
    /// Start a chain on top of `previous`.
    pub fn start(algorithm: DigestAlgorithm, previous: &ChainState) -> Self {
        let info = LinkingInfo::new(algorithm, previous);
        let running = info.chain_seed().to_string();
        Self {
            engine: DigestEngine::new(algorithm),
            info,
            running,
        }
    }

    /// Add a container; returns its entry digest.
    pub fn add_entry(&mut self, name: impl Into<String>, bytes: &[u8]) -> String {
        let digest = self.engine.digest(bytes);
        self.running = self.engine.chain_step(&digest, &self.running);
        self.info.entries.push(LinkingEntry {
            digest: digest.clone(),
            name: name.into(),
        });
        digest
    }

    /// Running chain digest so far.
    pub fn running_digest(&self) -> &str {
        &self.running
    }

    /// Number of entries added.
    pub fn len(&self) -> usize {
        self.info.entries.len()
    }

    /// Whether no entries were added.
    pub fn is_empty(&self) -> bool {
        self.info.entries.is_empty()
    }

    /// Finish: the linking info and the final chain digest.
    pub fn finish(self) -> (LinkingInfo, String) {
        (self.info, self.running)
    }
}
