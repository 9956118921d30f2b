//! Per-message evidence containers.
//!
//! A container is a zip holding everything needed to prove one exchange:
//!
//! ```text
//! mimetype                    application/vnd.etsi.asic-e+zip
//! manifest.txt                key: value lines describing the record
//! message/request             request bytes
//! message/response            response bytes
//! signature                   detached signature
//! signer-certificate          signer certificate
//! timestamp/token             TSA token over the batch digest
//! timestamp/batch.txt         "<algorithm> <batch digest>" then member digests
//! timestamp/batch-signature   optional, signature over the batch digest
//! ```

use bytes::Bytes;

use messagelog_core::{compute_batch_digest, DigestAlgorithm, LogRecord, SequenceId};

use crate::error::{ArchiveError, Result};
use crate::zipfile::{read_entries, write_entries, ZipEntry};

pub const MIMETYPE: &str = "application/vnd.etsi.asic-e+zip";

const MIMETYPE_ENTRY: &str = "mimetype";
const MANIFEST_ENTRY: &str = "manifest.txt";
const REQUEST_ENTRY: &str = "message/request";
const RESPONSE_ENTRY: &str = "message/response";
const SIGNATURE_ENTRY: &str = "signature";
const CERTIFICATE_ENTRY: &str = "signer-certificate";
const TOKEN_ENTRY: &str = "timestamp/token";
const BATCH_ENTRY: &str = "timestamp/batch.txt";
const BATCH_SIGNATURE_ENTRY: &str = "timestamp/batch-signature";

/// Build the container bytes for a confirmed record.
pub fn build_container(record: &LogRecord) -> Result<Vec<u8>> {
    let evidence = record
        .timestamp
        .as_ref()
        .ok_or(ArchiveError::MissingTimestamp(record.sequence_id.get()))?;

    let manifest = format!(
        "sequence-id: {}\n\
         digest-algorithm: {}\n\
         message-digest: {}\n\
         logged-at: {}\n\
         tsa: {}\n\
         batch-id: {}\n\
         confirmed-at: {}\n",
        record.sequence_id,
        record.digest_algorithm,
        record.message_digest,
        record.logged_at,
        evidence.token.tsa_name,
        evidence.batch_id,
        evidence.token.confirmed_at,
    );

    let mut batch = format!("{} {}\n", evidence.algorithm, evidence.batch_digest);
    for digest in &evidence.member_digests {
        batch.push_str(digest);
        batch.push('\n');
    }

    let mut entries = vec![
        ZipEntry::new(MIMETYPE_ENTRY, MIMETYPE.as_bytes()),
        ZipEntry::new(MANIFEST_ENTRY, manifest.into_bytes()),
        ZipEntry::new(REQUEST_ENTRY, record.request.to_vec()),
        ZipEntry::new(RESPONSE_ENTRY, record.response.to_vec()),
        ZipEntry::new(SIGNATURE_ENTRY, record.signature.to_vec()),
        ZipEntry::new(CERTIFICATE_ENTRY, record.signer_certificate.to_vec()),
        ZipEntry::new(TOKEN_ENTRY, evidence.token.token.to_vec()),
        ZipEntry::new(BATCH_ENTRY, batch.into_bytes()),
    ];
    if let Some(signature) = &evidence.token.batch_signature {
        entries.push(ZipEntry::new(BATCH_SIGNATURE_ENTRY, signature.to_vec()));
    }

    Ok(write_entries(&entries)?)
}

/// Contents of an evidence container, as read back by auditors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceContainer {
    pub sequence_id: SequenceId,
    pub message_digest: String,
    pub request: Bytes,
    pub response: Bytes,
    pub signature: Bytes,
    pub signer_certificate: Bytes,
    pub token: Bytes,
    pub batch_algorithm: DigestAlgorithm,
    pub batch_digest: String,
    pub member_digests: Vec<String>,
    pub batch_signature: Option<Bytes>,
}

impl EvidenceContainer {
    /// Parse container bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let entries = read_entries(bytes)?;
        let get = |name: &str| -> Option<Bytes> {
            entries
                .iter()
                .find(|e| e.name == name)
                .map(|e| Bytes::from(e.bytes.clone()))
        };
        let require = |name: &str| -> Result<Bytes> {
            get(name).ok_or_else(|| invalid(format!("container lacks {}", name)))
        };

        if require(MIMETYPE_ENTRY)?.as_ref() != MIMETYPE.as_bytes() {
            return Err(invalid("unexpected mimetype"));
        }

        let manifest = text(&require(MANIFEST_ENTRY)?)?;
        let field = |key: &str| -> Result<String> {
            manifest
                .lines()
                .find_map(|line| line.strip_prefix(key).and_then(|v| v.strip_prefix(": ")))
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("manifest lacks {}", key)))
        };
        let sequence_id = field("sequence-id")?
            .parse::<u64>()
            .map_err(|e| invalid(format!("bad sequence id: {}", e)))?;

        let batch = text(&require(BATCH_ENTRY)?)?;
        let mut lines = batch.lines();
        let header = lines.next().unwrap_or_default();
        let (algorithm, batch_digest) = header
            .split_once(' ')
            .ok_or_else(|| invalid("bad batch header"))?;

        Ok(Self {
            sequence_id: SequenceId(sequence_id),
            message_digest: field("message-digest")?,
            request: require(REQUEST_ENTRY)?,
            response: require(RESPONSE_ENTRY)?,
            signature: require(SIGNATURE_ENTRY)?,
            signer_certificate: require(CERTIFICATE_ENTRY)?,
            token: require(TOKEN_ENTRY)?,
            batch_algorithm: algorithm.parse()?,
            batch_digest: batch_digest.to_string(),
            member_digests: lines.map(str::to_string).collect(),
            batch_signature: get(BATCH_SIGNATURE_ENTRY),
        })
    }

    /// Whether the batch digest recomputes from the member list and the
    /// member list contains this message.
    pub fn batch_is_consistent(&self) -> bool {
        compute_batch_digest(self.batch_algorithm, &self.member_digests) == self.batch_digest
            && self.member_digests.contains(&self.message_digest)
    }
}

fn invalid(msg: impl Into<String>) -> ArchiveError {
    ArchiveError::InvalidContainer(msg.into())
}

fn text(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| invalid("text entry is not UTF-8"))
}
