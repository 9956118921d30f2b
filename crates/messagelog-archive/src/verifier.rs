//! ArchiveVerifier: offline, read-only integrity check of archive files.
//!
//! Given an archive and the final digest of the archive before it, the
//! verifier replays the chain from the archive's own containers and returns
//! the final digest, which in turn seeds the check of the next archive.
//!
//! Checks, in order:
//!
//! 1. The `linkinginfo` entry exists and parses (the algorithm id is checked
//!    before anything else in it).
//! 2. The number of declared entries equals the number of containers
//!    physically present.
//! 3. The declared previous digest equals the supplied one.
//! 4. Every declared entry, in declared order, names a container that exists
//!    and whose bytes hash to the declared digest.
//!
//! The first failing check decides the error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use messagelog_core::{is_hex_digest, DigestEngine, LinkingInfo, LINKING_INFO_NAME, NO_VALUE};

use crate::builder::ENCRYPTED_SUFFIX;
use crate::encrypt::{decrypt, is_encrypted, X25519SecretKey};
use crate::error::{ArchiveError, ChainVerifyError, VerifyError, VerifyResult};
use crate::zipfile::read_entries;

/// What the caller asserts came before the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviousDigest {
    /// The archive is the first one ever produced.
    First,
    /// Final chain digest of the preceding archive (lowercase hex).
    Digest(String),
}

impl PreviousDigest {
    /// Seed of the running chain.
    pub fn seed(&self) -> &str {
        match self {
            Self::First => "",
            Self::Digest(digest) => digest,
        }
    }

    fn matches(&self, declared: Option<&str>) -> bool {
        match (self, declared) {
            (Self::First, None) => true,
            (Self::Digest(supplied), Some(declared)) => supplied == declared,
            _ => false,
        }
    }
}

impl fmt::Display for PreviousDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str(NO_VALUE),
            Self::Digest(digest) => f.write_str(digest),
        }
    }
}

impl FromStr for PreviousDigest {
    type Err = VerifyError;

    /// `-` means first; anything else must be a hex digest (any case).
    fn from_str(s: &str) -> VerifyResult<Self> {
        if s == NO_VALUE {
            return Ok(Self::First);
        }
        let lower = s.to_ascii_lowercase();
        if is_hex_digest(&lower) {
            Ok(Self::Digest(lower))
        } else {
            Err(VerifyError::MalformedArchive(format!(
                "previous digest is not hex: {:?}",
                s
            )))
        }
    }
}

/// A successfully verified archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedArchive {
    /// Final running chain digest.
    pub last_digest: String,
    pub linking_info: LinkingInfo,
}

/// Verify plaintext archive bytes; returns the final chain digest.
pub fn verify_bytes(bytes: &[u8], previous: &PreviousDigest) -> VerifyResult<String> {
    verify_detailed(bytes, previous).map(|v| v.last_digest)
}

/// Verify plaintext archive bytes and return the parsed linking info too.
pub fn verify_detailed(bytes: &[u8], previous: &PreviousDigest) -> VerifyResult<VerifiedArchive> {
    let entries = read_entries(bytes)
        .map_err(|e| VerifyError::MalformedArchive(format!("not a readable zip archive: {}", e)))?;

    let linking = entries
        .iter()
        .find(|e| e.name == LINKING_INFO_NAME)
        .ok_or_else(|| VerifyError::MalformedArchive("missing linkinginfo".into()))?;
    let text = std::str::from_utf8(&linking.bytes)
        .map_err(|_| VerifyError::MalformedArchive("linkinginfo is not UTF-8".into()))?;
    let info = LinkingInfo::parse(text)?;

    let containers: Vec<_> = entries.iter().filter(|e| e.name != LINKING_INFO_NAME).collect();
    if containers.len() != info.entries.len() {
        return Err(VerifyError::MalformedArchive(format!(
            "linkinginfo declares {} entries but the archive holds {} containers",
            info.entries.len(),
            containers.len()
        )));
    }

    if !previous.matches(info.previous_digest.as_deref()) {
        return Err(VerifyError::ChainContinuityViolation {
            supplied: previous.to_string(),
            declared: info
                .previous_digest
                .clone()
                .unwrap_or_else(|| NO_VALUE.to_string()),
        });
    }

    let engine = DigestEngine::new(info.algorithm);
    let mut running = previous.seed().to_string();
    for entry in &info.entries {
        let container = containers
            .iter()
            .find(|c| c.name == entry.name)
            .ok_or_else(|| {
                VerifyError::MalformedArchive(format!(
                    "declared entry {} is not in the archive",
                    entry.name
                ))
            })?;

        let computed = engine.digest(&container.bytes);
        if computed != entry.digest {
            return Err(VerifyError::EntryDigestMismatch {
                entry: entry.name.clone(),
                declared: entry.digest.clone(),
                computed,
            });
        }
        running = engine.chain_step(&computed, &running);
    }

    Ok(VerifiedArchive {
        last_digest: running,
        linking_info: info,
    })
}

/// Verify an archive file.
///
/// Encrypted archives need [`verify_with_key`].
pub fn verify(path: &Path, previous: &PreviousDigest) -> VerifyResult<String> {
    verify_with_key(path, previous, None)
}

/// Verify an archive file, decrypting it first if it is encrypted.
pub fn verify_with_key(
    path: &Path,
    previous: &PreviousDigest,
    key: Option<&X25519SecretKey>,
) -> VerifyResult<String> {
    verify_file(path, previous, key).map(|v| v.last_digest)
}

fn verify_file(
    path: &Path,
    previous: &PreviousDigest,
    key: Option<&X25519SecretKey>,
) -> VerifyResult<VerifiedArchive> {
    let bytes = std::fs::read(path)?;
    if !is_encrypted(&bytes) {
        return verify_detailed(&bytes, previous);
    }

    let key = key.ok_or_else(|| {
        VerifyError::Decryption("archive is encrypted and no decryption key was given".into())
    })?;
    let plain = decrypt(&bytes, key).map_err(|e| match e {
        ArchiveError::Decryption(msg) => VerifyError::Decryption(msg),
        other => VerifyError::Decryption(other.to_string()),
    })?;
    verify_detailed(&plain, previous)
}

/// Logical archive name of a file: its file name without `.enc`.
pub fn logical_archive_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(name.strip_suffix(ENCRYPTED_SUFFIX).unwrap_or(name).to_string())
}

/// Verify archives in chain order; returns the last archive's final digest.
///
/// Each archive is seeded with its predecessor's result and must name its
/// predecessor's file as the previous archive.
pub fn verify_chain<P: AsRef<Path>>(
    paths: &[P],
    previous: &PreviousDigest,
    key: Option<&X25519SecretKey>,
) -> Result<String, ChainVerifyError> {
    let fail = |path: &Path, error: VerifyError| ChainVerifyError {
        path: PathBuf::from(path),
        error,
    };

    let mut seed = previous.clone();
    let mut previous_name: Option<String> = None;
    for path in paths {
        let path = path.as_ref();
        let verified = verify_file(path, &seed, key).map_err(|e| fail(path, e))?;

        if let Some(expected) = &previous_name {
            let declared = verified.linking_info.previous_archive_name.as_deref();
            if declared != Some(expected.as_str()) {
                return Err(fail(
                    path,
                    VerifyError::ChainContinuityViolation {
                        supplied: expected.clone(),
                        declared: declared.unwrap_or(NO_VALUE).to_string(),
                    },
                ));
            }
        }

        previous_name = logical_archive_name(path);
        seed = PreviousDigest::Digest(verified.last_digest);
    }

    match seed {
        PreviousDigest::Digest(digest) => Ok(digest),
        PreviousDigest::First => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messagelog_core::{ChainState, DigestAlgorithm, LinkingChain};

    use crate::encrypt::ArchiveEncryptor;
    use crate::zipfile::{write_entries, ZipEntry};

    const HELLO_CHAIN: &str = "d7914fe546b684688bb95f4f888a92dfc680603a75f23eb823658031fff766d9";
    const HELLO_WORLD_CHAIN: &str =
        "d2551ae0a817630239cfaf21e6b5de8516caa1cc2ca36d42f62c8bc0293766dd";

    /// Archive with the given containers and a correct linking info.
    fn archive(containers: &[(&str, &str)], previous: &ChainState) -> (Vec<u8>, String) {
        let mut chain = LinkingChain::start(DigestAlgorithm::Sha256, previous);
        let mut entries = Vec::new();
        for (name, content) in containers {
            chain.add_entry(*name, content.as_bytes());
            entries.push(ZipEntry::new(*name, content.as_bytes()));
        }
        let (info, last) = chain.finish();
        entries.push(ZipEntry::new(LINKING_INFO_NAME, info.to_text().into_bytes()));
        (write_entries(&entries).unwrap(), last)
    }

    fn rewrite(bytes: &[u8], f: impl FnOnce(&mut Vec<ZipEntry>)) -> Vec<u8> {
        let mut entries = read_entries(bytes).unwrap();
        f(&mut entries);
        write_entries(&entries).unwrap()
    }

    #[test]
    fn test_hello_vector() {
        let (bytes, _) = archive(&[("a", "hello")], &ChainState::genesis());
        assert_eq!(verify_bytes(&bytes, &PreviousDigest::First).unwrap(), HELLO_CHAIN);
    }

    #[test]
    fn test_two_entry_vector() {
        let (bytes, last) = archive(&[("a", "hello"), ("b", "world")], &ChainState::genesis());
        assert_eq!(last, HELLO_WORLD_CHAIN);
        assert_eq!(verify_bytes(&bytes, &PreviousDigest::First).unwrap(), HELLO_WORLD_CHAIN);
    }

    #[test]
    fn test_chained_archives() {
        let (a, a_last) = archive(&[("a", "hello")], &ChainState::genesis());
        let state = ChainState {
            last_digest: a_last.clone(),
            last_archive_name: "a.zip".into(),
        };
        let (b, b_last) = archive(&[("b", "world")], &state);

        let after_a = verify_bytes(&a, &PreviousDigest::First).unwrap();
        assert_eq!(after_a, a_last);
        assert_eq!(verify_bytes(&b, &PreviousDigest::Digest(after_a)).unwrap(), b_last);

        // B verified as if it were first.
        assert!(matches!(
            verify_bytes(&b, &PreviousDigest::First),
            Err(VerifyError::ChainContinuityViolation { .. })
        ));
        // A verified as if something came before it.
        assert!(matches!(
            verify_bytes(&a, &PreviousDigest::Digest(b_last)),
            Err(VerifyError::ChainContinuityViolation { .. })
        ));
    }

    #[test]
    fn test_tampered_container() {
        let (bytes, _) = archive(&[("a", "hello"), ("b", "world")], &ChainState::genesis());
        let tampered = rewrite(&bytes, |entries| entries[1].bytes[0] ^= 0x01);

        match verify_bytes(&tampered, &PreviousDigest::First) {
            Err(VerifyError::EntryDigestMismatch { entry, .. }) => assert_eq!(entry, "b"),
            other => panic!("expected EntryDigestMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_swapped_contents() {
        let (bytes, _) = archive(&[("a", "hello"), ("b", "world")], &ChainState::genesis());
        let swapped = rewrite(&bytes, |entries| {
            let first = std::mem::take(&mut entries[0].bytes);
            entries[0].bytes = std::mem::replace(&mut entries[1].bytes, first);
        });

        match verify_bytes(&swapped, &PreviousDigest::First) {
            Err(VerifyError::EntryDigestMismatch { entry, .. }) => assert_eq!(entry, "a"),
            other => panic!("expected EntryDigestMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_linkinginfo() {
        let (bytes, _) = archive(&[("a", "hello")], &ChainState::genesis());
        let stripped = rewrite(&bytes, |entries| entries.retain(|e| e.name != LINKING_INFO_NAME));
        assert!(matches!(
            verify_bytes(&stripped, &PreviousDigest::First),
            Err(VerifyError::MalformedArchive(_))
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let (bytes, _) = archive(&[("a", "hello")], &ChainState::genesis());
        let md5 = rewrite(&bytes, |entries| {
            let linking = entries.iter_mut().find(|e| e.name == LINKING_INFO_NAME).unwrap();
            linking.bytes = b"- - MD5\n5d41402abc4b2a76b9719d911017c592 a\n".to_vec();
        });
        assert!(matches!(
            verify_bytes(&md5, &PreviousDigest::First),
            Err(VerifyError::DigestAlgorithmUnsupported(id)) if id == "MD5"
        ));
    }

    #[test]
    fn test_entry_count_mismatch() {
        let (bytes, _) = archive(&[("a", "hello")], &ChainState::genesis());
        let extra = rewrite(&bytes, |entries| entries.insert(0, ZipEntry::new("x", b"extra".to_vec())));
        assert!(matches!(
            verify_bytes(&extra, &PreviousDigest::First),
            Err(VerifyError::MalformedArchive(_))
        ));
    }

    #[test]
    fn test_renamed_container() {
        let (bytes, _) = archive(&[("a", "hello")], &ChainState::genesis());
        let renamed = rewrite(&bytes, |entries| entries[0].name = "z".into());
        assert!(matches!(
            verify_bytes(&renamed, &PreviousDigest::First),
            Err(VerifyError::MalformedArchive(_))
        ));
    }

    #[test]
    fn test_not_a_zip() {
        assert!(matches!(
            verify_bytes(b"garbage", &PreviousDigest::First),
            Err(VerifyError::MalformedArchive(_))
        ));
    }

    #[test]
    fn test_previous_digest_parsing() {
        assert_eq!("-".parse::<PreviousDigest>().unwrap(), PreviousDigest::First);
        assert_eq!(
            HELLO_CHAIN.to_uppercase().parse::<PreviousDigest>().unwrap(),
            PreviousDigest::Digest(HELLO_CHAIN.into())
        );
        assert!("xyz".parse::<PreviousDigest>().is_err());
    }

    #[test]
    fn test_files_and_chain() {
        let dir = tempfile::tempdir().unwrap();
        let (a, a_last) = archive(&[("a", "hello")], &ChainState::genesis());
        let state = ChainState {
            last_digest: a_last,
            last_archive_name: "a.zip".into(),
        };
        let (b, b_last) = archive(&[("b", "world")], &state);
        std::fs::write(dir.path().join("a.zip"), &a).unwrap();
        std::fs::write(dir.path().join("b.zip"), &b).unwrap();

        let paths = [dir.path().join("a.zip"), dir.path().join("b.zip")];
        assert_eq!(verify_chain(&paths, &PreviousDigest::First, None).unwrap(), b_last);

        let reversed = [dir.path().join("b.zip"), dir.path().join("a.zip")];
        let err = verify_chain(&reversed, &PreviousDigest::First, None).unwrap_err();
        assert_eq!(err.path, dir.path().join("b.zip"));
        assert_eq!(err.error.category(), "ChainContinuityViolation");

        // Right digests, wrong predecessor name.
        std::fs::rename(dir.path().join("a.zip"), dir.path().join("other.zip")).unwrap();
        let renamed = [dir.path().join("other.zip"), dir.path().join("b.zip")];
        let err = verify_chain(&renamed, &PreviousDigest::First, None).unwrap_err();
        assert_eq!(err.path, dir.path().join("b.zip"));
        assert!(matches!(err.error, VerifyError::ChainContinuityViolation { .. }));

        assert!(matches!(
            verify(&dir.path().join("absent.zip"), &PreviousDigest::First),
            Err(VerifyError::Io(_))
        ));
    }

    #[test]
    fn test_encrypted_file() {
        let dir = tempfile::tempdir().unwrap();
        let secret = X25519SecretKey::generate();
        let (plain, last) = archive(&[("a", "hello")], &ChainState::genesis());
        let sealed = ArchiveEncryptor::new(secret.public_key()).encrypt(&plain).unwrap();
        let path = dir.path().join("a.zip.enc");
        std::fs::write(&path, sealed).unwrap();

        assert!(matches!(
            verify(&path, &PreviousDigest::First),
            Err(VerifyError::Decryption(_))
        ));
        assert!(matches!(
            verify_with_key(&path, &PreviousDigest::First, Some(&X25519SecretKey::generate())),
            Err(VerifyError::Decryption(_))
        ));
        assert_eq!(
            verify_with_key(&path, &PreviousDigest::First, Some(&secret)).unwrap(),
            last
        );
        assert_eq!(logical_archive_name(&path).as_deref(), Some("a.zip"));
    }

    fn named(contents: &[String], offset: usize) -> Vec<(String, String)> {
        contents
            .iter()
            .enumerate()
            .map(|(i, c)| (format!("{:020}.asice", offset + i + 1), c.clone()))
            .collect()
    }

    fn refs(pairs: &[(String, String)]) -> Vec<(&str, &str)> {
        pairs.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect()
    }

    proptest::proptest! {
        #[test]
        fn test_split_chain_equals_single_chain(
            contents in proptest::collection::vec("[a-z<>/ ]{0,40}", 2..10),
            cut in 1usize..9,
        ) {
            let cut = cut.min(contents.len() - 1);
            let all = named(&contents, 0);
            let (whole, whole_last) = archive(&refs(&all), &ChainState::genesis());
            proptest::prop_assert_eq!(
                verify_bytes(&whole, &PreviousDigest::First).unwrap(),
                whole_last.clone()
            );

            let (head, head_last) = archive(&refs(&all[..cut]), &ChainState::genesis());
            let after_head = ChainState {
                last_digest: head_last,
                last_archive_name: "head.zip".into(),
            };
            let (tail, _) = archive(&refs(&all[cut..]), &after_head);

            let seed = verify_bytes(&head, &PreviousDigest::First).unwrap();
            let end = verify_bytes(&tail, &PreviousDigest::Digest(seed)).unwrap();
            proptest::prop_assert_eq!(end, whole_last);
            proptest::prop_assert!(verify_bytes(&tail, &PreviousDigest::First).is_err());
        }

        #[test]
        fn test_any_flipped_entry_is_named(
            contents in proptest::collection::vec("[a-z]{1,40}", 1..8),
            victim in 0usize..8,
        ) {
            let victim = victim % contents.len();
            let pairs = named(&contents, 0);
            let (bytes, _) = archive(&refs(&pairs), &ChainState::genesis());
            let tampered = rewrite(&bytes, |entries| entries[victim].bytes[0] ^= 0x20);

            match verify_bytes(&tampered, &PreviousDigest::First) {
                Err(VerifyError::EntryDigestMismatch { entry, .. }) => {
                    proptest::prop_assert_eq!(entry, pairs[victim].0.clone())
                }
                other => proptest::prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }
}
