//! Deterministic zip reading and writing.
//!
//! Entries are stored uncompressed with a fixed modification time, so the
//! same entries always produce the same bytes.

use std::io::{Cursor, Read, Write};

use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// One named file inside a zip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ZipEntry {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

fn stored_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default())
}

/// Write `entries` in order.
pub fn write_entries(entries: &[ZipEntry]) -> ZipResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for entry in entries {
        writer.start_file(entry.name.as_str(), stored_options())?;
        writer.write_all(&entry.bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Read every entry in central directory order.
pub fn read_entries(bytes: &[u8]) -> ZipResult<Vec<ZipEntry>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let mut content = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut content)?;
        entries.push(ZipEntry {
            name: file.name().to_string(),
            bytes: content,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_deterministic() {
        let entries = vec![ZipEntry::new("a", b"first".to_vec()), ZipEntry::new("b/c", b"second".to_vec())];
        let one = write_entries(&entries).unwrap();
        let two = write_entries(&entries).unwrap();
        assert_eq!(one, two);
        assert_eq!(read_entries(&one).unwrap(), entries);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(read_entries(b"not a zip file").is_err());
    }
}
