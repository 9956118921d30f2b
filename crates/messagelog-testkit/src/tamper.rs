//! Archive rewriting helpers for tamper, reorder and deletion tests.
//!
//! Each helper reads an archive, changes its zip entries and writes it back
//! with the same deterministic zip settings the builder uses. The
//! `linkinginfo` entry is only touched when a helper names it.

use messagelog_archive::zipfile::{read_entries, write_entries, ZipEntry};
use zip::result::{ZipError, ZipResult};

/// Apply `f` to the entries of `archive`.
pub fn rewrite_archive(archive: &[u8], f: impl FnOnce(&mut Vec<ZipEntry>)) -> ZipResult<Vec<u8>> {
    let mut entries = read_entries(archive)?;
    f(&mut entries);
    write_entries(&entries)
}

/// Entry names in archive order.
pub fn entry_names(archive: &[u8]) -> ZipResult<Vec<String>> {
    Ok(read_entries(archive)?.into_iter().map(|e| e.name).collect())
}

/// Read one entry.
pub fn read_entry(archive: &[u8], name: &str) -> ZipResult<Vec<u8>> {
    read_entries(archive)?
        .into_iter()
        .find(|e| e.name == name)
        .map(|e| e.bytes)
        .ok_or(ZipError::FileNotFound)
}

/// Flip the lowest bit of byte `offset` of entry `name`.
pub fn flip_byte(archive: &[u8], name: &str, offset: usize) -> ZipResult<Vec<u8>> {
    let mut entries = read_entries(archive)?;
    let entry = find_mut(&mut entries, name)?;
    let byte = entry.bytes.get_mut(offset).ok_or(ZipError::FileNotFound)?;
    *byte ^= 0x01;
    write_entries(&entries)
}

/// Swap the contents of two entries, keeping their names and positions.
pub fn swap_contents(archive: &[u8], a: &str, b: &str) -> ZipResult<Vec<u8>> {
    let mut entries = read_entries(archive)?;
    let a_bytes = std::mem::take(&mut find_mut(&mut entries, a)?.bytes);
    let b_entry = find_mut(&mut entries, b)?;
    let b_bytes = std::mem::replace(&mut b_entry.bytes, a_bytes);
    find_mut(&mut entries, a)?.bytes = b_bytes;
    write_entries(&entries)
}

/// Drop entry `name`.
pub fn remove_entry(archive: &[u8], name: &str) -> ZipResult<Vec<u8>> {
    let mut entries = read_entries(archive)?;
    let before = entries.len();
    entries.retain(|e| e.name != name);
    if entries.len() == before {
        return Err(ZipError::FileNotFound);
    }
    write_entries(&entries)
}

/// Replace the contents of entry `name`.
pub fn replace_entry(archive: &[u8], name: &str, bytes: impl Into<Vec<u8>>) -> ZipResult<Vec<u8>> {
    let mut entries = read_entries(archive)?;
    find_mut(&mut entries, name)?.bytes = bytes.into();
    write_entries(&entries)
}

fn find_mut<'a>(entries: &'a mut [ZipEntry], name: &str) -> ZipResult<&'a mut ZipEntry> {
    entries
        .iter_mut()
        .find(|e| e.name == name)
        .ok_or(ZipError::FileNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        write_entries(&[
            ZipEntry::new("a", b"first".to_vec()),
            ZipEntry::new("b", b"second".to_vec()),
        ])
        .unwrap()
    }

    #[test]
    fn test_swap_contents() {
        let swapped = swap_contents(&sample(), "a", "b").unwrap();
        assert_eq!(entry_names(&swapped).unwrap(), vec!["a", "b"]);
        assert_eq!(read_entry(&swapped, "a").unwrap(), b"second");
        assert_eq!(read_entry(&swapped, "b").unwrap(), b"first");
    }

    #[test]
    fn test_flip_and_remove() {
        let flipped = flip_byte(&sample(), "b", 0).unwrap();
        assert_eq!(read_entry(&flipped, "b").unwrap(), b"recond");

        let removed = remove_entry(&sample(), "a").unwrap();
        assert_eq!(entry_names(&removed).unwrap(), vec!["b"]);
        assert!(remove_entry(&sample(), "zzz").is_err());
    }
}
