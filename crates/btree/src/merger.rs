//! K-way merge over sorted runs, used to fold [`crate::sorter`]'s spilled
//! chunks back into one ascending stream.
//!
//! Ties (the same key appearing in more than one run) are resolved by
//! run priority: the run with the higher index wins and the other's entry
//! for that key is dropped. The sorter always spills chunks in arrival
//! order, so a higher run index means "observed later", matching
//! last-write-wins semantics for duplicate keys across chunks.

use crate::descriptor::TreeDescriptor;
use crate::error::{BtreeError, Result};
use couchstore_storage::int_codec::{get_u32, put_u32};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Writes entries (already sorted) to `path` in the simple length-prefixed
/// framing every run file on disk uses.
pub fn write_run(path: &Path, entries: &[Entry]) -> Result<()> {
    let file = File::create(path).map_err(couchstore_storage::StorageError::Io)?;
    let mut w = BufWriter::new(file);
    for e in entries {
        let mut header = Vec::with_capacity(8);
        put_u32(&mut header, e.key.len() as u32);
        put_u32(&mut header, e.value.len() as u32);
        w.write_all(&header).map_err(couchstore_storage::StorageError::Io)?;
        w.write_all(&e.key).map_err(couchstore_storage::StorageError::Io)?;
        w.write_all(&e.value).map_err(couchstore_storage::StorageError::Io)?;
    }
    w.flush().map_err(couchstore_storage::StorageError::Io)?;
    Ok(())
}

pub struct RunReader {
    reader: BufReader<File>,
    peeked: Option<Entry>,
}

impl RunReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(couchstore_storage::StorageError::Io)?;
        let mut r = Self { reader: BufReader::new(file), peeked: None };
        r.advance()?;
        Ok(r)
    }

    fn advance(&mut self) -> Result<()> {
        let mut header = [0u8; 8];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.peeked = None;
                return Ok(());
            }
            Err(e) => return Err(BtreeError::Storage(couchstore_storage::StorageError::Io(e))),
        }
        let key_len = get_u32(&header[0..4]) as usize;
        let value_len = get_u32(&header[4..8]) as usize;
        let mut key = vec![0u8; key_len];
        let mut value = vec![0u8; value_len];
        self.reader.read_exact(&mut key).map_err(couchstore_storage::StorageError::Io)?;
        self.reader.read_exact(&mut value).map_err(couchstore_storage::StorageError::Io)?;
        self.peeked = Some(Entry { key, value });
        Ok(())
    }

    fn peek(&self) -> Option<&Entry> {
        self.peeked.as_ref()
    }

    fn take(&mut self) -> Result<Entry> {
        let entry = self.peeked.take().expect("take() called without a peeked entry");
        self.advance()?;
        Ok(entry)
    }
}

/// Merges sorted run files into one ascending stream of entries, dropping
/// all but the highest-indexed run's entry for duplicate keys.
pub fn merge_runs<D: TreeDescriptor + ?Sized>(descriptor: &D, run_paths: &[&Path]) -> Result<Vec<Entry>> {
    let mut readers: Vec<RunReader> = run_paths.iter().map(|p| RunReader::open(p)).collect::<Result<_>>()?;
    let mut out = Vec::new();

    loop {
        // Find the smallest key among all runs still producing entries;
        // on ties prefer the run with the highest index.
        let mut best: Option<usize> = None;
        for (i, r) in readers.iter().enumerate() {
            if let Some(entry) = r.peek() {
                best = match best {
                    None => Some(i),
                    Some(b) => {
                        let ordering = descriptor.compare(&entry.key, &readers[b].peek().unwrap().key);
                        match ordering {
                            std::cmp::Ordering::Less => Some(i),
                            std::cmp::Ordering::Equal => Some(i), // later (higher-index) run wins
                            std::cmp::Ordering::Greater => Some(b),
                        }
                    }
                };
            }
        }

        let Some(winner) = best else { break };
        let winning_key = readers[winner].peek().unwrap().key.clone();

        // Drop any other run's entry sharing this key (stale duplicate).
        for (i, r) in readers.iter_mut().enumerate() {
            if i == winner {
                continue;
            }
            if matches!(r.peek(), Some(e) if descriptor.compare(&e.key, &winning_key) == std::cmp::Ordering::Equal) {
                r.take()?;
            }
        }

        out.push(readers[winner].take()?);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    struct ByteKeyDescriptor;
    impl TreeDescriptor for ByteKeyDescriptor {
        fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
            a.cmp(b)
        }
        fn reduce(&self, _values: &[&[u8]]) -> Option<Vec<u8>> {
            None
        }
    }

    #[test]
    fn merges_and_resolves_duplicate_with_later_run() {
        let dir = tempfile::tempdir().unwrap();
        let run_a = dir.path().join("a.run");
        let run_b = dir.path().join("b.run");

        write_run(&run_a, &[
            Entry { key: b"a".to_vec(), value: b"old-a".to_vec() },
            Entry { key: b"c".to_vec(), value: b"c".to_vec() },
        ]).unwrap();
        write_run(&run_b, &[
            Entry { key: b"a".to_vec(), value: b"new-a".to_vec() },
            Entry { key: b"b".to_vec(), value: b"b".to_vec() },
        ]).unwrap();

        let descriptor = ByteKeyDescriptor;
        let merged = merge_runs(&descriptor, &[&run_a, &run_b]).unwrap();
        let keys: Vec<&[u8]> = merged.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b", b"c"]);
        assert_eq!(merged[0].value, b"new-a");
    }
}
