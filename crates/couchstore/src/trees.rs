//! The three tree descriptors sharing the modifier/reader/bulk-loader:
//! by-id, by-seq, local-docs. Differ only in comparator and reduce
//! function (`spec.md` §3, §9 design note "polymorphism over tree
//! flavor").

use couchstore_btree::{TreeDescriptor, DEFAULT_NODE_CHUNK_THRESHOLD};
use couchstore_storage::int_codec::{get_u32, get_u40, get_u48, put_u40, put_u48};
use std::cmp::Ordering;

/// Key = document id, value = encoded by-id index entry.
/// Reduce = `{40-bit not_deleted_count, 40-bit deleted_count, 48-bit
/// total_body_size}` (`reduces.c`).
pub struct ByIdDescriptor {
    node_chunk_threshold: usize,
}

impl ByIdDescriptor {
    pub fn new(node_chunk_threshold: usize) -> Self {
        Self { node_chunk_threshold }
    }
}

impl Default for ByIdDescriptor {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_CHUNK_THRESHOLD)
    }
}

impl TreeDescriptor for ByIdDescriptor {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn node_chunk_threshold(&self) -> usize {
        self.node_chunk_threshold
    }

    fn reduce(&self, values: &[&[u8]]) -> Option<Vec<u8>> {
        let mut not_deleted: u64 = 0;
        let mut deleted: u64 = 0;
        let mut total_size: u64 = 0;
        for v in values {
            if v.len() < 16 {
                continue;
            }
            let size = get_u32(&v[6..10]) as u64;
            let bp_raw = get_u48(&v[10..16]);
            let is_deleted = bp_raw & (1 << 47) != 0;
            if is_deleted {
                deleted += 1;
            } else {
                not_deleted += 1;
            }
            total_size += size;
        }
        Some(encode_by_id_reduce(not_deleted, deleted, total_size))
    }

    fn rereduce(&self, partial_reduces: &[&[u8]]) -> Option<Vec<u8>> {
        let mut not_deleted = 0u64;
        let mut deleted = 0u64;
        let mut total_size = 0u64;
        for r in partial_reduces {
            let (a, b, c) = decode_by_id_reduce(r);
            not_deleted += a;
            deleted += b;
            total_size += c;
        }
        Some(encode_by_id_reduce(not_deleted, deleted, total_size))
    }
}

pub fn encode_by_id_reduce(not_deleted: u64, deleted: u64, total_size: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    put_u40(&mut buf, not_deleted);
    put_u40(&mut buf, deleted);
    put_u48(&mut buf, total_size);
    buf
}

pub fn decode_by_id_reduce(bytes: &[u8]) -> (u64, u64, u64) {
    if bytes.len() < 16 {
        return (0, 0, 0);
    }
    let not_deleted = get_u40(&bytes[0..5]);
    let deleted = get_u40(&bytes[5..10]);
    let total_size = get_u48(&bytes[10..16]);
    (not_deleted, deleted, total_size)
}

/// Key = 48-bit big-endian `db_seq`, value = encoded by-seq index entry.
/// Reduce = `{40-bit count}`.
pub struct BySeqDescriptor {
    node_chunk_threshold: usize,
}

impl BySeqDescriptor {
    pub fn new(node_chunk_threshold: usize) -> Self {
        Self { node_chunk_threshold }
    }
}

impl Default for BySeqDescriptor {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_CHUNK_THRESHOLD)
    }
}

impl TreeDescriptor for BySeqDescriptor {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn node_chunk_threshold(&self) -> usize {
        self.node_chunk_threshold
    }

    fn reduce(&self, values: &[&[u8]]) -> Option<Vec<u8>> {
        Some(encode_by_seq_reduce(values.len() as u64))
    }

    fn rereduce(&self, partial_reduces: &[&[u8]]) -> Option<Vec<u8>> {
        let total: u64 = partial_reduces.iter().map(|r| decode_by_seq_reduce(r)).sum();
        Some(encode_by_seq_reduce(total))
    }
}

pub fn encode_by_seq_reduce(count: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    put_u40(&mut buf, count);
    buf
}

pub fn decode_by_seq_reduce(bytes: &[u8]) -> u64 {
    if bytes.len() < 5 {
        return 0;
    }
    get_u40(&bytes[0..5])
}

/// Key = caller-supplied local-doc id, value = raw bytes. No reduce.
pub struct LocalDescriptor {
    node_chunk_threshold: usize,
}

impl LocalDescriptor {
    pub fn new(node_chunk_threshold: usize) -> Self {
        Self { node_chunk_threshold }
    }
}

impl Default for LocalDescriptor {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_CHUNK_THRESHOLD)
    }
}

impl TreeDescriptor for LocalDescriptor {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn reduce(&self, _values: &[&[u8]]) -> Option<Vec<u8>> {
        None
    }

    fn node_chunk_threshold(&self) -> usize {
        self.node_chunk_threshold
    }
}
