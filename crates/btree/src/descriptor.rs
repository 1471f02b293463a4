//! The per-tree customization point: comparator, reduce/re-reduce, and the
//! thresholds that decide when an accumulated node is flushed.
//!
//! The three index flavors the document store keeps (by-id, by-seq,
//! local-docs) share every line of reader/modifier/bulk-loader code; what
//! differs is plugged in here.

/// Default chunk threshold, in encoded bytes, before a node is flushed.
/// Matches the ~1.2 KiB default the original implementation used to keep
/// nodes small enough that a handful of them fit in one disk block.
pub const DEFAULT_NODE_CHUNK_THRESHOLD: usize = 1279;

pub trait TreeDescriptor: Send + Sync {
    /// Orders two keys. Keys are opaque byte strings to the tree itself;
    /// by-id trees compare document ids lexicographically, by-seq trees
    /// compare the 48-bit big-endian sequence encoding.
    fn compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering;

    /// Combines the reduce values of a leaf node's values into one reduce
    /// value. Returns `None` for trees with no reduce (local-docs).
    fn reduce(&self, values: &[&[u8]]) -> Option<Vec<u8>>;

    /// Combines the reduce values of an interior node's children (already
    /// reduced) into one. Defaults to the same combination `reduce` uses.
    fn rereduce(&self, partial_reduces: &[&[u8]]) -> Option<Vec<u8>> {
        self.reduce(partial_reduces)
    }

    /// Whether values are Snappy-compressed before being stored as leaf
    /// entries (content_meta bit 7, `spec.md` §5 "Document body").
    fn compressed_values(&self) -> bool {
        false
    }

    fn node_chunk_threshold(&self) -> usize {
        DEFAULT_NODE_CHUNK_THRESHOLD
    }
}
