//! Builds a tree bottom-up from an already-sorted stream of entries.
//!
//! Used both for the initial population of an index and, via
//! [`crate::sorter`]/[`crate::merger`], for compaction's by-id rebuild: once
//! the incoming entries are known to arrive in ascending key order, there's
//! no need for the general insert/remove modifier at all — leaves are
//! packed until they hit the chunk threshold, then a level of interior
//! nodes is built the same way over the leaves' pointers, repeating until a
//! single root pointer remains.

use crate::descriptor::TreeDescriptor;
use crate::error::Result;
use crate::node::{encode_node, NodeContents};
use crate::pointer::NodePointer;
use couchstore_storage::{chunk, ChecksumScheme, FileOps};

/// Builds a tree from `entries`, which must already be sorted ascending by
/// `descriptor.compare`. Writes leaf and interior nodes as data chunks and
/// returns the root pointer. An empty `entries` still produces a root
/// pointing at a single empty leaf, matching the "new index" starting state.
pub fn build_sorted<D: TreeDescriptor + ?Sized>(
    file: &mut dyn FileOps,
    scheme: ChecksumScheme,
    descriptor: &D,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
) -> Result<NodePointer> {
    let mut next_offset = file.goto_eof()?;
    let mut level = build_leaf_level(file, scheme, descriptor, entries, &mut next_offset)?;

    while level.len() > 1 {
        level = build_interior_level(file, scheme, descriptor, level, &mut next_offset)?;
    }

    Ok(level.into_iter().next().expect("build_leaf_level never returns an empty level"))
}

fn build_leaf_level<D: TreeDescriptor + ?Sized>(
    file: &mut dyn FileOps,
    scheme: ChecksumScheme,
    descriptor: &D,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    next_offset: &mut u64,
) -> Result<Vec<NodePointer>> {
    let threshold = descriptor.node_chunk_threshold();
    let mut pointers = Vec::new();
    let mut batch: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut batch_size = 1usize; // node kind tag

    let flush = |file: &mut dyn FileOps,
                 next_offset: &mut u64,
                 batch: &mut Vec<(Vec<u8>, Vec<u8>)>,
                 pointers: &mut Vec<NodePointer>|
     -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let contents = NodeContents::Leaf(std::mem::take(batch));
        let key = contents.highest_key().map(|k| k.to_vec()).unwrap_or_default();
        let values: Vec<&[u8]> = match &contents {
            NodeContents::Leaf(e) => e.iter().map(|(_, v)| v.as_slice()).collect(),
            _ => unreachable!(),
        };
        let reduce_value = descriptor.reduce(&values).unwrap_or_default();
        let payload = encode_node(&contents);
        let written_at = *next_offset;
        let end = chunk::write_data_chunk(file, written_at, &payload, scheme)?;
        *next_offset = end;
        pointers.push(NodePointer::new(key, written_at, end - written_at, reduce_value));
        Ok(())
    };

    for (key, value) in entries {
        let entry_size = 5 + key.len() + value.len();
        if batch_size + entry_size > threshold && !batch.is_empty() {
            flush(file, next_offset, &mut batch, &mut pointers)?;
            batch_size = 1;
        }
        batch_size += entry_size;
        batch.push((key, value));
    }
    flush(file, next_offset, &mut batch, &mut pointers)?;

    if pointers.is_empty() {
        // Always materialize at least one (empty) leaf so callers get a
        // usable root pointer for a brand new tree.
        let contents = NodeContents::Leaf(Vec::new());
        let reduce_value = descriptor.reduce(&[]).unwrap_or_default();
        let payload = encode_node(&contents);
        let written_at = *next_offset;
        let end = chunk::write_data_chunk(file, written_at, &payload, scheme)?;
        *next_offset = end;
        pointers.push(NodePointer::new(Vec::new(), written_at, end - written_at, reduce_value));
    }

    Ok(pointers)
}

/// One input to [`build_mixed`]: a raw entry to pack into a fresh leaf, or
/// an already-written subtree to graft back in untouched.
pub enum MixedItem {
    Entry(Vec<u8>, Vec<u8>),
    Subtree(NodePointer),
}

/// Like [`build_sorted`], but the input stream may interleave raw entries
/// with whole subtrees carried over from an existing tree. Used by
/// [`crate::modifier::purge_range`], which grafts untouched subtrees back
/// in by pointer rather than decoding and re-flushing them.
pub fn build_mixed<D: TreeDescriptor + ?Sized>(
    file: &mut dyn FileOps,
    scheme: ChecksumScheme,
    descriptor: &D,
    items: Vec<MixedItem>,
) -> Result<NodePointer> {
    let mut next_offset = file.goto_eof()?;
    let threshold = descriptor.node_chunk_threshold();
    let mut pointers: Vec<NodePointer> = Vec::new();
    let mut batch: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut batch_size = 1usize;

    for item in items {
        match item {
            MixedItem::Entry(key, value) => {
                let entry_size = 5 + key.len() + value.len();
                if batch_size + entry_size > threshold && !batch.is_empty() {
                    flush_leaf_batch(file, scheme, descriptor, &mut next_offset, &mut batch, &mut pointers)?;
                    batch_size = 1;
                }
                batch_size += entry_size;
                batch.push((key, value));
            }
            MixedItem::Subtree(p) => {
                flush_leaf_batch(file, scheme, descriptor, &mut next_offset, &mut batch, &mut pointers)?;
                batch_size = 1;
                pointers.push(p);
            }
        }
    }
    flush_leaf_batch(file, scheme, descriptor, &mut next_offset, &mut batch, &mut pointers)?;

    if pointers.is_empty() {
        let contents = NodeContents::Leaf(Vec::new());
        let reduce_value = descriptor.reduce(&[]).unwrap_or_default();
        let payload = encode_node(&contents);
        let written_at = next_offset;
        let end = chunk::write_data_chunk(file, written_at, &payload, scheme)?;
        pointers.push(NodePointer::new(Vec::new(), written_at, end - written_at, reduce_value));
    }

    let mut level = pointers;
    while level.len() > 1 {
        level = build_interior_level(file, scheme, descriptor, level, &mut next_offset)?;
    }
    Ok(level.into_iter().next().expect("non-empty by construction above"))
}

fn flush_leaf_batch<D: TreeDescriptor + ?Sized>(
    file: &mut dyn FileOps,
    scheme: ChecksumScheme,
    descriptor: &D,
    next_offset: &mut u64,
    batch: &mut Vec<(Vec<u8>, Vec<u8>)>,
    pointers: &mut Vec<NodePointer>,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let contents = NodeContents::Leaf(std::mem::take(batch));
    let key = contents.highest_key().map(|k| k.to_vec()).unwrap_or_default();
    let values: Vec<&[u8]> = match &contents {
        NodeContents::Leaf(e) => e.iter().map(|(_, v)| v.as_slice()).collect(),
        _ => unreachable!(),
    };
    let reduce_value = descriptor.reduce(&values).unwrap_or_default();
    let payload = encode_node(&contents);
    let written_at = *next_offset;
    let end = chunk::write_data_chunk(file, written_at, &payload, scheme)?;
    *next_offset = end;
    pointers.push(NodePointer::new(key, written_at, end - written_at, reduce_value));
    Ok(())
}

fn build_interior_level<D: TreeDescriptor + ?Sized>(
    file: &mut dyn FileOps,
    scheme: ChecksumScheme,
    descriptor: &D,
    children: Vec<NodePointer>,
    next_offset: &mut u64,
) -> Result<Vec<NodePointer>> {
    let threshold = descriptor.node_chunk_threshold();
    let mut pointers = Vec::new();
    let mut batch: Vec<NodePointer> = Vec::new();
    let mut batch_size = 1usize;
    let mut batch_subtree_size: u64 = 0;

    for child in children {
        let entry_size = 2 + child.key.len() + 6 + 6 + 2 + child.reduce_value.len();
        if batch_size + entry_size > threshold && !batch.is_empty() {
            flush_interior(file, scheme, descriptor, next_offset, &mut batch, batch_subtree_size, &mut pointers)?;
            batch_size = 1;
            batch_subtree_size = 0;
        }
        batch_size += entry_size;
        batch_subtree_size += child.subtree_size;
        batch.push(child);
    }
    flush_interior(file, scheme, descriptor, next_offset, &mut batch, batch_subtree_size, &mut pointers)?;

    Ok(pointers)
}

fn flush_interior<D: TreeDescriptor + ?Sized>(
    file: &mut dyn FileOps,
    scheme: ChecksumScheme,
    descriptor: &D,
    next_offset: &mut u64,
    batch: &mut Vec<NodePointer>,
    batch_subtree_size: u64,
    pointers: &mut Vec<NodePointer>,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let reduces: Vec<&[u8]> = batch.iter().map(|p| p.reduce_value.as_slice()).collect();
    let reduce_value = descriptor.rereduce(&reduces).unwrap_or_default();
    let key = batch.last().expect("checked non-empty above").key.clone();
    let contents = NodeContents::Interior(std::mem::take(batch));
    let payload = encode_node(&contents);
    let written_at = *next_offset;
    let end = chunk::write_data_chunk(file, written_at, &payload, scheme)?;
    *next_offset = end;
    let subtree_size = batch_subtree_size + (end - written_at);
    pointers.push(NodePointer::new(key, written_at, subtree_size, reduce_value));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{KeyRange, TreeReader};
    use couchstore_storage::MemFileOps;
    use std::cmp::Ordering;

    struct CountingDescriptor;
    impl TreeDescriptor for CountingDescriptor {
        fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
            a.cmp(b)
        }
        fn reduce(&self, values: &[&[u8]]) -> Option<Vec<u8>> {
            Some((values.len() as u64).to_be_bytes().to_vec())
        }
        fn rereduce(&self, partial_reduces: &[&[u8]]) -> Option<Vec<u8>> {
            let total: u64 = partial_reduces
                .iter()
                .map(|b| u64::from_be_bytes(b[..8].try_into().unwrap()))
                .sum();
            Some(total.to_be_bytes().to_vec())
        }
        fn node_chunk_threshold(&self) -> usize {
            64 // force many small nodes across multiple levels
        }
    }

    #[test]
    fn builds_multi_level_tree_and_reduce_matches_count() {
        let mut f = MemFileOps::default();
        let descriptor = CountingDescriptor;
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0u16..500)
            .map(|i| (i.to_be_bytes().to_vec(), vec![0u8; 4]))
            .collect();
        let root = build_sorted(&mut f, ChecksumScheme::Crc32C, &descriptor, entries.clone()).unwrap();

        let mut reader = TreeReader::new(&mut f, ChecksumScheme::Crc32C, &descriptor);
        let v = reader.lookup(&root, &250u16.to_be_bytes()).unwrap();
        assert!(v.is_some());

        let reduce = reader.fold(&root, &KeyRange::all(), &mut |_, _| crate::reader::FoldSignal::Continue).unwrap();
        let count = u64::from_be_bytes(reduce.unwrap()[..8].try_into().unwrap());
        assert_eq!(count, 500);
    }

    #[test]
    fn empty_entries_produce_usable_root() {
        let mut f = MemFileOps::default();
        let descriptor = CountingDescriptor;
        let root = build_sorted(&mut f, ChecksumScheme::Crc32C, &descriptor, Vec::new()).unwrap();
        let mut reader = TreeReader::new(&mut f, ChecksumScheme::Crc32C, &descriptor);
        assert_eq!(reader.lookup(&root, b"anything").unwrap(), None);
    }
}
