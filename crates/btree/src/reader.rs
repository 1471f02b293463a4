//! Read-only descent: point lookups and range folds over a committed tree.
//!
//! Both modes share `load_node`, which turns a [`NodePointer`] into decoded
//! [`NodeContents`] via the storage crate's chunk codec. A fold additionally
//! drives the descriptor's reduce/re-reduce functions so a caller can get a
//! running total over a key range without visiting every leaf — the tree
//! only descends into children whose reduce value it actually needs.

use crate::descriptor::TreeDescriptor;
use crate::error::Result;
use crate::node::{decode_node, NodeContents};
use crate::pointer::NodePointer;
use couchstore_storage::{chunk, ChecksumScheme, FileOps};
use std::cmp::Ordering;

/// Inclusive key range used by range folds. `None` on either end means
/// unbounded in that direction.
#[derive(Debug, Clone, Default)]
pub struct KeyRange {
    pub start: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
}

impl KeyRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn point(key: Vec<u8>) -> Self {
        Self { start: Some(key.clone()), end: Some(key) }
    }

    fn contains<D: TreeDescriptor + ?Sized>(&self, descriptor: &D, key: &[u8]) -> bool {
        if let Some(start) = &self.start {
            if descriptor.compare(key, start) == Ordering::Less {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if descriptor.compare(key, end) == Ordering::Greater {
                return false;
            }
        }
        true
    }
}

/// What a fold callback wants to happen next.
pub enum FoldSignal {
    Continue,
    Stop,
}

pub struct TreeReader<'a, D: TreeDescriptor + ?Sized> {
    pub file: &'a mut dyn FileOps,
    pub scheme: ChecksumScheme,
    pub descriptor: &'a D,
    pub tolerate_corruption: bool,
}

impl<'a, D: TreeDescriptor + ?Sized> TreeReader<'a, D> {
    pub fn new(file: &'a mut dyn FileOps, scheme: ChecksumScheme, descriptor: &'a D) -> Self {
        Self { file, scheme, descriptor, tolerate_corruption: false }
    }

    pub fn tolerant(mut self, tolerate: bool) -> Self {
        self.tolerate_corruption = tolerate;
        self
    }

    fn load_node(&mut self, offset: u64) -> Result<NodeContents> {
        let chunk = chunk::read_chunk(self.file, offset, self.scheme, self.tolerate_corruption)?;
        match decode_node(&chunk.payload) {
            Ok(contents) => Ok(contents),
            Err(e) if self.tolerate_corruption => {
                log::warn!("structurally corrupt node at logical offset {offset}: {e}; treating as empty");
                Ok(NodeContents::Leaf(Vec::new()))
            }
            Err(e) => Err(e),
        }
    }

    /// Point lookup: returns the value stored for `key`, if present.
    pub fn lookup(&mut self, root: &NodePointer, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut offset = root.offset;
        loop {
            let node = self.load_node(offset)?;
            match node {
                NodeContents::Leaf(entries) => {
                    return Ok(entries
                        .into_iter()
                        .find(|(k, _)| self.descriptor.compare(k, key) == Ordering::Equal)
                        .map(|(_, v)| v));
                }
                NodeContents::Interior(pointers) => {
                    let next = pointers
                        .iter()
                        .find(|p| self.descriptor.compare(key, &p.key) != Ordering::Greater);
                    match next {
                        Some(p) => offset = p.offset,
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Folds over every key in `range`, invoking `visit` for each leaf
    /// entry in ascending key order. Returns the descriptor's reduce value
    /// computed over exactly the entries visited (not the whole tree),
    /// by re-reducing from the leaves actually walked.
    pub fn fold(
        &mut self,
        root: &NodePointer,
        range: &KeyRange,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> FoldSignal,
    ) -> Result<Option<Vec<u8>>> {
        self.fold_with_node_callback(root, range, visit, &mut |_, _| {})
    }

    /// Like [`Self::fold`], but also invokes `node_visit` around each
    /// interior descent: once before descending (with the child's
    /// `subtree_size` and reduce value) and once after returning (with
    /// `0` and `None`). Used by compaction's streaming rebuild and by
    /// aggregate queries that want subtree-level progress without
    /// visiting every leaf.
    pub fn fold_with_node_callback(
        &mut self,
        root: &NodePointer,
        range: &KeyRange,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> FoldSignal,
        node_visit: &mut dyn FnMut(u64, Option<&[u8]>),
    ) -> Result<Option<Vec<u8>>> {
        let mut partial_reduces: Vec<Vec<u8>> = Vec::new();
        let mut stop = false;
        self.fold_node(root.offset, range, visit, node_visit, &mut partial_reduces, &mut stop)?;

        let refs: Vec<&[u8]> = partial_reduces.iter().map(|v| v.as_slice()).collect();
        Ok(self.descriptor.rereduce(&refs))
    }

    fn fold_node(
        &mut self,
        offset: u64,
        range: &KeyRange,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> FoldSignal,
        node_visit: &mut dyn FnMut(u64, Option<&[u8]>),
        partial_reduces: &mut Vec<Vec<u8>>,
        stop: &mut bool,
    ) -> Result<()> {
        if *stop {
            return Ok(());
        }
        let node = self.load_node(offset)?;
        match node {
            NodeContents::Leaf(entries) => {
                let mut visited_values: Vec<Vec<u8>> = Vec::new();
                for (key, value) in &entries {
                    if *stop {
                        break;
                    }
                    if !range.contains(self.descriptor, key) {
                        continue;
                    }
                    visited_values.push(value.clone());
                    if matches!(visit(key, value), FoldSignal::Stop) {
                        *stop = true;
                    }
                }
                if !visited_values.is_empty() {
                    let refs: Vec<&[u8]> = visited_values.iter().map(|v| v.as_slice()).collect();
                    if let Some(r) = self.descriptor.reduce(&refs) {
                        partial_reduces.push(r);
                    }
                }
            }
            NodeContents::Interior(pointers) => {
                for p in &pointers {
                    if *stop {
                        break;
                    }
                    // An interior pointer's key is the highest key in its
                    // subtree; a subtree can be skipped only if its whole
                    // span falls outside the range, which we can't prove
                    // from one endpoint alone, so descend whenever the
                    // pointer's key could plausibly be in range.
                    if let Some(start) = &range.start {
                        if self.descriptor.compare(&p.key, start) == Ordering::Less {
                            continue;
                        }
                    }
                    node_visit(p.subtree_size, Some(p.reduce_value.as_slice()));
                    self.fold_node(p.offset, range, visit, node_visit, partial_reduces, stop)?;
                    node_visit(0, None);
                    if let Some(end) = &range.end {
                        if self.descriptor.compare(&p.key, end) == Ordering::Greater {
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Point-query mode: given `keys` already sorted ascending by
    /// `descriptor.compare`, returns one result per key in the same order,
    /// descending the tree once rather than once per key (`spec.md` §4.4).
    pub fn lookup_batch(&mut self, root: &NodePointer, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut out = vec![None; keys.len()];
        if keys.is_empty() {
            return Ok(out);
        }
        let all: Vec<usize> = (0..keys.len()).collect();
        self.lookup_batch_node(root.offset, keys, &all, &mut out)?;
        Ok(out)
    }

    fn lookup_batch_node(
        &mut self,
        offset: u64,
        keys: &[Vec<u8>],
        idxs: &[usize],
        out: &mut [Option<Vec<u8>>],
    ) -> Result<()> {
        if idxs.is_empty() {
            return Ok(());
        }
        let node = self.load_node(offset)?;
        match node {
            NodeContents::Leaf(entries) => {
                let mut ei = 0usize;
                for &qi in idxs {
                    let qkey = &keys[qi];
                    while ei < entries.len() && self.descriptor.compare(&entries[ei].0, qkey) == Ordering::Less {
                        ei += 1;
                    }
                    if ei < entries.len() && self.descriptor.compare(&entries[ei].0, qkey) == Ordering::Equal {
                        out[qi] = Some(entries[ei].1.clone());
                    }
                }
            }
            NodeContents::Interior(pointers) => {
                let mut pi = 0usize;
                let mut batch_start = 0usize;
                for i in 0..idxs.len() {
                    let qkey = &keys[idxs[i]];
                    while pi < pointers.len() && self.descriptor.compare(&pointers[pi].key, qkey) == Ordering::Less {
                        pi += 1;
                    }
                    let same_child_as_next = i + 1 < idxs.len()
                        && pi < pointers.len()
                        && self.descriptor.compare(&pointers[pi].key, &keys[idxs[i + 1]]) != Ordering::Less;
                    if same_child_as_next {
                        continue;
                    }
                    if pi < pointers.len() {
                        self.lookup_batch_node(pointers[pi].offset, keys, &idxs[batch_start..=i], out)?;
                    }
                    batch_start = i + 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk_loader::build_sorted;
    use couchstore_storage::MemFileOps;
    use std::cmp::Ordering as Ord2;

    struct ByteKeyDescriptor;
    impl TreeDescriptor for ByteKeyDescriptor {
        fn compare(&self, a: &[u8], b: &[u8]) -> Ord2 {
            a.cmp(b)
        }
        fn reduce(&self, values: &[&[u8]]) -> Option<Vec<u8>> {
            Some((values.len() as u64).to_be_bytes().to_vec())
        }
    }

    #[test]
    fn lookup_and_fold_over_built_tree() {
        let mut f = MemFileOps::default();
        let descriptor = ByteKeyDescriptor;
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0u8..50)
            .map(|i| (vec![i], vec![i, i]))
            .collect();
        let root = build_sorted(&mut f, ChecksumScheme::Crc32C, &descriptor, entries.clone()).unwrap();

        let mut reader = TreeReader::new(&mut f, ChecksumScheme::Crc32C, &descriptor);
        let v = reader.lookup(&root, &[25]).unwrap();
        assert_eq!(v, Some(vec![25, 25]));

        let missing = reader.lookup(&root, &[200]).unwrap();
        assert_eq!(missing, None);

        let mut seen = Vec::new();
        let reduce = reader
            .fold(&root, &KeyRange::all(), &mut |k, _v| {
                seen.push(k.to_vec());
                FoldSignal::Continue
            })
            .unwrap();
        assert_eq!(seen.len(), 50);
        assert!(reduce.is_some());
    }
}
