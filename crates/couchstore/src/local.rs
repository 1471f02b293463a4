//! Local (non-replicated) documents: same tree machinery as the main
//! indexes but keyed directly on a caller-supplied id, no reduce, and never
//! touched by `changes_since`/compaction content carry-over rules that
//! apply to regular documents (`spec.md` §4 "Local documents").

use crate::error::Result;
use crate::header::Header;
use crate::trees::LocalDescriptor;
use couchstore_btree::{modify, Action, KeyRange, NodePointer, TreeReader};
use couchstore_storage::FileOps;

pub fn get(
    file: &mut dyn FileOps,
    header: &Header,
    id: &[u8],
    node_chunk_threshold: usize,
) -> Result<Option<Vec<u8>>> {
    let Some(root) = &header.local_docs_root else {
        return Ok(None);
    };
    let descriptor = LocalDescriptor::new(node_chunk_threshold);
    let mut reader = TreeReader::new(file, header.checksum_scheme(), &descriptor);
    Ok(reader.lookup(root, id)?)
}

pub fn put(
    file: &mut dyn FileOps,
    header: &mut Header,
    id: &[u8],
    value: &[u8],
    node_chunk_threshold: usize,
) -> Result<()> {
    let descriptor = LocalDescriptor::new(node_chunk_threshold);
    let root = run_modify(file, header, &descriptor, &[Action::Insert(id.to_vec(), value.to_vec())])?;
    header.local_docs_root = Some(root);
    Ok(())
}

pub fn delete(
    file: &mut dyn FileOps,
    header: &mut Header,
    id: &[u8],
    node_chunk_threshold: usize,
) -> Result<()> {
    let Some(_) = &header.local_docs_root else {
        return Ok(());
    };
    let descriptor = LocalDescriptor::new(node_chunk_threshold);
    let root = run_modify(file, header, &descriptor, &[Action::Remove(id.to_vec())])?;
    header.local_docs_root = Some(root);
    Ok(())
}

fn run_modify(
    file: &mut dyn FileOps,
    header: &Header,
    descriptor: &LocalDescriptor,
    actions: &[Action],
) -> Result<NodePointer> {
    let scheme = header.checksum_scheme();
    let outcome = match &header.local_docs_root {
        Some(root) => modify(file, scheme, descriptor, root, actions, None)?,
        None => {
            let empty_root = couchstore_btree::build_sorted(file, scheme, descriptor, Vec::new())?;
            modify(file, scheme, descriptor, &empty_root, actions, None)?
        }
    };
    Ok(outcome.root)
}

/// All local-doc ids and values in ascending id order, used by `dbinfo`
/// and by the compactor's local-docs passthrough.
pub fn all(
    file: &mut dyn FileOps,
    header: &Header,
    node_chunk_threshold: usize,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let Some(root) = &header.local_docs_root else {
        return Ok(Vec::new());
    };
    let descriptor = LocalDescriptor::new(node_chunk_threshold);
    let mut out = Vec::new();
    let mut reader = TreeReader::new(file, header.checksum_scheme(), &descriptor);
    reader.fold(root, &KeyRange::all(), &mut |key, value| {
        out.push((key.to_vec(), value.to_vec()));
        couchstore_btree::FoldSignal::Continue
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchstore_btree::DEFAULT_NODE_CHUNK_THRESHOLD;
    use couchstore_storage::MemFileOps;

    #[test]
    fn put_then_get_roundtrips() {
        let mut file = MemFileOps::default();
        let mut header = Header::empty(crate::header::CURRENT_DISK_VERSION);
        put(&mut file, &mut header, b"_local/cp", b"12345", DEFAULT_NODE_CHUNK_THRESHOLD).unwrap();
        let value = get(&mut file, &header, b"_local/cp", DEFAULT_NODE_CHUNK_THRESHOLD).unwrap();
        assert_eq!(value, Some(b"12345".to_vec()));
    }

    #[test]
    fn delete_removes_entry() {
        let mut file = MemFileOps::default();
        let mut header = Header::empty(crate::header::CURRENT_DISK_VERSION);
        put(&mut file, &mut header, b"_local/cp", b"v", DEFAULT_NODE_CHUNK_THRESHOLD).unwrap();
        delete(&mut file, &mut header, b"_local/cp", DEFAULT_NODE_CHUNK_THRESHOLD).unwrap();
        assert_eq!(get(&mut file, &header, b"_local/cp", DEFAULT_NODE_CHUNK_THRESHOLD).unwrap(), None);
    }

    #[test]
    fn missing_key_returns_none() {
        let mut file = MemFileOps::default();
        let header = Header::empty(crate::header::CURRENT_DISK_VERSION);
        assert_eq!(get(&mut file, &header, b"nope", DEFAULT_NODE_CHUNK_THRESHOLD).unwrap(), None);
    }
}
