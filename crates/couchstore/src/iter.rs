//! Read-only traversals built on the by-id / by-seq tree folds: changes
//! feed, full document listing, bulk lookups, and the reduce-driven
//! `changes_count` shortcut (`spec.md` §4, §10).

use crate::db::Db;
use crate::document::{decode_by_id_value, decode_by_seq_value, encode_seq_key, DocInfo};
use crate::error::Result;
use crate::flags::DocInfosFlags;
use crate::trees::{decode_by_seq_reduce, ByIdDescriptor, BySeqDescriptor};
use couchstore_btree::{FoldSignal, KeyRange, TreeDescriptor, TreeReader};

fn keep(info: &DocInfo, flags: DocInfosFlags) -> bool {
    if flags.contains(DocInfosFlags::DELETES_ONLY) && !info.deleted {
        return false;
    }
    if flags.contains(DocInfosFlags::NO_DELETES) && info.deleted {
        return false;
    }
    true
}

fn corrupt_placeholder(key: &[u8]) -> DocInfo {
    DocInfo {
        id: key.to_vec(),
        db_seq: 0,
        rev_seq: 0,
        rev_meta: Vec::new(),
        content_meta: 0,
        bp: 0,
        deleted: true,
        size: 0,
    }
}

impl Db {
    /// Every by-seq entry with `db_seq > since`, in ascending sequence
    /// order. Historical entries for documents later overwritten are
    /// included, same as the underlying by-seq tree never forgetting a
    /// revision until compaction runs.
    pub fn changes_since(&mut self, since: u64) -> Result<Vec<DocInfo>> {
        let Some(root) = self.header().by_seq_root.clone() else {
            return Ok(Vec::new());
        };
        let scheme = self.header().checksum_scheme();
        let descriptor = BySeqDescriptor::new(self.config().node_chunk_threshold);
        let range = KeyRange { start: Some(encode_seq_key(since + 1)), end: None };
        let mut out = Vec::new();
        let mut reader = TreeReader::new(self.file_mut(), scheme, &descriptor);
        reader.fold(&root, &range, &mut |key, value| {
            if let Ok(info) = decode_by_seq_value(key, value) {
                out.push(info);
            }
            FoldSignal::Continue
        })?;
        Ok(out)
    }

    /// All documents in id order (`spec.md` §4 "all_docs").
    pub fn all_docs(&mut self) -> Result<Vec<DocInfo>> {
        let Some(root) = self.header().by_id_root.clone() else {
            return Ok(Vec::new());
        };
        let scheme = self.header().checksum_scheme();
        let descriptor = ByIdDescriptor::new(self.config().node_chunk_threshold);
        let mut out = Vec::new();
        let mut reader = TreeReader::new(self.file_mut(), scheme, &descriptor);
        reader.fold(&root, &KeyRange::all(), &mut |key, value| {
            if let Ok(info) = decode_by_id_value(key, value) {
                out.push(info);
            }
            FoldSignal::Continue
        })?;
        Ok(out)
    }

    /// Bulk by-id lookup (`spec.md` §6.2 "docinfos" flags).
    ///
    /// With `RANGES` set, `ids` is read as `(lo, hi)` pairs and each pair
    /// folds its whole span, emitted in the caller's pair order. Otherwise
    /// `ids` are sorted once and resolved with a single tree descent
    /// (`TreeReader::lookup_batch`), so the result comes back in sorted-key
    /// order rather than the caller's original order.
    pub fn docinfos_by_id(&mut self, ids: &[Vec<u8>], flags: DocInfosFlags) -> Result<Vec<Option<DocInfo>>> {
        let Some(root) = self.header().by_id_root.clone() else {
            return Ok(vec![None; ids.len()]);
        };
        let scheme = self.header().checksum_scheme();
        let descriptor = ByIdDescriptor::new(self.config().node_chunk_threshold);
        let tolerant = flags.contains(DocInfosFlags::TOLERATE_CORRUPTION);
        let mut reader = TreeReader::new(self.file_mut(), scheme, &descriptor).tolerant(tolerant);

        if flags.contains(DocInfosFlags::RANGES) {
            let mut out = Vec::new();
            for pair in ids.chunks(2) {
                let range = KeyRange { start: pair.first().cloned(), end: pair.get(1).cloned() };
                reader.fold(&root, &range, &mut |key, value| {
                    match decode_by_id_value(key, value) {
                        Ok(info) if keep(&info, flags) => out.push(Some(info)),
                        Ok(_) => {}
                        Err(_) if flags.contains(DocInfosFlags::INCLUDE_CORRUPT_DOCS) => {
                            out.push(Some(corrupt_placeholder(key)))
                        }
                        Err(_) => {}
                    }
                    FoldSignal::Continue
                })?;
            }
            return Ok(out);
        }

        let mut sorted = ids.to_vec();
        sorted.sort_by(|a, b| descriptor.compare(a, b));
        let values = reader.lookup_batch(&root, &sorted)?;

        let mut out = Vec::with_capacity(sorted.len());
        for (key, value) in sorted.into_iter().zip(values) {
            let Some(value) = value else {
                out.push(None);
                continue;
            };
            match decode_by_id_value(&key, &value) {
                Ok(info) if keep(&info, flags) => out.push(Some(info)),
                Ok(_) => out.push(None),
                Err(_) if flags.contains(DocInfosFlags::INCLUDE_CORRUPT_DOCS) => {
                    out.push(Some(corrupt_placeholder(&key)))
                }
                Err(_) => out.push(None),
            }
        }
        Ok(out)
    }

    /// Bulk by-sequence lookup; same ordering and flag semantics as
    /// [`Self::docinfos_by_id`], with range pairs given as `(lo, hi)`
    /// sequence numbers encoded to keys before folding.
    pub fn docinfos_by_sequence(&mut self, seqs: &[u64], flags: DocInfosFlags) -> Result<Vec<Option<DocInfo>>> {
        let Some(root) = self.header().by_seq_root.clone() else {
            return Ok(vec![None; seqs.len()]);
        };
        let scheme = self.header().checksum_scheme();
        let descriptor = BySeqDescriptor::new(self.config().node_chunk_threshold);
        let tolerant = flags.contains(DocInfosFlags::TOLERATE_CORRUPTION);
        let mut reader = TreeReader::new(self.file_mut(), scheme, &descriptor).tolerant(tolerant);

        if flags.contains(DocInfosFlags::RANGES) {
            let mut out = Vec::new();
            for pair in seqs.chunks(2) {
                let range = KeyRange {
                    start: pair.first().map(|s| encode_seq_key(*s)),
                    end: pair.get(1).map(|s| encode_seq_key(*s)),
                };
                reader.fold(&root, &range, &mut |key, value| {
                    match decode_by_seq_value(key, value) {
                        Ok(info) if keep(&info, flags) => out.push(Some(info)),
                        Ok(_) => {}
                        Err(_) if flags.contains(DocInfosFlags::INCLUDE_CORRUPT_DOCS) => {
                            out.push(Some(corrupt_placeholder(key)))
                        }
                        Err(_) => {}
                    }
                    FoldSignal::Continue
                })?;
            }
            return Ok(out);
        }

        let mut sorted_seqs = seqs.to_vec();
        sorted_seqs.sort_unstable();
        let sorted_keys: Vec<Vec<u8>> = sorted_seqs.iter().map(|s| encode_seq_key(*s)).collect();
        let values = reader.lookup_batch(&root, &sorted_keys)?;

        let mut out = Vec::with_capacity(sorted_keys.len());
        for (key, value) in sorted_keys.into_iter().zip(values) {
            let Some(value) = value else {
                out.push(None);
                continue;
            };
            match decode_by_seq_value(&key, &value) {
                Ok(info) if keep(&info, flags) => out.push(Some(info)),
                Ok(_) => out.push(None),
                Err(_) if flags.contains(DocInfosFlags::INCLUDE_CORRUPT_DOCS) => {
                    out.push(Some(corrupt_placeholder(&key)))
                }
                Err(_) => out.push(None),
            }
        }
        Ok(out)
    }

    /// Visits every by-id entry in `range` (or the whole tree if `None`),
    /// stopping early when `visit` returns `false`.
    pub fn walk_id_tree(
        &mut self,
        range: Option<KeyRange>,
        visit: &mut dyn FnMut(&DocInfo) -> bool,
    ) -> Result<()> {
        let Some(root) = self.header().by_id_root.clone() else {
            return Ok(());
        };
        let scheme = self.header().checksum_scheme();
        let descriptor = ByIdDescriptor::new(self.config().node_chunk_threshold);
        let range = range.unwrap_or_else(KeyRange::all);
        let mut reader = TreeReader::new(self.file_mut(), scheme, &descriptor);
        reader.fold(&root, &range, &mut |key, value| match decode_by_id_value(key, value) {
            Ok(info) => {
                if visit(&info) {
                    FoldSignal::Continue
                } else {
                    FoldSignal::Stop
                }
            }
            Err(_) => FoldSignal::Continue,
        })?;
        Ok(())
    }

    pub fn walk_seq_tree(
        &mut self,
        range: Option<KeyRange>,
        visit: &mut dyn FnMut(&DocInfo) -> bool,
    ) -> Result<()> {
        let Some(root) = self.header().by_seq_root.clone() else {
            return Ok(());
        };
        let scheme = self.header().checksum_scheme();
        let descriptor = BySeqDescriptor::new(self.config().node_chunk_threshold);
        let range = range.unwrap_or_else(KeyRange::all);
        let mut reader = TreeReader::new(self.file_mut(), scheme, &descriptor);
        reader.fold(&root, &range, &mut |key, value| match decode_by_seq_value(key, value) {
            Ok(info) => {
                if visit(&info) {
                    FoldSignal::Continue
                } else {
                    FoldSignal::Stop
                }
            }
            Err(_) => FoldSignal::Continue,
        })?;
        Ok(())
    }

    /// Count of revisions committed since `since`, read off the by-seq
    /// tree's reduce value over the `(since, end]` range rather than
    /// walking and counting every leaf.
    pub fn changes_count(&mut self, since: u64) -> Result<u64> {
        let Some(root) = self.header().by_seq_root.clone() else {
            return Ok(0);
        };
        let scheme = self.header().checksum_scheme();
        let descriptor = BySeqDescriptor::new(self.config().node_chunk_threshold);
        let range = KeyRange { start: Some(encode_seq_key(since + 1)), end: None };
        let mut reader = TreeReader::new(self.file_mut(), scheme, &descriptor);
        let reduce = reader.fold(&root, &range, &mut |_k, _v| FoldSignal::Continue)?;
        Ok(reduce.map(|r| decode_by_seq_reduce(&r)).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::document::Doc;
    use crate::flags::{OpenFlags, SaveFlags};
    use tempfile::tempdir;

    fn open_new(dir: &std::path::Path) -> Db {
        let path = dir.join("test.couch");
        Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap()
    }

    fn put(db: &mut Db, id: &[u8], body: &[u8]) {
        let doc = Doc { id: id.to_vec(), body: body.to_vec() };
        let mut info = DocInfo {
            id: id.to_vec(),
            db_seq: 0,
            rev_seq: 1,
            rev_meta: Vec::new(),
            content_meta: 0,
            bp: 0,
            deleted: false,
            size: 0,
        };
        db.save_document(&doc, &mut info, SaveFlags::empty()).unwrap();
    }

    #[test]
    fn changes_since_and_changes_count_agree() {
        let dir = tempdir().unwrap();
        let mut db = open_new(dir.path());
        put(&mut db, b"a", b"1");
        put(&mut db, b"b", b"2");
        put(&mut db, b"c", b"3");

        let changes = db.changes_since(1).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(db.changes_count(1).unwrap(), 2);
        assert_eq!(db.changes_count(0).unwrap(), 3);
    }

    #[test]
    fn all_docs_lists_every_live_id() {
        let dir = tempdir().unwrap();
        let mut db = open_new(dir.path());
        put(&mut db, b"a", b"1");
        put(&mut db, b"b", b"2");

        let docs = db.all_docs().unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn walk_id_tree_can_stop_early() {
        let dir = tempdir().unwrap();
        let mut db = open_new(dir.path());
        put(&mut db, b"a", b"1");
        put(&mut db, b"b", b"2");
        put(&mut db, b"c", b"3");

        let mut seen = Vec::new();
        db.walk_id_tree(None, &mut |info| {
            seen.push(info.id.clone());
            seen.len() < 2
        })
        .unwrap();
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
