//! Online compaction: rewrite the live document set into a fresh file,
//! optionally dropping tombstones and/or upgrading the disk format
//! (`spec.md` §4.9), plus a dbck-style recovery path that tolerates
//! checksum failures while scanning the source (`spec.md` §10).

use crate::config::StoreConfig;
use crate::db::Db;
use crate::document::{decode_by_seq_value, encode_by_id_value, encode_by_seq_value, encode_seq_key, Doc, DocInfo};
use crate::error::Result;
use crate::flags::{CompactFlags, OpenDocFlags, OpenFlags};
use crate::header::CURRENT_DISK_VERSION;
use crate::trees::{ByIdDescriptor, BySeqDescriptor};
use couchstore_btree::{build_sorted, external_sort, merge_runs, Entry as SortEntry, FoldSignal, KeyRange, TreeReader};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// What `doc_hook` decides for one entry during the by-seq fold pass,
/// before its body is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactDecision {
    Keep,
    Drop,
}

impl Db {
    pub fn compact_db(&mut self, dest_path: &Path) -> Result<Db> {
        self.compact_db_ex(dest_path, CompactFlags::empty(), StoreConfig::default(), None, None)
    }

    /// `doc_hook` sees each candidate entry's metadata and may `Drop` it
    /// before its body is even read. `docinfo_hook` then sees the surviving
    /// entry together with its (possibly still-compressed) body and may
    /// rewrite its metadata in place — e.g. to bump `rev_meta` on rewrite
    /// (`spec.md` §4.9 step 2, §6.2 `compact_db_ex`).
    pub fn compact_db_ex(
        &mut self,
        dest_path: &Path,
        flags: CompactFlags,
        config: StoreConfig,
        mut doc_hook: Option<&mut dyn FnMut(&DocInfo) -> CompactDecision>,
        mut docinfo_hook: Option<&mut dyn FnMut(&mut DocInfo, &[u8])>,
    ) -> Result<Db> {
        let drop_deletes = flags.contains(CompactFlags::DROP_DELETES);
        let recovery_mode = flags.contains(CompactFlags::RECOVERY_MODE);
        let unbuffered = flags.contains(CompactFlags::UNBUFFERED);
        let has_user_hook = doc_hook.is_some();

        let source_entries = if recovery_mode { self.recover_seq_entries()? } else { self.by_seq_entries()? };
        let local_docs = {
            let header = self.header().clone();
            crate::local::all(self.file_mut(), &header, self.config().node_chunk_threshold)?
        };

        let disk_version =
            if flags.contains(CompactFlags::UPGRADE_DB) { CURRENT_DISK_VERSION } else { self.header().disk_version };

        let mut open_flags = OpenFlags::CREATE;
        if unbuffered {
            open_flags |= OpenFlags::UNBUFFERED;
        }
        let mut dest = Db::open(dest_path, open_flags, config)?;
        dest.set_disk_version(disk_version);
        dest.header_mut().update_seq = self.header().update_seq;
        dest.header_mut().purge_seq = self.header().purge_seq + if drop_deletes { 1 } else { 0 };
        dest.header_mut().purge_ptr = self.header().purge_ptr;

        let build = (|| -> Result<()> {
            let node_chunk_threshold = dest.config().node_chunk_threshold;
            let mut id_entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(source_entries.len());
            let mut seq_entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(source_entries.len());

            for mut info in source_entries {
                if drop_deletes && info.deleted && !has_user_hook {
                    continue;
                }

                if let Some(hook) = doc_hook.as_mut() {
                    if hook(&info) == CompactDecision::Drop {
                        continue;
                    }
                }

                let body = if info.deleted {
                    Vec::new()
                } else {
                    self.open_doc_with_docinfo(&info, OpenDocFlags::empty())?.body
                };

                if let Some(hook) = docinfo_hook.as_mut() {
                    hook(&mut info, &body);
                }

                if info.deleted {
                    info.bp = 0;
                    info.size = 0;
                } else {
                    let scheme = dest.header().checksum_scheme();
                    let pos = dest.file_mut().goto_eof()?;
                    let bp = couchstore_storage::chunk::write_data_chunk(dest.file_mut(), pos, &body, scheme)?;
                    info.bp = bp;
                    info.size = body.len() as u32;
                }

                id_entries.push((info.id.clone(), encode_by_id_value(&info)));
                seq_entries.push((encode_seq_key(info.db_seq), encode_by_seq_value(&info)));
            }

            // by-seq: the source fold already visited entries in ascending
            // db_seq order, so the destination tree can be bulk-loaded
            // directly rather than run through the general modifier.
            let seq_descriptor = BySeqDescriptor::new(node_chunk_threshold);
            let seq_scheme = dest.header().checksum_scheme();
            let seq_root = build_sorted(dest.file_mut(), seq_scheme, &seq_descriptor, seq_entries)?;
            dest.header_mut().by_seq_root = Some(seq_root);

            // by-id: the stream above arrives in db_seq order, not id order,
            // so it goes through the external sorter before bulk-loading
            // (`spec.md` §4.9 step 3, §4.10).
            let id_descriptor = ByIdDescriptor::new(node_chunk_threshold);
            let spill_dir = tempfile::tempdir()?;
            let unsorted: Vec<SortEntry> =
                id_entries.into_iter().map(|(key, value)| SortEntry { key, value }).collect();
            let sorted_run = external_sort(
                Arc::new(ByIdDescriptor::new(node_chunk_threshold)),
                unsorted,
                spill_dir.path(),
                dest.config().sorter_chunk_size,
                dest.config().sorter_worker_threads,
            )?;
            let sorted = merge_runs(&id_descriptor, &[sorted_run.as_path()])?;
            let sorted_pairs: Vec<(Vec<u8>, Vec<u8>)> = sorted.into_iter().map(|e| (e.key, e.value)).collect();
            let id_scheme = dest.header().checksum_scheme();
            let id_root = build_sorted(dest.file_mut(), id_scheme, &id_descriptor, sorted_pairs)?;
            dest.header_mut().by_id_root = Some(id_root);

            for (id, value) in local_docs {
                dest.save_local_document(&id, &value)?;
            }

            dest.commit()
        })();

        match build {
            Ok(()) => Ok(dest),
            Err(e) => {
                let path = dest.path().map(|p| p.to_path_buf());
                let _ = dest.close();
                if let Some(path) = path {
                    let _ = std::fs::remove_file(path);
                }
                Err(e)
            }
        }
    }

    /// Folds the by-seq tree in ascending sequence order, preserving each
    /// entry's original `db_seq` for the destination rebuild.
    fn by_seq_entries(&mut self) -> Result<Vec<DocInfo>> {
        let Some(root) = self.header().by_seq_root.clone() else {
            return Ok(Vec::new());
        };
        let scheme = self.header().checksum_scheme();
        let descriptor = BySeqDescriptor::new(self.config().node_chunk_threshold);
        let mut out = Vec::new();
        let mut reader = TreeReader::new(self.file_mut(), scheme, &descriptor);
        reader.fold(&root, &KeyRange::all(), &mut |key, value| {
            if let Ok(info) = decode_by_seq_value(key, value) {
                out.push(info);
            }
            FoldSignal::Continue
        })?;
        Ok(out)
    }

    /// Recovery variant of [`Self::by_seq_entries`]: rewinds through every
    /// header this handle can still reach, tolerating checksum and node
    /// corruption at each one, and merges the results by id (newest header's
    /// entry wins) so a document missing from a partial scan of the latest
    /// header but present in an older one survives into the recovered file
    /// (`spec.md` §4.9 "Recovery variant").
    fn recover_seq_entries(&mut self) -> Result<Vec<DocInfo>> {
        let mut merged: BTreeMap<Vec<u8>, DocInfo> = BTreeMap::new();
        loop {
            if let Ok(docs) = self.all_docs_tolerant() {
                for info in docs {
                    merged.entry(info.id.clone()).or_insert(info);
                }
            }
            if self.rewind_db_header().is_err() {
                break;
            }
        }
        let mut entries: Vec<DocInfo> = merged.into_values().collect();
        entries.sort_by_key(|info| info.db_seq);
        Ok(entries)
    }

    /// Like `all_docs`, but reads through a tolerant tree reader that
    /// returns whatever payload it found on a checksum or node decode
    /// failure instead of failing the whole scan outright.
    fn all_docs_tolerant(&mut self) -> Result<Vec<DocInfo>> {
        let Some(root) = self.header().by_id_root.clone() else {
            return Ok(Vec::new());
        };
        let scheme = self.header().checksum_scheme();
        let descriptor = ByIdDescriptor::new(self.config().node_chunk_threshold);
        let mut out = Vec::new();
        let mut reader = TreeReader::new(self.file_mut(), scheme, &descriptor).tolerant(true);
        reader.fold(&root, &KeyRange::all(), &mut |key, value| {
            if let Ok(info) = crate::document::decode_by_id_value(key, value) {
                out.push(info);
            }
            FoldSignal::Continue
        })?;
        Ok(out)
    }
}

impl Db {
    fn set_disk_version(&mut self, version: u8) {
        self.header_mut().disk_version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::SaveFlags;
    use tempfile::tempdir;

    fn put(db: &mut Db, id: &[u8], body: &[u8], deleted: bool) {
        let doc = Doc { id: id.to_vec(), body: body.to_vec() };
        let mut info = DocInfo {
            id: id.to_vec(),
            db_seq: 0,
            rev_seq: 1,
            rev_meta: Vec::new(),
            content_meta: 0,
            bp: 0,
            deleted,
            size: 0,
        };
        db.save_document(&doc, &mut info, SaveFlags::empty()).unwrap();
    }

    #[test]
    fn compaction_preserves_live_documents() {
        let dir = tempdir().unwrap();
        let src_path = dir.path().join("src.couch");
        let dest_path = dir.path().join("dest.couch");

        let mut src = Db::open(&src_path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
        put(&mut src, b"a", b"alive", false);
        put(&mut src, b"b", b"dead", true);
        src.commit().unwrap();

        let mut dest = src.compact_db(&dest_path).unwrap();
        let docs = dest.all_docs().unwrap();
        assert_eq!(docs.len(), 2);

        let (_, doc) = dest.open_document(b"a", OpenDocFlags::empty()).unwrap().unwrap();
        assert_eq!(doc.body, b"alive");
    }

    #[test]
    fn drop_deletes_removes_tombstones_and_bumps_purge_seq() {
        let dir = tempdir().unwrap();
        let src_path = dir.path().join("src.couch");
        let dest_path = dir.path().join("dest.couch");

        let mut src = Db::open(&src_path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
        put(&mut src, b"a", b"alive", false);
        put(&mut src, b"b", b"dead", true);
        let purge_seq_before = src.header().purge_seq;
        src.commit().unwrap();

        let mut dest =
            src.compact_db_ex(&dest_path, CompactFlags::DROP_DELETES, StoreConfig::default(), None, None).unwrap();
        let docs = dest.all_docs().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, b"a");
        assert_eq!(dest.header().purge_seq, purge_seq_before + 1);
    }

    #[test]
    fn by_seq_entries_survive_the_destination_rebuild_in_order() {
        let dir = tempdir().unwrap();
        let src_path = dir.path().join("src.couch");
        let dest_path = dir.path().join("dest.couch");

        let mut src = Db::open(&src_path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
        put(&mut src, b"c", b"3", false);
        put(&mut src, b"a", b"1", false);
        put(&mut src, b"b", b"2", false);
        src.commit().unwrap();

        let mut dest = src.compact_db(&dest_path).unwrap();
        let changes = dest.changes_since(0).unwrap();
        let seqs: Vec<u64> = changes.iter().map(|i| i.db_seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(changes[0].id, b"c");
    }

    #[test]
    fn doc_hook_can_drop_an_entry_and_docinfo_hook_can_rewrite_metadata() {
        let dir = tempdir().unwrap();
        let src_path = dir.path().join("src.couch");
        let dest_path = dir.path().join("dest.couch");

        let mut src = Db::open(&src_path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
        put(&mut src, b"a", b"keep", false);
        put(&mut src, b"b", b"drop-me", false);
        src.commit().unwrap();

        let mut doc_hook = |info: &DocInfo| -> CompactDecision {
            if info.id == b"b" {
                CompactDecision::Drop
            } else {
                CompactDecision::Keep
            }
        };
        let mut docinfo_hook = |info: &mut DocInfo, _body: &[u8]| {
            info.rev_meta = b"rewritten".to_vec();
        };

        let mut dest = src
            .compact_db_ex(
                &dest_path,
                CompactFlags::empty(),
                StoreConfig::default(),
                Some(&mut doc_hook),
                Some(&mut docinfo_hook),
            )
            .unwrap();

        let docs = dest.all_docs().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, b"a");
        assert_eq!(docs[0].rev_meta, b"rewritten");
    }

    #[test]
    fn recovery_mode_merges_documents_across_headers() {
        let dir = tempdir().unwrap();
        let src_path = dir.path().join("src.couch");
        let dest_path = dir.path().join("dest.couch");

        let mut src = Db::open(&src_path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
        put(&mut src, b"a", b"1", false);
        src.commit().unwrap();
        put(&mut src, b"b", b"2", false);
        src.commit().unwrap();

        let mut dest = src
            .compact_db_ex(&dest_path, CompactFlags::RECOVERY_MODE, StoreConfig::default(), None, None)
            .unwrap();
        let docs = dest.all_docs().unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
