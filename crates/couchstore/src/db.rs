//! The public `Db` handle: open/close/commit, document save/read, and the
//! local-doc passthrough (`spec.md` §4 "Operations").

use crate::config::StoreConfig;
use crate::document::{
    decode_by_id_value, decode_by_seq_value, encode_by_id_value, encode_by_seq_value, encode_seq_key,
    Doc, DocInfo,
};
use crate::error::{CouchstoreError, Result};
use crate::flags::{OpenDocFlags, OpenFlags, SaveFlags};
use crate::header::{self, Header};
use crate::local;
use crate::trees::{ByIdDescriptor, BySeqDescriptor};
use couchstore_btree::{build_sorted, modify, Action, NodePointer, TreeReader};
use couchstore_storage::{chunk, compression, BufferedFileOps, FileOps, RawFileOps};
use std::path::{Path, PathBuf};

/// An open database file handle.
///
/// Every mutation (`save_document(s)`, local-doc put/delete) updates the
/// in-memory [`Header`] only; nothing is visible to a reopened handle until
/// [`Db::commit`] writes a new header chunk.
pub struct Db {
    file: Box<dyn FileOps>,
    header: Header,
    header_pos: u64,
    config: StoreConfig,
    path: Option<PathBuf>,
    read_only: bool,
    unbuffered: bool,
}

impl Db {
    pub fn open(path: &Path, flags: OpenFlags, config: StoreConfig) -> Result<Self> {
        let read_only = flags.contains(OpenFlags::RDONLY);
        let create = flags.contains(OpenFlags::CREATE);
        let unbuffered = flags.contains(OpenFlags::UNBUFFERED);

        if !path.exists() && !create {
            return Err(CouchstoreError::NoSuchFile);
        }

        let mut file = open_file_ops(path, read_only, create, unbuffered, &config)?;
        let eof = file.goto_eof()?;

        let (header, header_pos) = if eof == 0 {
            if read_only {
                return Err(CouchstoreError::NoHeader);
            }
            let header = Header::empty(header::CURRENT_DISK_VERSION);
            let pos = header::commit_header(file.as_mut(), &header)?;
            (header, pos)
        } else {
            header::find_last_header(file.as_mut())?
        };

        Ok(Self {
            file,
            header,
            header_pos,
            config,
            path: Some(path.to_path_buf()),
            read_only,
            unbuffered,
        })
    }

    /// Wraps an already-open backing store (used by the compactor, which
    /// builds its destination file directly rather than through `open`).
    pub fn from_parts(file: Box<dyn FileOps>, header: Header, header_pos: u64, config: StoreConfig) -> Self {
        Self { file, header, header_pos, config, path: None, read_only: false, unbuffered: false }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn header_pos(&self) -> u64 {
        self.header_pos
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn file_mut(&mut self) -> &mut dyn FileOps {
        self.file.as_mut()
    }

    /// Flushes any pending writes and syncs, without writing a new header
    /// (i.e. discards uncommitted in-memory mutations on the next open).
    pub fn close(mut self) -> Result<()> {
        self.file.close()?;
        Ok(())
    }

    /// Writes the current in-memory header as a new header chunk, making
    /// all mutations since the last commit durable and visible to other
    /// handles on next open (`spec.md` §4.8 "Commit").
    pub fn commit(&mut self) -> Result<()> {
        if self.read_only {
            return Err(CouchstoreError::InvalidArguments("database opened read-only".into()));
        }
        let pos = header::commit_header(self.file.as_mut(), &self.header)?;
        self.header_pos = pos;
        Ok(())
    }

    /// Closes the backing file descriptor without committing pending
    /// mutations, analogous to the original API's abrupt-drop operation
    /// used by callers that want to abandon an in-progress write batch.
    pub fn drop_file(mut self) -> Result<()> {
        self.file.close()
    }

    /// Reopens the backing file from the path it was first opened with and
    /// re-scans for the latest header, picking up mutations committed by
    /// another handle (`spec.md` §4.8).
    pub fn reopen_file(&mut self) -> Result<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| CouchstoreError::InvalidArguments("handle has no backing path".into()))?;
        let mut file = open_file_ops(&path, self.read_only, false, self.unbuffered, &self.config)?;
        let (header, pos) = header::find_last_header(file.as_mut())?;
        self.file = file;
        self.header = header;
        self.header_pos = pos;
        Ok(())
    }

    /// Rewinds the in-memory header to the most recent header chunk older
    /// than the one this handle currently has loaded
    /// (`spec.md` §10 "rewind_db_header").
    pub fn rewind_db_header(&mut self) -> Result<()> {
        let (header, pos) = header::rewind_to_older_header(self.file.as_mut(), self.header_pos)?;
        self.header = header;
        self.header_pos = pos;
        Ok(())
    }

    /// Saves a batch of documents atomically with respect to each other
    /// (all land in the same by-id/by-seq tree rebuild), assigning
    /// sequence numbers in batch order unless `SEQUENCE_AS_IS` is set
    /// (`spec.md` §4.7 "Save documents").
    pub fn save_documents(&mut self, docs: &[Doc], infos: &mut [DocInfo], flags: SaveFlags) -> Result<()> {
        if self.read_only {
            return Err(CouchstoreError::InvalidArguments("database opened read-only".into()));
        }
        if docs.len() != infos.len() {
            return Err(CouchstoreError::InvalidArguments(
                "docs and infos must be the same length".into(),
            ));
        }

        let scheme = self.header.checksum_scheme();
        let sequence_as_is = flags.contains(SaveFlags::SEQUENCE_AS_IS);
        let compress = flags.contains(SaveFlags::COMPRESS_DOC_BODIES);

        let mut next_seq = self.header.update_seq;
        let mut id_actions = Vec::with_capacity(docs.len());
        let mut seq_actions = Vec::with_capacity(docs.len());

        // A re-saved id leaves its old by-seq entry dangling unless we fetch
        // the prior db_seq first and explicitly remove it (spec.md §4.7).
        for doc in docs {
            if let Some(old) = self.docinfo_by_id(&doc.id)? {
                seq_actions.push(Action::Remove(encode_seq_key(old.db_seq)));
            }
        }

        for (doc, info) in docs.iter().zip(infos.iter_mut()) {
            info.id = doc.id.clone();
            if !sequence_as_is {
                next_seq += 1;
                info.db_seq = next_seq;
            } else {
                next_seq = next_seq.max(info.db_seq);
            }

            if info.deleted {
                info.bp = 0;
                info.size = 0;
            } else {
                let body = if compress {
                    info.content_meta |= crate::document::CONTENT_META_COMPRESSED;
                    compression::compress(&doc.body)
                } else {
                    doc.body.clone()
                };
                let pos = self.file.goto_eof()?;
                let bp = chunk::write_data_chunk(self.file.as_mut(), pos, &body, scheme)?;
                info.bp = bp;
                info.size = doc.body.len() as u32;
            }

            id_actions.push(Action::Insert(doc.id.clone(), encode_by_id_value(info)));
            seq_actions.push(Action::Insert(encode_seq_key(info.db_seq), encode_by_seq_value(info)));
        }

        self.header.update_seq = next_seq;

        let id_descriptor = ByIdDescriptor::new(self.config.node_chunk_threshold);
        self.header.by_id_root = Some(run_modify(
            self.file.as_mut(),
            scheme,
            &id_descriptor,
            &self.header.by_id_root,
            &id_actions,
        )?);

        let seq_descriptor = BySeqDescriptor::new(self.config.node_chunk_threshold);
        self.header.by_seq_root = Some(run_modify(
            self.file.as_mut(),
            scheme,
            &seq_descriptor,
            &self.header.by_seq_root,
            &seq_actions,
        )?);

        Ok(())
    }

    pub fn save_document(&mut self, doc: &Doc, info: &mut DocInfo, flags: SaveFlags) -> Result<()> {
        let docs = [doc.clone()];
        let mut infos = [info.clone()];
        self.save_documents(&docs, &mut infos, flags)?;
        *info = infos[0].clone();
        Ok(())
    }

    pub fn docinfo_by_id(&mut self, id: &[u8]) -> Result<Option<DocInfo>> {
        let Some(root) = self.header.by_id_root.clone() else {
            return Ok(None);
        };
        let descriptor = ByIdDescriptor::new(self.config.node_chunk_threshold);
        let mut reader = TreeReader::new(self.file.as_mut(), self.header.checksum_scheme(), &descriptor);
        match reader.lookup(&root, id)? {
            Some(value) => Ok(Some(decode_by_id_value(id, &value)?)),
            None => Ok(None),
        }
    }

    pub fn docinfo_by_sequence(&mut self, seq: u64) -> Result<Option<DocInfo>> {
        let Some(root) = self.header.by_seq_root.clone() else {
            return Ok(None);
        };
        let key = encode_seq_key(seq);
        let descriptor = BySeqDescriptor::new(self.config.node_chunk_threshold);
        let mut reader = TreeReader::new(self.file.as_mut(), self.header.checksum_scheme(), &descriptor);
        match reader.lookup(&root, &key)? {
            Some(value) => Ok(Some(decode_by_seq_value(&key, &value)?)),
            None => Ok(None),
        }
    }

    pub fn open_document(&mut self, id: &[u8], flags: OpenDocFlags) -> Result<Option<(DocInfo, Doc)>> {
        let Some(info) = self.docinfo_by_id(id)? else {
            return Ok(None);
        };
        let doc = self.read_body(&info, flags)?;
        Ok(Some((info, doc)))
    }

    pub fn open_doc_with_docinfo(&mut self, info: &DocInfo, flags: OpenDocFlags) -> Result<Doc> {
        self.read_body(info, flags)
    }

    fn read_body(&mut self, info: &DocInfo, flags: OpenDocFlags) -> Result<Doc> {
        if info.deleted {
            return Ok(Doc { id: info.id.clone(), body: Vec::new() });
        }
        let scheme = self.header.checksum_scheme();
        let read = chunk::read_chunk(self.file.as_mut(), info.bp, scheme, false)?;
        let body = if info.is_compressed() && flags.contains(OpenDocFlags::DECOMPRESS_DOC_BODIES) {
            compression::decompress(&read.payload)?
        } else {
            read.payload
        };
        Ok(Doc { id: info.id.clone(), body })
    }

    pub fn open_local_document(&mut self, id: &[u8]) -> Result<Option<Vec<u8>>> {
        local::get(self.file.as_mut(), &self.header, id, self.config.node_chunk_threshold)
    }

    pub fn save_local_document(&mut self, id: &[u8], value: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(CouchstoreError::InvalidArguments("database opened read-only".into()));
        }
        local::put(self.file.as_mut(), &mut self.header, id, value, self.config.node_chunk_threshold)
    }

    pub fn delete_local_document(&mut self, id: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(CouchstoreError::InvalidArguments("database opened read-only".into()));
        }
        local::delete(self.file.as_mut(), &mut self.header, id, self.config.node_chunk_threshold)
    }
}

fn open_file_ops(
    path: &Path,
    read_only: bool,
    create: bool,
    unbuffered: bool,
    config: &StoreConfig,
) -> Result<Box<dyn FileOps>> {
    if unbuffered {
        Ok(Box::new(RawFileOps::open(path, read_only, create)?))
    } else {
        Ok(Box::new(BufferedFileOps::open_with_limits(
            path,
            read_only,
            create,
            config.read_cache_slots,
            config.read_cache_block_bytes,
            config.write_buffer_bytes,
        )?))
    }
}

fn run_modify<D: couchstore_btree::TreeDescriptor + ?Sized>(
    file: &mut dyn FileOps,
    scheme: couchstore_storage::ChecksumScheme,
    descriptor: &D,
    root: &Option<NodePointer>,
    actions: &[Action],
) -> Result<NodePointer> {
    let outcome = match root {
        Some(root) => modify(file, scheme, descriptor, root, actions, None)?,
        None => {
            let empty_root = build_sorted(file, scheme, descriptor, Vec::new())?;
            modify(file, scheme, descriptor, &empty_root, actions, None)?
        }
    };
    Ok(outcome.root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_new(dir: &Path) -> Db {
        let path = dir.join("test.couch");
        Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap()
    }

    #[test]
    fn save_and_open_document_roundtrips() {
        let dir = tempdir().unwrap();
        let mut db = open_new(dir.path());

        let doc = Doc { id: b"doc1".to_vec(), body: b"hello world".to_vec() };
        let mut info = DocInfo {
            id: b"doc1".to_vec(),
            db_seq: 0,
            rev_seq: 1,
            rev_meta: Vec::new(),
            content_meta: 0,
            bp: 0,
            deleted: false,
            size: 0,
        };
        db.save_document(&doc, &mut info, SaveFlags::empty()).unwrap();
        assert_eq!(info.db_seq, 1);

        let (found_info, found_doc) = db.open_document(b"doc1", OpenDocFlags::empty()).unwrap().unwrap();
        assert_eq!(found_doc.body, b"hello world");
        assert_eq!(found_info.db_seq, 1);
    }

    #[test]
    fn compressed_body_decompresses_on_read() {
        let dir = tempdir().unwrap();
        let mut db = open_new(dir.path());

        let doc = Doc { id: b"doc1".to_vec(), body: b"aaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec() };
        let mut info = DocInfo {
            id: b"doc1".to_vec(),
            db_seq: 0,
            rev_seq: 1,
            rev_meta: Vec::new(),
            content_meta: 0,
            bp: 0,
            deleted: false,
            size: 0,
        };
        db.save_document(&doc, &mut info, SaveFlags::COMPRESS_DOC_BODIES).unwrap();
        assert!(info.is_compressed());

        let found = db
            .open_document(b"doc1", OpenDocFlags::DECOMPRESS_DOC_BODIES)
            .unwrap()
            .unwrap();
        assert_eq!(found.1.body, doc.body);
    }

    #[test]
    fn commit_then_reopen_sees_saved_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.couch");
        {
            let mut db = Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
            let doc = Doc { id: b"doc1".to_vec(), body: b"persisted".to_vec() };
            let mut info = DocInfo {
                id: b"doc1".to_vec(),
                db_seq: 0,
                rev_seq: 1,
                rev_meta: Vec::new(),
                content_meta: 0,
                bp: 0,
                deleted: false,
                size: 0,
            };
            db.save_document(&doc, &mut info, SaveFlags::empty()).unwrap();
            db.commit().unwrap();
        }

        let mut db = Db::open(&path, OpenFlags::empty(), StoreConfig::default()).unwrap();
        let (_info, doc) = db.open_document(b"doc1", OpenDocFlags::empty()).unwrap().unwrap();
        assert_eq!(doc.body, b"persisted");
    }

    #[test]
    fn uncommitted_writes_vanish_on_reopen_without_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.couch");
        {
            let mut db = Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
            let doc = Doc { id: b"doc1".to_vec(), body: b"gone".to_vec() };
            let mut info = DocInfo {
                id: b"doc1".to_vec(),
                db_seq: 0,
                rev_seq: 1,
                rev_meta: Vec::new(),
                content_meta: 0,
                bp: 0,
                deleted: false,
                size: 0,
            };
            db.save_document(&doc, &mut info, SaveFlags::empty()).unwrap();
            db.close().unwrap();
        }

        let mut db = Db::open(&path, OpenFlags::empty(), StoreConfig::default()).unwrap();
        assert!(db.open_document(b"doc1", OpenDocFlags::empty()).unwrap().is_none());
    }

    #[test]
    fn resaving_an_existing_id_drops_its_stale_by_seq_entry() {
        let dir = tempdir().unwrap();
        let mut db = open_new(dir.path());

        let doc1 = Doc { id: b"doc1".to_vec(), body: b"first".to_vec() };
        let mut info1 = DocInfo {
            id: b"doc1".to_vec(),
            db_seq: 0,
            rev_seq: 1,
            rev_meta: Vec::new(),
            content_meta: 0,
            bp: 0,
            deleted: false,
            size: 0,
        };
        db.save_document(&doc1, &mut info1, SaveFlags::empty()).unwrap();
        let old_seq = info1.db_seq;

        let doc2 = Doc { id: b"doc1".to_vec(), body: b"second".to_vec() };
        let mut info2 = DocInfo { rev_seq: 2, ..info1.clone() };
        db.save_document(&doc2, &mut info2, SaveFlags::empty()).unwrap();
        assert_ne!(info2.db_seq, old_seq);

        assert!(db.docinfo_by_sequence(old_seq).unwrap().is_none());
        let current = db.docinfo_by_sequence(info2.db_seq).unwrap().unwrap();
        assert_eq!(current.id, b"doc1");
    }

    #[test]
    fn local_document_roundtrips_through_the_handle() {
        let dir = tempdir().unwrap();
        let mut db = open_new(dir.path());
        db.save_local_document(b"_local/x", b"v1").unwrap();
        assert_eq!(db.open_local_document(b"_local/x").unwrap(), Some(b"v1".to_vec()));
        db.delete_local_document(b"_local/x").unwrap();
        assert_eq!(db.open_local_document(b"_local/x").unwrap(), None);
    }
}
