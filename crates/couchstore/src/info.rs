//! `db_info`: summary statistics read straight off the by-id tree's reduce
//! value rather than a full document walk (`spec.md` §10).

use crate::db::Db;
use crate::error::Result;
use crate::trees::decode_by_id_reduce;

#[derive(Debug, Clone)]
pub struct DbInfo {
    pub filename: Option<std::path::PathBuf>,
    pub header_pos: u64,
    pub last_seq: u64,
    pub purge_seq: u64,
    pub doc_count: u64,
    pub deleted_count: u64,
    pub space_used: u64,
    pub file_size: u64,
}

impl Db {
    pub fn db_info(&mut self) -> Result<DbInfo> {
        let header_pos = self.header_pos();
        let last_seq = self.header().update_seq;
        let purge_seq = self.header().purge_seq;
        let (doc_count, deleted_count, space_used) = match &self.header().by_id_root {
            Some(root) => decode_by_id_reduce(&root.reduce_value),
            None => (0, 0, 0),
        };
        let file_size = self.file_mut().goto_eof()?;

        Ok(DbInfo {
            filename: self.path().map(|p| p.to_path_buf()),
            header_pos,
            last_seq,
            purge_seq,
            doc_count,
            deleted_count,
            space_used,
            file_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::document::{Doc, DocInfo};
    use crate::flags::{OpenFlags, SaveFlags};
    use tempfile::tempdir;

    #[test]
    fn db_info_reflects_saved_documents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.couch");
        let mut db = Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap();

        let doc = Doc { id: b"a".to_vec(), body: b"hello".to_vec() };
        let mut info = DocInfo {
            id: b"a".to_vec(),
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

        let stats = db.db_info().unwrap();
        assert_eq!(stats.last_seq, 1);
        assert_eq!(stats.doc_count, 1);
        assert_eq!(stats.deleted_count, 0);
        assert_eq!(stats.space_used, 5);
    }
}
