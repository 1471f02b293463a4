//! End-to-end scenarios exercising the public `Db` API against a real
//! temp-file backing store (as opposed to the unit tests' `MemFileOps`).

use couchstore::{CompactFlags, Doc, DocInfo, DocInfosFlags, OpenDocFlags, OpenFlags, SaveFlags, StoreConfig};
use tempfile::tempdir;

fn fresh_info(id: &[u8]) -> DocInfo {
    DocInfo {
        id: id.to_vec(),
        db_seq: 0,
        rev_seq: 1,
        rev_meta: Vec::new(),
        content_meta: 0,
        bp: 0,
        deleted: false,
        size: 0,
    }
}

#[test]
fn header_is_discoverable_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.couch");

    {
        let mut db = couchstore::Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
        let doc = Doc { id: b"k".to_vec(), body: b"v".to_vec() };
        let mut info = fresh_info(b"k");
        db.save_document(&doc, &mut info, SaveFlags::empty()).unwrap();
        db.commit().unwrap();
    }

    let mut db = couchstore::Db::open(&path, OpenFlags::empty(), StoreConfig::default()).unwrap();
    let (_, doc) = db.open_document(b"k", OpenDocFlags::empty()).unwrap().unwrap();
    assert_eq!(doc.body, b"v");
}

#[test]
fn opening_a_missing_file_without_create_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing.couch");
    assert!(couchstore::Db::open(&path, OpenFlags::empty(), StoreConfig::default()).is_err());
}

#[test]
fn sequence_numbers_are_monotonic_across_saves() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.couch");
    let mut db = couchstore::Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap();

    let mut seqs = Vec::new();
    for id in [b"a".as_slice(), b"b", b"c"] {
        let doc = Doc { id: id.to_vec(), body: b"x".to_vec() };
        let mut info = fresh_info(id);
        db.save_document(&doc, &mut info, SaveFlags::empty()).unwrap();
        seqs.push(info.db_seq);
    }
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[test]
fn tombstone_has_no_body_but_remains_visible_in_by_id() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.couch");
    let mut db = couchstore::Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap();

    let doc = Doc { id: b"gone".to_vec(), body: Vec::new() };
    let mut info = fresh_info(b"gone");
    info.deleted = true;
    db.save_document(&doc, &mut info, SaveFlags::empty()).unwrap();

    let found = db.docinfo_by_id(b"gone").unwrap().unwrap();
    assert!(found.deleted);
    assert_eq!(found.bp, 0);
}

#[test]
fn bulk_fetch_reports_mixed_hits_and_misses() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.couch");
    let mut db = couchstore::Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap();

    let doc = Doc { id: b"present".to_vec(), body: b"x".to_vec() };
    let mut info = fresh_info(b"present");
    db.save_document(&doc, &mut info, SaveFlags::empty()).unwrap();

    // Default (non-RANGES) mode sorts the query keys before resolving them,
    // so results come back in sorted-key order: "absent" < "present".
    let results = db
        .docinfos_by_id(&[b"present".to_vec(), b"absent".to_vec()], DocInfosFlags::empty())
        .unwrap();
    assert!(results[0].is_none());
    assert!(results[1].is_some());
}

#[test]
fn local_document_survives_commit_and_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.couch");
    {
        let mut db = couchstore::Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
        db.save_local_document(b"_local/checkpoint", b"42").unwrap();
        db.commit().unwrap();
    }
    let mut db = couchstore::Db::open(&path, OpenFlags::empty(), StoreConfig::default()).unwrap();
    assert_eq!(db.open_local_document(b"_local/checkpoint").unwrap(), Some(b"42".to_vec()));
}

#[test]
fn compaction_preserves_document_content_and_drops_nothing_by_default() {
    let dir = tempdir().unwrap();
    let src_path = dir.path().join("src.couch");
    let dest_path = dir.path().join("dest.couch");

    let mut src = couchstore::Db::open(&src_path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
    for id in [b"a".as_slice(), b"b", b"c"] {
        let doc = Doc { id: id.to_vec(), body: format!("body-{}", String::from_utf8_lossy(id)).into_bytes() };
        let mut info = fresh_info(id);
        src.save_document(&doc, &mut info, SaveFlags::empty()).unwrap();
    }
    src.commit().unwrap();

    let mut compacted = src.compact_db(&dest_path).unwrap();
    for id in [b"a".as_slice(), b"b", b"c"] {
        let (_, doc) = compacted.open_document(id, OpenDocFlags::empty()).unwrap().unwrap();
        assert_eq!(doc.body, format!("body-{}", String::from_utf8_lossy(id)).into_bytes());
    }
}

#[test]
fn rewind_restores_the_previous_committed_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.couch");
    let mut db = couchstore::Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap();

    let doc1 = Doc { id: b"k".to_vec(), body: b"first".to_vec() };
    let mut info1 = fresh_info(b"k");
    db.save_document(&doc1, &mut info1, SaveFlags::empty()).unwrap();
    db.commit().unwrap();

    let doc2 = Doc { id: b"k".to_vec(), body: b"second".to_vec() };
    let mut info2 = fresh_info(b"k");
    db.save_document(&doc2, &mut info2, SaveFlags::empty()).unwrap();
    db.commit().unwrap();

    db.rewind_db_header().unwrap();
    let (_, doc) = db.open_document(b"k", OpenDocFlags::empty()).unwrap().unwrap();
    assert_eq!(doc.body, b"first");
}

#[test]
fn empty_database_has_no_documents_or_changes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.couch");
    let mut db = couchstore::Db::open(&path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
    assert!(db.all_docs().unwrap().is_empty());
    assert_eq!(db.changes_count(0).unwrap(), 0);
    let info = db.db_info().unwrap();
    assert_eq!(info.doc_count, 0);
}

#[test]
fn drop_deletes_compaction_removes_tombstones_entirely() {
    let dir = tempdir().unwrap();
    let src_path = dir.path().join("src.couch");
    let dest_path = dir.path().join("dest.couch");

    let mut src = couchstore::Db::open(&src_path, OpenFlags::CREATE, StoreConfig::default()).unwrap();
    let live = Doc { id: b"live".to_vec(), body: b"x".to_vec() };
    let mut live_info = fresh_info(b"live");
    src.save_document(&live, &mut live_info, SaveFlags::empty()).unwrap();

    let dead = Doc { id: b"dead".to_vec(), body: Vec::new() };
    let mut dead_info = fresh_info(b"dead");
    dead_info.deleted = true;
    src.save_document(&dead, &mut dead_info, SaveFlags::empty()).unwrap();
    src.commit().unwrap();

    let mut compacted = src
        .compact_db_ex(&dest_path, CompactFlags::DROP_DELETES, StoreConfig::default(), None, None)
        .unwrap();
    let remaining = compacted.all_docs().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, b"live");
}
