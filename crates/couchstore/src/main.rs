//! Minimal end-to-end demo: open a store, save a couple of documents,
//! commit, and print them back (`spec.md` §9.2).

use couchstore::{Doc, DocInfo, OpenFlags, SaveFlags, StoreConfig};
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let path = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("demo.couch"));
    log::info!("opening {}", path.display());

    let mut db = couchstore::Db::open(&path, OpenFlags::CREATE, StoreConfig::default())?;

    for (id, body) in [("greeting", "hello, couchstore"), ("farewell", "goodbye, couchstore")] {
        let doc = Doc { id: id.as_bytes().to_vec(), body: body.as_bytes().to_vec() };
        let mut info = DocInfo {
            id: id.as_bytes().to_vec(),
            db_seq: 0,
            rev_seq: 1,
            rev_meta: Vec::new(),
            content_meta: 0,
            bp: 0,
            deleted: false,
            size: 0,
        };
        db.save_document(&doc, &mut info, SaveFlags::COMPRESS_DOC_BODIES)?;
        log::info!("saved {id} at seq {}", info.db_seq);
    }

    db.commit()?;

    for info in db.all_docs()? {
        let (info, doc) = db.open_document(&info.id, couchstore::OpenDocFlags::DECOMPRESS_DOC_BODIES)?.unwrap();
        println!("{} (seq {}): {}", String::from_utf8_lossy(&info.id), info.db_seq, String::from_utf8_lossy(&doc.body));
    }

    let stats = db.db_info()?;
    println!("doc_count={} space_used={}", stats.doc_count, stats.space_used);

    Ok(())
}
