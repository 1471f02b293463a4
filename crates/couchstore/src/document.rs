//! Document model and the by-id / by-seq index value codecs (`spec.md` §3).

use crate::error::{CouchstoreError, Result};
use couchstore_storage::int_codec::{
    get_packed_12_28, get_u32, get_u48, put_packed_12_28, put_u32, put_u48,
};

/// Bit 7 of `content_meta`: body is Snappy-compressed.
pub const CONTENT_META_COMPRESSED: u8 = 0x80;
/// High bit of the 48-bit `bp` field: tombstone marker.
const BP_DELETED_FLAG: u64 = 1 << 47;
const BP_MASK: u64 = BP_DELETED_FLAG - 1;

/// A document as presented to `save_document(s)`/`open_document`.
#[derive(Debug, Clone)]
pub struct Doc {
    pub id: Vec<u8>,
    pub body: Vec<u8>,
}

/// Index metadata for a document, shared verbatim between the by-id and
/// by-seq entries (`spec.md` §3 invariant: same `(bp, rev_seq, content_meta,
/// db_seq)` in both).
#[derive(Debug, Clone)]
pub struct DocInfo {
    pub id: Vec<u8>,
    pub db_seq: u64,
    pub rev_seq: u64,
    pub rev_meta: Vec<u8>,
    pub content_meta: u8,
    /// Body byte offset; 0 for a tombstone.
    pub bp: u64,
    pub deleted: bool,
    pub size: u32,
}

impl DocInfo {
    pub fn is_compressed(&self) -> bool {
        self.content_meta & CONTENT_META_COMPRESSED != 0
    }

    fn packed_bp(&self) -> u64 {
        let bp = self.bp & BP_MASK;
        if self.deleted { bp | BP_DELETED_FLAG } else { bp }
    }

    fn unpack_bp(raw: u64) -> (u64, bool) {
        (raw & BP_MASK, raw & BP_DELETED_FLAG != 0)
    }
}

/// Encodes the by-id index value: `{48-bit db_seq, 32-bit size, 48-bit
/// bp|deleted, 8-bit content_meta, 48-bit rev_seq, rev_meta bytes}`.
pub fn encode_by_id_value(info: &DocInfo) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6 + 4 + 6 + 1 + 6 + info.rev_meta.len());
    put_u48(&mut buf, info.db_seq);
    put_u32(&mut buf, info.size);
    put_u48(&mut buf, info.packed_bp());
    buf.push(info.content_meta);
    put_u48(&mut buf, info.rev_seq);
    buf.extend_from_slice(&info.rev_meta);
    buf
}

pub fn decode_by_id_value(id: &[u8], bytes: &[u8]) -> Result<DocInfo> {
    if bytes.len() < 6 + 4 + 6 + 1 + 6 {
        return Err(CouchstoreError::Corrupt("truncated by-id value".into()));
    }
    let db_seq = get_u48(&bytes[0..6]);
    let size = get_u32(&bytes[6..10]);
    let (bp, deleted) = DocInfo::unpack_bp(get_u48(&bytes[10..16]));
    let content_meta = bytes[16];
    let rev_seq = get_u48(&bytes[17..23]);
    let rev_meta = bytes[23..].to_vec();

    Ok(DocInfo { id: id.to_vec(), db_seq, rev_seq, rev_meta, content_meta, bp, deleted, size })
}

/// Encodes the by-seq index value: `{packed 12/28 id_len/size, 48-bit
/// bp|deleted, 8-bit content_meta, 48-bit rev_seq, id bytes, rev_meta
/// bytes}`. The key (48-bit big-endian `db_seq`) is supplied separately.
pub fn encode_by_seq_value(info: &DocInfo) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + 6 + 1 + 6 + info.id.len() + info.rev_meta.len());
    put_packed_12_28(&mut buf, info.id.len() as u16, info.size);
    put_u48(&mut buf, info.packed_bp());
    buf.push(info.content_meta);
    put_u48(&mut buf, info.rev_seq);
    buf.extend_from_slice(&info.id);
    buf.extend_from_slice(&info.rev_meta);
    buf
}

pub fn encode_seq_key(db_seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6);
    put_u48(&mut buf, db_seq);
    buf
}

pub fn decode_by_seq_value(seq_key: &[u8], bytes: &[u8]) -> Result<DocInfo> {
    if seq_key.len() != 6 {
        return Err(CouchstoreError::Corrupt("malformed by-seq key".into()));
    }
    let db_seq = get_u48(seq_key);
    if bytes.len() < 5 + 6 + 1 + 6 {
        return Err(CouchstoreError::Corrupt("truncated by-seq value".into()));
    }
    let (id_len, size) = get_packed_12_28(&bytes[0..5]);
    let (id_len, size) = (id_len as usize, size);
    let (bp, deleted) = DocInfo::unpack_bp(get_u48(&bytes[5..11]));
    let content_meta = bytes[11];
    let rev_seq = get_u48(&bytes[12..18]);
    if bytes.len() < 18 + id_len {
        return Err(CouchstoreError::Corrupt("truncated by-seq id".into()));
    }
    let id = bytes[18..18 + id_len].to_vec();
    let rev_meta = bytes[18 + id_len..].to_vec();

    Ok(DocInfo { id, db_seq, rev_seq, rev_meta, content_meta, bp, deleted, size })
}
