//! The on-disk database header: layout, encode/decode, and the
//! backward-scan-from-EOF open/rewind logic (`spec.md` §3, §4.8, §10).

use crate::error::{CouchstoreError, Result};
use couchstore_btree::NodePointer;
use couchstore_storage::int_codec::{get_u48, put_u16, put_u48};
use couchstore_storage::{chunk, ChecksumScheme, FileOps};

/// Lowest disk version this implementation will open.
pub const MIN_DISK_VERSION: u8 = 11;
/// Disk version written by `Compactor::compact_db_ex` with `UPGRADE_DB`,
/// and by brand-new databases.
pub const CURRENT_DISK_VERSION: u8 = 12;
/// First disk version using CRC-32C instead of legacy CRC-32
/// (`spec.md` §10, resolved Open Question: cross-version CRC refusal).
pub const CRC32C_DISK_VERSION: u8 = 12;

/// A database header: the three tree roots plus bookkeeping fields.
///
/// `purged_docs` and `security_ptr` are carried through unexamined —
/// opaque reserved blobs in the original format that this implementation
/// neither populates nor interprets.
#[derive(Debug, Clone)]
pub struct Header {
    pub disk_version: u8,
    pub update_seq: u64,
    pub purge_seq: u64,
    pub purge_ptr: u64,
    pub by_seq_root: Option<NodePointer>,
    pub by_id_root: Option<NodePointer>,
    pub local_docs_root: Option<NodePointer>,
    pub purged_docs: Vec<u8>,
    pub security_ptr: Vec<u8>,
}

impl Header {
    pub fn empty(disk_version: u8) -> Self {
        Self {
            disk_version,
            update_seq: 0,
            purge_seq: 0,
            purge_ptr: 0,
            by_seq_root: None,
            by_id_root: None,
            local_docs_root: None,
            purged_docs: Vec::new(),
            security_ptr: Vec::new(),
        }
    }

    pub fn checksum_scheme(&self) -> ChecksumScheme {
        ChecksumScheme::for_disk_version(self.disk_version)
    }
}

fn encode_root(buf: &mut Vec<u8>, root: &Option<NodePointer>) {
    match root {
        None => buf.push(0),
        Some(p) => {
            buf.push(1);
            put_u16(buf, p.key.len() as u16);
            buf.extend_from_slice(&p.key);
            put_u48(buf, p.offset);
            put_u48(buf, p.subtree_size);
            put_u16(buf, p.reduce_value.len() as u16);
            buf.extend_from_slice(&p.reduce_value);
        }
    }
}

fn decode_root(bytes: &[u8], pos: &mut usize) -> Result<Option<NodePointer>> {
    let present = *bytes.get(*pos).ok_or_else(|| CouchstoreError::Corrupt("truncated header root".into()))?;
    *pos += 1;
    if present == 0 {
        return Ok(None);
    }
    let key_len = couchstore_storage::int_codec::get_u16(&bytes[*pos..]) as usize;
    *pos += 2;
    let key = bytes[*pos..*pos + key_len].to_vec();
    *pos += key_len;
    let offset = get_u48(&bytes[*pos..]);
    *pos += 6;
    let subtree_size = get_u48(&bytes[*pos..]);
    *pos += 6;
    let reduce_len = couchstore_storage::int_codec::get_u16(&bytes[*pos..]) as usize;
    *pos += 2;
    let reduce_value = bytes[*pos..*pos + reduce_len].to_vec();
    *pos += reduce_len;
    Ok(Some(NodePointer::new(key, offset, subtree_size, reduce_value)))
}

fn encode_blob(buf: &mut Vec<u8>, blob: &[u8]) {
    put_u16(buf, blob.len() as u16);
    buf.extend_from_slice(blob);
}

fn decode_blob(bytes: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = couchstore_storage::int_codec::get_u16(&bytes[*pos..]) as usize;
    *pos += 2;
    if *pos + len > bytes.len() {
        return Err(CouchstoreError::Corrupt("truncated header blob".into()));
    }
    let blob = bytes[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(blob)
}

pub fn encode_header(header: &Header) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(header.disk_version);
    put_u48(&mut buf, header.update_seq);
    put_u48(&mut buf, header.purge_seq);
    put_u48(&mut buf, header.purge_ptr);
    encode_root(&mut buf, &header.by_seq_root);
    encode_root(&mut buf, &header.by_id_root);
    encode_root(&mut buf, &header.local_docs_root);
    encode_blob(&mut buf, &header.purged_docs);
    encode_blob(&mut buf, &header.security_ptr);
    buf
}

pub fn decode_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < 1 + 6 + 6 + 6 {
        return Err(CouchstoreError::Corrupt("truncated header".into()));
    }
    let disk_version = bytes[0];
    if disk_version < MIN_DISK_VERSION {
        return Err(CouchstoreError::HeaderVersion);
    }
    let mut pos = 1;
    let update_seq = get_u48(&bytes[pos..]);
    pos += 6;
    let purge_seq = get_u48(&bytes[pos..]);
    pos += 6;
    let purge_ptr = get_u48(&bytes[pos..]);
    pos += 6;
    let by_seq_root = decode_root(bytes, &mut pos)?;
    let by_id_root = decode_root(bytes, &mut pos)?;
    let local_docs_root = decode_root(bytes, &mut pos)?;
    let purged_docs = decode_blob(bytes, &mut pos)?;
    let security_ptr = decode_blob(bytes, &mut pos)?;

    Ok(Header {
        disk_version,
        update_seq,
        purge_seq,
        purge_ptr,
        by_seq_root,
        by_id_root,
        local_docs_root,
        purged_docs,
        security_ptr,
    })
}

/// Writes `header` as a new header chunk at or after `file`'s current EOF,
/// pre-extending and syncing on both sides of the write so a crash never
/// leaves a header chunk straddling unflushed blocks (`spec.md` §4.8,
/// "Commit" two-phase write).
pub fn commit_header(file: &mut dyn FileOps, header: &Header) -> Result<u64> {
    let payload = encode_header(header);
    let write_pos = file.goto_eof()?;
    file.sync()?;
    let scheme = header.checksum_scheme();
    let (header_pos, _next) = chunk::write_header_chunk(file, write_pos, &payload, scheme)?;
    file.sync()?;
    Ok(header_pos)
}

/// Scans backward from EOF for the most recent valid header chunk
/// (`spec.md` §4.8, "Open"). Returns `(header, header_block_position)`.
pub fn find_last_header(file: &mut dyn FileOps) -> Result<(Header, u64)> {
    let eof = file.goto_eof()?;
    if eof == 0 {
        return Err(CouchstoreError::NoHeader);
    }
    let mut block = (eof / couchstore_storage::BLOCK_SIZE).saturating_sub(1);
    loop {
        if let Some((header, pos)) = try_read_header_at_block(file, block)? {
            return Ok((header, pos));
        }
        if block == 0 {
            return Err(CouchstoreError::NoHeader);
        }
        block -= 1;
    }
}

fn try_read_header_at_block(file: &mut dyn FileOps, block: u64) -> Result<Option<(Header, u64)>> {
    let pos = block * couchstore_storage::BLOCK_SIZE;
    let marker = match couchstore_storage::block::read_block_marker(file, block) {
        Ok(m) => m,
        Err(_) => return Ok(None),
    };
    if marker != couchstore_storage::BLOCK_MARKER_HEADER {
        return Ok(None);
    }
    // The checksum scheme isn't known until the disk_version byte is read,
    // so try both: legacy CRC-32 first (cheaper, and the more common case
    // for archival files), then CRC-32C.
    for scheme in [ChecksumScheme::Crc32Legacy, ChecksumScheme::Crc32C] {
        if let Ok(read) = chunk::read_chunk(file, pos, scheme, false) {
            if read.is_header {
                if let Ok(header) = decode_header(&read.payload) {
                    return Ok(Some((header, pos)));
                }
            }
        }
    }
    Ok(None)
}

/// Re-scans for a header older than `current_header_pos`, for
/// `rewind_db_header` (`spec.md` §10: strengthened "same file" check via
/// recorded header position — the caller must pass the position the
/// currently-open handle actually read its header from, not merely assume
/// the file hasn't been replaced).
pub fn rewind_to_older_header(file: &mut dyn FileOps, current_header_pos: u64) -> Result<(Header, u64)> {
    if current_header_pos == 0 {
        return Err(CouchstoreError::NoHeader);
    }
    let mut block = (current_header_pos / couchstore_storage::BLOCK_SIZE).saturating_sub(1);
    loop {
        if let Some((header, pos)) = try_read_header_at_block(file, block)? {
            return Ok((header, pos));
        }
        if block == 0 {
            return Err(CouchstoreError::NoHeader);
        }
        block -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchstore_storage::MemFileOps;

    fn sample_header() -> Header {
        let mut h = Header::empty(CURRENT_DISK_VERSION);
        h.update_seq = 7;
        h.by_id_root = Some(NodePointer::new(b"zzz".to_vec(), 4096, 3, vec![1, 2, 3]));
        h
    }

    #[test]
    fn header_roundtrip() {
        let header = sample_header();
        let encoded = encode_header(&header);
        let decoded = decode_header(&encoded).unwrap();
        assert_eq!(decoded.update_seq, 7);
        assert_eq!(decoded.by_id_root.unwrap().offset, 4096);
        assert!(decoded.by_seq_root.is_none());
    }

    #[test]
    fn commit_then_find_last_header_roundtrips() {
        let mut file = MemFileOps::default();
        let header = sample_header();
        let pos = commit_header(&mut file, &header).unwrap();
        let (found, found_pos) = find_last_header(&mut file).unwrap();
        assert_eq!(found_pos, pos);
        assert_eq!(found.update_seq, 7);
    }

    #[test]
    fn rewind_finds_earlier_header() {
        let mut file = MemFileOps::default();
        let mut first = Header::empty(CURRENT_DISK_VERSION);
        first.update_seq = 1;
        let first_pos = commit_header(&mut file, &first).unwrap();

        let mut second = Header::empty(CURRENT_DISK_VERSION);
        second.update_seq = 2;
        let second_pos = commit_header(&mut file, &second).unwrap();
        assert!(second_pos > first_pos);

        let (rewound, rewound_pos) = rewind_to_older_header(&mut file, second_pos).unwrap();
        assert_eq!(rewound.update_seq, 1);
        assert_eq!(rewound_pos, first_pos);
    }

    #[test]
    fn empty_file_has_no_header() {
        let mut file = MemFileOps::default();
        assert!(find_last_header(&mut file).is_err());
    }
}
