//! Chunk framing on top of the block substrate.
//!
//! A chunk is `[4-byte length/flag][4-byte checksum][payload]`, written and
//! read through [`crate::block::pwrite_skip`]/[`crate::block::pread_skip`]
//! so callers never see block-marker bytes. The length field's high bit
//! marks a *data* chunk; header chunks clear it and are additionally
//! always written at a 4 KiB-aligned logical offset so a backward scan can
//! find them by walking block markers alone.

use crate::block::{self, BLOCK_MARKER_DATA, BLOCK_MARKER_HEADER};
use crate::checksum::ChecksumScheme;
use crate::error::{Result, StorageError};
use crate::file_ops::FileOps;
use crate::int_codec::{get_u32, put_u32};

const LEN_FIELD_BYTES: usize = 4;
const CRC_FIELD_BYTES: usize = 4;
const DATA_CHUNK_FLAG: u32 = 0x8000_0000;
const LEN_MASK: u32 = 0x7FFF_FFFF;
/// Header chunks encode their length field as `payload + CRC_FIELD_BYTES`
/// rather than the bare payload size a data chunk uses.
const HEADER_LEN_OVERHEAD: u32 = CRC_FIELD_BYTES as u32;
/// Cap on a header chunk's payload size; bounds the allocation `read_chunk`
/// performs before it has validated anything else about a candidate header.
const MAX_HEADER_PAYLOAD: usize = 64 * 1024;

/// A chunk read back from the file, tagged with where the next chunk (or
/// the next free logical offset) begins.
pub struct ReadChunk {
    pub payload: Vec<u8>,
    pub next_pos: u64,
    pub is_header: bool,
}

/// Writes `payload` as a data chunk at logical offset `pos`. Returns the
/// logical offset immediately following the chunk.
pub fn write_data_chunk(
    file: &mut dyn FileOps,
    pos: u64,
    payload: &[u8],
    scheme: ChecksumScheme,
) -> Result<u64> {
    write_chunk(file, pos, payload, scheme, true, BLOCK_MARKER_DATA)
}

/// Writes `payload` as a header chunk. The chunk is always placed at the
/// next 4 KiB-aligned logical offset at or after `pos`, with the block it
/// starts in marked [`BLOCK_MARKER_HEADER`]. Returns the logical offset the
/// header chunk was actually written at and the offset following it.
pub fn write_header_chunk(
    file: &mut dyn FileOps,
    pos: u64,
    payload: &[u8],
    scheme: ChecksumScheme,
) -> Result<(u64, u64)> {
    let aligned = block::align_to_block(pos);
    let next = write_chunk(file, aligned, payload, scheme, false, BLOCK_MARKER_HEADER)?;
    Ok((aligned, next))
}

fn write_chunk(
    file: &mut dyn FileOps,
    pos: u64,
    payload: &[u8],
    scheme: ChecksumScheme,
    is_data: bool,
    marker: u8,
) -> Result<u64> {
    let mut framed = Vec::with_capacity(LEN_FIELD_BYTES + CRC_FIELD_BYTES + payload.len());
    let len_field = if is_data {
        (payload.len() as u32) | DATA_CHUNK_FLAG
    } else {
        (payload.len() as u32 + HEADER_LEN_OVERHEAD) & LEN_MASK
    };
    put_u32(&mut framed, len_field);
    put_u32(&mut framed, scheme.compute(payload));
    framed.extend_from_slice(payload);

    block::pwrite_skip(file, pos, &framed, marker)?;
    Ok(pos + framed.len() as u64)
}

/// Reads the chunk starting at logical offset `pos`. When `tolerate_corruption`
/// is set, a checksum mismatch is logged and the payload returned anyway
/// rather than surfaced as an error (used by recovery/dbck-style paths).
pub fn read_chunk(
    file: &mut dyn FileOps,
    pos: u64,
    scheme: ChecksumScheme,
    tolerate_corruption: bool,
) -> Result<ReadChunk> {
    let head = block::pread_skip(file, pos, LEN_FIELD_BYTES + CRC_FIELD_BYTES)?;
    let len_field = get_u32(&head[0..4]);
    let is_header = len_field & DATA_CHUNK_FLAG == 0;
    let raw_len = len_field & LEN_MASK;
    let stored_crc = get_u32(&head[4..8]);

    let len = if is_header {
        let payload_len = raw_len.checked_sub(HEADER_LEN_OVERHEAD).ok_or_else(|| {
            StorageError::Corrupt(format!(
                "header chunk length field {raw_len} is smaller than the {HEADER_LEN_OVERHEAD}-byte overhead"
            ))
        })? as usize;
        if payload_len > MAX_HEADER_PAYLOAD {
            return Err(StorageError::Corrupt(format!(
                "header chunk payload length {payload_len} exceeds the {MAX_HEADER_PAYLOAD}-byte cap"
            )));
        }
        payload_len
    } else {
        raw_len as usize
    };

    let payload = block::pread_skip(file, pos + (LEN_FIELD_BYTES + CRC_FIELD_BYTES) as u64, len)?;

    if !scheme.verify(&payload, stored_crc) {
        let computed = scheme.compute(&payload);
        if tolerate_corruption {
            log::warn!(
                "checksum mismatch at logical offset {pos} (stored {stored_crc:#010x}, computed {computed:#010x}); tolerating"
            );
        } else {
            return Err(StorageError::ChecksumFail { stored: stored_crc, computed });
        }
    }

    let next_pos = pos + (LEN_FIELD_BYTES + CRC_FIELD_BYTES) as u64 + len as u64;
    Ok(ReadChunk { payload, next_pos, is_header })
}
