//! Block-structured append-only file substrate.
//!
//! The file is carved into [`BLOCK_SIZE`]-byte blocks. The first byte of
//! every block is a block-type marker: [`BLOCK_MARKER_HEADER`] for a block
//! holding the start of a header chunk, [`BLOCK_MARKER_DATA`] for any other
//! block. `pread_skip`/`pwrite_skip` address the file by *logical* offset —
//! the position a reader/writer would see if the marker bytes didn't
//! exist — and transparently split I/O at each block boundary to skip them.

use crate::error::Result;
use crate::file_ops::FileOps;

pub const BLOCK_SIZE: u64 = 4096;
pub const BLOCK_MARKER_DATA: u8 = 0x00;
pub const BLOCK_MARKER_HEADER: u8 = 0x01;

/// Converts a logical offset (no marker bytes) to its physical offset
/// (one marker byte consumed per block).
pub fn logical_to_physical(logical: u64) -> u64 {
    let block = logical / (BLOCK_SIZE - 1);
    let offset_in_block = logical % (BLOCK_SIZE - 1);
    block * BLOCK_SIZE + 1 + offset_in_block
}

/// Reads `len` logical bytes starting at logical offset `pos`, skipping the
/// block-marker byte at the start of every block boundary crossed.
pub fn pread_skip<F: FileOps + ?Sized>(file: &mut F, pos: u64, len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    let mut logical = pos;
    let mut remaining = len;

    while remaining > 0 {
        let block_index = logical / (BLOCK_SIZE - 1);
        let offset_in_block = logical % (BLOCK_SIZE - 1);
        let physical = block_index * BLOCK_SIZE + 1 + offset_in_block;
        let space_in_block = (BLOCK_SIZE - 1 - offset_in_block) as usize;
        let take = remaining.min(space_in_block);

        let chunk = file.pread(physical, take)?;
        out.extend_from_slice(&chunk);

        logical += take as u64;
        remaining -= take;
    }

    Ok(out)
}

/// Writes `data` at logical offset `pos`, inserting the block-marker byte
/// whenever a block boundary is crossed. `marker` selects the byte used for
/// any *new* block this write causes to start (existing blocks keep
/// whatever marker they already have).
pub fn pwrite_skip<F: FileOps + ?Sized>(file: &mut F, pos: u64, data: &[u8], marker: u8) -> Result<()> {
    let mut logical = pos;
    let mut remaining = data;

    while !remaining.is_empty() {
        let block_index = logical / (BLOCK_SIZE - 1);
        let offset_in_block = logical % (BLOCK_SIZE - 1);
        let physical = block_index * BLOCK_SIZE + 1 + offset_in_block;
        let space_in_block = (BLOCK_SIZE - 1 - offset_in_block) as usize;
        let take = remaining.len().min(space_in_block);

        if offset_in_block == 0 {
            file.pwrite(block_index * BLOCK_SIZE, &[marker])?;
        }

        file.pwrite(physical, &remaining[..take])?;

        logical += take as u64;
        remaining = &remaining[take..];
    }

    Ok(())
}

/// Reads the single marker byte for the block containing logical offset `pos`.
pub fn read_block_marker<F: FileOps + ?Sized>(file: &mut F, block_index: u64) -> Result<u8> {
    let marker = file.pread(block_index * BLOCK_SIZE, 1)?;
    Ok(marker[0])
}

/// Rounds a logical offset up to the next 4 KiB-aligned block start.
pub fn align_to_block(logical: u64) -> u64 {
    let usable_per_block = BLOCK_SIZE - 1;
    let block_index = logical.div_ceil(usable_per_block);
    block_index * usable_per_block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_ops::MemFileOps;

    fn blank_file(blocks: u64) -> MemFileOps {
        MemFileOps { data: vec![0u8; (blocks * BLOCK_SIZE) as usize] }
    }

    #[test]
    fn write_then_read_within_one_block() {
        let mut f = blank_file(2);
        pwrite_skip(&mut f, 0, b"hello world", BLOCK_MARKER_DATA).unwrap();
        let out = pread_skip(&mut f, 0, 11).unwrap();
        assert_eq!(&out, b"hello world");
    }

    #[test]
    fn write_spanning_block_boundary_skips_marker() {
        let mut f = blank_file(3);
        let usable = (BLOCK_SIZE - 1) as usize;
        let data: Vec<u8> = (0..usable + 50).map(|i| (i % 251) as u8).collect();
        pwrite_skip(&mut f, 0, &data, BLOCK_MARKER_DATA).unwrap();

        let out = pread_skip(&mut f, 0, data.len()).unwrap();
        assert_eq!(out, data);

        // Marker byte of the second block must be present and untouched by data.
        let marker = read_block_marker(&mut f, 1).unwrap();
        assert_eq!(marker, BLOCK_MARKER_DATA);
    }

    #[test]
    fn align_to_block_rounds_up() {
        let usable = BLOCK_SIZE - 1;
        assert_eq!(align_to_block(0), 0);
        assert_eq!(align_to_block(1), usable);
        assert_eq!(align_to_block(usable), usable);
        assert_eq!(align_to_block(usable + 1), usable * 2);
    }
}
