//! Snappy compression primitive.
//!
//! Compression is invoked only when the caller (document pipeline, tree
//! flusher) asks for it; the reader relies on a caller-supplied flag to
//! know whether to decompress rather than inspecting the chunk itself.

use crate::error::{Result, StorageError};

pub fn compress(buf: &[u8]) -> Vec<u8> {
    let mut encoder = snap::raw::Encoder::new();
    encoder
        .compress_vec(buf)
        .expect("snappy compression of an in-memory buffer cannot fail")
}

pub fn decompress(buf: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = snap::raw::Decoder::new();
    decoder
        .decompress_vec(buf)
        .map_err(|e| StorageError::Decompress(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog, repeatedly, repeatedly, repeatedly";
        let compressed = compress(data);
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn corrupt_frame_is_rejected() {
        let garbage = vec![0xffu8; 16];
        assert!(decompress(&garbage).is_err());
    }
}
