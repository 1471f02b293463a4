use thiserror::Error;

/// Errors surfaced by the block substrate, chunk codec and file-ops layer.
///
/// Mirrors the storage-facing subset of the stable error kinds named in
/// the format specification (`READ`, `WRITE`, `CHECKSUM_FAIL`, `CORRUPT`,
/// `NO_HEADER`, `HEADER_VERSION`). Higher layers (`couchstore-btree`,
/// `couchstore`) wrap this enum rather than re-deriving it.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short read at offset {offset}: expected {expected} bytes, got {got}")]
    ShortRead {
        offset: u64,
        expected: usize,
        got: usize,
    },

    #[error("write failed at offset {offset}")]
    ShortWrite { offset: u64 },

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumFail { stored: u32, computed: u32 },

    #[error("corrupt chunk: {0}")]
    Corrupt(String),

    #[error("no valid header found in file")]
    NoHeader,

    #[error("unsupported or mismatched on-disk header version: {0}")]
    HeaderVersion(u8),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
