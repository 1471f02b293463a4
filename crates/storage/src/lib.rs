//! Block-structured, checksummed, optionally-compressed chunk storage for
//! an append-only single-file document store.
//!
//! This crate owns everything below the B+tree: the logical/physical block
//! addressing scheme, chunk framing and checksums, the pluggable file-ops
//! backend, and the Snappy primitive. `couchstore-btree` and `couchstore`
//! build the index and document layers on top of it.

pub mod block;
pub mod checksum;
pub mod chunk;
pub mod compression;
pub mod error;
pub mod file_ops;
pub mod int_codec;

pub use block::{BLOCK_MARKER_DATA, BLOCK_MARKER_HEADER, BLOCK_SIZE};
pub use checksum::ChecksumScheme;
pub use chunk::{read_chunk, write_data_chunk, write_header_chunk, ReadChunk};
pub use error::{Result, StorageError};
pub use file_ops::{
    BufferedFileOps, FileOps, MemFileOps, RawFileOps, DEFAULT_READ_CACHE_BLOCK, DEFAULT_READ_CACHE_SLOTS,
    DEFAULT_WRITE_BUFFER_SIZE,
};
