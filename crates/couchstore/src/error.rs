use thiserror::Error;

/// Stable error kinds surfaced to callers of the public `Db` API.
///
/// Every lower-layer error (`couchstore_storage::StorageError`,
/// `couchstore_btree::BtreeError`) is folded into one of these variants so
/// a caller never has to match on more than one error type.
#[derive(Debug, Error)]
pub enum CouchstoreError {
    #[error("failed to open file")]
    OpenFile,

    #[error("no such file")]
    NoSuchFile,

    #[error("failed to close file")]
    FileClose,

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("checksum mismatch")]
    ChecksumFail,

    #[error("no valid header found")]
    NoHeader,

    #[error("unsupported header version")]
    HeaderVersion,

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("allocation failed")]
    AllocFail,

    #[error("document not found")]
    DocNotFound,

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("reduce value too large")]
    ReductionTooLarge,

    #[error("handle no longer valid for the on-disk file (reopen/rewind mismatch)")]
    DbNoLongerValid,

    #[error("operation attempted on a closed handle")]
    FileClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CouchstoreError>;

impl From<couchstore_storage::StorageError> for CouchstoreError {
    fn from(e: couchstore_storage::StorageError) -> Self {
        use couchstore_storage::StorageError as S;
        match e {
            S::ShortRead { .. } => CouchstoreError::Read(e.to_string()),
            S::ShortWrite { .. } => CouchstoreError::Write(e.to_string()),
            S::ChecksumFail { .. } => CouchstoreError::ChecksumFail,
            S::Corrupt(msg) => CouchstoreError::Corrupt(msg),
            S::NoHeader => CouchstoreError::NoHeader,
            S::HeaderVersion(_) => CouchstoreError::HeaderVersion,
            S::Decompress(msg) => CouchstoreError::Corrupt(msg),
            S::Io(io) => CouchstoreError::Io(io),
        }
    }
}

impl From<couchstore_btree::BtreeError> for CouchstoreError {
    fn from(e: couchstore_btree::BtreeError) -> Self {
        use couchstore_btree::BtreeError as B;
        match e {
            B::Storage(s) => s.into(),
            B::KeyNotFound => CouchstoreError::DocNotFound,
            B::ReductionTooLarge => CouchstoreError::ReductionTooLarge,
            B::Corrupt(msg) => CouchstoreError::Corrupt(msg),
            B::SortFailed(msg) => CouchstoreError::Corrupt(msg),
            B::Aborted => CouchstoreError::InvalidArguments("traversal aborted".into()),
        }
    }
}
