use thiserror::Error;

/// Errors surfaced by the B+tree reader, modifier, bulk-loader and sorter.
#[derive(Debug, Error)]
pub enum BtreeError {
    #[error(transparent)]
    Storage(#[from] couchstore_storage::StorageError),

    #[error("key not found")]
    KeyNotFound,

    #[error("reduce value too large to serialize into a node pointer")]
    ReductionTooLarge,

    #[error("corrupt node: {0}")]
    Corrupt(String),

    #[error("external sort/merge failed: {0}")]
    SortFailed(String),

    #[error("modify callback aborted the traversal")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, BtreeError>;
