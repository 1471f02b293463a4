//! Copy-on-write B+tree engine shared by the by-id, by-seq and local-docs
//! indexes: node codec, descriptor trait, reader, bulk modifier, bulk
//! loader and the external sort/merge machinery compaction's by-id rebuild
//! uses.

pub mod bulk_loader;
pub mod descriptor;
pub mod error;
pub mod merger;
pub mod modifier;
pub mod node;
pub mod pointer;
pub mod reader;
pub mod sorter;

pub use bulk_loader::{build_mixed, build_sorted, MixedItem};
pub use descriptor::{TreeDescriptor, DEFAULT_NODE_CHUNK_THRESHOLD};
pub use error::{BtreeError, Result};
pub use modifier::{modify, purge_range, Action, ModifyOutcome, PurgeDecision, PurgeFn, PurgeOutcome};
pub use node::{decode_node, encode_node, NodeContents};
pub use pointer::{FileOffset, NodePointer};
pub use reader::{FoldSignal, KeyRange, TreeReader};
pub use sorter::{external_sort, DEFAULT_CHUNK_SIZE, DEFAULT_WORKER_THREADS};
pub use merger::{merge_runs, write_run, Entry};
