//! Runtime-tunable knobs grouped into one config struct.
//!
//! The block size is fixed at 4096 by the format itself and isn't
//! tunable; everything here mirrors a constant the original implementation
//! bakes into a compile-time header (`config_static.h` in the original
//! sources) rather than a runtime config file — there is no on-disk config
//! format to parse, so this is a plain builder-style struct, not a
//! deserialized one.

use couchstore_btree::DEFAULT_NODE_CHUNK_THRESHOLD;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub node_chunk_threshold: usize,
    pub read_cache_slots: usize,
    pub read_cache_block_bytes: usize,
    pub write_buffer_bytes: usize,
    pub sorter_chunk_size: usize,
    pub sorter_worker_threads: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            node_chunk_threshold: DEFAULT_NODE_CHUNK_THRESHOLD,
            read_cache_slots: 8,
            read_cache_block_bytes: 8192,
            write_buffer_bytes: 128 * 1024,
            sorter_chunk_size: 10_000,
            sorter_worker_threads: 2,
        }
    }
}

impl StoreConfig {
    pub fn with_node_chunk_threshold(mut self, threshold: usize) -> Self {
        self.node_chunk_threshold = threshold;
        self
    }

    pub fn with_sorter_worker_threads(mut self, threads: usize) -> Self {
        self.sorter_worker_threads = threads;
        self
    }
}
