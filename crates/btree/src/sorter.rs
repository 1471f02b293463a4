//! External sort: chunks an unsorted stream of entries, sorts each chunk
//! in memory on a small worker pool, spills sorted chunks to temp files,
//! then repeatedly merges runs down to one.
//!
//! Used by the bulk-loader path during compaction's by-id rebuild, where
//! the incoming stream (a by-seq fold) isn't already ordered by id.

use crate::descriptor::TreeDescriptor;
use crate::error::Result;
use crate::merger::{merge_runs, write_run, Entry};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_WORKER_THREADS: usize = 2;
/// Fan-in cap per merge pass; keeps the number of concurrently open run
/// files bounded regardless of how many chunks were spilled.
const MAX_MERGE_FAN_IN: usize = 16;

struct Job {
    index: usize,
    entries: Vec<Entry>,
}

/// Work queue shared by the sort worker pool. A `Mutex`-guarded deque is
/// enough here because every job is enqueued before any worker spawns;
/// workers simply drain it and exit once empty, no blocking wait needed.
struct Shared {
    queue: Mutex<VecDeque<Job>>,
    results: Mutex<Vec<Option<PathBuf>>>,
}

/// Sorts `entries` (arbitrary order) and returns the path to one file
/// holding every entry in ascending key order, ready for
/// [`crate::bulk_loader::build_sorted`] once deserialized. `chunk_size` and
/// `worker_threads` are caller-tunable (`spec.md` §4.10 "Sorter"); pass
/// [`DEFAULT_CHUNK_SIZE`]/[`DEFAULT_WORKER_THREADS`] for the documented
/// defaults.
pub fn external_sort<D: TreeDescriptor + 'static>(
    descriptor: Arc<D>,
    entries: Vec<Entry>,
    spill_dir: &std::path::Path,
    chunk_size: usize,
    worker_threads: usize,
) -> Result<PathBuf> {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<Vec<Entry>> = entries
        .chunks(chunk_size)
        .map(|c| c.to_vec())
        .collect();
    let num_chunks = chunks.len();

    if num_chunks == 0 {
        let path = spill_dir.join("empty.run");
        write_run(&path, &[])?;
        return Ok(path);
    }

    let shared = Arc::new(Shared {
        queue: Mutex::new(chunks.into_iter().enumerate().map(|(i, entries)| Job { index: i, entries }).collect()),
        results: Mutex::new(vec![None; num_chunks]),
    });

    let num_workers = worker_threads.max(1).min(num_chunks);
    let mut handles = Vec::with_capacity(num_workers);
    for worker_id in 0..num_workers {
        let shared = Arc::clone(&shared);
        let descriptor = Arc::clone(&descriptor);
        let spill_dir = spill_dir.to_path_buf();
        handles.push(thread::spawn(move || -> Result<()> {
            loop {
                let job = {
                    let mut queue = shared.queue.lock();
                    match queue.pop_front() {
                        Some(job) => job,
                        None => break,
                    }
                };
                let mut entries = job.entries;
                entries.sort_by(|a, b| descriptor.compare(&a.key, &b.key));
                let path = spill_dir.join(format!("chunk-{worker_id}-{}.run", job.index));
                write_run(&path, &entries)?;
                shared.results.lock()[job.index] = Some(path);
            }
            Ok(())
        }));
    }

    for handle in handles {
        handle.join().expect("sort worker thread panicked")?;
    }

    let run_paths: Vec<PathBuf> = shared
        .results
        .lock()
        .iter()
        .map(|p| p.clone().expect("every chunk index was assigned a job"))
        .collect();

    merge_down(descriptor.as_ref(), run_paths, spill_dir)
}

/// Repeatedly merges up to [`MAX_MERGE_FAN_IN`] runs at a time until one
/// remains, returning its path.
fn merge_down<D: TreeDescriptor + ?Sized>(
    descriptor: &D,
    mut run_paths: Vec<PathBuf>,
    spill_dir: &std::path::Path,
) -> Result<PathBuf> {
    let mut level = 0;
    while run_paths.len() > 1 {
        let mut next_level = Vec::new();
        for (batch_index, batch) in run_paths.chunks(MAX_MERGE_FAN_IN).enumerate() {
            let refs: Vec<&std::path::Path> = batch.iter().map(|p| p.as_path()).collect();
            let merged = merge_runs(descriptor, &refs)?;
            let out_path = spill_dir.join(format!("merge-{level}-{batch_index}.run"));
            write_run(&out_path, &merged)?;
            next_level.push(out_path);
        }
        run_paths = next_level;
        level += 1;
    }
    Ok(run_paths.into_iter().next().expect("loop invariant: at least one run remains"))
}
