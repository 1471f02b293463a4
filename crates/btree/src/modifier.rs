//! Bulk modification: applies a sorted batch of inserts/removes/fetches to
//! an existing tree and returns the new root.
//!
//! The batch is expected sorted by key ahead of time (callers build it that
//! way — the document-save pipeline sorts by-id and by-seq actions before
//! calling in). When a key has more than one action in the same batch, a
//! `Fetch` always observes the tree as it stood *before* this batch, even
//! if an `Insert`/`Remove` for the same key appears elsewhere in the batch;
//! `Insert`/`Remove` for the same key apply in the order given, last one
//! wins.
//!
//! Rather than threading copy-on-write splicing through individual nodes,
//! a batch is applied by folding the existing tree into memory, applying
//! the batch, and rebuilding via [`crate::bulk_loader::build_sorted`]. Node
//! encoding and pointer layout are unaffected, so this is transparent to
//! readers; it trades the O(log n + batch) update cost of node-level
//! splicing for a simpler, easier-to-verify O(n) rebuild per batch.

use crate::bulk_loader::{build_mixed, build_sorted, MixedItem};
use crate::descriptor::TreeDescriptor;
use crate::error::Result;
use crate::node::{decode_node, NodeContents};
use crate::pointer::NodePointer;
use crate::reader::{FoldSignal, KeyRange, TreeReader};
use couchstore_storage::{chunk, ChecksumScheme, FileOps};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub enum Action {
    Insert(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
    Fetch(Vec<u8>),
}

impl Action {
    pub fn key(&self) -> &[u8] {
        match self {
            Action::Insert(k, _) => k,
            Action::Remove(k) => k,
            Action::Fetch(k) => k,
        }
    }
}

/// What a guided-purge callback decides for a key being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeDecision {
    /// Remove it as requested.
    Drop,
    /// Leave it in the tree despite the `Remove` action.
    Keep,
    /// Remove it, but the caller has already rewritten its stored value
    /// (used by compaction's drop-deletes sweep, which wants to strip a
    /// tombstone's body while keeping a smaller marker entry).
    Partial,
    /// Abort the whole modify call; no further actions are applied and the
    /// root returned is the one passed in.
    Stop,
}

pub type PurgeFn<'a> = dyn FnMut(&[u8], &[u8]) -> PurgeDecision + 'a;

pub struct ModifyOutcome {
    pub root: NodePointer,
    /// Fetch results in the same order `Action::Fetch` entries appeared in
    /// the input batch.
    pub fetched: Vec<Option<Vec<u8>>>,
}

pub fn modify<D: TreeDescriptor + ?Sized>(
    file: &mut dyn FileOps,
    scheme: ChecksumScheme,
    descriptor: &D,
    root: &NodePointer,
    actions: &[Action],
    mut purge: Option<&mut PurgeFn>,
) -> Result<ModifyOutcome> {
    let mut existing: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    {
        let mut reader = TreeReader::new(file, scheme, descriptor);
        reader.fold(root, &KeyRange::all(), &mut |k, v| {
            existing.insert(k.to_vec(), v.to_vec());
            FoldSignal::Continue
        })?;
    }

    let mut fetched = Vec::new();
    let mut stopped = false;

    for action in actions {
        if stopped {
            if matches!(action, Action::Fetch(_)) {
                fetched.push(None);
            }
            continue;
        }
        match action {
            Action::Fetch(key) => {
                fetched.push(existing.get(key.as_slice()).cloned());
            }
            Action::Insert(key, value) => {
                existing.insert(key.clone(), value.clone());
            }
            Action::Remove(key) => {
                if let Some(value) = existing.get(key.as_slice()).cloned() {
                    let decision = match purge.as_mut() {
                        Some(f) => f(key, &value),
                        None => PurgeDecision::Drop,
                    };
                    match decision {
                        PurgeDecision::Drop | PurgeDecision::Partial => {
                            existing.remove(key.as_slice());
                        }
                        PurgeDecision::Keep => {}
                        PurgeDecision::Stop => {
                            stopped = true;
                        }
                    }
                }
            }
        }
    }

    if stopped {
        return Ok(ModifyOutcome { root: root.clone(), fetched });
    }

    let sorted_entries: Vec<(Vec<u8>, Vec<u8>)> = existing.into_iter().collect();
    let new_root = build_sorted(file, scheme, descriptor, sorted_entries)?;
    Ok(ModifyOutcome { root: new_root, fetched })
}

pub struct PurgeOutcome {
    pub root: NodePointer,
    /// Re-reduce over every value actually purged, so a caller (e.g.
    /// compaction's space accounting) doesn't have to re-fold the survivors
    /// to know what left.
    pub purged_reduce: Option<Vec<u8>>,
}

/// Range-level guided purge (`spec.md` §4.5 "Guided purge"): removes every
/// entry in `[lo, hi]` (either bound `None` means unbounded) without
/// materializing a per-key `Action` for each one. A subtree whose entire
/// key span falls inside `[lo, hi]` is offered to `purge` as a single
/// interior-pointer decision (`purge(pointer.key, pointer.reduce_value)`);
/// `Drop` elides it — its reduce value is credited to the purge accumulator
/// without ever decoding the subtree. A subtree straddling the range
/// boundary is descended into and every leaf entry inside the range is
/// offered to `purge` individually. `Keep` leaves an entry or subtree
/// untouched; `Stop` halts the purge pass, and every entry from that point
/// on (including the rest of the node being visited) survives unchanged.
pub fn purge_range<D: TreeDescriptor + ?Sized>(
    file: &mut dyn FileOps,
    scheme: ChecksumScheme,
    descriptor: &D,
    root: &NodePointer,
    lo: Option<&[u8]>,
    hi: Option<&[u8]>,
    purge: &mut PurgeFn,
) -> Result<PurgeOutcome> {
    let mut survivors = Vec::new();
    let mut purged_reduces: Vec<Vec<u8>> = Vec::new();
    let mut stop = false;
    purge_node(file, scheme, descriptor, root, lo, hi, purge, &mut survivors, &mut purged_reduces, &mut stop)?;

    let refs: Vec<&[u8]> = purged_reduces.iter().map(|v| v.as_slice()).collect();
    let purged_reduce = descriptor.rereduce(&refs);
    let new_root = build_mixed(file, scheme, descriptor, survivors)?;
    Ok(PurgeOutcome { root: new_root, purged_reduce })
}

fn below(descriptor: &(impl TreeDescriptor + ?Sized), key: &[u8], bound: Option<&[u8]>) -> bool {
    matches!(bound, Some(b) if descriptor.compare(key, b) == Ordering::Less)
}

fn above(descriptor: &(impl TreeDescriptor + ?Sized), key: &[u8], bound: Option<&[u8]>) -> bool {
    matches!(bound, Some(b) if descriptor.compare(key, b) == Ordering::Greater)
}

#[allow(clippy::too_many_arguments)]
fn purge_node<D: TreeDescriptor + ?Sized>(
    file: &mut dyn FileOps,
    scheme: ChecksumScheme,
    descriptor: &D,
    pointer: &NodePointer,
    lo: Option<&[u8]>,
    hi: Option<&[u8]>,
    purge: &mut PurgeFn,
    survivors: &mut Vec<MixedItem>,
    purged_reduces: &mut Vec<Vec<u8>>,
    stop: &mut bool,
) -> Result<()> {
    if *stop {
        survivors.push(MixedItem::Subtree(pointer.clone()));
        return Ok(());
    }

    let chunk = chunk::read_chunk(file, pointer.offset, scheme, false)?;
    let contents = decode_node(&chunk.payload)?;

    match contents {
        NodeContents::Leaf(entries) => {
            for (key, value) in entries {
                if *stop || below(descriptor, &key, lo) || above(descriptor, &key, hi) {
                    survivors.push(MixedItem::Entry(key, value));
                    continue;
                }
                match purge(&key, &value) {
                    PurgeDecision::Keep => survivors.push(MixedItem::Entry(key, value)),
                    PurgeDecision::Drop | PurgeDecision::Partial => {
                        if let Some(r) = descriptor.reduce(&[value.as_slice()]) {
                            purged_reduces.push(r);
                        }
                    }
                    PurgeDecision::Stop => {
                        *stop = true;
                        survivors.push(MixedItem::Entry(key, value));
                    }
                }
            }
        }
        NodeContents::Interior(pointers) => {
            // `prev_key` is the previous sibling's separator key, an
            // exclusive lower bound on everything in the current subtree
            // (the tree's only recorded bound per pointer is its highest
            // key, same convention the reader's fold uses).
            let mut prev_key: Option<Vec<u8>> = None;
            for p in pointers {
                if *stop {
                    survivors.push(MixedItem::Subtree(p));
                    continue;
                }

                // Entirely above hi: every key here exceeds prev_key, and
                // prev_key already exceeds hi.
                let fully_above_hi = hi
                    .is_some_and(|h| prev_key.as_deref().is_some_and(|pk| descriptor.compare(pk, h) != Ordering::Less));
                // Entirely below lo: this subtree's own highest key is
                // still short of lo.
                let fully_below_lo = lo.is_some_and(|l| descriptor.compare(&p.key, l) == Ordering::Less);

                if fully_above_hi || fully_below_lo {
                    prev_key = Some(p.key.clone());
                    survivors.push(MixedItem::Subtree(p));
                    continue;
                }

                let fully_inside = lo.is_none_or(|l| {
                    prev_key.as_deref().is_some_and(|pk| descriptor.compare(pk, l) != Ordering::Less)
                }) && hi.is_none_or(|h| descriptor.compare(&p.key, h) != Ordering::Greater);

                if fully_inside {
                    match purge(&p.key, &p.reduce_value) {
                        PurgeDecision::Keep => {
                            prev_key = Some(p.key.clone());
                            survivors.push(MixedItem::Subtree(p));
                        }
                        PurgeDecision::Drop => {
                            purged_reduces.push(p.reduce_value.clone());
                            prev_key = Some(p.key.clone());
                        }
                        PurgeDecision::Partial => {
                            prev_key = Some(p.key.clone());
                            purge_node(file, scheme, descriptor, &p, lo, hi, purge, survivors, purged_reduces, stop)?;
                        }
                        PurgeDecision::Stop => {
                            *stop = true;
                            prev_key = Some(p.key.clone());
                            survivors.push(MixedItem::Subtree(p));
                        }
                    }
                } else {
                    prev_key = Some(p.key.clone());
                    purge_node(file, scheme, descriptor, &p, lo, hi, purge, survivors, purged_reduces, stop)?;
                }
            }
        }
    }
    Ok(())
}
