//! Commit, propagation and compaction: publication into the snapshot chain
//!
//! Everything here funnels through the branch's single compare-and-swap.
//! Commit validates a transaction's reads against maps appended since its
//! start snapshot and appends a new map at the head; propagation splices an
//! externally-validated batch in at its source's consistency point; and
//! compaction folds unwatched, acknowledged maps into the canonical base.
//! Lost CAS races retry transparently; only terminal outcomes cross the
//! public boundary.

use crate::branch::{Branch, CommitFuture};
use crate::map::VersionMap;
use crate::transaction::{flags, Transaction};
use crate::version::{Version, VersionBody};
use std::collections::HashMap;
use std::sync::Arc;
use weft_common::{CommitStatus, ConflictPolicy, Key, MapId, ObjectId, Source};

/// Terminal result of a commit.
#[derive(Debug)]
pub struct CommitOutcome {
    pub status: CommitStatus,
    /// Present when the commit published but a distributed acknowledgement
    /// is still outstanding
    pub pending: Option<CommitFuture>,
}

impl CommitOutcome {
    fn terminal(status: CommitStatus) -> Self {
        Self { status, pending: None }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// The commit/propagate algorithm over a branch's snapshot chain.
pub struct TransactionManager;

impl TransactionManager {
    /// Publish a transaction's writes. See [`Transaction::commit`], which
    /// forwards here.
    pub fn commit(txn: Transaction) -> CommitOutcome {
        let mut txn = txn;
        commit_transaction(&mut txn)
    }

    /// Splice an already-validated version batch into the chain directly
    /// after the map `after` (the point the batch's source considers
    /// consistent). Later maps with order-sensitive versions re-derive
    /// their addressing. If `after` has already merged into the base the
    /// insertion degrades to the position right after it, which preserves
    /// relative order.
    pub fn propagate(
        branch: &Arc<Branch>,
        versions: Vec<Version>,
        source: Source,
        after: MapId,
    ) -> CommitStatus {
        propagate_batch(branch, versions, source, after)
    }
}

fn release(map: &Arc<VersionMap>, branch: &Arc<Branch>) {
    if map.watchers().remove(1) {
        compact(branch);
    }
}

pub(crate) fn commit_transaction(txn: &mut Transaction) -> CommitOutcome {
    debug_assert!(!txn.is_private(), "commit of a nested transaction");
    let branch = Arc::clone(&txn.branch);

    // A read-only commit leaves the chain untouched: no map with zero
    // writes is ever published.
    if txn.writes.is_empty() {
        txn.flags |= flags::COMMITTED;
        let shell = txn.take_shell();
        branch.recycle_public(shell);
        txn.release_pin();
        return CommitOutcome::terminal(CommitStatus::Success);
    }

    let reads = std::mem::take(&mut txn.reads);
    let writes = std::mem::take(&mut txn.writes);
    let retain_reads = txn.flags & flags::NO_READS == 0;
    let map = Arc::new(VersionMap::new(
        branch.alloc_map_id(),
        Source::Local,
        writes,
        retain_reads.then(|| reads.clone()),
        // The publisher's pin plus one per no-merge extension.
        1 + branch.extension_watchers(),
    ));

    let policy = branch.config().policy;
    let retry = branch.config().retry;
    let mut attempts: u32 = 0;
    // Newest map whose predecessors are already validated against the read
    // set. We hold one pin on it at all times so it cannot merge away and
    // stays findable in every later snapshot.
    let mut anchor = txn.pinned.take().expect("public transaction without a pin");

    let (status, pending) = loop {
        let snapshot = branch.snapshot();
        branch.note_queue_len(snapshot.maps().len());

        let head = snapshot.head().clone();
        if !Arc::ptr_eq(&head, &anchor) {
            // Pin the new head before validating up to it; a failed pin
            // means it is being compacted away, so reload.
            if !head.watchers().try_add(1) {
                std::hint::spin_loop();
                continue;
            }
            let anchor_index = snapshot
                .index_of(anchor.id())
                .unwrap_or_else(|| panic!("pinned anchor {} missing from the chain", anchor.id()));
            let conflict = snapshot.maps()[anchor_index + 1..].iter().any(|m| match policy {
                ConflictPolicy::ReadWriteConflicts => m.intersects_reads(&reads),
                ConflictPolicy::WriteWriteConflicts => m.intersects_map(&map),
            });
            // Hand the anchor pin forward regardless; the maps in between
            // are now accounted for.
            release(&anchor, &branch);
            anchor = head;
            if conflict {
                tracing::debug!(branch = %branch.id(), map = %map.id(), "commit conflict");
                break (CommitStatus::Conflict, None);
            }
        }

        if let Some(slow) = snapshot.slow_changing() {
            if slow.disconnected {
                break (CommitStatus::Abort, None);
            }
            if slow.blocked.contains(&Source::Local) {
                break (CommitStatus::Conflict, None);
            }
        }

        let advance_ack = !branch.has_acknowledger();
        let next = Arc::new(snapshot.with_appended(Arc::clone(&map), advance_ack));
        match branch.cell().compare_and_swap(&snapshot, next) {
            Ok(()) => {
                tracing::debug!(
                    branch = %branch.id(),
                    map = %map.id(),
                    chain_len = snapshot.maps().len() + 1,
                    "commit published"
                );
                // Register the future before notifying, in case an
                // acknowledger confirms synchronously.
                let pending =
                    (!advance_ack).then(|| branch.register_ack_future(map.id()));
                branch.notify_published(map.id());
                invalidate_lazy(&branch, &map);
                // Drop the publisher pin; the map can merge once readers
                // and extensions let go.
                release(&map, &branch);
                break (CommitStatus::Success, pending);
            }
            Err(_current) => {
                // Lost the race. A transaction that recorded no reads
                // cannot safely re-validate, so it fails fast unless it is
                // an auto-commit attempt.
                if txn.flags & flags::NO_READS != 0 && txn.flags & flags::AUTO == 0 {
                    break (CommitStatus::Conflict, None);
                }
                attempts += 1;
                if retry.exhausted(attempts) {
                    break (CommitStatus::Conflict, None);
                }
                retry.backoff(attempts);
            }
        }
    };

    release(&anchor, &branch);
    txn.flags |= flags::COMMITTED;
    let shell = txn.take_shell();
    branch.recycle_public(shell);
    if status == CommitStatus::Success {
        compact(&branch);
    }
    CommitOutcome { status, pending }
}

pub(crate) fn propagate_batch(
    branch: &Arc<Branch>,
    versions: Vec<Version>,
    source: Source,
    after: MapId,
) -> CommitStatus {
    if versions.is_empty() {
        return CommitStatus::Success;
    }
    let versions: HashMap<ObjectId, Version> =
        versions.into_iter().map(|v| (v.object(), v)).collect();
    let map = Arc::new(VersionMap::new(
        branch.alloc_map_id(),
        source,
        versions,
        None,
        1 + branch.extension_watchers(),
    ));

    let retry = branch.config().retry;
    let mut attempts: u32 = 0;

    let status = loop {
        let snapshot = branch.snapshot();
        branch.note_queue_len(snapshot.maps().len());

        if let Some(slow) = snapshot.slow_changing() {
            if slow.disconnected {
                break CommitStatus::Abort;
            }
            if slow.blocked.contains(&source) {
                break CommitStatus::Conflict;
            }
        }

        let position = match snapshot.index_of(after) {
            Some(index) => index + 1,
            None => 1,
        };
        // Later deltas stay correctly addressed relative to the spliced
        // map; rebuilt maps share their original watcher counter.
        let tail: Vec<Arc<VersionMap>> = snapshot.maps()[position..]
            .iter()
            .map(|m| match m.with_past_changed(&map) {
                Some(rebuilt) => Arc::new(rebuilt),
                None => Arc::clone(m),
            })
            .collect();
        let next = Arc::new(snapshot.with_spliced(position, Arc::clone(&map), tail));
        match branch.cell().compare_and_swap(&snapshot, next) {
            Ok(()) => {
                tracing::debug!(
                    branch = %branch.id(),
                    map = %map.id(),
                    %source,
                    position,
                    "batch propagated"
                );
                branch.notify_published(map.id());
                invalidate_lazy(branch, &map);
                release(&map, branch);
                break CommitStatus::Success;
            }
            Err(_current) => {
                attempts += 1;
                if retry.exhausted(attempts) {
                    break CommitStatus::Conflict;
                }
                retry.backoff(attempts);
            }
        }
    };

    if status == CommitStatus::Success {
        compact(branch);
    }
    status
}

/// Fold unwatched, acknowledged maps into the canonical base, oldest
/// first. Runs opportunistically after publications and pin releases;
/// stops at the first map anyone still watches.
pub(crate) fn compact(branch: &Arc<Branch>) {
    loop {
        let snapshot = branch.snapshot();
        if snapshot.maps().len() < 2 {
            return;
        }
        // Never merge past the acknowledgement watermark.
        if snapshot.acknowledged_index() < 1 {
            return;
        }
        let base = Arc::clone(&snapshot.maps()[0]);
        let first = Arc::clone(&snapshot.maps()[1]);
        // Claim both ends: the map being consumed and the base being
        // replaced. A pinned base means some transaction still anchors
        // validation there and must keep seeing `first` in the chain.
        if !first.watchers().try_retire() {
            return;
        }
        if !base.watchers().try_retire() {
            first.watchers().unretire();
            return;
        }

        let merged = Arc::new(base.merge_newer(&first));
        let next = Arc::new(snapshot.with_compacted(merged));
        match branch.cell().compare_and_swap(&snapshot, next) {
            Ok(()) => {
                tracing::trace!(
                    branch = %branch.id(),
                    map = %first.id(),
                    "version map merged into base"
                );
            }
            Err(_current) => {
                base.watchers().unretire();
                first.watchers().unretire();
            }
        }
    }
}

/// Drop cached lazy entries a published map overwrote, so later reads
/// refetch through the store.
fn invalidate_lazy(branch: &Arc<Branch>, map: &VersionMap) {
    let mut grouped: Vec<(ObjectId, Vec<Key>)> = Vec::new();
    for version in map.versions() {
        if let VersionBody::Lazy(lazy) = version.body() {
            let keys: Vec<Key> = lazy.writes().map(|(k, _)| k.clone()).collect();
            if !keys.is_empty() {
                grouped.push((version.object(), keys));
            }
        }
    }
    if !grouped.is_empty() {
        branch.invalidate_lazy_caches(&grouped);
    }
}
