//! Commit protocol integration tests: validation, conflicts, chain growth,
//! compaction and snapshot immutability

mod common;

use common::{get, read_cell, set, write_cell};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft_stm::{
    Branch, BranchConfig, CommitStatus, ConflictPolicy, OverloadHandler, RetryPolicy, TCell, Value,
};

#[test]
fn test_single_commit_and_read_back() {
    let branch = Branch::new();
    let cell = TCell::new(&branch);

    assert_eq!(write_cell(&branch, &cell, 7), CommitStatus::Success);
    assert_eq!(read_cell(&branch, &cell), Some(Value::integer(7)));
}

#[test]
fn test_read_only_commit_publishes_no_map() {
    let branch = Branch::new();
    let cell = TCell::new(&branch);
    assert_eq!(write_cell(&branch, &cell, 1), CommitStatus::Success);

    let chain_before = branch.snapshot().maps().len();
    let mut txn = branch.begin();
    let _ = get(&mut txn, &cell);
    assert_eq!(txn.commit().status, CommitStatus::Success);
    assert_eq!(branch.snapshot().maps().len(), chain_before);
}

#[test]
fn test_stale_read_conflicts_then_fresh_write_succeeds() {
    // The concrete scenario: T1 writes a=1 and commits. T2, started before
    // T1's commit, reads a and tries to write a=2: conflict, because its
    // read went stale against the intervening map. T3, started fresh,
    // writes a=3 and succeeds.
    let branch = Branch::new();
    let cell = TCell::new(&branch);
    assert_eq!(write_cell(&branch, &cell, 0), CommitStatus::Success);

    let mut t2 = branch.begin();
    let _stale = get(&mut t2, &cell);

    let mut t1 = branch.begin();
    set(&mut t1, &cell, 1);
    assert_eq!(t1.commit().status, CommitStatus::Success);

    set(&mut t2, &cell, 2);
    assert_eq!(t2.commit().status, CommitStatus::Conflict);
    assert_eq!(read_cell(&branch, &cell), Some(Value::integer(1)));

    let mut t3 = branch.begin();
    set(&mut t3, &cell, 3);
    assert_eq!(t3.commit().status, CommitStatus::Success);
    assert_eq!(read_cell(&branch, &cell), Some(Value::integer(3)));
}

#[test]
fn test_disjoint_writers_do_not_conflict() {
    let branch = Branch::new();
    let a = TCell::new(&branch);
    let b = TCell::new(&branch);

    let mut t1 = branch.begin();
    let _ = get(&mut t1, &a);
    set(&mut t1, &a, 1);

    let mut t2 = branch.begin();
    let _ = get(&mut t2, &b);
    set(&mut t2, &b, 2);

    assert_eq!(t1.commit().status, CommitStatus::Success);
    assert_eq!(t2.commit().status, CommitStatus::Success);
    assert_eq!(read_cell(&branch, &a), Some(Value::integer(1)));
    assert_eq!(read_cell(&branch, &b), Some(Value::integer(2)));
}

#[test]
fn test_no_lost_updates_chain_grows_then_compacts() {
    let branch = Branch::new();
    let cells: Vec<TCell> = (0..5).map(|_| TCell::new(&branch)).collect();

    // A long-lived reader pins the base head, blocking compaction, so
    // sequential disjoint commits grow the chain by exactly one map each.
    let guard = branch.begin();
    let base_len = branch.snapshot().maps().len();

    for (i, cell) in cells.iter().enumerate() {
        assert_eq!(write_cell(&branch, cell, i as i64), CommitStatus::Success);
    }
    assert_eq!(branch.snapshot().maps().len(), base_len + 5);

    // Releasing the pin lets the chain fold back into the base.
    guard.abort();
    assert_eq!(branch.snapshot().maps().len(), 1);
    for (i, cell) in cells.iter().enumerate() {
        assert_eq!(read_cell(&branch, cell), Some(Value::integer(i as i64)));
    }
}

#[test]
fn test_published_snapshots_are_immutable() {
    let branch = Branch::new();
    let cell = TCell::new(&branch);
    assert_eq!(write_cell(&branch, &cell, 1), CommitStatus::Success);

    // A transaction holds a frozen view; later commits never mutate it.
    let mut reader = branch.begin();
    let held = reader.snapshot().clone();
    let held_len = held.maps().len();

    assert_eq!(write_cell(&branch, &cell, 2), CommitStatus::Success);
    assert_eq!(write_cell(&branch, &cell, 3), CommitStatus::Success);

    assert_eq!(held.maps().len(), held_len);
    // Repeatable read through the old snapshot.
    assert_eq!(get(&mut reader, &cell), Some(Value::integer(1)));
    reader.abort();

    assert_eq!(read_cell(&branch, &cell), Some(Value::integer(3)));
}

#[test]
fn test_write_write_policy_ignores_reads() {
    let config = BranchConfig {
        policy: ConflictPolicy::WriteWriteConflicts,
        ..BranchConfig::default()
    };
    let branch = Branch::with_config(config);
    let a = TCell::new(&branch);
    let b = TCell::new(&branch);
    assert_eq!(write_cell(&branch, &a, 0), CommitStatus::Success);

    // Reads a, writes only b: under write-write detection the stale read
    // does not conflict.
    let mut txn = branch.begin();
    let _stale = get(&mut txn, &a);
    set(&mut txn, &b, 1);

    assert_eq!(write_cell(&branch, &a, 5), CommitStatus::Success);
    assert_eq!(txn.commit().status, CommitStatus::Success);
}

#[test]
fn test_write_write_policy_detects_write_overlap() {
    let config = BranchConfig {
        policy: ConflictPolicy::WriteWriteConflicts,
        ..BranchConfig::default()
    };
    let branch = Branch::with_config(config);
    let a = TCell::new(&branch);

    let mut txn = branch.begin();
    set(&mut txn, &a, 1);

    assert_eq!(write_cell(&branch, &a, 5), CommitStatus::Success);
    assert_eq!(txn.commit().status, CommitStatus::Conflict);
    assert_eq!(read_cell(&branch, &a), Some(Value::integer(5)));
}

#[test]
fn test_disconnected_branch_aborts_commits() {
    let branch = Branch::new();
    let cell = TCell::new(&branch);

    let mut txn = branch.begin();
    set(&mut txn, &cell, 1);
    branch.disconnect();
    assert_eq!(txn.commit().status, CommitStatus::Abort);
    assert_eq!(read_cell(&branch, &cell), None);
}

#[test]
fn test_blocked_local_source_conflicts_until_unblocked() {
    let branch = Branch::new();
    let cell = TCell::new(&branch);

    branch.block_source(weft_stm::Source::Local);
    assert_eq!(write_cell(&branch, &cell, 1), CommitStatus::Conflict);

    branch.unblock_source(weft_stm::Source::Local);
    assert_eq!(write_cell(&branch, &cell, 1), CommitStatus::Success);
}

#[test]
fn test_atomically_retries_conflicts_to_success() {
    let branch = Branch::new();
    let cell = TCell::new(&branch);
    assert_eq!(write_cell(&branch, &cell, 0), CommitStatus::Success);

    // Force one conflict by committing between the body's read and commit.
    let interfered = std::cell::Cell::new(false);
    let result = branch.atomically(|txn| {
        let current = match cell.get(txn)? {
            Some(Value::I64(i)) => i,
            _ => 0,
        };
        if !interfered.replace(true) {
            assert_eq!(write_cell(&branch, &cell, 10), CommitStatus::Success);
        }
        cell.set(txn, Value::integer(current + 1))?;
        Ok(current + 1)
    });

    // First attempt read 0 and conflicted; the retry read 10 and wrote 11.
    assert_eq!(result.unwrap(), 11);
    assert_eq!(read_cell(&branch, &cell), Some(Value::integer(11)));
}

#[test]
fn test_bounded_retry_policy_reports_exhaustion() {
    let config = BranchConfig {
        retry: RetryPolicy { max_attempts: Some(2), ..RetryPolicy::default() },
        ..BranchConfig::default()
    };
    let branch = Branch::with_config(config);
    let cell = TCell::new(&branch);
    assert_eq!(write_cell(&branch, &cell, 0), CommitStatus::Success);

    let result: weft_stm::Result<()> = branch.atomically(|txn| {
        let _ = cell.get(txn)?;
        // Interfere on every attempt so the body can never commit.
        assert_eq!(write_cell(&branch, &cell, 99), CommitStatus::Success);
        cell.set(txn, Value::integer(1))?;
        Ok(())
    });
    assert!(matches!(result, Err(weft_stm::Error::RetriesExhausted)));
}

struct CountingOverload {
    threshold_hits: AtomicUsize,
    maximum_hits: AtomicUsize,
    first_notifications: AtomicUsize,
}

impl OverloadHandler for CountingOverload {
    fn on_map_queue_threshold_reached(&self, _branch: &Branch) {
        self.threshold_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_map_queue_maximum_reached(&self, _branch: &Branch, first_notification: bool) {
        self.maximum_hits.fetch_add(1, Ordering::Relaxed);
        if first_notification {
            self.first_notifications.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[test]
fn test_backpressure_handler_invocations() {
    let config = BranchConfig {
        map_queue_threshold: 3,
        map_queue_maximum: 5,
        ..BranchConfig::default()
    };
    let branch = Branch::with_config(config);
    let handler = Arc::new(CountingOverload {
        threshold_hits: AtomicUsize::new(0),
        maximum_hits: AtomicUsize::new(0),
        first_notifications: AtomicUsize::new(0),
    });
    branch.set_overload_handler(handler.clone());

    // Block compaction so the chain actually grows.
    let guard = branch.begin();
    for i in 0..8 {
        let cell = TCell::new(&branch);
        assert_eq!(write_cell(&branch, &cell, i), CommitStatus::Success);
    }
    guard.abort();

    assert!(handler.threshold_hits.load(Ordering::Relaxed) > 0);
    assert!(handler.maximum_hits.load(Ordering::Relaxed) > 0);
    assert_eq!(handler.first_notifications.load(Ordering::Relaxed), 1);
}

#[test]
fn test_watcher_counts_balance_over_transaction_lifetime() {
    let branch = Branch::new();
    let cell = TCell::new(&branch);
    assert_eq!(write_cell(&branch, &cell, 1), CommitStatus::Success);

    let snapshot = branch.snapshot();
    let head = snapshot.head().clone();
    let before = head.watchers().count();

    let txn = branch.begin();
    assert_eq!(head.watchers().count(), before + 1);
    txn.abort();
    assert!(head.watchers().count() <= before);
}
