//! Transactions: private read/write buffering over a pinned snapshot
//!
//! A transaction is a single-threaded object. Public transactions pin the
//! head map of the snapshot they start from (so validation anchors survive
//! compaction) and publish through the commit protocol. Private (nested)
//! transactions merge their write set into their parent in memory; only the
//! outermost transaction ever touches the CAS.
//!
//! Transactions are pooled per branch: their allocations (write map, read
//! set, overlay stack) are recycled after commit or abort.

use crate::branch::Branch;
use crate::error::{Error, Result};
use crate::manager::{self, CommitOutcome};
use crate::map::VersionMap;
use crate::snapshot::Snapshot;
use crate::version::{MergeFlags, Version};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use weft_common::ObjectId;

/// Transaction flag bits.
pub mod flags {
    /// Reads are not recorded. A commit that loses its CAS race cannot
    /// re-validate and fails fast with a conflict (unless `AUTO`).
    pub const NO_READS: u8 = 1 << 0;
    /// Writes are rejected
    pub const NO_WRITES: u8 = 1 << 1;
    /// Auto-commit transaction created by a handle convenience method
    pub const AUTO: u8 = 1 << 2;
    /// Set once the commit protocol consumed the transaction
    pub(crate) const COMMITTED: u8 = 1 << 3;
}

/// Recyclable allocations of a transaction.
#[derive(Default)]
pub(crate) struct Shell {
    pub(crate) writes: HashMap<ObjectId, Version>,
    pub(crate) reads: HashSet<ObjectId>,
    pub(crate) overlays: Vec<HashMap<ObjectId, Version>>,
}

impl Shell {
    fn reset(&mut self) {
        self.writes.clear();
        self.reads.clear();
        self.overlays.clear();
    }
}

/// One unit of work against a branch.
pub struct Transaction {
    pub(crate) branch: Arc<Branch>,
    pub(crate) snapshot: Arc<Snapshot>,
    /// Head map of the start snapshot, pinned until commit/abort
    pub(crate) pinned: Option<Arc<VersionMap>>,
    /// Ancestor write sets, oldest first (private transactions only)
    pub(crate) overlays: Vec<HashMap<ObjectId, Version>>,
    pub(crate) writes: HashMap<ObjectId, Version>,
    pub(crate) reads: HashSet<ObjectId>,
    pub(crate) flags: u8,
    private: bool,
}

impl Transaction {
    pub(crate) fn from_parts(
        branch: Arc<Branch>,
        snapshot: Arc<Snapshot>,
        pinned: Option<Arc<VersionMap>>,
        shell: Shell,
        txn_flags: u8,
    ) -> Self {
        Self {
            branch,
            snapshot,
            pinned,
            overlays: shell.overlays,
            writes: shell.writes,
            reads: shell.reads,
            flags: txn_flags,
            private: false,
        }
    }

    pub fn branch(&self) -> &Arc<Branch> {
        &self.branch
    }

    /// The frozen snapshot this transaction reads from
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Record that `object` was read, for commit validation
    pub fn record_read(&mut self, object: ObjectId) {
        if self.flags & flags::NO_READS == 0 {
            self.reads.insert(object);
        }
    }

    /// The private version this transaction or an ancestor wrote for
    /// `object`, newest first
    pub fn find_written(&self, object: ObjectId) -> Option<&Version> {
        self.writes
            .get(&object)
            .or_else(|| self.overlays.iter().rev().find_map(|o| o.get(&object)))
    }

    /// All versions visible to this transaction for `object`, newest
    /// first: pending writes, then the snapshot chain
    pub fn versions_of(&self, object: ObjectId) -> Vec<&Version> {
        let mut versions = Vec::new();
        if let Some(version) = self.writes.get(&object) {
            versions.push(version);
        }
        for overlay in self.overlays.iter().rev() {
            if let Some(version) = overlay.get(&object) {
                versions.push(version);
            }
        }
        versions.extend(self.snapshot.versions_of(object));
        versions
    }

    /// The private version for `object`, created empty on first write
    pub fn version_mut(&mut self, object: ObjectId) -> Result<&mut Version> {
        if self.flags & flags::NO_WRITES != 0 {
            return Err(Error::InvalidOperation(
                "write in a no-writes transaction".to_string(),
            ));
        }
        let kind = self
            .branch
            .kind_of(object)
            .ok_or_else(|| Error::InvalidOperation(format!("unknown object {}", object)))?;
        match self.writes.entry(object) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(Version::empty_delta(object, kind))),
        }
    }

    /// Run `body` in a nested private transaction. On success its writes
    /// merge into this transaction in memory; on error or panic they are
    /// discarded. No validation and no CAS happen here.
    pub fn nest<T>(&mut self, body: impl FnOnce(&mut Transaction) -> Result<T>) -> Result<T> {
        let shell = self.branch.take_private_shell();
        let mut overlays = std::mem::take(&mut self.overlays);
        overlays.push(std::mem::take(&mut self.writes));

        let mut child = Transaction {
            branch: Arc::clone(&self.branch),
            snapshot: Arc::clone(&self.snapshot),
            pinned: None,
            overlays,
            writes: shell.writes,
            reads: shell.reads,
            flags: self.flags & (flags::NO_READS | flags::NO_WRITES),
            private: true,
        };

        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(&mut child)));

        // Restore this transaction's write stack from the child.
        let mut overlays = std::mem::take(&mut child.overlays);
        self.writes = overlays.pop().expect("nested transaction lost its parent writes");
        self.overlays = overlays;

        let merge = matches!(outcome, Ok(Ok(_)));
        if merge {
            for (object, version) in child.writes.drain() {
                match self.writes.entry(object) {
                    Entry::Occupied(mut entry) => {
                        entry.get_mut().merge(&version, MergeFlags::private())
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(version);
                    }
                }
            }
            self.reads.extend(child.reads.drain());
        }

        let mut shell = Shell {
            writes: std::mem::take(&mut child.writes),
            reads: std::mem::take(&mut child.reads),
            overlays: Vec::new(),
        };
        shell.reset();
        self.branch.recycle_private(shell);
        drop(child);

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Publish this transaction's writes through the commit protocol.
    ///
    /// Returns the terminal status; CAS races retry internally per the
    /// branch retry policy. When a distributed acknowledgement is
    /// outstanding the outcome carries a pending [`CommitFuture`]
    /// (`crate::branch::CommitFuture`).
    pub fn commit(mut self) -> CommitOutcome {
        manager::commit_transaction(&mut self)
    }

    /// Discard this transaction's writes and release its snapshot pin.
    /// Nothing it wrote ever becomes visible.
    pub fn abort(mut self) {
        let mut shell = Shell {
            writes: std::mem::take(&mut self.writes),
            reads: std::mem::take(&mut self.reads),
            overlays: std::mem::take(&mut self.overlays),
        };
        shell.reset();
        self.branch.recycle_public(shell);
        // The pin is released by Drop.
    }

    pub(crate) fn take_shell(&mut self) -> Shell {
        let mut shell = Shell {
            writes: std::mem::take(&mut self.writes),
            reads: std::mem::take(&mut self.reads),
            overlays: std::mem::take(&mut self.overlays),
        };
        shell.reset();
        shell
    }

    pub(crate) fn release_pin(&mut self) {
        if let Some(pinned) = self.pinned.take() {
            if pinned.watchers().remove(1) {
                manager::compact(&self.branch);
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // A transaction dropped without commit/abort still releases its
        // pin; leaked pins would block compaction forever.
        self.release_pin();
    }
}
