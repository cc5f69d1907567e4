//! Extension hooks run after successful publication
//!
//! Walkers (persistence flushers), acknowledgers (distributed commit
//! acknowledgement) and source splitters (per-source replication senders)
//! are notified after each CAS success. The core only guarantees the
//! post-publication invocation; what a hook does with the map is its own
//! business. Splitters and other no-merge extensions hold a watcher on
//! every published map so compaction cannot merge a map away before they
//! processed it.

use crate::branch::Branch;
use std::sync::Arc;
use weft_common::MapId;

/// Background processor of newly committed maps (e.g. a persistence
/// flusher). `request_run` must not block the committing thread.
pub trait Walker: Send + Sync {
    fn request_run(&self, branch: &Arc<Branch>, map: MapId);
}

/// Distributed-acknowledgement driver. Invoked after publication; expected
/// to eventually call [`Branch::acknowledge`] once remote participants
/// confirmed the map.
pub trait Acknowledger: Send + Sync {
    fn request_run(&self, branch: &Arc<Branch>, map: MapId);
}

/// Registered extensions of one branch.
#[derive(Default)]
pub(crate) struct ExtensionRegistry {
    pub(crate) walkers: Vec<Arc<dyn Walker>>,
    pub(crate) acknowledgers: Vec<Arc<dyn Acknowledger>>,
    /// Number of registered no-merge extensions (source splitters); each
    /// holds one watcher on every published map
    pub(crate) splitters: usize,
}

impl ExtensionRegistry {
    /// Watchers to add to a map at publication beyond the publisher's own
    pub(crate) fn no_merge_watchers(&self) -> usize {
        self.splitters
    }

    pub(crate) fn has_acknowledger(&self) -> bool {
        !self.acknowledgers.is_empty()
    }
}
