//! Immutable snapshots of the version-map chain
//!
//! A snapshot is the unit published by the branch CAS: an ordered sequence
//! of version maps (the base canonical state at index 0), an acknowledgement
//! watermark, and slow-changing metadata. Snapshots are never mutated in
//! place; every change copies-and-extends (or copies-and-splices) into a new
//! snapshot, so any thread holding a reference sees a frozen, consistent
//! view regardless of concurrent commits.

use crate::map::VersionMap;
use crate::version::Version;
use std::collections::HashSet;
use std::sync::Arc;
use weft_common::{MapId, ObjectId, Source};

/// Snapshot-attached state that changes far less often than the chain:
/// blocked connection sources and branch liveness.
#[derive(Debug, Clone, Default)]
pub struct SlowChanging {
    /// Sources whose batches must not enter the chain
    pub blocked: HashSet<Source>,
    /// Branch permanently disconnected; commits abort
    pub disconnected: bool,
}

/// One consistent point-in-time view of a branch.
#[derive(Debug)]
pub struct Snapshot {
    maps: Vec<Arc<VersionMap>>,
    acknowledged_index: usize,
    slow_changing: Option<Arc<SlowChanging>>,
}

impl Snapshot {
    /// Initial snapshot holding only the empty base map
    pub(crate) fn initial() -> Self {
        Self {
            maps: vec![Arc::new(VersionMap::base())],
            acknowledged_index: 0,
            slow_changing: None,
        }
    }

    /// The ordered chain, base first
    pub fn maps(&self) -> &[Arc<VersionMap>] {
        &self.maps
    }

    /// The newest map
    pub fn head(&self) -> &Arc<VersionMap> {
        self.maps.last().expect("snapshot without a base map")
    }

    /// Index of the last fully-acknowledged (non-speculative) map
    pub fn acknowledged_index(&self) -> usize {
        self.acknowledged_index
    }

    pub fn slow_changing(&self) -> Option<&Arc<SlowChanging>> {
        self.slow_changing.as_ref()
    }

    /// Chain position of a map, by identity
    pub fn index_of(&self, id: MapId) -> Option<usize> {
        // Chains are short; ids are not position-ordered after splices, so
        // scan from the newest end where anchors usually sit.
        self.maps.iter().rposition(|m| m.id() == id)
    }

    /// Versions of one object, newest first, for read resolution
    pub fn versions_of(&self, object: ObjectId) -> impl Iterator<Item = &Version> {
        self.maps.iter().rev().filter_map(move |m| m.get(object))
    }

    /// Copy-and-extend with a committed map. The watermark advances over
    /// the new map only when requested and nothing older is still awaiting
    /// acknowledgement.
    pub(crate) fn with_appended(&self, map: Arc<VersionMap>, advance_ack: bool) -> Snapshot {
        let mut maps = Vec::with_capacity(self.maps.len() + 1);
        maps.extend(self.maps.iter().cloned());
        maps.push(map);
        let acknowledged_index =
            if advance_ack && self.acknowledged_index == self.maps.len() - 1 {
                self.acknowledged_index + 1
            } else {
                self.acknowledged_index
            };
        Snapshot {
            maps,
            acknowledged_index,
            slow_changing: self.slow_changing.clone(),
        }
    }

    /// Copy-and-splice a propagated map in at `position`, replacing every
    /// later map with its (possibly rebuilt) counterpart from `tail`.
    pub(crate) fn with_spliced(
        &self,
        position: usize,
        map: Arc<VersionMap>,
        tail: Vec<Arc<VersionMap>>,
    ) -> Snapshot {
        debug_assert!(position >= 1 && position <= self.maps.len());
        debug_assert_eq!(tail.len(), self.maps.len() - position);
        let mut maps = Vec::with_capacity(self.maps.len() + 1);
        maps.extend(self.maps[..position].iter().cloned());
        maps.push(map);
        maps.extend(tail);
        // A batch landing at or immediately after the watermark is already
        // validated by its source, so the watermark absorbs it.
        let acknowledged_index = if position <= self.acknowledged_index + 1 {
            self.acknowledged_index + 1
        } else {
            self.acknowledged_index
        };
        Snapshot {
            maps,
            acknowledged_index,
            slow_changing: self.slow_changing.clone(),
        }
    }

    /// Copy with the watermark advanced to `index`
    pub(crate) fn with_acknowledged(&self, index: usize) -> Snapshot {
        debug_assert!(index < self.maps.len());
        Snapshot {
            maps: self.maps.clone(),
            acknowledged_index: self.acknowledged_index.max(index),
            slow_changing: self.slow_changing.clone(),
        }
    }

    /// Copy with replaced slow-changing metadata
    pub(crate) fn with_slow_changing(&self, slow_changing: Arc<SlowChanging>) -> Snapshot {
        Snapshot {
            maps: self.maps.clone(),
            acknowledged_index: self.acknowledged_index,
            slow_changing: Some(slow_changing),
        }
    }

    /// Copy with the first two maps replaced by the compacted base
    pub(crate) fn with_compacted(&self, merged_base: Arc<VersionMap>) -> Snapshot {
        debug_assert!(self.maps.len() >= 2);
        debug_assert!(self.acknowledged_index >= 1);
        let mut maps = Vec::with_capacity(self.maps.len() - 1);
        maps.push(merged_base);
        maps.extend(self.maps[2..].iter().cloned());
        Snapshot {
            maps,
            acknowledged_index: self.acknowledged_index - 1,
            slow_changing: self.slow_changing.clone(),
        }
    }
}
