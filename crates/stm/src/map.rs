//! Version maps: one commit's batch of writes, with watcher-based
//! reclamation
//!
//! Once published into a snapshot, a map's write contents are immutable;
//! only its watcher count changes. The watcher count is the engine's
//! rendition of epoch pinning: validators and readers pin a map before
//! depending on its position in the chain and unpin when done, and a map
//! can only be retired (merged into the base by compaction) once nobody
//! holds a pin.

use crate::version::{MergeFlags, Version};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;
use weft_common::{MapId, ObjectId, Source};

/// Sentinel for a retired watcher count.
const RETIRED: isize = -1;

/// Atomic pin counter for one version map.
///
/// Shared by `Arc` across `on_past_changed` rebuilds of a map, so pins
/// taken before a propagation splice still guard the rebuilt map.
#[derive(Debug)]
pub struct Watchers {
    count: AtomicIsize,
}

impl Watchers {
    pub(crate) fn new(initial: usize) -> Self {
        Self { count: AtomicIsize::new(initial as isize) }
    }

    /// Current pin count, for diagnostics and tests
    pub fn count(&self) -> isize {
        self.count.load(Ordering::Acquire)
    }

    /// Add `n` pins. Fails iff the map has been retired; a failed caller
    /// must reload the snapshot and pin whatever replaced the map.
    pub fn try_add(&self, n: usize) -> bool {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == RETIRED {
                return false;
            }
            match self.count.compare_exchange_weak(
                current,
                current + n as isize,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Drop `n` pins. Returns true when the count reached zero, making the
    /// map eligible for deferred merge.
    ///
    /// Panics on underflow: an unbalanced release is corruption, not a
    /// recoverable condition.
    pub fn remove(&self, n: usize) -> bool {
        let previous = self.count.fetch_sub(n as isize, Ordering::AcqRel);
        let remaining = previous - n as isize;
        assert!(remaining >= 0, "watcher count underflow ({} - {})", previous, n);
        remaining == 0
    }

    /// Claim an unwatched map for retirement (0 -> retired). Only the
    /// compactor calls this.
    pub(crate) fn try_retire(&self) -> bool {
        self.count
            .compare_exchange(0, RETIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Roll back a retirement claim after a lost compaction race.
    pub(crate) fn unretire(&self) {
        let rolled_back = self
            .count
            .compare_exchange(RETIRED, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        assert!(rolled_back, "unretire of a map that was not retired");
    }
}

/// One committed (or propagated) batch of object versions.
#[derive(Debug)]
pub struct VersionMap {
    id: MapId,
    source: Source,
    versions: HashMap<ObjectId, Version>,
    reads: Option<HashSet<ObjectId>>,
    watchers: Arc<Watchers>,
}

impl VersionMap {
    /// New map carrying `initial_watchers` pins (the publisher's pin plus
    /// one per registered no-merge extension).
    pub(crate) fn new(
        id: MapId,
        source: Source,
        versions: HashMap<ObjectId, Version>,
        reads: Option<HashSet<ObjectId>>,
        initial_watchers: usize,
    ) -> Self {
        Self {
            id,
            source,
            versions,
            reads,
            watchers: Arc::new(Watchers::new(initial_watchers)),
        }
    }

    /// Empty base map a fresh branch starts from
    pub(crate) fn base() -> Self {
        Self::new(MapId::BASE, Source::Local, HashMap::new(), None, 0)
    }

    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn watchers(&self) -> &Arc<Watchers> {
        &self.watchers
    }

    /// The version this map carries for an object, if any
    pub fn get(&self, object: ObjectId) -> Option<&Version> {
        self.versions.get(&object)
    }

    /// All versions in this map
    pub fn versions(&self) -> impl Iterator<Item = &Version> {
        self.versions.values()
    }

    /// Object identities written by this map
    pub fn written_objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.versions.keys().copied()
    }

    /// Read set recorded by the committing transaction, when retained
    pub fn reads(&self) -> Option<&HashSet<ObjectId>> {
        self.reads.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// True when any of `reads` hits this map's writes
    pub fn intersects_reads(&self, reads: &HashSet<ObjectId>) -> bool {
        if reads.len() < self.versions.len() {
            reads.iter().any(|object| self.versions.contains_key(object))
        } else {
            self.versions.keys().any(|object| reads.contains(object))
        }
    }

    /// True when the two maps wrote any common object
    pub fn intersects_map(&self, other: &VersionMap) -> bool {
        let (small, large) = if other.versions.len() < self.versions.len() {
            (&other.versions, &self.versions)
        } else {
            (&self.versions, &other.versions)
        };
        small.keys().any(|object| large.contains_key(object))
    }

    /// Rebuild this map after `inserted` was spliced into the chain
    /// beneath it. Order-sensitive versions re-derive their addressing;
    /// the rebuilt map shares this map's watcher counter so existing pins
    /// carry over. Returns `None` when nothing needed to change.
    pub(crate) fn with_past_changed(&self, inserted: &VersionMap) -> Option<VersionMap> {
        let affected: Vec<ObjectId> = self
            .versions
            .keys()
            .filter(|object| inserted.versions.contains_key(*object))
            .copied()
            .collect();
        if affected.is_empty() {
            return None;
        }

        let mut versions = self.versions.clone();
        let mut changed = false;
        for object in affected {
            let past = &inserted.versions[&object];
            if let Some(version) = versions.get_mut(&object) {
                changed |= version.on_past_changed(past);
            }
        }
        if !changed {
            return None;
        }
        Some(VersionMap {
            id: self.id,
            source: self.source,
            versions,
            reads: self.reads.clone(),
            watchers: Arc::clone(&self.watchers),
        })
    }

    /// Build the compacted base: this map (the old base, canonical state)
    /// plus `newer`'s deltas folded in copy-on-merge. The result is a
    /// fresh, unwatched map that keeps the base identity.
    pub(crate) fn merge_newer(&self, newer: &VersionMap) -> VersionMap {
        let mut versions = self.versions.clone();
        for (object, version) in &newer.versions {
            match versions.get_mut(object) {
                Some(existing) => existing.merge(version, MergeFlags::default()),
                None => {
                    versions.insert(*object, version.clone().into_canonical());
                }
            }
        }
        VersionMap {
            id: self.id,
            source: self.source,
            versions,
            reads: None,
            watchers: Arc::new(Watchers::new(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{ObjectKind, VersionBody};
    use weft_common::{FieldId, Value};

    fn fields_version(object: u64, field: u32, value: i64) -> Version {
        let object = ObjectId::from_raw(object);
        let mut version = Version::empty_delta(object, ObjectKind::Fields);
        if let VersionBody::Fields(f) = version.body_mut() {
            f.set(FieldId::new(field), Value::integer(value));
        }
        version
    }

    fn map_with(versions: Vec<Version>) -> VersionMap {
        let versions = versions.into_iter().map(|v| (v.object(), v)).collect();
        VersionMap::new(MapId::from_raw(1), Source::Local, versions, None, 1)
    }

    #[test]
    fn test_watcher_balance() {
        let watchers = Watchers::new(1);
        assert!(watchers.try_add(2));
        assert_eq!(watchers.count(), 3);
        assert!(!watchers.remove(2));
        assert!(watchers.remove(1));
        assert_eq!(watchers.count(), 0);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_watcher_underflow_panics() {
        let watchers = Watchers::new(0);
        watchers.remove(1);
    }

    #[test]
    fn test_retired_map_rejects_new_pins() {
        let watchers = Watchers::new(0);
        assert!(watchers.try_retire());
        assert!(!watchers.try_add(1));
        watchers.unretire();
        assert!(watchers.try_add(1));
    }

    #[test]
    fn test_retire_fails_while_watched() {
        let watchers = Watchers::new(1);
        assert!(!watchers.try_retire());
        watchers.remove(1);
        assert!(watchers.try_retire());
    }

    #[test]
    fn test_read_intersection() {
        let map = map_with(vec![fields_version(1, 0, 10)]);
        let mut reads = HashSet::new();
        reads.insert(ObjectId::from_raw(2));
        assert!(!map.intersects_reads(&reads));
        reads.insert(ObjectId::from_raw(1));
        assert!(map.intersects_reads(&reads));
    }

    #[test]
    fn test_merge_newer_builds_fresh_base() {
        let base = VersionMap::base();
        let newer = map_with(vec![fields_version(1, 0, 10)]);
        let merged = base.merge_newer(&newer);

        assert_eq!(merged.id(), MapId::BASE);
        assert!(merged.get(ObjectId::from_raw(1)).is_some());
        // the old base is untouched
        assert!(base.get(ObjectId::from_raw(1)).is_none());
        // the merged base starts unwatched
        assert_eq!(merged.watchers().count(), 0);
    }
}
