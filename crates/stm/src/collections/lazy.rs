//! Lazy-map versions
//!
//! A lazy map defers materializing values. In `InMemory` mode the shared
//! state behaves like a normal keyed collection. In `SoftCached` mode the
//! shared state retains nothing: committed entries live in the backing
//! store, reads go through a bounded cache with fetch-on-miss, and merging
//! into the shared version skips caching entirely (a persistence walker is
//! responsible for writing committed entries out).

use crate::version::MergeFlags;
use std::collections::HashMap;
use weft_common::{Key, Value};

pub use super::keyed::KeyedSlot;

/// Retention mode of a lazy map's shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LazyMode {
    /// Shared state keeps all entries in memory
    #[default]
    InMemory,
    /// Shared state keeps nothing; entries are fetched from the store on
    /// demand and held in a bounded cache
    SoftCached,
}

/// One lazy map's versioned state.
#[derive(Debug, Clone, Default)]
pub struct LazyVersion {
    mode: LazyMode,
    canonical: bool,
    writes: HashMap<Key, Option<Value>>,
}

impl LazyVersion {
    /// Empty delta
    pub fn new_delta() -> Self {
        Self::default()
    }

    /// Empty delta carrying the object's registered retention mode, so
    /// promotion to canonical form keeps it
    pub fn new_delta_with_mode(mode: LazyMode) -> Self {
        Self { mode, ..Self::default() }
    }

    /// Canonical form for the given mode
    pub fn new_canonical(mode: LazyMode) -> Self {
        Self { mode, canonical: true, writes: HashMap::new() }
    }

    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    pub fn mode(&self) -> LazyMode {
        self.mode
    }

    /// Resolve a key against this version.
    ///
    /// The canonical `SoftCached` form misses for every key it does not
    /// hold; the caller falls through to the cache and the backing store.
    pub fn get(&self, key: &Key) -> KeyedSlot<'_> {
        match self.writes.get(key) {
            Some(Some(value)) => KeyedSlot::Present(value),
            Some(None) => KeyedSlot::Absent,
            None if self.canonical && self.mode == LazyMode::InMemory => KeyedSlot::Absent,
            None => KeyedSlot::Miss,
        }
    }

    /// Written entries, for persistence walkers and cache invalidation
    pub fn writes(&self) -> impl Iterator<Item = (&Key, Option<&Value>)> {
        self.writes.iter().map(|(k, w)| (k, w.as_ref()))
    }

    /// Record a put
    pub fn record_put(&mut self, key: Key, value: Value) {
        debug_assert!(!self.canonical, "recording into canonical state");
        self.writes.insert(key, Some(value));
    }

    /// Record a removal
    pub fn record_remove(&mut self, key: Key) {
        debug_assert!(!self.canonical, "recording into canonical state");
        self.writes.insert(key, None);
    }

    /// Fold `source` (newer) into `self` (older).
    ///
    /// Merging into the canonical `SoftCached` form drops the values: the
    /// store is the durable home and the cache is refilled on demand.
    pub fn merge(&mut self, source: &LazyVersion, _flags: MergeFlags) {
        if self.canonical && self.mode == LazyMode::SoftCached {
            return;
        }
        for (key, write) in &source.writes {
            if self.canonical {
                match write {
                    Some(value) => {
                        self.writes.insert(key.clone(), Some(value.clone()));
                    }
                    None => {
                        self.writes.remove(key);
                    }
                }
            } else {
                self.writes.insert(key.clone(), write.clone());
            }
        }
    }

    /// Promote a committed delta to canonical form. The delta's mode is
    /// irrelevant; the object's registered mode decides retention.
    pub fn into_canonical_with_mode(self, mode: LazyMode) -> Self {
        if mode == LazyMode::SoftCached {
            return LazyVersion::new_canonical(mode);
        }
        LazyVersion {
            mode,
            canonical: true,
            writes: self.writes.into_iter().filter(|(_, w)| w.is_some()).collect(),
        }
    }

    /// Promote, keeping the mode the delta was created with
    pub fn into_canonical(self) -> Self {
        let mode = self.mode;
        self.into_canonical_with_mode(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Key {
        Key::from(s)
    }

    #[test]
    fn test_delta_get_misses_unwritten() {
        let mut v = LazyVersion::new_delta();
        v.record_put(key("a"), Value::integer(1));
        assert_eq!(v.get(&key("a")), KeyedSlot::Present(&Value::integer(1)));
        assert_eq!(v.get(&key("b")), KeyedSlot::Miss);
    }

    #[test]
    fn test_soft_canonical_misses_everything() {
        let v = LazyVersion::new_canonical(LazyMode::SoftCached);
        assert_eq!(v.get(&key("a")), KeyedSlot::Miss);
    }

    #[test]
    fn test_in_memory_canonical_is_terminal() {
        let v = LazyVersion::new_canonical(LazyMode::InMemory);
        assert_eq!(v.get(&key("a")), KeyedSlot::Absent);
    }

    #[test]
    fn test_merge_into_soft_canonical_retains_nothing() {
        let mut canonical = LazyVersion::new_canonical(LazyMode::SoftCached);
        let mut delta = LazyVersion::new_delta();
        delta.record_put(key("a"), Value::integer(1));

        canonical.merge(&delta, MergeFlags::default());
        assert_eq!(canonical.get(&key("a")), KeyedSlot::Miss);
    }

    #[test]
    fn test_merge_into_in_memory_canonical_applies() {
        let mut canonical = LazyVersion::new_canonical(LazyMode::InMemory);
        let mut delta = LazyVersion::new_delta();
        delta.record_put(key("a"), Value::integer(1));
        delta.record_remove(key("b"));

        canonical.merge(&delta, MergeFlags::default());
        assert_eq!(canonical.get(&key("a")), KeyedSlot::Present(&Value::integer(1)));
        assert_eq!(canonical.get(&key("b")), KeyedSlot::Absent);
    }
}
