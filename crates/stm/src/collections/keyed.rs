//! Keyed-collection versions
//!
//! A delta records per-key writes (`None` marks a removal) plus a size
//! delta maintained against the state visible when each write was
//! recorded. A `clear` makes the version terminal for lookups: nothing
//! underneath it is visible. The canonical form keeps the full entry map.

use crate::version::MergeFlags;
use std::collections::HashMap;
use weft_common::{Key, Value};

/// Result of resolving one key against a single version.
#[derive(Debug, PartialEq)]
pub enum KeyedSlot<'a> {
    /// Written here: present with this value
    Present(&'a Value),
    /// Written here: removed (or hidden by a clear / absent from canonical)
    Absent,
    /// Not written here; continue with older state
    Miss,
}

/// One keyed collection's versioned state.
#[derive(Debug, Clone, Default)]
pub struct KeyedVersion {
    canonical: bool,
    cleared: bool,
    writes: HashMap<Key, Option<Value>>,
    size_delta: isize,
}

impl KeyedVersion {
    /// Empty delta
    pub fn new_delta() -> Self {
        Self::default()
    }

    /// Canonical form holding the full entry map
    pub fn new_canonical(entries: HashMap<Key, Value>) -> Self {
        Self {
            canonical: true,
            cleared: false,
            writes: entries.into_iter().map(|(k, v)| (k, Some(v))).collect(),
            size_delta: 0,
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    /// True when this version hides all older state
    pub fn is_terminal(&self) -> bool {
        self.canonical || self.cleared
    }

    /// Net entry-count change this delta applies (meaningless for the
    /// canonical form, whose length is explicit)
    pub fn size_delta(&self) -> isize {
        self.size_delta
    }

    /// Entry count of the canonical form
    pub fn canonical_len(&self) -> Option<usize> {
        self.canonical.then(|| self.writes.len())
    }

    /// Resolve a key against this version
    pub fn get(&self, key: &Key) -> KeyedSlot<'_> {
        match self.writes.get(key) {
            Some(Some(value)) => KeyedSlot::Present(value),
            Some(None) => KeyedSlot::Absent,
            None if self.is_terminal() => KeyedSlot::Absent,
            None => KeyedSlot::Miss,
        }
    }

    /// Written entries, for iteration and persistence walkers
    pub fn writes(&self) -> impl Iterator<Item = (&Key, Option<&Value>)> {
        self.writes.iter().map(|(k, w)| (k, w.as_ref()))
    }

    /// Record a put. `existed` is whether the key was visible in the
    /// accumulated state underneath the transaction's pending writes.
    pub fn record_put(&mut self, key: Key, value: Value, existed: bool) {
        debug_assert!(!self.canonical, "recording into canonical state");
        if !existed {
            self.size_delta += 1;
        }
        self.writes.insert(key, Some(value));
    }

    /// Record a removal. No-op bookkeeping when the key was not visible.
    pub fn record_remove(&mut self, key: Key, existed: bool) {
        debug_assert!(!self.canonical, "recording into canonical state");
        if existed {
            self.size_delta -= 1;
        }
        self.writes.insert(key, None);
    }

    /// Record a clear of the whole collection. `visible_len` is the entry
    /// count at record time.
    pub fn record_clear(&mut self, visible_len: usize) {
        debug_assert!(!self.canonical, "recording into canonical state");
        self.cleared = true;
        self.writes.clear();
        self.size_delta = -(visible_len as isize);
    }

    /// Fold `source` (newer) into `self` (older).
    ///
    /// Size deltas are additive: each side's delta was recorded against the
    /// state actually visible at its own record time, so the sum is the net
    /// change across both.
    pub fn merge(&mut self, source: &KeyedVersion, _flags: MergeFlags) {
        if source.cleared {
            if self.canonical {
                self.writes = source
                    .writes
                    .iter()
                    .filter_map(|(k, w)| w.clone().map(|v| (k.clone(), Some(v))))
                    .collect();
            } else {
                self.cleared = true;
                self.writes = source.writes.clone();
                self.size_delta += source.size_delta;
            }
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
        if !self.canonical {
            self.size_delta += source.size_delta;
        }
    }

    /// Promote a committed delta to canonical form
    pub fn into_canonical(self) -> Self {
        if self.canonical {
            return self;
        }
        KeyedVersion {
            canonical: true,
            cleared: false,
            writes: self.writes.into_iter().filter(|(_, w)| w.is_some()).collect(),
            size_delta: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Key {
        Key::from(s)
    }

    #[test]
    fn test_record_and_get() {
        let mut v = KeyedVersion::new_delta();
        v.record_put(key("a"), Value::integer(1), false);
        v.record_remove(key("b"), true);

        assert_eq!(v.get(&key("a")), KeyedSlot::Present(&Value::integer(1)));
        assert_eq!(v.get(&key("b")), KeyedSlot::Absent);
        assert_eq!(v.get(&key("c")), KeyedSlot::Miss);
        assert_eq!(v.size_delta(), 0);
    }

    #[test]
    fn test_clear_is_terminal() {
        let mut v = KeyedVersion::new_delta();
        v.record_put(key("a"), Value::integer(1), false);
        v.record_clear(3);
        assert_eq!(v.get(&key("a")), KeyedSlot::Absent);
        assert_eq!(v.size_delta(), -3);

        v.record_put(key("x"), Value::integer(9), false);
        assert_eq!(v.get(&key("x")), KeyedSlot::Present(&Value::integer(9)));
        assert_eq!(v.get(&key("a")), KeyedSlot::Absent);
        assert_eq!(v.size_delta(), -2);
    }

    #[test]
    fn test_merge_overlays_newer_writes() {
        let mut older = KeyedVersion::new_delta();
        older.record_put(key("a"), Value::integer(1), false);
        older.record_put(key("b"), Value::integer(2), false);

        let mut newer = KeyedVersion::new_delta();
        newer.record_put(key("b"), Value::integer(20), true);
        newer.record_remove(key("a"), true);

        older.merge(&newer, MergeFlags::default());
        assert_eq!(older.get(&key("a")), KeyedSlot::Absent);
        assert_eq!(older.get(&key("b")), KeyedSlot::Present(&Value::integer(20)));
        // +2 from older, -1 from newer's remove
        assert_eq!(older.size_delta(), 1);
    }

    #[test]
    fn test_merge_into_canonical() {
        let mut canonical = KeyedVersion::new_canonical(
            [(key("a"), Value::integer(1)), (key("b"), Value::integer(2))].into(),
        );

        let mut delta = KeyedVersion::new_delta();
        delta.record_remove(key("a"), true);
        delta.record_put(key("c"), Value::integer(3), false);

        canonical.merge(&delta, MergeFlags::default());
        assert_eq!(canonical.canonical_len(), Some(2));
        assert_eq!(canonical.get(&key("a")), KeyedSlot::Absent);
        assert_eq!(canonical.get(&key("b")), KeyedSlot::Present(&Value::integer(2)));
        assert_eq!(canonical.get(&key("c")), KeyedSlot::Present(&Value::integer(3)));
    }

    #[test]
    fn test_clear_merged_into_canonical_keeps_only_newer_writes() {
        let mut canonical = KeyedVersion::new_canonical(
            [(key("a"), Value::integer(1)), (key("b"), Value::integer(2))].into(),
        );

        let mut delta = KeyedVersion::new_delta();
        delta.record_clear(2);
        delta.record_put(key("z"), Value::integer(9), false);

        canonical.merge(&delta, MergeFlags::default());
        assert_eq!(canonical.canonical_len(), Some(1));
        assert_eq!(canonical.get(&key("z")), KeyedSlot::Present(&Value::integer(9)));
        assert_eq!(canonical.get(&key("a")), KeyedSlot::Absent);
    }
}
