//! List versions: insertions and removals as index deltas
//!
//! A list delta never stores moved elements. Removals are indices into the
//! accumulated state underneath the delta ("base coordinates"); insertions
//! are positions in the state the delta produces ("result coordinates").
//! Reading maps a logical index down through each delta by binary search
//! over the sorted index arrays, so merge cost tracks delta size, not list
//! size, and replication ships small diffs instead of shifted arrays.
//!
//! The canonical form (shared state in the base map) is a materialized
//! element vector; deltas fold into it only during compaction.

use crate::version::MergeFlags;
use weft_common::Value;

/// Result of resolving one logical index through a single delta.
#[derive(Debug, PartialEq)]
pub enum ListSlot<'a> {
    /// The index hits a value this version carries
    Value(&'a Value),
    /// The index passes through; continue at this index in the state
    /// underneath this version
    Underlying(usize),
}

/// One list's versioned state.
#[derive(Debug, Clone, Default)]
pub struct ListVersion {
    /// Materialized elements; `Some` only for the canonical form
    elements: Option<Vec<Value>>,
    /// Insertions, sorted by result position (positions are distinct)
    inserts: Vec<(usize, Value)>,
    /// Removals, sorted base indices (distinct)
    removals: Vec<usize>,
}

/// `sorted.partition_point` wrappers: how many entries sit strictly below /
/// at-or-below `x`.
fn count_lt(sorted: &[usize], x: usize) -> usize {
    sorted.partition_point(|&v| v < x)
}

fn count_le(sorted: &[usize], x: usize) -> usize {
    sorted.partition_point(|&v| v <= x)
}

/// Smallest `u` with `u == start + count_le(sorted, u)`: maps an index in
/// the compacted space (entries of `sorted` absent) to the expanded space,
/// skipping entries that compare at-or-below (element addressing).
fn expand_le(sorted: &[usize], start: usize) -> usize {
    let mut u = start;
    loop {
        let c = count_le(sorted, u);
        if u == start + c {
            return u;
        }
        u = start + c;
    }
}

/// Strict variant of [`expand_le`], for boundary (anchor) addressing where
/// an entry exactly at the position does not displace it.
fn expand_lt(sorted: &[usize], start: usize) -> usize {
    let mut u = start;
    loop {
        let c = count_lt(sorted, u);
        if u == start + c {
            return u;
        }
        u = start + c;
    }
}

impl ListVersion {
    /// Empty delta
    pub fn new_delta() -> Self {
        Self::default()
    }

    /// Canonical form holding the full element vector
    pub fn new_canonical(elements: Vec<Value>) -> Self {
        Self { elements: Some(elements), inserts: Vec::new(), removals: Vec::new() }
    }

    pub fn is_canonical(&self) -> bool {
        self.elements.is_some()
    }

    /// Net length change this delta applies (zero for canonical forms)
    pub fn size_delta(&self) -> isize {
        self.inserts.len() as isize - self.removals.len() as isize
    }

    /// Length of the canonical form
    pub fn canonical_len(&self) -> Option<usize> {
        self.elements.as_ref().map(|e| e.len())
    }

    /// Resolve a logical index against this version.
    ///
    /// For the canonical form the index must be in bounds; deltas return
    /// [`ListSlot::Underlying`] when the index falls through to older state.
    pub fn resolve(&self, index: usize) -> Option<ListSlot<'_>> {
        if let Some(elements) = &self.elements {
            return elements.get(index).map(ListSlot::Value);
        }
        if let Ok(at) = self.inserts.binary_search_by(|(p, _)| p.cmp(&index)) {
            return Some(ListSlot::Value(&self.inserts[at].1));
        }
        let survivors_index = index - self.inserts.partition_point(|(p, _)| *p < index);
        Some(ListSlot::Underlying(expand_le(&self.removals, survivors_index)))
    }

    /// Record an insertion at result position `index`
    pub fn record_insert(&mut self, index: usize, value: Value) {
        debug_assert!(self.elements.is_none(), "recording into canonical state");
        self.compose(&ListVersion {
            elements: None,
            inserts: vec![(index, value)],
            removals: Vec::new(),
        });
    }

    /// Record a removal of the element at result position `index`
    pub fn record_remove(&mut self, index: usize) {
        debug_assert!(self.elements.is_none(), "recording into canonical state");
        self.compose(&ListVersion {
            elements: None,
            inserts: Vec::new(),
            removals: vec![index],
        });
    }

    /// Record an overwrite of the element at result position `index`.
    /// Modeled as remove-then-insert; the slot's identity is not preserved.
    pub fn record_set(&mut self, index: usize, value: Value) {
        self.record_remove(index);
        self.record_insert(index, value);
    }

    /// Fold `source` (newer) into `self` (older).
    pub fn merge(&mut self, source: &ListVersion, _flags: MergeFlags) {
        if self.is_canonical() {
            self.apply_delta(source);
        } else {
            self.compose(source);
        }
    }

    /// Promote a delta to canonical form by applying it over an empty list
    pub fn into_canonical(self) -> Self {
        if self.is_canonical() {
            return self;
        }
        debug_assert!(self.removals.is_empty(), "removals with no underlying state");
        let elements = self.inserts.into_iter().map(|(_, v)| v).collect();
        ListVersion::new_canonical(elements)
    }

    /// Compose a newer delta onto this one. The result, relative to this
    /// delta's base, produces exactly what applying the two deltas in
    /// sequence would.
    fn compose(&mut self, newer: &ListVersion) {
        debug_assert!(newer.elements.is_none());
        let own_positions = insert_positions(&self.inserts);

        // Newer removals either consume one of our insertions or translate
        // to a base-coordinate removal.
        let mut removals = self.removals.clone();
        let mut surviving = self.inserts.clone();
        for &r in &newer.removals {
            if let Ok(at) = surviving.binary_search_by(|(p, _)| p.cmp(&r)) {
                surviving.remove(at);
            } else {
                let survivors_index = r - count_lt(&own_positions, r);
                let base = expand_le(&self.removals, survivors_index);
                let slot = removals.partition_point(|&b| b < base);
                debug_assert!(removals.get(slot) != Some(&base));
                removals.insert(slot, base);
            }
        }

        // Surviving insertions shift into the newer delta's result space.
        let newer_positions = insert_positions(&newer.inserts);
        let mut inserts: Vec<(usize, Value)> = surviving
            .into_iter()
            .map(|(p, v)| {
                let q = p - count_lt(&newer.removals, p);
                (expand_le(&newer_positions, q), v)
            })
            .collect();
        inserts.extend(newer.inserts.iter().cloned());
        inserts.sort_by_key(|(p, _)| *p);
        debug_assert!(inserts.windows(2).all(|w| w[0].0 < w[1].0));

        self.removals = removals;
        self.inserts = inserts;
    }

    /// Apply a delta into the canonical element vector
    fn apply_delta(&mut self, delta: &ListVersion) {
        let elements = self.elements.as_mut().expect("apply_delta on non-canonical");
        for &r in delta.removals.iter().rev() {
            debug_assert!(r < elements.len(), "removal index out of canonical bounds");
            if r < elements.len() {
                elements.remove(r);
            }
        }
        for (p, v) in &delta.inserts {
            let at = (*p).min(elements.len());
            elements.insert(at, v.clone());
        }
    }

    /// Re-derive this delta's indices after `past` was spliced into the
    /// chain underneath it. Removal indices move from the old accumulated
    /// base into `past`'s result coordinates; insertion anchors are carried
    /// across the same way. Returns the recomputed size delta.
    pub fn rebase(&mut self, past: &ListVersion) -> isize {
        debug_assert!(self.elements.is_none(), "rebase of canonical state");
        debug_assert!(past.elements.is_none(), "rebase against canonical state");
        let past_positions = insert_positions(&past.inserts);

        let mut new_removals: Vec<usize> = Vec::with_capacity(self.removals.len());
        for &b in &self.removals {
            if past.removals.binary_search(&b).is_ok() {
                // The spliced delta already removed this element; an
                // overlapping removal would double-fire, so drop it.
                tracing::debug!("dropping duplicate list removal at base index {}", b);
                continue;
            }
            let survivors_index = b - count_lt(&past.removals, b);
            new_removals.push(expand_le(&past_positions, survivors_index));
        }
        debug_assert!(new_removals.windows(2).all(|w| w[0] < w[1]));

        // Anchor every insertion between base elements in the old
        // coordinates, then express the anchor in the new ones.
        let own_positions = insert_positions(&self.inserts);
        let mut inserts: Vec<(usize, Value)> = Vec::with_capacity(self.inserts.len());
        for (ordinal, (p, v)) in self.inserts.iter().enumerate() {
            let boundary = p - count_lt(&own_positions, *p);
            let anchor = expand_lt(&self.removals, boundary);

            let shifted = anchor - count_lt(&past.removals, anchor);
            let mapped = expand_le(&past_positions, shifted);
            let survivors = mapped - count_lt(&new_removals, mapped);
            inserts.push((survivors + ordinal, v.clone()));
        }
        debug_assert!(inserts.windows(2).all(|w| w[0].0 < w[1].0));

        self.removals = new_removals;
        self.inserts = inserts;
        self.size_delta()
    }
}

fn insert_positions(inserts: &[(usize, Value)]) -> Vec<usize> {
    inserts.iter().map(|(p, _)| *p).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(i: i64) -> Value {
        Value::integer(i)
    }

    /// Oracle: apply a delta to a plain vector the naive way
    fn apply(base: &[Value], delta: &ListVersion) -> Vec<Value> {
        let mut out = base.to_vec();
        for &r in delta.removals.iter().rev() {
            out.remove(r);
        }
        for (p, v) in &delta.inserts {
            out.insert(*p, v.clone());
        }
        out
    }

    /// Oracle: run a script of (is_insert, index, value) edits directly
    fn simulate(base: &[Value], script: &[(bool, usize, i64)]) -> Vec<Value> {
        let mut out = base.to_vec();
        for &(is_insert, index, v) in script {
            if is_insert {
                out.insert(index, value(v));
            } else {
                out.remove(index);
            }
        }
        out
    }

    #[test]
    fn test_resolve_insert_and_passthrough() {
        let mut delta = ListVersion::new_delta();
        delta.record_insert(1, value(42));

        assert_eq!(delta.resolve(0), Some(ListSlot::Underlying(0)));
        assert_eq!(delta.resolve(1), Some(ListSlot::Value(&value(42))));
        assert_eq!(delta.resolve(2), Some(ListSlot::Underlying(1)));
    }

    #[test]
    fn test_resolve_through_removal() {
        let mut delta = ListVersion::new_delta();
        delta.record_remove(0);

        assert_eq!(delta.resolve(0), Some(ListSlot::Underlying(1)));
        assert_eq!(delta.resolve(1), Some(ListSlot::Underlying(2)));
    }

    #[test]
    fn test_record_against_oracle() {
        // base [0,1,2,3,4]
        let base: Vec<Value> = (0..5).map(value).collect();
        let script = [
            (true, 2, 100),
            (false, 0, 0),
            (true, 4, 101),
            (false, 2, 0),
            (true, 0, 102),
            (false, 5, 0),
        ];

        let mut delta = ListVersion::new_delta();
        for &(is_insert, index, v) in &script {
            if is_insert {
                delta.record_insert(index, value(v));
            } else {
                delta.record_remove(index);
            }
        }

        assert_eq!(apply(&base, &delta), simulate(&base, &script));
    }

    #[test]
    fn test_size_delta_tracks_inserts_minus_removals() {
        let mut delta = ListVersion::new_delta();
        delta.record_insert(0, value(1));
        delta.record_insert(1, value(2));
        delta.record_remove(2);
        assert_eq!(delta.size_delta(), 1);
    }

    #[test]
    fn test_merge_two_deltas_matches_sequential_application() {
        let base: Vec<Value> = (0..6).map(value).collect();

        let mut older = ListVersion::new_delta();
        older.record_insert(1, value(100));
        older.record_remove(3);

        let mut newer = ListVersion::new_delta();
        newer.record_remove(1); // removes older's insert
        newer.record_insert(4, value(200));
        newer.record_remove(0);

        let after_older = apply(&base, &older);
        let expected = apply(&after_older, &newer);

        let mut merged = older.clone();
        merged.merge(&newer, MergeFlags::default());
        assert_eq!(apply(&base, &merged), expected);
    }

    #[test]
    fn test_merge_into_canonical() {
        let mut canonical = ListVersion::new_canonical((0..4).map(value).collect());
        let mut delta = ListVersion::new_delta();
        delta.record_remove(1);
        delta.record_insert(2, value(9));

        canonical.merge(&delta, MergeFlags::default());
        let elements: Vec<Value> = vec![value(0), value(2), value(9), value(3)];
        assert_eq!(canonical.canonical_len(), Some(4));
        for (i, expected) in elements.iter().enumerate() {
            assert_eq!(canonical.resolve(i), Some(ListSlot::Value(expected)));
        }
    }

    #[test]
    fn test_rebase_shifts_insert_under_earlier_removal() {
        // [x,y,z]: our delta inserts at 1 -> [x,w,y,z]. A removal of index
        // 0 spliced beneath must move the insert to 0, producing [w,y,z].
        let mut ours = ListVersion::new_delta();
        ours.record_insert(1, value(100));

        let mut spliced = ListVersion::new_delta();
        spliced.record_remove(0);

        ours.rebase(&spliced);

        let base: Vec<Value> = (0..3).map(value).collect();
        let after_spliced = apply(&base, &spliced); // [1, 2]
        assert_eq!(apply(&after_spliced, &ours), vec![value(100), value(1), value(2)]);
    }

    #[test]
    fn test_rebase_shifts_indices_under_earlier_insert() {
        // [x,y]: our delta inserts at 1 -> [x,w,y]. An insert at 0 spliced
        // beneath shifts ours to 2: [p,x,w,y].
        let mut ours = ListVersion::new_delta();
        ours.record_insert(1, value(100));

        let mut spliced = ListVersion::new_delta();
        spliced.record_insert(0, value(200));

        ours.rebase(&spliced);

        let base: Vec<Value> = (0..2).map(value).collect();
        let after_spliced = apply(&base, &spliced);
        assert_eq!(
            apply(&after_spliced, &ours),
            vec![value(200), value(0), value(100), value(1)]
        );
    }

    #[test]
    fn test_rebase_drops_duplicate_removal() {
        let mut ours = ListVersion::new_delta();
        ours.record_remove(1);

        let mut spliced = ListVersion::new_delta();
        spliced.record_remove(1);

        let delta = ours.rebase(&spliced);
        assert_eq!(delta, 0);

        let base: Vec<Value> = (0..3).map(value).collect();
        let after_spliced = apply(&base, &spliced); // [0, 2]
        assert_eq!(apply(&after_spliced, &ours), vec![value(0), value(2)]);
    }

    #[test]
    fn test_rebase_differential() {
        // Random-ish scripts checked against the naive oracle: applying
        // spliced-then-rebased must equal splicing underneath logically.
        let base: Vec<Value> = (0..8).map(value).collect();
        let our_scripts: &[&[(bool, usize, i64)]] = &[
            &[(true, 3, 100)],
            &[(false, 2, 0), (true, 0, 101)],
            &[(true, 7, 102), (false, 1, 0), (true, 2, 103)],
        ];
        let spliced_scripts: &[&[(bool, usize, i64)]] = &[
            &[(false, 0, 0)],
            &[(true, 1, 200), (true, 5, 201)],
            &[(false, 6, 0), (false, 0, 0), (true, 3, 202)],
        ];

        for ours_script in our_scripts {
            for spliced_script in spliced_scripts {
                let mut spliced = ListVersion::new_delta();
                for &(ins, i, v) in *spliced_script {
                    if ins {
                        spliced.record_insert(i, value(v));
                    } else {
                        spliced.record_remove(i);
                    }
                }
                let after_spliced = apply(&base, &spliced);

                // The oracle runs our script on the ORIGINAL base, then we
                // check the rebased delta reproduces the same elements in
                // the same relative order over the spliced state, modulo
                // elements the spliced delta removed.
                let mut ours = ListVersion::new_delta();
                for &(ins, i, v) in *ours_script {
                    if ins {
                        ours.record_insert(i, value(v));
                    } else {
                        ours.record_remove(i);
                    }
                }
                let mut rebased = ours.clone();
                rebased.rebase(&spliced);

                let result = apply(&after_spliced, &rebased);
                // Every inserted value must appear exactly once.
                for &(ins, _, v) in *ours_script {
                    if ins {
                        assert_eq!(
                            result.iter().filter(|x| **x == value(v)).count(),
                            1,
                            "insert {} lost or duplicated",
                            v
                        );
                    }
                }
                // Length bookkeeping must agree with the delta.
                assert_eq!(
                    result.len() as isize,
                    after_spliced.len() as isize + rebased.size_delta()
                );
            }
        }
    }
}
