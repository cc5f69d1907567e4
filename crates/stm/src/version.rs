//! Object versions: private deltas and canonical merged state
//!
//! A `Version` is one object's state change. While a transaction runs it is
//! a *private* delta owned by that transaction's write set; after commit the
//! same value, now immutable inside a `VersionMap`, is the committed delta.
//! The canonical ("shared") state of every object lives in the base map at
//! snapshot index 0 and is only ever replaced by the copy-on-merge
//! compaction step, so no thread can observe a partially applied merge.

use crate::collections::{KeyedVersion, LazyMode, LazyVersion, ListVersion};
use weft_common::{FieldId, ObjectId, Value};

/// Kind of a transactional object, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Indexed fields (records, cells)
    Fields,
    /// Ordered list with index-delta versions
    List,
    /// Keyed collection
    Keyed,
    /// Keyed collection with store-backed lazy loading
    Lazy(LazyMode),
}

/// Flags controlling a merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeFlags {
    /// Merging a nested transaction's writes into its parent's private
    /// write set, rather than publishing into the snapshot chain
    pub private: bool,
}

impl MergeFlags {
    /// Flags for a nested-transaction merge
    pub fn private() -> Self {
        Self { private: true }
    }
}

/// One object's versioned state: a delta, or the canonical merged form.
#[derive(Debug, Clone)]
pub struct Version {
    object: ObjectId,
    body: VersionBody,
}

/// The per-kind payload of a version.
#[derive(Debug, Clone)]
pub enum VersionBody {
    Fields(FieldsVersion),
    List(ListVersion),
    Keyed(KeyedVersion),
    Lazy(LazyVersion),
}

impl Version {
    pub fn new(object: ObjectId, body: VersionBody) -> Self {
        Self { object, body }
    }

    /// Empty private delta for an object of the given kind
    pub fn empty_delta(object: ObjectId, kind: ObjectKind) -> Self {
        let body = match kind {
            ObjectKind::Fields => VersionBody::Fields(FieldsVersion::new()),
            ObjectKind::List => VersionBody::List(ListVersion::new_delta()),
            ObjectKind::Keyed => VersionBody::Keyed(KeyedVersion::new_delta()),
            ObjectKind::Lazy(mode) => VersionBody::Lazy(LazyVersion::new_delta_with_mode(mode)),
        };
        Self { object, body }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn body(&self) -> &VersionBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut VersionBody {
        &mut self.body
    }

    pub fn kind(&self) -> ObjectKind {
        match &self.body {
            VersionBody::Fields(_) => ObjectKind::Fields,
            VersionBody::List(_) => ObjectKind::List,
            VersionBody::Keyed(_) => ObjectKind::Keyed,
            VersionBody::Lazy(v) => ObjectKind::Lazy(v.mode()),
        }
    }

    /// Fold `source` (newer) into `self` (older). `source` is left
    /// untouched; concurrent readers may still be walking it.
    ///
    /// Panics when the two versions disagree on kind: versions are keyed by
    /// object identity and an object's kind is fixed at creation, so a
    /// mismatch here means the chain is corrupt.
    pub fn merge(&mut self, source: &Version, flags: MergeFlags) {
        assert_eq!(
            self.object, source.object,
            "merge across object identities ({} vs {})",
            self.object, source.object
        );
        match (&mut self.body, &source.body) {
            (VersionBody::Fields(target), VersionBody::Fields(src)) => target.merge(src, flags),
            (VersionBody::List(target), VersionBody::List(src)) => target.merge(src, flags),
            (VersionBody::Keyed(target), VersionBody::Keyed(src)) => target.merge(src, flags),
            (VersionBody::Lazy(target), VersionBody::Lazy(src)) => target.merge(src, flags),
            _ => panic!("version kind mismatch for {}", self.object),
        }
    }

    /// Re-derive order-sensitive addressing after `past` was spliced into
    /// the chain underneath this version. Only lists carry positional
    /// state; other kinds are unaffected.
    ///
    /// Returns true when the version changed.
    pub fn on_past_changed(&mut self, past: &Version) -> bool {
        if self.object != past.object {
            return false;
        }
        match (&mut self.body, &past.body) {
            (VersionBody::List(target), VersionBody::List(inserted)) => {
                target.rebase(inserted);
                true
            }
            _ => false,
        }
    }

    /// Promote a committed delta to canonical form, as if merged onto an
    /// object that had no prior state.
    pub fn into_canonical(self) -> Version {
        let body = match self.body {
            VersionBody::Fields(v) => VersionBody::Fields(v),
            VersionBody::List(v) => VersionBody::List(v.into_canonical()),
            VersionBody::Keyed(v) => VersionBody::Keyed(v.into_canonical()),
            VersionBody::Lazy(v) => VersionBody::Lazy(v.into_canonical()),
        };
        Version { object: self.object, body }
    }
}

/// Indexed-fields version: a dirty mask plus value slots.
///
/// The canonical form is the same representation with every ever-written
/// field marked dirty, so merge is a single overlay in both directions.
#[derive(Debug, Clone, Default)]
pub struct FieldsVersion {
    dirty: u64,
    values: Vec<Option<Value>>,
}

impl FieldsVersion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dirty mask; bit n set means field n carries a value here
    pub fn dirty_mask(&self) -> u64 {
        self.dirty
    }

    pub fn is_dirty(&self, field: FieldId) -> bool {
        self.dirty & (1u64 << field.as_u32()) != 0
    }

    /// Value of a field, if written in this version
    pub fn get(&self, field: FieldId) -> Option<&Value> {
        if !self.is_dirty(field) {
            return None;
        }
        self.values.get(field.as_usize()).and_then(|slot| slot.as_ref())
    }

    /// Record a field write
    pub fn set(&mut self, field: FieldId, value: Value) {
        let index = field.as_usize();
        if self.values.len() <= index {
            self.values.resize(index + 1, None);
        }
        self.values[index] = Some(value);
        self.dirty |= 1u64 << field.as_u32();
    }

    fn merge(&mut self, source: &FieldsVersion, _flags: MergeFlags) {
        let mut mask = source.dirty;
        while mask != 0 {
            let index = mask.trailing_zeros();
            mask &= mask - 1;
            let field = FieldId::new(index);
            if let Some(value) = source.get(field) {
                self.set(field, value.clone());
            }
        }
    }
}
