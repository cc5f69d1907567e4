//! Typed handles over transactional objects
//!
//! Handles are thin: an object identity plus a weak branch back-reference,
//! cheap to recreate on demand and never part of a retaining cycle. All
//! state lives in the branch's snapshot chain; handle operations run
//! against an explicit transaction, registering reads and buffering writes
//! in its private version set.

use crate::branch::Branch;
use crate::collections::{KeyedSlot, LazyMode, ListSlot};
use crate::error::{Error, Result};
use crate::transaction::{flags, Transaction};
use crate::version::VersionBody;
use std::sync::{Arc, Weak};
use weft_common::{FieldId, Key, ObjectId, Value};
use weft_store::{ObjectKey, Store};

fn upgrade(branch: &Weak<Branch>) -> Result<Arc<Branch>> {
    branch.upgrade().ok_or(Error::BranchGone)
}

// === FIELDS ===

/// Handle over a multi-field object.
#[derive(Clone)]
pub struct TRecord {
    object: ObjectId,
    branch: Weak<Branch>,
}

impl TRecord {
    pub fn new(branch: &Arc<Branch>) -> Self {
        Self { object: branch.create_fields_object(), branch: Arc::downgrade(branch) }
    }

    /// Recreate a handle for an existing fields object
    pub fn attach(branch: &Arc<Branch>, object: ObjectId) -> Self {
        Self { object, branch: Arc::downgrade(branch) }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Read one field through the transaction's visible version chain
    pub fn get_field(&self, txn: &mut Transaction, field: FieldId) -> Result<Option<Value>> {
        if field.as_u32() >= FieldId::MAX_FIELDS {
            return Err(Error::FieldOutOfRange(field.as_u32()));
        }
        txn.record_read(self.object);
        for version in txn.versions_of(self.object) {
            if let VersionBody::Fields(fields) = version.body() {
                if let Some(value) = fields.get(field) {
                    return Ok(Some(value.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Buffer a field write in the transaction
    pub fn set_field(&self, txn: &mut Transaction, field: FieldId, value: Value) -> Result<()> {
        if field.as_u32() >= FieldId::MAX_FIELDS {
            return Err(Error::FieldOutOfRange(field.as_u32()));
        }
        let version = txn.version_mut(self.object)?;
        match version.body_mut() {
            VersionBody::Fields(fields) => {
                fields.set(field, value);
                Ok(())
            }
            _ => Err(Error::KindMismatch(self.object)),
        }
    }
}

/// Handle over a single-slot object (field 0 of a fields object).
#[derive(Clone)]
pub struct TCell {
    record: TRecord,
}

impl TCell {
    pub fn new(branch: &Arc<Branch>) -> Self {
        Self { record: TRecord::new(branch) }
    }

    pub fn attach(branch: &Arc<Branch>, object: ObjectId) -> Self {
        Self { record: TRecord::attach(branch, object) }
    }

    pub fn object(&self) -> ObjectId {
        self.record.object
    }

    pub fn get(&self, txn: &mut Transaction) -> Result<Option<Value>> {
        self.record.get_field(txn, FieldId::new(0))
    }

    pub fn set(&self, txn: &mut Transaction, value: Value) -> Result<()> {
        self.record.set_field(txn, FieldId::new(0), value)
    }

    /// Read in a one-shot auto-commit transaction
    pub fn get_atomic(&self) -> Result<Option<Value>> {
        let branch = upgrade(&self.record.branch)?;
        branch.atomically_with_flags(flags::AUTO, &mut |txn| self.get(txn))
    }

    /// Write in a one-shot auto-commit transaction
    pub fn set_atomic(&self, value: Value) -> Result<()> {
        let branch = upgrade(&self.record.branch)?;
        branch.atomically_with_flags(flags::AUTO, &mut |txn| self.set(txn, value.clone()))
    }
}

// === LIST ===

/// Handle over an ordered list.
#[derive(Clone)]
pub struct TList {
    object: ObjectId,
    branch: Weak<Branch>,
}

impl TList {
    pub fn new(branch: &Arc<Branch>) -> Self {
        Self { object: branch.create_list_object(), branch: Arc::downgrade(branch) }
    }

    pub fn attach(branch: &Arc<Branch>, object: ObjectId) -> Self {
        Self { object, branch: Arc::downgrade(branch) }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn len(&self, txn: &mut Transaction) -> usize {
        txn.record_read(self.object);
        let mut delta: isize = 0;
        for version in txn.versions_of(self.object) {
            if let VersionBody::List(list) = version.body() {
                if let Some(len) = list.canonical_len() {
                    return (len as isize + delta).max(0) as usize;
                }
                delta += list.size_delta();
            }
        }
        delta.max(0) as usize
    }

    pub fn is_empty(&self, txn: &mut Transaction) -> bool {
        self.len(txn) == 0
    }

    /// Read one element, resolving the index down through each delta
    pub fn get(&self, txn: &mut Transaction, index: usize) -> Option<Value> {
        txn.record_read(self.object);
        let mut index = index;
        for version in txn.versions_of(self.object) {
            if let VersionBody::List(list) = version.body() {
                match list.resolve(index)? {
                    ListSlot::Value(value) => return Some(value.clone()),
                    ListSlot::Underlying(underlying) => index = underlying,
                }
            }
        }
        None
    }

    pub fn insert(&self, txn: &mut Transaction, index: usize, value: Value) -> Result<()> {
        let len = self.len(txn);
        if index > len {
            return Err(Error::IndexOutOfRange(index));
        }
        self.list_mut(txn)?.record_insert(index, value);
        Ok(())
    }

    pub fn push(&self, txn: &mut Transaction, value: Value) -> Result<()> {
        let len = self.len(txn);
        self.list_mut(txn)?.record_insert(len, value);
        Ok(())
    }

    pub fn remove(&self, txn: &mut Transaction, index: usize) -> Result<()> {
        let len = self.len(txn);
        if index >= len {
            return Err(Error::IndexOutOfRange(index));
        }
        self.list_mut(txn)?.record_remove(index);
        Ok(())
    }

    pub fn set(&self, txn: &mut Transaction, index: usize, value: Value) -> Result<()> {
        let len = self.len(txn);
        if index >= len {
            return Err(Error::IndexOutOfRange(index));
        }
        self.list_mut(txn)?.record_set(index, value);
        Ok(())
    }

    /// Materialize the visible list
    pub fn to_vec(&self, txn: &mut Transaction) -> Vec<Value> {
        let len = self.len(txn);
        (0..len).filter_map(|i| self.get(txn, i)).collect()
    }

    fn list_mut<'a>(
        &self,
        txn: &'a mut Transaction,
    ) -> Result<&'a mut crate::collections::ListVersion> {
        let version = txn.version_mut(self.object)?;
        match version.body_mut() {
            VersionBody::List(list) => Ok(list),
            _ => Err(Error::KindMismatch(self.object)),
        }
    }
}

// === KEYED ===

/// Handle over a keyed collection.
#[derive(Clone)]
pub struct TMap {
    object: ObjectId,
    branch: Weak<Branch>,
}

impl TMap {
    pub fn new(branch: &Arc<Branch>) -> Self {
        Self { object: branch.create_keyed_object(), branch: Arc::downgrade(branch) }
    }

    pub fn attach(branch: &Arc<Branch>, object: ObjectId) -> Self {
        Self { object, branch: Arc::downgrade(branch) }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn get(&self, txn: &mut Transaction, key: &Key) -> Option<Value> {
        txn.record_read(self.object);
        for version in txn.versions_of(self.object) {
            if let VersionBody::Keyed(keyed) = version.body() {
                match keyed.get(key) {
                    KeyedSlot::Present(value) => return Some(value.clone()),
                    KeyedSlot::Absent => return None,
                    KeyedSlot::Miss => {}
                }
            }
        }
        None
    }

    pub fn contains(&self, txn: &mut Transaction, key: &Key) -> bool {
        self.get(txn, key).is_some()
    }

    pub fn insert(&self, txn: &mut Transaction, key: Key, value: Value) -> Result<()> {
        let existed = self.get(txn, &key).is_some();
        self.keyed_mut(txn)?.record_put(key, value, existed);
        Ok(())
    }

    pub fn remove(&self, txn: &mut Transaction, key: Key) -> Result<()> {
        let existed = self.get(txn, &key).is_some();
        self.keyed_mut(txn)?.record_remove(key, existed);
        Ok(())
    }

    pub fn clear(&self, txn: &mut Transaction) -> Result<()> {
        let visible_len = self.len(txn);
        self.keyed_mut(txn)?.record_clear(visible_len);
        Ok(())
    }

    /// Entry count: size deltas summed down to the canonical state
    pub fn len(&self, txn: &mut Transaction) -> usize {
        txn.record_read(self.object);
        let mut delta: isize = 0;
        for version in txn.versions_of(self.object) {
            if let VersionBody::Keyed(keyed) = version.body() {
                if let Some(len) = keyed.canonical_len() {
                    return (len as isize + delta).max(0) as usize;
                }
                delta += keyed.size_delta();
            }
        }
        delta.max(0) as usize
    }

    pub fn is_empty(&self, txn: &mut Transaction) -> bool {
        self.len(txn) == 0
    }

    /// Materialize the visible entries
    pub fn entries(&self, txn: &mut Transaction) -> std::collections::HashMap<Key, Value> {
        txn.record_read(self.object);
        let mut seen = std::collections::HashSet::new();
        let mut out = std::collections::HashMap::new();
        for version in txn.versions_of(self.object) {
            if let VersionBody::Keyed(keyed) = version.body() {
                for (key, write) in keyed.writes() {
                    if seen.insert(key.clone()) {
                        if let Some(value) = write {
                            out.insert(key.clone(), value.clone());
                        }
                    }
                }
                if keyed.is_terminal() {
                    break;
                }
            }
        }
        out
    }

    fn keyed_mut<'a>(
        &self,
        txn: &'a mut Transaction,
    ) -> Result<&'a mut crate::collections::KeyedVersion> {
        let version = txn.version_mut(self.object)?;
        match version.body_mut() {
            VersionBody::Keyed(keyed) => Ok(keyed),
            _ => Err(Error::KindMismatch(self.object)),
        }
    }
}

// === LAZY MAP ===

/// Handle over a store-backed lazy map.
#[derive(Clone)]
pub struct TLazyMap {
    object: ObjectId,
    branch: Weak<Branch>,
}

impl TLazyMap {
    /// Create a lazy map over `store` with a bounded in-memory cache
    pub fn new(
        branch: &Arc<Branch>,
        mode: LazyMode,
        store: Arc<dyn Store>,
        cache_capacity: usize,
    ) -> Self {
        Self {
            object: branch.create_lazy_object(mode, store, cache_capacity),
            branch: Arc::downgrade(branch),
        }
    }

    pub fn attach(branch: &Arc<Branch>, object: ObjectId) -> Self {
        Self { object, branch: Arc::downgrade(branch) }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Read an entry: pending writes, then the chain, then the cache, then
    /// the backing store (populating the cache on the way back)
    pub fn get(&self, txn: &mut Transaction, key: &Key) -> Result<Option<Value>> {
        txn.record_read(self.object);
        match self.resolve_in_chain(txn, key) {
            ChainLookup::Settled(value) => return Ok(value),
            ChainLookup::FallThrough => {}
        }
        let branch = upgrade(&self.branch)?;
        let Some((cache, store)) = branch.lazy_parts(self.object) else {
            return Ok(None);
        };
        if let Some(value) = cache.lock().get(key).cloned() {
            return Ok(Some(value));
        }
        let record = ObjectKey::entry(self.object, key.clone());
        match store.get(&record)? {
            Some(bytes) => {
                let value: Value = serde_json::from_slice(&bytes)?;
                cache.lock().put(key.clone(), value.clone());
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Read an entry without blocking on a store miss
    pub async fn get_async(&self, txn: &mut Transaction, key: &Key) -> Result<Option<Value>> {
        txn.record_read(self.object);
        match self.resolve_in_chain(txn, key) {
            ChainLookup::Settled(value) => return Ok(value),
            ChainLookup::FallThrough => {}
        }
        let branch = upgrade(&self.branch)?;
        let Some((cache, _)) = branch.lazy_parts(self.object) else {
            return Ok(None);
        };
        if let Some(value) = cache.lock().get(key).cloned() {
            return Ok(Some(value));
        }
        let Some(async_store) = branch.lazy_async_store(self.object) else {
            return Err(Error::InvalidOperation(
                "lazy object has no async store".to_string(),
            ));
        };
        let record = ObjectKey::entry(self.object, key.clone());
        match async_store.get_async(&record).await? {
            Some(bytes) => {
                let value: Value = serde_json::from_slice(&bytes)?;
                cache.lock().put(key.clone(), value.clone());
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn put(&self, txn: &mut Transaction, key: Key, value: Value) -> Result<()> {
        let version = txn.version_mut(self.object)?;
        match version.body_mut() {
            VersionBody::Lazy(lazy) => {
                lazy.record_put(key, value);
                Ok(())
            }
            _ => Err(Error::KindMismatch(self.object)),
        }
    }

    pub fn remove(&self, txn: &mut Transaction, key: Key) -> Result<()> {
        let version = txn.version_mut(self.object)?;
        match version.body_mut() {
            VersionBody::Lazy(lazy) => {
                lazy.record_remove(key);
                Ok(())
            }
            _ => Err(Error::KindMismatch(self.object)),
        }
    }

    fn resolve_in_chain(&self, txn: &Transaction, key: &Key) -> ChainLookup {
        for version in txn.versions_of(self.object) {
            if let VersionBody::Lazy(lazy) = version.body() {
                match lazy.get(key) {
                    KeyedSlot::Present(value) => {
                        return ChainLookup::Settled(Some(value.clone()))
                    }
                    KeyedSlot::Absent => return ChainLookup::Settled(None),
                    KeyedSlot::Miss => {}
                }
            }
        }
        ChainLookup::FallThrough
    }
}

enum ChainLookup {
    /// The chain answered definitively
    Settled(Option<Value>),
    /// Nothing in the chain holds the key; consult cache and store
    FallThrough,
}
