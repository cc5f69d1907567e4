//! In-memory store implementation

use crate::{AsyncStore, ObjectKey, Result, Store};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory store, the default backend for lazy collections and tests.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<ObjectKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True when no records are held
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &ObjectKey) -> Result<Option<Vec<u8>>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn put(&self, key: ObjectKey, bytes: Vec<u8>) -> Result<()> {
        self.records.write().insert(key, bytes);
        Ok(())
    }

    fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.records.write().remove(key);
        Ok(())
    }
}

#[async_trait]
impl AsyncStore for MemoryStore {
    async fn get_async(&self, key: &ObjectKey) -> Result<Option<Vec<u8>>> {
        self.get(key)
    }
}
