//! Backing-store traits and types for the weft engine
//!
//! The engine core never touches a page file or a write-ahead log; it
//! consumes storage through the narrow interface in this crate. Lazily
//! loaded collections fetch evicted entries here, and persistence walkers
//! write committed state back out. The record layout behind `get`/`put` is
//! the backend's business.

mod error;
mod memory;

pub use error::{Error, Result};
pub use memory::MemoryStore;

use async_trait::async_trait;
use weft_common::{Key, ObjectId};

/// Address of one stored record: a whole object, or one entry of a keyed
/// object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Owning object
    pub object: ObjectId,
    /// Entry key for per-entry records, `None` for whole-object records
    pub entry: Option<Key>,
}

impl ObjectKey {
    /// Address a whole object
    pub fn object(object: ObjectId) -> Self {
        Self { object, entry: None }
    }

    /// Address one entry of a keyed object
    pub fn entry(object: ObjectId, key: Key) -> Self {
        Self { object, entry: Some(key) }
    }
}

/// Synchronous record access.
pub trait Store: Send + Sync {
    /// Read a record, `None` when absent
    fn get(&self, key: &ObjectKey) -> Result<Option<Vec<u8>>>;

    /// Write a record
    fn put(&self, key: ObjectKey, bytes: Vec<u8>) -> Result<()>;

    /// Delete a record; deleting an absent record is not an error
    fn delete(&self, key: &ObjectKey) -> Result<()>;
}

/// Asynchronous record access, for callers that must not block on a missing
/// lazily-loaded value.
#[async_trait]
pub trait AsyncStore: Send + Sync {
    /// Read a record without blocking the caller's thread
    async fn get_async(&self, key: &ObjectKey) -> Result<Option<Vec<u8>>>;
}
