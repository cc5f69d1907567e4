//! weft-stm: snapshot/version management and commit protocol
//!
//! An in-process software transactional memory engine. Concurrent
//! transactions read consistent snapshots of shared object state, buffer
//! private writes, and publish them atomically by compare-and-swap on an
//! immutable snapshot chain, with validation against concurrent writers
//! and watcher-counted reclamation of obsolete version maps.
//!
//! ## Architecture
//!
//! - [`Branch`] owns the single atomically-swapped shared snapshot that
//!   all commits race on.
//! - [`Snapshot`] is an immutable ordered sequence of [`VersionMap`]s;
//!   index 0 holds the canonical merged state of every object.
//! - [`Transaction`] buffers private reads and writes against a pinned
//!   snapshot; nested transactions merge into their parent in memory.
//! - [`TransactionManager`] validates, publishes, propagates replicated
//!   batches, and compacts acknowledged maps into the base.
//! - Collection version types keep list edits as index deltas and keyed
//!   edits as per-key writes, so merges ship diffs, not copies.
//!
//! Storage systems plug in through `weft_store`; replication and
//! persistence subsystems attach as walkers, acknowledgers and source
//! splitters that run after each publication.

pub mod branch;
pub mod collections;
pub mod error;
pub mod extension;
pub mod handle;
pub mod manager;
pub mod map;
pub mod overload;
pub mod persist;
pub mod retry;
pub mod snapshot;
pub mod transaction;
pub mod version;

pub use branch::{Branch, BranchConfig, CommitFuture};
pub use error::{Error, Result};
pub use extension::{Acknowledger, Walker};
pub use handle::{TCell, TLazyMap, TList, TMap, TRecord};
pub use manager::{CommitOutcome, TransactionManager};
pub use map::{VersionMap, Watchers};
pub use overload::{LogOverloadHandler, OverloadHandler};
pub use persist::StoreWalker;
pub use retry::RetryPolicy;
pub use snapshot::{SlowChanging, Snapshot};
pub use transaction::{flags, Transaction};
pub use version::{FieldsVersion, MergeFlags, ObjectKind, Version, VersionBody};

// Re-export the shared leaf types alongside the engine surface.
pub use weft_common::{CommitStatus, ConflictPolicy, FieldId, Key, MapId, ObjectId, Source, Value};
