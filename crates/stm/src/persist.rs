//! Store-backed persistence walker
//!
//! A minimal walker that flushes committed lazy-map entries to a backing
//! store. Soft-cached lazy maps retain nothing in the shared state, so
//! without a flusher their committed writes would only live in the chain
//! until compaction; this walker is the in-process stand-in for the page
//! store's flusher.

use crate::branch::Branch;
use crate::extension::Walker;
use crate::version::VersionBody;
use std::sync::Arc;
use weft_common::MapId;
use weft_store::{ObjectKey, Store};

/// Walker writing lazy-map entries of each published map to a store.
pub struct StoreWalker {
    store: Arc<dyn Store>,
}

impl StoreWalker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl Walker for StoreWalker {
    fn request_run(&self, branch: &Arc<Branch>, map: MapId) {
        let snapshot = branch.snapshot();
        let Some(index) = snapshot.index_of(map) else {
            // Already merged; a later walker run covered it.
            return;
        };
        let map = &snapshot.maps()[index];
        for version in map.versions() {
            let VersionBody::Lazy(lazy) = version.body() else {
                continue;
            };
            for (key, write) in lazy.writes() {
                let record = ObjectKey::entry(version.object(), key.clone());
                let result = match write {
                    Some(value) => match serde_json::to_vec(value) {
                        Ok(bytes) => self.store.put(record, bytes),
                        Err(error) => {
                            tracing::warn!(%error, object = %version.object(), "lazy entry not encodable");
                            continue;
                        }
                    },
                    None => self.store.delete(&record),
                };
                if let Err(error) = result {
                    // Background flush; the commit already succeeded.
                    tracing::warn!(%error, object = %version.object(), "lazy entry flush failed");
                }
            }
        }
    }
}
