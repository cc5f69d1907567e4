//! Branch: the CAS arena holding one snapshot chain
//!
//! A branch owns the single atomically-swapped shared-snapshot reference
//! that all commits race on, plus everything whose lifetime matches the
//! branch: object registry, id allocators, transaction pools, extension
//! registry, backpressure handler and pending acknowledgement futures.

use crate::error::{Error, Result};
use crate::extension::{Acknowledger, ExtensionRegistry, Walker};
use crate::manager::{self, CommitOutcome};
use crate::overload::{LogOverloadHandler, OverloadHandler};
use crate::retry::RetryPolicy;
use crate::snapshot::{SlowChanging, Snapshot};
use crate::transaction::{Shell, Transaction};
use crate::version::ObjectKind;
use crate::collections::LazyMode;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;
use weft_common::{CommitStatus, ConflictPolicy, Key, MapId, ObjectId, Source, Value};
use weft_store::{AsyncStore, Store};

/// Per-branch configuration.
#[derive(Debug, Clone, Copy)]
pub struct BranchConfig {
    /// Conflict-detection policy for commit validation
    pub policy: ConflictPolicy,
    /// Chain length at which the overload handler gets a soft notification
    pub map_queue_threshold: usize,
    /// Chain length at which the overload handler may block committers
    pub map_queue_maximum: usize,
    /// Pacing for the commit CAS retry loop
    pub retry: RetryPolicy,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            policy: ConflictPolicy::default(),
            map_queue_threshold: 64,
            map_queue_maximum: 256,
            retry: RetryPolicy::default(),
        }
    }
}

/// The atomically-swapped shared-snapshot cell.
///
/// `compare_and_swap` succeeds only against the exact snapshot the caller
/// loaded, so publication keeps single-winner-per-index semantics; losers
/// observe the current snapshot and retry. Loads clone the `Arc` under a
/// short critical section.
pub(crate) struct SnapshotCell {
    inner: Mutex<Arc<Snapshot>>,
}

impl SnapshotCell {
    fn new(snapshot: Snapshot) -> Self {
        Self { inner: Mutex::new(Arc::new(snapshot)) }
    }

    pub(crate) fn load(&self) -> Arc<Snapshot> {
        self.inner.lock().clone()
    }

    /// Publish `new` iff the cell still holds exactly `expected`.
    /// On failure the current snapshot is returned for the retry.
    pub(crate) fn compare_and_swap(
        &self,
        expected: &Arc<Snapshot>,
        new: Arc<Snapshot>,
    ) -> std::result::Result<(), Arc<Snapshot>> {
        let mut guard = self.inner.lock();
        if Arc::ptr_eq(&*guard, expected) {
            *guard = new;
            Ok(())
        } else {
            Err(guard.clone())
        }
    }
}

/// Registered facts about one transactional object.
pub(crate) struct ObjectMeta {
    pub(crate) kind: ObjectKind,
    /// Bounded entry cache, lazy objects only
    pub(crate) cache: Option<Arc<Mutex<LruCache<Key, Value>>>>,
    /// Backing store, lazy objects only
    pub(crate) store: Option<Arc<dyn Store>>,
    pub(crate) async_store: Option<Arc<dyn AsyncStore>>,
}

/// One logical partition of the object graph, with its own snapshot chain.
pub struct Branch {
    id: Uuid,
    config: BranchConfig,
    shared: SnapshotCell,
    next_object: AtomicU64,
    next_map: AtomicU64,
    objects: RwLock<HashMap<ObjectId, ObjectMeta>>,
    extensions: RwLock<ExtensionRegistry>,
    overload: RwLock<Arc<dyn OverloadHandler>>,
    overload_notified: AtomicBool,
    pending_acks: Mutex<Vec<(MapId, oneshot::Sender<CommitStatus>)>>,
    public_pool: Mutex<Vec<Shell>>,
    private_pool: Mutex<Vec<Shell>>,
}

impl Branch {
    pub fn new() -> Arc<Self> {
        Self::with_config(BranchConfig::default())
    }

    pub fn with_config(config: BranchConfig) -> Arc<Self> {
        let branch = Arc::new(Self {
            id: Uuid::now_v7(),
            config,
            shared: SnapshotCell::new(Snapshot::initial()),
            next_object: AtomicU64::new(0),
            next_map: AtomicU64::new(1),
            objects: RwLock::new(HashMap::new()),
            extensions: RwLock::new(ExtensionRegistry::default()),
            overload: RwLock::new(Arc::new(LogOverloadHandler)),
            overload_notified: AtomicBool::new(false),
            pending_acks: Mutex::new(Vec::new()),
            public_pool: Mutex::new(Vec::new()),
            private_pool: Mutex::new(Vec::new()),
        });
        tracing::info!(branch = %branch.id, "branch created");
        branch
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &BranchConfig {
        &self.config
    }

    /// The current shared snapshot. Lock-free for all practical purposes:
    /// the critical section is one `Arc` clone.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.shared.load()
    }

    pub(crate) fn cell(&self) -> &SnapshotCell {
        &self.shared
    }

    pub(crate) fn alloc_map_id(&self) -> MapId {
        MapId::from_raw(self.next_map.fetch_add(1, Ordering::Relaxed))
    }

    // === OBJECT REGISTRY ===

    fn register(&self, meta: ObjectMeta) -> ObjectId {
        let object = ObjectId::from_raw(self.next_object.fetch_add(1, Ordering::Relaxed));
        self.objects.write().insert(object, meta);
        object
    }

    /// Create a fields object (records, cells)
    pub fn create_fields_object(&self) -> ObjectId {
        self.register(ObjectMeta {
            kind: ObjectKind::Fields,
            cache: None,
            store: None,
            async_store: None,
        })
    }

    /// Create a list object
    pub fn create_list_object(&self) -> ObjectId {
        self.register(ObjectMeta {
            kind: ObjectKind::List,
            cache: None,
            store: None,
            async_store: None,
        })
    }

    /// Create a keyed object
    pub fn create_keyed_object(&self) -> ObjectId {
        self.register(ObjectMeta {
            kind: ObjectKind::Keyed,
            cache: None,
            store: None,
            async_store: None,
        })
    }

    /// Create a lazy map backed by `store`, caching at most
    /// `cache_capacity` entries in memory
    pub fn create_lazy_object(
        &self,
        mode: LazyMode,
        store: Arc<dyn Store>,
        cache_capacity: usize,
    ) -> ObjectId {
        self.create_lazy_object_full(mode, store, None, cache_capacity)
    }

    /// Lazy map with an additional async store for non-blocking fetches
    pub fn create_lazy_object_full(
        &self,
        mode: LazyMode,
        store: Arc<dyn Store>,
        async_store: Option<Arc<dyn AsyncStore>>,
        cache_capacity: usize,
    ) -> ObjectId {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        self.register(ObjectMeta {
            kind: ObjectKind::Lazy(mode),
            cache: Some(Arc::new(Mutex::new(LruCache::new(capacity)))),
            store: Some(store),
            async_store,
        })
    }

    /// Kind of a registered object
    pub fn kind_of(&self, object: ObjectId) -> Option<ObjectKind> {
        self.objects.read().get(&object).map(|m| m.kind)
    }

    pub(crate) fn lazy_parts(
        &self,
        object: ObjectId,
    ) -> Option<(Arc<Mutex<LruCache<Key, Value>>>, Arc<dyn Store>)> {
        let objects = self.objects.read();
        let meta = objects.get(&object)?;
        Some((meta.cache.clone()?, meta.store.clone()?))
    }

    pub(crate) fn lazy_async_store(&self, object: ObjectId) -> Option<Arc<dyn AsyncStore>> {
        self.objects.read().get(&object)?.async_store.clone()
    }

    /// Drop cached entries an incoming map overwrote, so later reads
    /// refetch through the store
    pub(crate) fn invalidate_lazy_caches(&self, versions: &[(ObjectId, Vec<Key>)]) {
        let objects = self.objects.read();
        for (object, keys) in versions {
            if let Some(cache) = objects.get(object).and_then(|m| m.cache.as_ref()) {
                let mut cache = cache.lock();
                for key in keys {
                    cache.pop(key);
                }
            }
        }
    }

    // === TRANSACTIONS ===

    /// Begin a public transaction against the current snapshot
    pub fn begin(self: &Arc<Self>) -> Transaction {
        self.begin_with_flags(0)
    }

    /// Begin with explicit flags (see [`crate::transaction::flags`])
    pub fn begin_with_flags(self: &Arc<Self>, txn_flags: u8) -> Transaction {
        let shell = self.public_pool.lock().pop().unwrap_or_default();
        // Pin the head map of the snapshot we start from; a failed pin
        // means the head is being compacted away, so reload.
        let (snapshot, pinned) = loop {
            let snapshot = self.shared.load();
            let head = snapshot.head().clone();
            if head.watchers().try_add(1) {
                break (snapshot, head);
            }
            std::hint::spin_loop();
        };
        Transaction::from_parts(Arc::clone(self), snapshot, Some(pinned), shell, txn_flags)
    }

    /// Run `body` in a transaction, committing on success and re-running
    /// on conflict per the branch retry policy. Panics abort the
    /// transaction and propagate after state is cleaned up.
    pub fn atomically<T>(
        self: &Arc<Self>,
        mut body: impl FnMut(&mut Transaction) -> Result<T>,
    ) -> Result<T> {
        self.atomically_with_flags(0, &mut body)
    }

    pub(crate) fn atomically_with_flags<T>(
        self: &Arc<Self>,
        txn_flags: u8,
        body: &mut dyn FnMut(&mut Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut conflicts = 0u32;
        loop {
            let mut txn = self.begin_with_flags(txn_flags);
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(&mut txn)));
            let value = match outcome {
                Ok(Ok(value)) => value,
                Ok(Err(error)) => {
                    txn.abort();
                    return Err(error);
                }
                Err(panic) => {
                    txn.abort();
                    std::panic::resume_unwind(panic);
                }
            };
            match txn.commit() {
                CommitOutcome { status: CommitStatus::Success, .. } => return Ok(value),
                CommitOutcome { status: CommitStatus::Conflict, .. } => {
                    conflicts += 1;
                    if self.config.retry.exhausted(conflicts) {
                        return Err(Error::RetriesExhausted);
                    }
                    self.config.retry.backoff(conflicts);
                }
                CommitOutcome { status: CommitStatus::Abort, .. } => {
                    return Err(Error::BranchDisconnected);
                }
            }
        }
    }

    pub(crate) fn recycle_public(&self, shell: Shell) {
        self.public_pool.lock().push(shell);
    }

    pub(crate) fn recycle_private(&self, shell: Shell) {
        self.private_pool.lock().push(shell);
    }

    pub(crate) fn take_private_shell(&self) -> Shell {
        self.private_pool.lock().pop().unwrap_or_default()
    }

    // === EXTENSIONS ===

    /// Register a walker, notified after every publication
    pub fn register_walker(&self, walker: Arc<dyn Walker>) {
        self.extensions.write().walkers.push(walker);
    }

    /// Register an acknowledger. While any acknowledger is registered,
    /// commits return pending futures and the watermark only advances via
    /// [`Branch::acknowledge`].
    pub fn register_acknowledger(&self, acknowledger: Arc<dyn Acknowledger>) {
        self.extensions.write().acknowledgers.push(acknowledger);
    }

    /// Register a source splitter (no-merge extension): every published
    /// map carries one extra watcher until [`Branch::release_map`] is
    /// called for it.
    pub fn add_source_splitter(&self) {
        self.extensions.write().splitters += 1;
    }

    /// Release a no-merge extension's watcher on `map` after processing it
    pub fn release_map(self: &Arc<Self>, map: MapId) {
        let snapshot = self.shared.load();
        if let Some(index) = snapshot.index_of(map) {
            if snapshot.maps()[index].watchers().remove(1) {
                manager::compact(self);
            }
        } else {
            tracing::warn!(branch = %self.id, %map, "release of a map no longer in the chain");
        }
    }

    pub(crate) fn extension_watchers(&self) -> usize {
        self.extensions.read().no_merge_watchers()
    }

    pub(crate) fn has_acknowledger(&self) -> bool {
        self.extensions.read().has_acknowledger()
    }

    pub(crate) fn notify_published(self: &Arc<Self>, map: MapId) {
        let (walkers, acknowledgers) = {
            let registry = self.extensions.read();
            (registry.walkers.clone(), registry.acknowledgers.clone())
        };
        for walker in walkers {
            walker.request_run(self, map);
        }
        for acknowledger in acknowledgers {
            acknowledger.request_run(self, map);
        }
    }

    // === BACKPRESSURE ===

    /// Replace the overload handler
    pub fn set_overload_handler(&self, handler: Arc<dyn OverloadHandler>) {
        *self.overload.write() = handler;
    }

    pub(crate) fn note_queue_len(&self, len: usize) {
        if len >= self.config.map_queue_maximum {
            let first = !self.overload_notified.swap(true, Ordering::AcqRel);
            let handler = self.overload.read().clone();
            handler.on_map_queue_maximum_reached(self, first);
        } else {
            self.overload_notified.store(false, Ordering::Release);
            if len >= self.config.map_queue_threshold {
                let handler = self.overload.read().clone();
                handler.on_map_queue_threshold_reached(self);
            }
        }
    }

    // === ACKNOWLEDGEMENT ===

    pub(crate) fn register_ack_future(&self, map: MapId) -> CommitFuture {
        let (sender, receiver) = oneshot::channel();
        self.pending_acks.lock().push((map, sender));
        CommitFuture { receiver }
    }

    /// Advance the acknowledgement watermark over `map` and complete every
    /// commit future it covers. Called by acknowledgers once remote
    /// participants confirmed the map.
    pub fn acknowledge(self: &Arc<Self>, map: MapId) {
        let acknowledged = loop {
            let snapshot = self.shared.load();
            let Some(index) = snapshot.index_of(map) else {
                // Already merged into the base; it was acknowledged then.
                break snapshot;
            };
            if index <= snapshot.acknowledged_index() {
                break snapshot;
            }
            let next = Arc::new(snapshot.with_acknowledged(index));
            match self.shared.compare_and_swap(&snapshot, next) {
                Ok(()) => break self.shared.load(),
                Err(_) => continue,
            }
        };

        let ack_index = acknowledged.acknowledged_index();
        let mut completed = Vec::new();
        {
            let mut pending = self.pending_acks.lock();
            let mut keep = Vec::with_capacity(pending.len());
            for (pending_map, sender) in pending.drain(..) {
                let covered = match acknowledged.index_of(pending_map) {
                    Some(index) => index <= ack_index,
                    // Already merged into the base, hence acknowledged.
                    None => true,
                };
                if covered {
                    completed.push(sender);
                } else {
                    keep.push((pending_map, sender));
                }
            }
            *pending = keep;
        }
        for sender in completed {
            let _ = sender.send(CommitStatus::Success);
        }
        manager::compact(self);
    }

    fn drain_acks(&self, status: CommitStatus) {
        let pending = std::mem::take(&mut *self.pending_acks.lock());
        for (_, sender) in pending {
            let _ = sender.send(status);
        }
    }

    // === SLOW-CHANGING METADATA ===

    fn update_slow_changing(&self, update: impl Fn(&mut SlowChanging)) {
        loop {
            let snapshot = self.shared.load();
            let mut slow = snapshot
                .slow_changing()
                .map(|s| (**s).clone())
                .unwrap_or_default();
            update(&mut slow);
            let next = Arc::new(snapshot.with_slow_changing(Arc::new(slow)));
            if self.shared.compare_and_swap(&snapshot, next).is_ok() {
                return;
            }
        }
    }

    /// Permanently disconnect the branch: pending futures abort and every
    /// later commit observes `CommitStatus::Abort`.
    pub fn disconnect(&self) {
        self.update_slow_changing(|slow| slow.disconnected = true);
        self.drain_acks(CommitStatus::Abort);
        tracing::info!(branch = %self.id, "branch disconnected");
    }

    /// Block a source: its batches (and local commits, for
    /// `Source::Local`) conflict until unblocked
    pub fn block_source(&self, source: Source) {
        self.update_slow_changing(|slow| {
            slow.blocked.insert(source);
        });
    }

    pub fn unblock_source(&self, source: Source) {
        self.update_slow_changing(|slow| {
            slow.blocked.remove(&source);
        });
    }
}

/// Pending distributed acknowledgement of a published commit.
///
/// Resolves to `Success` when the map is acknowledged, `Abort` when the
/// branch disconnects first.
#[derive(Debug)]
pub struct CommitFuture {
    receiver: oneshot::Receiver<CommitStatus>,
}

impl CommitFuture {
    /// Await the acknowledgement
    pub async fn wait(self) -> CommitStatus {
        self.receiver.await.unwrap_or(CommitStatus::Abort)
    }

    /// Block the current thread until acknowledged
    pub fn blocking_wait(self) -> CommitStatus {
        self.receiver.blocking_recv().unwrap_or(CommitStatus::Abort)
    }
}
