//! Per-identity memo of certified reads with TTL and single-flight loading.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::key::{CacheKey, Identity};

/// Default lifetime of a cached certified result.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Read consistency level requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Consistency {
    /// Fast, unverified read. Never cached, never deduplicated.
    Query,
    /// Slow, verified read. Memoized per identity and key.
    Certified,
}

impl Consistency {
    /// Returns true for [`Consistency::Certified`].
    pub fn is_certified(self) -> bool {
        matches!(self, Consistency::Certified)
    }
}

/// Cache configuration.
///
/// # Example
///
/// ```rust
/// use certcache::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::new().with_ttl(Duration::from_secs(30));
/// assert_eq!(config.ttl, Duration::from_secs(30));
/// assert_eq!(CacheConfig::default().ttl, Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a certified result is served after it was stored.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Counters describing how certified reads were served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Served from a live entry.
    pub hits: u64,
    /// Started a new loader invocation.
    pub misses: u64,
    /// Joined a loader invocation already in flight.
    pub coalesced: u64,
    /// Identity tables cleared.
    pub invalidations: u64,
}

/// A spawned load that ended without a result: the loader panicked or the
/// runtime shut down.
#[derive(Debug, Clone, Copy)]
struct Abandoned;

type PendingLoad<V, E> = Shared<BoxFuture<'static, Result<Result<V, E>, Abandoned>>>;

/// Table slot: the call signature plus the value type stored under it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Slot {
    key: CacheKey,
    ty: TypeId,
}

impl Slot {
    fn of<V: 'static>(key: &CacheKey) -> Self {
        Self {
            key: key.clone(),
            ty: TypeId::of::<V>(),
        }
    }
}

struct Entry {
    value: Box<dyn Any + Send + Sync>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}

/// Entries and in-flight loads for one identity.
///
/// `epoch` changes on every invalidation; a load started under an older
/// epoch settles for its own awaiters but never writes into the table.
/// Epochs come from a store-wide counter, so a table dropped and created
/// again never reuses one.
struct Table {
    epoch: u64,
    entries: HashMap<Slot, Entry>,
    pending: HashMap<Slot, Box<dyn Any + Send + Sync>>,
}

impl Table {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            entries: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    fn clear(&mut self, epoch: u64) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.pending.clear();
        self.epoch = epoch;
        dropped
    }

    fn is_idle(&self) -> bool {
        self.entries.is_empty() && self.pending.is_empty()
    }
}

struct Inner {
    config: CacheConfig,
    tables: Mutex<HashMap<Identity, Table>>,
    epochs: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    invalidations: AtomicU64,
}

/// Memo of certified results, partitioned by caller identity.
///
/// Cloning a `CacheStore` is cheap and every clone shares the same tables.
/// Construct one per scope (service, test) rather than sharing a global.
///
/// # Example
///
/// ```rust
/// use certcache::{CacheKey, CacheStore, Consistency, Identity};
///
/// # tokio_test::block_on(async {
/// let store = CacheStore::default();
/// let alice = Identity::from("alice");
/// let key = CacheKey::new("balance", &"acct-1").unwrap();
///
/// let first: Result<u64, String> = store
///     .get(&alice, &key, Consistency::Certified, || async { Ok(100) })
///     .await;
/// // Served from cache: the second loader never runs.
/// let second: Result<u64, String> = store
///     .get(&alice, &key, Consistency::Certified, || async { Ok(999) })
///     .await;
///
/// assert_eq!(first, Ok(100));
/// assert_eq!(second, Ok(100));
/// # });
/// ```
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CacheStore {
    /// Create an empty store.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                tables: Mutex::new(HashMap::new()),
                epochs: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                invalidations: AtomicU64::new(0),
            }),
        }
    }

    /// The store's configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Read through the cache.
    ///
    /// `Query` reads always invoke `loader` and never touch the tables.
    /// `Certified` reads return a live entry if one exists, otherwise join the
    /// load already in flight for the same identity and key, otherwise start
    /// one. The loader runs at most once per key at a time; its failure is
    /// delivered to every awaiter and nothing is cached.
    ///
    /// Certified loads run as tokio tasks, so they settle and populate the
    /// cache even if every caller stops waiting. Must be called from within
    /// a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if the certified loader panicked. The failed load is removed,
    /// so the next call starts a fresh one.
    pub async fn get<V, E, F, Fut>(
        &self,
        identity: &Identity,
        key: &CacheKey,
        consistency: Consistency,
        loader: F,
    ) -> Result<V, E>
    where
        V: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if !consistency.is_certified() {
            tracing::trace!(%identity, %key, "query read bypasses cache");
            return loader().await;
        }

        let slot = Slot::of::<V>(key);
        let load: PendingLoad<V, E> = {
            let mut tables = self.tables();
            let table = tables
                .entry(identity.clone())
                .or_insert_with(|| Table::new(self.next_epoch()));
            let now = Instant::now();

            let live = table.entries.get(&slot).map(|entry| entry.is_live(now));
            match live {
                Some(true) => {
                    let cached = table
                        .entries
                        .get(&slot)
                        .and_then(|entry| entry.value.downcast_ref::<V>());
                    if let Some(value) = cached {
                        self.inner.hits.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(%identity, %key, "certified cache hit");
                        return Ok(value.clone());
                    }
                }
                Some(false) => {
                    table.entries.remove(&slot);
                    tracing::trace!(%identity, %key, "certified entry expired");
                }
                None => {}
            }

            let joined = table
                .pending
                .get(&slot)
                .and_then(|pending| pending.downcast_ref::<PendingLoad<V, E>>())
                .cloned();

            match joined {
                Some(load) => {
                    self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(%identity, %key, "joined in-flight certified load");
                    load
                }
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%identity, %key, "certified cache miss");
                    let load = self.start_load(identity.clone(), slot.clone(), table.epoch, loader);
                    table.pending.insert(slot, Box::new(load.clone()));
                    load
                }
            }
        };

        match load.await {
            Ok(result) => result,
            Err(Abandoned) => panic!("certified load of {} for {} panicked", key, identity),
        }
    }

    fn start_load<V, E, F, Fut>(
        &self,
        identity: Identity,
        slot: Slot,
        epoch: u64,
        loader: F,
    ) -> PendingLoad<V, E>
    where
        V: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let store = self.clone();
        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { loader().await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(result) => {
                    store.settle(&identity, &slot, epoch, result.as_ref().ok());
                    Ok(result)
                }
                Err(_) => {
                    tracing::warn!(%identity, key = %slot.key, "certified loader panicked");
                    store.settle::<V>(&identity, &slot, epoch, None);
                    Err(Abandoned)
                }
            }
        });
        async move { task.await.unwrap_or(Err(Abandoned)) }
            .boxed()
            .shared()
    }

    /// Clear the pending slot and store `value`, unless the table was
    /// invalidated since the load started.
    fn settle<V>(&self, identity: &Identity, slot: &Slot, epoch: u64, value: Option<&V>)
    where
        V: Clone + Send + Sync + 'static,
    {
        let mut tables = self.tables();
        let Some(table) = tables.get_mut(identity) else {
            return;
        };
        if table.epoch != epoch {
            tracing::debug!(
                %identity,
                key = %slot.key,
                "certified load settled after invalidation; result not stored"
            );
            return;
        }
        table.pending.remove(slot);
        if let Some(value) = value {
            let expires_at = Instant::now() + self.inner.config.ttl;
            table.entries.insert(
                slot.clone(),
                Entry {
                    value: Box::new(value.clone()),
                    expires_at,
                },
            );
        }
    }

    /// Drop every entry and in-flight load for `identity`.
    ///
    /// Loads already in flight still settle for the callers awaiting them,
    /// but are never joined again and never store their result.
    /// Returns the number of entries dropped.
    pub fn invalidate(&self, identity: &Identity) -> usize {
        let epoch = self.next_epoch();
        let dropped = self
            .tables()
            .get_mut(identity)
            .map(|table| table.clear(epoch))
            .unwrap_or(0);
        self.inner.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%identity, dropped, "identity cache invalidated");
        dropped
    }

    /// Invalidate every identity's table.
    pub fn invalidate_all(&self) -> usize {
        let mut tables = self.tables();
        let dropped: usize = tables
            .values_mut()
            .map(|table| table.clear(self.next_epoch()))
            .sum();
        self.inner
            .invalidations
            .fetch_add(tables.len() as u64, Ordering::Relaxed);
        tracing::debug!(identities = tables.len(), dropped, "all caches invalidated");
        dropped
    }

    /// Remove expired entries from every table. Returns how many were removed.
    ///
    /// Tables left with no entries and no loads in flight are dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut tables = self.tables();
        let mut purged = 0;
        for table in tables.values_mut() {
            let before = table.entries.len();
            table.entries.retain(|_, entry| entry.is_live(now));
            purged += before - table.entries.len();
        }
        tables.retain(|_, table| !table.is_idle());
        if purged > 0 {
            tracing::trace!(purged, "expired certified entries purged");
        }
        purged
    }

    /// Number of live entries held for `identity`.
    pub fn len(&self, identity: &Identity) -> usize {
        let now = Instant::now();
        self.tables()
            .get(identity)
            .map(|table| table.entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    /// Returns true when `identity` has no live entries.
    pub fn is_empty(&self, identity: &Identity) -> bool {
        self.len(identity) == 0
    }

    /// Number of loads currently in flight for `identity`.
    pub fn pending(&self, identity: &Identity) -> usize {
        self.tables()
            .get(identity)
            .map(|table| table.pending.len())
            .unwrap_or(0)
    }

    /// Number of identities with a table in the store.
    pub fn identities(&self) -> usize {
        self.tables().len()
    }

    /// Snapshot of the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            invalidations: self.inner.invalidations.load(Ordering::Relaxed),
        }
    }

    fn next_epoch(&self) -> u64 {
        self.inner.epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<Identity, Table>> {
        self.inner
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
