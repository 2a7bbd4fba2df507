//! The cached service facade.
//!
//! [`CachedService`] bundles the pieces a backend client needs in front of a
//! replicated backend:
//!
//! - [`CachedService::cached_call`]: reads through the certified-read cache.
//! - [`CachedService::mutate`]: state-changing calls that invalidate the
//!   caller's cache when they settle.
//! - [`CachedService::sync_entity`]: a query read and a certified read raced
//!   for one entity, committed through the staleness guard.
//!
//! Long waits for eventual consistency go through [`crate::retry`], whose
//! operations typically call back into `cached_call`.

use std::fmt;
use std::future::Future;
use std::hash::Hash;

use serde::Serialize;

use crate::cache::{CacheConfig, CacheKey, CacheStore, CallerError, Consistency, Identity};
use crate::gate::MutationGate;
use crate::staleness::{DualRead, GenerationGuard, Race};

/// Failure of a facade call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError<E> {
    /// The call was rejected before reaching the backend.
    Caller(CallerError),
    /// The loader failed.
    Backend(E),
}

impl<E> CallError<E> {
    /// The backend error, if the loader ran and failed.
    pub fn backend(self) -> Option<E> {
        match self {
            CallError::Backend(error) => Some(error),
            CallError::Caller(_) => None,
        }
    }
}

impl<E> From<CallerError> for CallError<E> {
    fn from(error: CallerError) -> Self {
        CallError::Caller(error)
    }
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Caller(error) => write!(f, "{}", error),
            CallError::Backend(error) => write!(f, "{}", error),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CallError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Caller(error) => Some(error),
            CallError::Backend(error) => Some(error),
        }
    }
}

/// Cache, mutation gate and staleness guard for one backend client.
///
/// `K` is the entity key type used for staleness races.
///
/// # Example
///
/// ```rust
/// use certcache::{CachedService, Consistency, Identity};
///
/// # tokio_test::block_on(async {
/// let service: CachedService = CachedService::default();
/// let alice = Identity::from("alice");
///
/// let balance = service
///     .cached_call(&alice, Consistency::Certified, "balance", &"acct-1", || async {
///         Ok::<_, String>(250u64)
///     })
///     .await
///     .unwrap();
/// assert_eq!(balance, 250);
///
/// // Any mutation drops every cached result for alice.
/// service
///     .mutate(&alice, || async { Ok::<_, String>(()) })
///     .await
///     .unwrap();
/// assert!(service.store().is_empty(&alice));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct CachedService<K = String> {
    store: CacheStore,
    gate: MutationGate,
    generations: GenerationGuard<K>,
}

impl<K> Default for CachedService<K>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<K> CachedService<K>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    /// Create a facade with its own, empty store.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_store(CacheStore::new(config))
    }

    /// Create a facade over an existing store.
    pub fn with_store(store: CacheStore) -> Self {
        Self {
            gate: MutationGate::new(store.clone()),
            store,
            generations: GenerationGuard::new(),
        }
    }

    /// The underlying cache store.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// The staleness guard shared by every entity sync.
    pub fn generations(&self) -> &GenerationGuard<K> {
        &self.generations
    }

    /// Call `method` with `params` through the cache.
    ///
    /// Invalid arguments fail with [`CallError::Caller`] before `loader` runs.
    pub async fn cached_call<P, V, E, F, Fut>(
        &self,
        identity: &Identity,
        consistency: Consistency,
        method: &str,
        params: &P,
        loader: F,
    ) -> Result<V, CallError<E>>
    where
        P: Serialize + ?Sized,
        V: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let key = CacheKey::new(method, params)?;
        self.store
            .get(identity, &key, consistency, loader)
            .await
            .map_err(CallError::Backend)
    }

    /// Run a state-changing call, then invalidate `identity`'s whole cache.
    pub async fn mutate<T, E, F, Fut>(&self, identity: &Identity, action: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.gate.mutate(identity, action).await
    }

    /// Drop every cached result for `identity`.
    pub fn invalidate(&self, identity: &Identity) -> usize {
        self.store.invalidate(identity)
    }

    /// Start a race for `entity` and hand it to `race_fn`.
    ///
    /// See [`GenerationGuard::with_race`].
    pub async fn with_generation_guard<F, Fut>(&self, entity: K, race_fn: F) -> Fut::Output
    where
        F: FnOnce(Race<K>) -> Fut,
        Fut: Future,
    {
        self.generations.with_race(entity, race_fn).await
    }

    /// Sync one entity with a fast query read and a certified read.
    ///
    /// Starts a new race for `entity`, then issues both reads at once. Each
    /// result goes to `commit` as it arrives, tagged with its consistency
    /// level, unless a newer sync of the same entity has started by then. The
    /// certified read goes through the cache.
    pub async fn sync_entity<P, V, E, F, Fut, C>(
        &self,
        identity: &Identity,
        entity: K,
        method: &str,
        params: &P,
        loader: F,
        commit: C,
    ) -> Result<DualRead<E>, CallerError>
    where
        P: Serialize + ?Sized,
        V: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: Fn(Consistency) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        C: Fn(Consistency, V),
    {
        let key = CacheKey::new(method, params)?;
        let query = {
            let loader = loader.clone();
            self.store
                .get(identity, &key, Consistency::Query, move || {
                    loader(Consistency::Query)
                })
        };
        let certified = self
            .store
            .get(identity, &key, Consistency::Certified, move || {
                loader(Consistency::Certified)
            });

        Ok(self
            .generations
            .dual_read(entity, query, certified, commit)
            .await)
    }
}
