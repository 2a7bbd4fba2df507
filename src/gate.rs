//! Cache invalidation around state-changing calls.

use std::future::Future;

use crate::cache::{CacheStore, Identity};

/// Wraps state-changing calls so the caller's cache is dropped when they settle.
///
/// Invalidation covers the whole identity table, not just the keys the call
/// might have touched, and runs on failure too: a failed call may still have
/// changed state on the server. While the call is in flight, reads keep being
/// served from the existing cache.
///
/// # Example
///
/// ```rust
/// use certcache::{CacheKey, CacheStore, Consistency, Identity, MutationGate};
///
/// # tokio_test::block_on(async {
/// let store = CacheStore::default();
/// let gate = MutationGate::new(store.clone());
/// let alice = Identity::from("alice");
/// let key = CacheKey::unit("list_positions").unwrap();
///
/// store
///     .get(&alice, &key, Consistency::Certified, || async { Ok::<_, String>(3u8) })
///     .await
///     .unwrap();
/// assert_eq!(store.len(&alice), 1);
///
/// let result: Result<(), String> = gate
///     .mutate(&alice, || async { Err("rejected".to_string()) })
///     .await;
/// assert!(result.is_err());
/// assert_eq!(store.len(&alice), 0);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MutationGate {
    store: CacheStore,
}

impl MutationGate {
    /// Gate mutations against `store`.
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    /// Run `action`, then invalidate every cached result for `identity`.
    ///
    /// Invalidation also happens if the returned future is dropped before
    /// `action` completes.
    pub async fn mutate<T, E, F, Fut>(&self, identity: &Identity, action: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _settle = InvalidateOnSettle {
            store: &self.store,
            identity,
        };
        let result = action().await;
        tracing::debug!(%identity, ok = result.is_ok(), "mutation settled");
        result
    }
}

struct InvalidateOnSettle<'a> {
    store: &'a CacheStore,
    identity: &'a Identity,
}

impl Drop for InvalidateOnSettle<'_> {
    fn drop(&mut self) {
        self.store.invalidate(self.identity);
    }
}
