//! Generation counters that keep late responses from overwriting newer state.
//!
//! Each sync of an entity starts a *race*: the entity's generation advances
//! and every response issued for that sync carries the [`RaceToken`] captured
//! at that moment. A response commits only while its token is still the
//! entity's latest; once a newer race starts, every outstanding response of
//! the older race is dropped, however late it arrives.
//!
//! # Example
//!
//! ```rust
//! use certcache::GenerationGuard;
//!
//! let guard = GenerationGuard::new();
//! let mut shown = None;
//!
//! let old = guard.start_race(&"acct-1");
//! let new = guard.start_race(&"acct-1");
//!
//! assert!(guard.apply(&"acct-1", new, 20, |v| shown = Some(v)));
//! // The older race lost: its late response is discarded.
//! assert!(!guard.apply(&"acct-1", old, 10, |v| shown = Some(v)));
//! assert_eq!(shown, Some(20));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cache::Consistency;

/// Generation captured when a race started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RaceToken(u64);

impl RaceToken {
    /// The raw generation value.
    pub fn generation(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Generations<K> {
    // Drawn from one counter so a token can never match a key's generation
    // again after `forget`.
    next: u64,
    current: HashMap<K, u64>,
}

/// Per-entity generation table.
///
/// Cloning shares the table.
#[derive(Debug)]
pub struct GenerationGuard<K> {
    table: Arc<Mutex<Generations<K>>>,
    // Serializes commits; never held together with `table`.
    commits: Arc<Mutex<()>>,
}

impl<K> Clone for GenerationGuard<K> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            commits: Arc::clone(&self.commits),
        }
    }
}

impl<K> Default for GenerationGuard<K> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(Generations {
                next: 0,
                current: HashMap::new(),
            })),
            commits: Arc::new(Mutex::new(())),
        }
    }
}

impl<K> GenerationGuard<K>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    /// Create an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new race for `key`, superseding every earlier one.
    pub fn start_race(&self, key: &K) -> RaceToken {
        let mut table = self.lock();
        table.next += 1;
        let generation = table.next;
        table.current.insert(key.clone(), generation);
        tracing::trace!(?key, generation, "race started");
        RaceToken(generation)
    }

    /// The latest token issued for `key`, if any race has started.
    pub fn current(&self, key: &K) -> Option<RaceToken> {
        self.lock().current.get(key).copied().map(RaceToken)
    }

    /// Returns true while `token` belongs to the latest race for `key`.
    pub fn is_current(&self, key: &K, token: RaceToken) -> bool {
        self.lock().current.get(key) == Some(&token.0)
    }

    /// Commit `value` if `token` is still the latest race for `key`.
    ///
    /// Returns whether `commit` ran. Commits run one at a time, so a newer
    /// race can only commit after an older commit already in progress has
    /// returned. `commit` may start races or query tokens on this guard, but
    /// must not call `apply` on it.
    pub fn apply<T, F>(&self, key: &K, token: RaceToken, value: T, commit: F) -> bool
    where
        F: FnOnce(T),
    {
        let _commit = self.commits.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_current(key, token) {
            tracing::debug!(
                ?key,
                stale = token.0,
                "response from superseded race discarded"
            );
            return false;
        }
        commit(value);
        true
    }

    /// Drop the generation for a deleted entity.
    ///
    /// Tokens issued before this call never become current again.
    pub fn forget(&self, key: &K) {
        self.lock().current.remove(key);
    }

    /// Start a race for `key` and hand it to `race_fn`.
    ///
    /// The [`Race`] handle can be cloned into every read issued for this sync;
    /// each read commits through [`Race::apply`].
    pub async fn with_race<F, Fut>(&self, key: K, race_fn: F) -> Fut::Output
    where
        F: FnOnce(Race<K>) -> Fut,
        Fut: Future,
    {
        let token = self.start_race(&key);
        race_fn(Race {
            guard: self.clone(),
            key,
            token,
        })
        .await
    }

    /// Run a query read and a certified read for `key` side by side.
    ///
    /// Both reads belong to one race. Each result is committed through
    /// `commit` as soon as it arrives, unless a newer race for `key` has
    /// started by then. The certified result, when it arrives later, replaces
    /// the query result.
    pub async fn dual_read<T, E, Q, C, F>(
        &self,
        key: K,
        query: Q,
        certified: C,
        commit: F,
    ) -> DualRead<E>
    where
        Q: Future<Output = Result<T, E>>,
        C: Future<Output = Result<T, E>>,
        F: Fn(Consistency, T),
    {
        self.with_race(key, |race| async move {
            let commit = &commit;
            let settle = |level: Consistency, result: Result<T, E>| match result {
                Ok(value) => {
                    if race.apply(value, |v| commit(level, v)) {
                        ReadOutcome::Committed
                    } else {
                        ReadOutcome::Superseded
                    }
                }
                Err(error) => ReadOutcome::Failed(error),
            };
            let (query, certified) = futures::join!(
                async { settle(Consistency::Query, query.await) },
                async { settle(Consistency::Certified, certified.await) },
            );
            DualRead { query, certified }
        })
        .await
    }

    fn lock(&self) -> MutexGuard<'_, Generations<K>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One race for one entity key.
#[derive(Debug, Clone)]
pub struct Race<K> {
    guard: GenerationGuard<K>,
    key: K,
    token: RaceToken,
}

impl<K> Race<K>
where
    K: Hash + Eq + Clone + fmt::Debug,
{
    /// The token captured when this race started.
    pub fn token(&self) -> RaceToken {
        self.token
    }

    /// The entity key this race belongs to.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns true while no newer race has started for the key.
    pub fn is_current(&self) -> bool {
        self.guard.is_current(&self.key, self.token)
    }

    /// Commit `value` unless this race has been superseded.
    pub fn apply<T, F>(&self, value: T, commit: F) -> bool
    where
        F: FnOnce(T),
    {
        self.guard.apply(&self.key, self.token, value, commit)
    }
}

/// What happened to one read of a dual read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome<E> {
    /// The value was committed.
    Committed,
    /// A newer race started first; the value was dropped.
    Superseded,
    /// The read failed; nothing was committed.
    Failed(E),
}

impl<E> ReadOutcome<E> {
    /// Returns true for [`ReadOutcome::Committed`].
    pub fn is_committed(&self) -> bool {
        matches!(self, ReadOutcome::Committed)
    }
}

/// Outcome of both reads of a dual read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualRead<E> {
    /// The fast, unverified read.
    pub query: ReadOutcome<E>,
    /// The slow, verified read.
    pub certified: ReadOutcome<E>,
}
