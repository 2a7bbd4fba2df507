//! # certcache
//!
//! Client-side consistency for replicated backends.
//!
//! Backends that serve both fast, unverified *query* reads and slow,
//! *certified* reads leave clients juggling three problems: repeated
//! certified reads are expensive, writes make cached reads stale, and a slow
//! read can land after a newer one. This crate keeps the decisions about all
//! three in small, plain-data pieces and leaves the I/O to caller-supplied
//! closures:
//!
//! - [`classify`]: which failures are worth retrying.
//! - [`cache`]: a per-identity, TTL-bounded cache of certified reads with
//!   single-flight loading.
//! - [`gate`]: invalidates an identity's cache whenever a mutation settles.
//! - [`staleness`]: generation tokens so only the latest read is committed.
//! - [`retry`]: unbounded or bounded exponential backoff with cancellation.
//! - [`service`]: one facade over all of the above.
//!
//! ## Quick Example
//!
//! ```rust
//! use certcache::prelude::*;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let service: CachedService = CachedService::new(
//!     CacheConfig::default().with_ttl(Duration::from_secs(60)),
//! );
//! let alice = Identity::from("alice");
//!
//! // Certified reads are cached per identity...
//! for _ in 0..3 {
//!     let stake = service
//!         .cached_call(&alice, Consistency::Certified, "stake", &7u32, || async {
//!             Ok::<_, BackendError>(1_000u64)
//!         })
//!         .await
//!         .unwrap();
//!     assert_eq!(stake, 1_000);
//! }
//! assert_eq!(service.store().stats().misses, 1);
//!
//! // ...until a mutation settles.
//! service
//!     .mutate(&alice, || async { Ok::<_, BackendError>(()) })
//!     .await
//!     .unwrap();
//! assert!(service.store().is_empty(&alice));
//! # });
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cache;
pub mod classify;
pub mod gate;
pub mod retry;
pub mod service;
pub mod staleness;
pub mod testing;

// Re-exports
pub use cache::{
    CacheConfig, CacheKey, CacheStats, CacheStore, CallerError, Consistency, Identity,
    DEFAULT_TTL,
};
pub use classify::{AlwaysRetry, BackendError, Classify, ErrorClass, RejectCode};
pub use gate::MutationGate;
pub use retry::{
    escalate_after, retry, BackoffStrategy, CancelHandle, JitterStrategy, MaxAttempts, Retry,
    RetryError, RetryEvent, RetryOutcome, RetryPolicy, RetryState, RetryTask, Settlement, Step,
};
pub use service::{CachedService, CallError};
pub use staleness::{DualRead, GenerationGuard, Race, RaceToken, ReadOutcome};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheKey, CacheStore, Consistency, Identity};
    pub use crate::classify::{BackendError, Classify, ErrorClass};
    pub use crate::gate::MutationGate;
    pub use crate::retry::{escalate_after, Retry, RetryEvent, RetryOutcome, RetryPolicy};
    pub use crate::service::{CachedService, CallError};
    pub use crate::staleness::{GenerationGuard, ReadOutcome};
}
