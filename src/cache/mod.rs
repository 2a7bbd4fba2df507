//! Certified-read cache.
//!
//! - [`CacheKey`] names a logical call: method plus serialized parameters.
//! - [`CacheStore`] memoizes certified results per [`Identity`] with a TTL and
//!   collapses concurrent identical certified calls into one loader
//!   invocation (single-flight).
//! - Query reads pass straight through.

mod key;
mod store;

pub use key::{CacheKey, CallerError, Identity};
pub use store::{CacheConfig, CacheStats, CacheStore, Consistency, DEFAULT_TTL};
