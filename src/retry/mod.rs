//! Exponential-backoff retry loops for eventually-consistent reads.
//!
//! The loop runs an operation, classifies each failure with a
//! [`Classify`](crate::Classify) implementation and either waits and tries
//! again, or settles:
//!
//! ```text
//! IDLE -> RUNNING -> SUCCESS
//!                 -> TERMINAL_FAILURE   (classifier said Terminal)
//!                 -> EXHAUSTED          (bounded policies only)
//!                 -> CANCELLED          (CancelHandle::cancel)
//! ```
//!
//! - **Pure Core**: [`RetryPolicy`] is data and [`RetryState::on_failure`] is
//!   the step function; both are testable without timers.
//! - **Imperative Shell**: [`Retry::run_with`] owns the sleeps and the
//!   cancellation wake-ups.
//!
//! # Quick Start
//!
//! ```rust
//! use certcache::{retry, AlwaysRetry, RetryOutcome, RetryPolicy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let task = retry(
//!     || async { Ok::<_, String>(42) },
//!     RetryPolicy::exponential(Duration::from_millis(100)).with_max_attempts(10),
//!     AlwaysRetry,
//!     |_: &certcache::RetryEvent<'_, String>| {},
//! )
//! .unwrap();
//!
//! assert_eq!(task.outcome().await.unwrap(), RetryOutcome::Success(42));
//! # });
//! ```

mod outcome;
mod policy;
mod scheduler;
mod state;

pub use outcome::{RetryError, RetryOutcome};
pub use policy::{BackoffStrategy, JitterStrategy, MaxAttempts, RetryPolicy};
pub use scheduler::{escalate_after, retry, CancelHandle, Retry, RetryEvent, RetryTask};
pub use state::{RetryState, Settlement, Step};
