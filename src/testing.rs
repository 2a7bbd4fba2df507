//! Testing utilities for code built on certcache.
//!
//! Loaders and retry operations are usually closures over a fake backend.
//! These helpers cover the two things such tests keep re-implementing:
//!
//! - [`CallLog`]: counts invocations and records *when* each one happened,
//!   relative to the log's creation. Pair it with a paused tokio clock
//!   (`#[tokio::test(start_paused = true)]`) to assert exact backoff timings.
//! - [`Script`]: hands out a pre-planned result per call number.
//!
//! # Example
//!
//! ```rust
//! use certcache::testing::{CallLog, Script};
//!
//! # tokio_test::block_on(async {
//! let log = CallLog::new();
//! let script: Script<u32, String> = Script::fail_then(2, "not yet".to_string(), 7);
//!
//! let mut results = Vec::new();
//! for _ in 0..4 {
//!     let call = log.record();
//!     results.push(script.at(call));
//! }
//!
//! assert_eq!(log.count(), 4);
//! assert_eq!(
//!     results,
//!     vec![Err("not yet".to_string()), Err("not yet".to_string()), Ok(7), Ok(7)]
//! );
//! # });
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Shared record of invocation times.
///
/// Clones share the same record.
#[derive(Debug, Clone)]
pub struct CallLog {
    start: Instant,
    offsets: Arc<Mutex<Vec<Duration>>>,
}

impl Default for CallLog {
    fn default() -> Self {
        Self::new()
    }
}

impl CallLog {
    /// Start a log; offsets are measured from now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offsets: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record one invocation and return its 1-indexed call number.
    pub fn record(&self) -> u32 {
        let mut offsets = self.lock();
        offsets.push(self.start.elapsed());
        offsets.len() as u32
    }

    /// Number of invocations so far.
    pub fn count(&self) -> u32 {
        self.lock().len() as u32
    }

    /// When each invocation happened, relative to the log's creation.
    pub fn offsets(&self) -> Vec<Duration> {
        self.lock().clone()
    }

    /// [`CallLog::offsets`] in whole milliseconds.
    pub fn offsets_ms(&self) -> Vec<u64> {
        self.lock().iter().map(|d| d.as_millis() as u64).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Duration>> {
        self.offsets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pre-planned results, indexed by call number.
///
/// Calls past the end of the plan repeat its last step.
#[derive(Debug, Clone)]
pub struct Script<T, E> {
    first: Result<T, E>,
    rest: Arc<Vec<Result<T, E>>>,
}

impl<T: Clone, E: Clone> Script<T, E> {
    /// Plan `first` for call 1 and `rest` for the calls after it.
    pub fn from_steps(first: Result<T, E>, rest: Vec<Result<T, E>>) -> Self {
        Self {
            first,
            rest: Arc::new(rest),
        }
    }

    /// Every call returns `result`.
    pub fn always(result: Result<T, E>) -> Self {
        Self::from_steps(result, Vec::new())
    }

    /// Fail `failures` times with `error`, then succeed with `value`.
    pub fn fail_then(failures: usize, error: E, value: T) -> Self {
        if failures == 0 {
            return Self::always(Ok(value));
        }
        let mut rest: Vec<Result<T, E>> = vec![Err(error.clone()); failures - 1];
        rest.push(Ok(value));
        Self::from_steps(Err(error), rest)
    }

    /// Result for the 1-indexed `call`.
    pub fn at(&self, call: u32) -> Result<T, E> {
        let index = call.saturating_sub(2) as usize;
        match call {
            0 | 1 => self.first.clone(),
            _ => self
                .rest
                .get(index)
                .or_else(|| self.rest.last())
                .unwrap_or(&self.first)
                .clone(),
        }
    }
}
