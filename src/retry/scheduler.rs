//! Backoff executor with cooperative cancellation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use crate::cache::CallerError;
use crate::classify::{AlwaysRetry, Classify};

use super::outcome::RetryOutcome;
use super::policy::RetryPolicy;
use super::state::{RetryState, Settlement, Step};

/// Information about a failed attempt, passed to `on_attempt_failure` hooks.
#[derive(Debug, Clone)]
pub struct RetryEvent<'a, E> {
    /// Which attempt just failed (1-indexed).
    pub attempt: u32,
    /// The error from the failed attempt.
    pub error: &'a E,
    /// Delay before next attempt, or `None` when the budget is used up.
    pub next_delay: Option<Duration>,
    /// Total elapsed time since first attempt.
    pub elapsed: Duration,
}

/// Cancels a retry loop.
///
/// Cancelling stops future attempts; an attempt already in flight runs to
/// completion and its result is dropped.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    /// A handle that has not been cancelled.
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    /// Returns true once [`CancelHandle::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once the handle is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in `self`, so this only returns on cancellation.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Retry loop configuration: policy, error classifier and cancel handle.
///
/// # Example
///
/// ```rust
/// use certcache::{BackendError, Retry, RetryOutcome, RetryPolicy};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let counter = AtomicU32::new(0);
/// let calls = &counter;
/// let outcome = Retry::new(RetryPolicy::exponential(Duration::from_millis(1)))
///     .unwrap()
///     .classify(BackendError::classify)
///     .run(move || async move {
///         if calls.fetch_add(1, Ordering::SeqCst) < 2 {
///             Err(BackendError::Transport("not yet".into()))
///         } else {
///             Ok("ready")
///         }
///     })
///     .await;
///
/// assert_eq!(outcome, RetryOutcome::Success("ready"));
/// assert_eq!(counter.load(Ordering::SeqCst), 3);
/// # });
/// ```
pub struct Retry<C = AlwaysRetry> {
    policy: RetryPolicy,
    classifier: C,
    cancel: CancelHandle,
}

impl<C> fmt::Debug for Retry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("policy", &self.policy)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Retry<AlwaysRetry> {
    /// Create a retry loop that treats every failure as retryable.
    ///
    /// Fails with [`CallerError::InvalidPolicy`] if the policy can never run.
    pub fn new(policy: RetryPolicy) -> Result<Self, CallerError> {
        policy.validate()?;
        Ok(Self {
            policy,
            classifier: AlwaysRetry,
            cancel: CancelHandle::new(),
        })
    }
}

impl<C> Retry<C> {
    /// Use `classifier` to decide which failures are retried.
    pub fn classify<C2>(self, classifier: C2) -> Retry<C2> {
        Retry {
            policy: self.policy,
            classifier,
            cancel: self.cancel,
        }
    }

    /// Handle that cancels this loop once it runs.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The policy driving this loop.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it settles.
    pub async fn run<T, E, F, Fut>(self, operation: F) -> RetryOutcome<T, E>
    where
        C: Classify<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with(operation, |_: &RetryEvent<'_, E>| {}).await
    }

    /// Run `operation` until it settles, reporting each retryable failure.
    ///
    /// `on_attempt_failure` sees every retryable failure, including the last
    /// one of an exhausted budget. It is where callers escalate feedback;
    /// the loop itself never presents anything.
    pub async fn run_with<T, E, F, Fut, H>(
        self,
        mut operation: F,
        on_attempt_failure: H,
    ) -> RetryOutcome<T, E>
    where
        C: Classify<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        H: Fn(&RetryEvent<'_, E>),
    {
        let start = Instant::now();
        let mut state = RetryState::new(&self.policy);

        loop {
            if self.cancel.is_cancelled() {
                state.cancel();
                tracing::info!(attempts = state.attempt() - 1, "retry cancelled");
                return RetryOutcome::Cancelled {
                    attempts: state.attempt() - 1,
                };
            }

            let result = operation().await;
            let attempt = state.attempt();

            if self.cancel.is_cancelled() {
                state.cancel();
                tracing::info!(attempt, "retry cancelled; in-flight result dropped");
                return RetryOutcome::Cancelled { attempts: attempt };
            }

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "retry succeeded");
                    }
                    return RetryOutcome::Success(value);
                }
                Err(error) => error,
            };

            let class = self.classifier.classify(&error);
            let step = state.on_failure(class, &self.policy);

            if class.is_retryable() {
                tracing::debug!(attempt, next_delay = ?step.delay(), "attempt failed");
                on_attempt_failure(&RetryEvent {
                    attempt,
                    error: &error,
                    next_delay: step.delay(),
                    elapsed: start.elapsed(),
                });
            }

            match step {
                Step::Retry { delay } => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            state.cancel();
                            tracing::info!(attempts = attempt, "retry cancelled during backoff");
                            return RetryOutcome::Cancelled { attempts: attempt };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Step::Settle(Settlement::Terminal) => {
                    tracing::info!(attempt, "terminal failure; not retrying");
                    return RetryOutcome::Terminal(error);
                }
                Step::Settle(Settlement::Exhausted) => {
                    tracing::warn!(attempts = attempt, "retry budget exhausted");
                    return RetryOutcome::Exhausted {
                        last_error: error,
                        attempts: attempt,
                    };
                }
                Step::Settle(Settlement::Cancelled) => {
                    return RetryOutcome::Cancelled { attempts: attempt };
                }
            }
        }
    }

    /// Run the loop as a tokio task.
    ///
    /// The returned [`RetryTask`] cancels the loop or awaits its outcome.
    pub fn spawn<T, E, F, Fut, H>(self, operation: F, on_attempt_failure: H) -> RetryTask<T, E>
    where
        C: Classify<E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        H: Fn(&RetryEvent<'_, E>) + Send + Sync + 'static,
    {
        let cancel = self.cancel.clone();
        let join = tokio::spawn(self.run_with(operation, on_attempt_failure));
        RetryTask { cancel, join }
    }
}

/// A retry loop running on the tokio runtime.
#[derive(Debug)]
pub struct RetryTask<T, E> {
    cancel: CancelHandle,
    join: JoinHandle<RetryOutcome<T, E>>,
}

impl<T, E> RetryTask<T, E> {
    /// Stop scheduling further attempts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that can cancel this task from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Returns true once the loop has settled.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to settle.
    ///
    /// Fails only if the task panicked.
    pub async fn outcome(self) -> Result<RetryOutcome<T, E>, JoinError> {
        self.join.await
    }
}

/// Spawn a retry loop for `operation` under `policy`.
///
/// Rejects invalid policies synchronously, before any attempt runs.
pub fn retry<T, E, C, F, Fut, H>(
    operation: F,
    policy: RetryPolicy,
    classifier: C,
    on_attempt_failure: H,
) -> Result<RetryTask<T, E>, CallerError>
where
    C: Classify<E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    H: Fn(&RetryEvent<'_, E>) + Send + Sync + 'static,
{
    Ok(Retry::new(policy)?
        .classify(classifier)
        .spawn(operation, on_attempt_failure))
}

/// Build an `on_attempt_failure` hook that fires `escalate` once, on the
/// `threshold`-th consecutive failure.
///
/// ```rust
/// use certcache::{escalate_after, RetryEvent};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// let fired = AtomicU32::new(0);
/// let hook = escalate_after(6, |_: &RetryEvent<'_, String>| {
///     fired.fetch_add(1, Ordering::SeqCst);
/// });
///
/// let error = "still syncing".to_string();
/// for attempt in 1..=10 {
///     hook(&RetryEvent {
///         attempt,
///         error: &error,
///         next_delay: None,
///         elapsed: Duration::ZERO,
///     });
/// }
/// assert_eq!(fired.load(Ordering::SeqCst), 1);
/// ```
pub fn escalate_after<E, F>(threshold: u32, escalate: F) -> impl Fn(&RetryEvent<'_, E>)
where
    F: Fn(&RetryEvent<'_, E>),
{
    move |event: &RetryEvent<'_, E>| {
        if event.attempt == threshold {
            escalate(event);
        }
    }
}
