//! Pure retry state machine.
//!
//! The executor in [`scheduler`](super::scheduler) owns the timers; every
//! decision about what happens after a failure lives here, so it can be
//! tested without a runtime.

use std::time::Duration;

use crate::classify::ErrorClass;

use super::policy::{MaxAttempts, RetryPolicy};

/// Progress of one retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    next_delay: Option<Duration>,
    max_attempts: MaxAttempts,
    cancelled: bool,
}

/// What to do after an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Wait `delay`, then run the next attempt.
    Retry {
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// Stop without another attempt.
    Settle(Settlement),
}

/// Why a loop stopped without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The failure was terminal.
    Terminal,
    /// The attempt budget is used up.
    Exhausted,
    /// The loop was cancelled.
    Cancelled,
}

impl Step {
    /// The backoff delay, if another attempt follows.
    pub fn delay(self) -> Option<Duration> {
        match self {
            Step::Retry { delay } => Some(delay),
            Step::Settle(_) => None,
        }
    }
}

impl RetryState {
    /// State before the first attempt.
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 1,
            next_delay: None,
            max_attempts: policy.max_attempts(),
            cancelled: false,
        }
    }

    /// The current (1-indexed) attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay chosen after the most recent failure.
    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    /// Returns true once [`RetryState::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Stop scheduling further attempts.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.next_delay = None;
    }

    /// Decide what follows a failed attempt classified as `class`.
    ///
    /// On [`Step::Retry`] the state has advanced to the next attempt.
    pub fn on_failure(&mut self, class: ErrorClass, policy: &RetryPolicy) -> Step {
        if self.cancelled {
            return Step::Settle(Settlement::Cancelled);
        }
        if class.is_terminal() {
            self.next_delay = None;
            return Step::Settle(Settlement::Terminal);
        }
        if self.max_attempts.is_reached(self.attempt) {
            self.next_delay = None;
            return Step::Settle(Settlement::Exhausted);
        }

        let delay = policy.delay_with_jitter(self.attempt);
        self.next_delay = Some(delay);
        self.attempt += 1;
        Step::Retry { delay }
    }
}

#[cfg(test)]
mod state_tests {
    use super::*;

    fn exp(ms: u64) -> RetryPolicy {
        RetryPolicy::exponential(Duration::from_millis(ms))
    }

    #[test]
    fn test_retryable_failures_back_off_exponentially() {
        let policy = exp(2000);
        let mut state = RetryState::new(&policy);

        let delays: Vec<_> = (0..3)
            .map(|_| state.on_failure(ErrorClass::Retryable, &policy).delay())
            .collect();

        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(2000)),
                Some(Duration::from_millis(4000)),
                Some(Duration::from_millis(8000)),
            ]
        );
        assert_eq!(state.attempt(), 4);
        assert_eq!(state.next_delay(), Some(Duration::from_millis(8000)));
    }

    #[test]
    fn test_terminal_settles_immediately() {
        let policy = exp(10).with_max_attempts(10);
        let mut state = RetryState::new(&policy);
        assert_eq!(
            state.on_failure(ErrorClass::Terminal, &policy),
            Step::Settle(Settlement::Terminal)
        );
        assert_eq!(state.attempt(), 1);
    }

    #[test]
    fn test_bounded_budget_exhausts_on_last_attempt() {
        let policy = exp(10).with_max_attempts(10);
        let mut state = RetryState::new(&policy);

        let mut retries = 0;
        let settlement = loop {
            match state.on_failure(ErrorClass::Retryable, &policy) {
                Step::Retry { .. } => retries += 1,
                Step::Settle(s) => break s,
            }
        };

        assert_eq!(settlement, Settlement::Exhausted);
        assert_eq!(retries, 9);
        assert_eq!(state.attempt(), 10);
    }

    #[test]
    fn test_single_attempt_budget() {
        let policy = exp(10).with_max_attempts(1);
        let mut state = RetryState::new(&policy);
        assert_eq!(
            state.on_failure(ErrorClass::Retryable, &policy),
            Step::Settle(Settlement::Exhausted)
        );
    }

    #[test]
    fn test_cancel_wins_over_everything() {
        let policy = exp(10);
        let mut state = RetryState::new(&policy);
        state.on_failure(ErrorClass::Retryable, &policy);
        state.cancel();

        assert!(state.is_cancelled());
        assert_eq!(state.next_delay(), None);
        assert_eq!(
            state.on_failure(ErrorClass::Retryable, &policy),
            Step::Settle(Settlement::Cancelled)
        );
        assert_eq!(
            state.on_failure(ErrorClass::Terminal, &policy),
            Step::Settle(Settlement::Cancelled)
        );
    }
}
