//! Retry policy types and configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CallerError;

/// A retry policy describing how to retry failed operations.
///
/// Policies are pure data: they describe retry behavior but don't execute it.
///
/// Two shapes cover the usual call sites:
/// - **Unbounded**: poll until the backend reflects the expected state or the
///   caller cancels. This is the default.
/// - **Bounded**: give up after a fixed number of attempts and treat the
///   operation as a soft failure.
///
/// # Examples
///
/// ```rust
/// use certcache::{MaxAttempts, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(Duration::from_millis(2000));
/// assert_eq!(policy.max_attempts(), MaxAttempts::Unbounded);
///
/// // Delay before the next attempt, given the attempt that just failed
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8000));
///
/// let bounded = RetryPolicy::exponential(Duration::from_millis(100))
///     .with_max_attempts(10);
/// assert_eq!(bounded.max_attempts(), MaxAttempts::Bounded(10));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    strategy: BackoffStrategy,
    max_attempts: MaxAttempts,
    max_delay: Option<Duration>,
    jitter: JitterStrategy,
}

/// How many attempts a retry loop may make, counting the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxAttempts {
    /// Stop after this many attempts.
    Bounded(u32),
    /// Keep going until success, a terminal error, or cancellation.
    Unbounded,
}

impl MaxAttempts {
    /// Returns true once `attempts` attempts have used up the budget.
    pub fn is_reached(self, attempts: u32) -> bool {
        match self {
            MaxAttempts::Bounded(max) => attempts >= max,
            MaxAttempts::Unbounded => false,
        }
    }
}

/// The backoff strategy for retry delays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Fixed delay between attempts.
    Constant(Duration),
    /// Delay doubles: base * 2^(attempt - 1).
    Exponential {
        /// Delay after the first failure.
        base: Duration,
    },
}

/// Strategy for adding randomness to delays.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum JitterStrategy {
    /// No jitter applied.
    #[default]
    None,
    /// Add ±percentage randomness to delay.
    Proportional(f64),
    /// Random delay between 0 and calculated delay.
    Full,
}

impl RetryPolicy {
    /// Create a policy with constant delay between retries.
    pub fn constant(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Constant(delay),
            max_attempts: MaxAttempts::Unbounded,
            max_delay: None,
            jitter: JitterStrategy::None,
        }
    }

    /// Create a policy whose delay doubles after every failure.
    ///
    /// The first retry waits `base`, the second `2 * base`, then `4 * base`
    /// and so on.
    pub fn exponential(base: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential { base },
            max_attempts: MaxAttempts::Unbounded,
            max_delay: None,
            jitter: JitterStrategy::None,
        }
    }

    /// Stop after `n` attempts in total (the first attempt included).
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = MaxAttempts::Bounded(n);
        self
    }

    /// Retry until success, a terminal error, or cancellation.
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = MaxAttempts::Unbounded;
        self
    }

    /// Set the maximum delay cap.
    ///
    /// Delays will never exceed this value, regardless of the backoff strategy.
    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = Some(d);
        self
    }

    /// Add proportional jitter to delays.
    ///
    /// `0.25` means the actual delay lands within ±25% of the calculated one.
    ///
    /// **Note**: Requires the `jitter` feature. Without it, delays are exact.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = JitterStrategy::Proportional(factor.clamp(0.0, 1.0));
        self
    }

    /// Use full jitter: a random delay between 0 and the calculated delay.
    ///
    /// **Note**: Requires the `jitter` feature. Without it, delays are exact.
    pub fn with_full_jitter(mut self) -> Self {
        self.jitter = JitterStrategy::Full;
        self
    }

    /// Get the attempt budget.
    pub fn max_attempts(&self) -> MaxAttempts {
        self.max_attempts
    }

    /// Get the maximum delay cap.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Get the jitter strategy.
    pub fn jitter(&self) -> &JitterStrategy {
        &self.jitter
    }

    /// Get the backoff strategy.
    pub fn strategy(&self) -> &BackoffStrategy {
        &self.strategy
    }

    /// Delay to wait after `attempt` (1-indexed) has failed, before the next one.
    ///
    /// Does not consult the attempt budget; see [`MaxAttempts::is_reached`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = match &self.strategy {
            BackoffStrategy::Constant(d) => *d,
            BackoffStrategy::Exponential { base } => {
                base.saturating_mul(2u32.saturating_pow(exponent))
            }
        };

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Delay for `attempt` with jitter applied.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        self.jitter
            .apply(self.delay_for_attempt(attempt), self.max_delay)
    }

    /// Check that the policy allows at least one attempt.
    pub fn validate(&self) -> Result<(), CallerError> {
        match self.max_attempts {
            MaxAttempts::Bounded(0) => Err(CallerError::InvalidPolicy(
                "max_attempts must allow at least one attempt",
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(feature = "jitter")]
fn clamp_factor(factor: f64) -> f64 {
    if factor.is_nan() {
        0.0
    } else {
        factor.clamp(0.0, 1.0)
    }
}

impl JitterStrategy {
    /// Apply jitter to a base delay, then cap it at `max_delay`.
    ///
    /// Proportional factors outside `0.0..=1.0` are clamped; NaN means no
    /// jitter. Deserialized policies skip the clamp in
    /// [`RetryPolicy::with_jitter`].
    pub fn apply(&self, base_delay: Duration, max_delay: Option<Duration>) -> Duration {
        let jittered = match self {
            JitterStrategy::None => base_delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Proportional(factor) => {
                use rand::Rng;
                let base_millis = base_delay.as_millis() as f64;
                let spread = base_millis * clamp_factor(*factor);
                let min = (base_millis - spread).max(0.0);
                let max = base_millis + spread;
                Duration::from_millis(rand::rng().random_range(min..=max) as u64)
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Proportional(_) => base_delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Full => {
                use rand::Rng;
                let max_millis = base_delay.as_millis() as u64;
                Duration::from_millis(rand::rng().random_range(0..=max_millis))
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Full => base_delay,
        };

        match max_delay {
            Some(max) => jittered.min(max),
            None => jittered,
        }
    }
}

#[cfg(test)]
mod policy_tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exponential_delay_doubles() {
        let policy = RetryPolicy::exponential(Duration::from_millis(2000));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(16000));
    }

    #[test]
    fn test_constant_delay() {
        let policy = RetryPolicy::constant(Duration::from_millis(100));
        for attempt in 1..5 {
            assert_eq!(
                policy.delay_for_attempt(attempt),
                Duration::from_millis(100)
            );
        }
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500)); // capped
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500)); // capped
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = RetryPolicy::exponential(Duration::from_secs(1));
        assert_eq!(
            policy.delay_for_attempt(u32::MAX),
            Duration::from_secs(u64::from(u32::MAX))
        );
    }

    #[test]
    fn test_max_attempts() {
        assert!(!MaxAttempts::Unbounded.is_reached(u32::MAX));
        assert!(!MaxAttempts::Bounded(10).is_reached(9));
        assert!(MaxAttempts::Bounded(10).is_reached(10));

        let policy = RetryPolicy::exponential(Duration::from_millis(1))
            .with_max_attempts(3)
            .unbounded();
        assert_eq!(policy.max_attempts(), MaxAttempts::Unbounded);
    }

    #[test]
    fn test_validate() {
        let policy = RetryPolicy::constant(Duration::from_millis(1));
        assert!(policy.validate().is_ok());
        assert!(policy.clone().with_max_attempts(1).validate().is_ok());
        assert!(matches!(
            policy.with_max_attempts(0).validate(),
            Err(CallerError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_jitter_none_returns_base_delay() {
        let base = Duration::from_millis(100);
        assert_eq!(JitterStrategy::None.apply(base, None), base);
        assert_eq!(
            JitterStrategy::None.apply(base, Some(Duration::from_millis(10))),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn test_out_of_range_jitter_from_config_is_clamped() {
        let base = Duration::from_millis(100);
        let negative: JitterStrategy = serde_json::from_str(r#"{"Proportional":-3.0}"#).unwrap();
        assert_eq!(negative.apply(base, None), base);
        assert_eq!(JitterStrategy::Proportional(f64::NAN).apply(base, None), base);

        let huge = JitterStrategy::Proportional(50.0).apply(base, None);
        assert!(huge <= base * 2);
    }

    #[test]
    fn test_policy_serde() {
        let policy = RetryPolicy::exponential(Duration::from_millis(250)).with_max_attempts(10);
        let json = serde_json::to_string(&policy).unwrap();
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }

    proptest! {
        #[test]
        fn prop_jittered_delay_respects_cap(
            base_ms in 0u64..10_000,
            cap_ms in 0u64..10_000,
            attempt in 1u32..20,
            factor in 0.0f64..1.0,
        ) {
            let cap = Duration::from_millis(cap_ms);
            let policy = RetryPolicy::exponential(Duration::from_millis(base_ms))
                .with_jitter(factor)
                .with_max_delay(cap);
            prop_assert!(policy.delay_with_jitter(attempt) <= cap);
        }

        #[test]
        fn prop_exponential_is_monotonic(base_ms in 1u64..5_000, attempt in 1u32..30) {
            let policy = RetryPolicy::exponential(Duration::from_millis(base_ms));
            prop_assert!(policy.delay_for_attempt(attempt + 1) >= policy.delay_for_attempt(attempt));
        }
    }
}
