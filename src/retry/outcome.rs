//! Settlement types for retry loops.

use std::fmt;

/// How a retry loop settled.
///
/// # Examples
///
/// ```rust
/// use certcache::RetryOutcome;
///
/// let exhausted: RetryOutcome<u32, &str> = RetryOutcome::Exhausted {
///     last_error: "not indexed yet",
///     attempts: 10,
/// };
///
/// // Soft-failure callers fall back to an empty result.
/// assert_eq!(exhausted.clone().success().unwrap_or_default(), 0);
/// assert_eq!(exhausted.attempts(), Some(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded.
    Success(T),
    /// An attempt failed with an error classified as terminal.
    Terminal(E),
    /// Every allowed attempt failed with retryable errors.
    Exhausted {
        /// The error from the final attempt.
        last_error: E,
        /// Total number of attempts made.
        attempts: u32,
    },
    /// The loop was cancelled; the result of any attempt in flight was dropped.
    Cancelled {
        /// Attempts started before the cancellation took effect.
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Returns true for [`RetryOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success(_))
    }

    /// Returns true for [`RetryOutcome::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryOutcome::Cancelled { .. })
    }

    /// Returns true for [`RetryOutcome::Exhausted`].
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryOutcome::Exhausted { .. })
    }

    /// The success value, treating every other settlement as "nothing".
    pub fn success(self) -> Option<T> {
        match self {
            RetryOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Attempt count, where the settlement records one.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryOutcome::Exhausted { attempts, .. } | RetryOutcome::Cancelled { attempts } => {
                Some(*attempts)
            }
            RetryOutcome::Success(_) | RetryOutcome::Terminal(_) => None,
        }
    }

    /// Convert into a `Result`, folding every failure into [`RetryError`].
    pub fn into_result(self) -> Result<T, RetryError<E>> {
        match self {
            RetryOutcome::Success(value) => Ok(value),
            RetryOutcome::Terminal(error) => Err(RetryError::Terminal(error)),
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => Err(RetryError::Exhausted {
                last_error,
                attempts,
            }),
            RetryOutcome::Cancelled { attempts } => Err(RetryError::Cancelled { attempts }),
        }
    }
}

/// A retry loop that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Failed with a terminal error.
    Terminal(E),
    /// Ran out of attempts.
    Exhausted {
        /// The error from the final attempt.
        last_error: E,
        /// Total number of attempts made.
        attempts: u32,
    },
    /// Cancelled by the caller.
    Cancelled {
        /// Attempts started before the cancellation took effect.
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// The underlying backend error, if the loop saw one.
    pub fn into_error(self) -> Option<E> {
        match self {
            RetryError::Terminal(error) => Some(error),
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::Cancelled { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Terminal(error) => write!(f, "terminal failure: {}", error),
            RetryError::Exhausted {
                last_error,
                attempts,
            } => write!(
                f,
                "retry exhausted after {} attempts: {}",
                attempts, last_error
            ),
            RetryError::Cancelled { attempts } => {
                write!(f, "retry cancelled after {} attempts", attempts)
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Terminal(error) => Some(error),
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::Cancelled { .. } => None,
        }
    }
}

#[cfg(test)]
mod outcome_tests {
    use super::*;
    use crate::classify::{BackendError, RejectCode};
    use std::error::Error as _;

    #[test]
    fn test_into_result() {
        let ok: RetryOutcome<i32, String> = RetryOutcome::Success(1);
        assert_eq!(ok.into_result(), Ok(1));

        let cancelled: RetryOutcome<i32, String> = RetryOutcome::Cancelled { attempts: 3 };
        assert_eq!(
            cancelled.into_result(),
            Err(RetryError::Cancelled { attempts: 3 })
        );
    }

    #[test]
    fn test_display() {
        let err: RetryError<String> = RetryError::Exhausted {
            last_error: "connection failed".to_string(),
            attempts: 10,
        };
        let display = err.to_string();
        assert!(display.contains("retry exhausted"));
        assert!(display.contains("10 attempts"));
        assert!(display.contains("connection failed"));

        let cancelled: RetryError<String> = RetryError::Cancelled { attempts: 2 };
        assert_eq!(cancelled.to_string(), "retry cancelled after 2 attempts");
    }

    #[test]
    fn test_source_chain() {
        let err = RetryError::Terminal(BackendError::Rejected(RejectCode::ResourceClosed));
        assert!(err.source().is_some());
        assert_eq!(
            err.into_error(),
            Some(BackendError::Rejected(RejectCode::ResourceClosed))
        );
    }

    #[test]
    fn test_success_discards_failures() {
        let terminal: RetryOutcome<i32, &str> = RetryOutcome::Terminal("closed");
        assert!(!terminal.is_success());
        assert_eq!(terminal.attempts(), None);
        assert_eq!(terminal.success(), None);
    }
}
