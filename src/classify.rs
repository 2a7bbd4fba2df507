//! Error classification for retry decisions.
//!
//! Every failure coming back from the backend is sorted into one of two
//! buckets before the retry loop decides what to do with it:
//!
//! - [`ErrorClass::Retryable`]: network hiccups and unknown failures. The call
//!   is assumed safe to issue again.
//! - [`ErrorClass::Terminal`]: a known protocol rejection. Issuing the same
//!   call again cannot succeed, so the loop settles immediately.
//!
//! Classification is supplied per call site through the [`Classify`] trait.
//! Any `Fn(&E) -> ErrorClass` closure is a classifier, so most callers never
//! implement the trait by hand.
//!
//! # Example
//!
//! ```rust
//! use certcache::{BackendError, Classify, ErrorClass, RejectCode};
//!
//! let classifier = BackendError::classify;
//!
//! assert_eq!(
//!     classifier.classify(&BackendError::Rejected(RejectCode::ResourceClosed)),
//!     ErrorClass::Terminal
//! );
//! assert_eq!(
//!     classifier.classify(&BackendError::Transport("reset by peer".into())),
//!     ErrorClass::Retryable
//! );
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Verdict for a single failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Safe to attempt again after a backoff delay.
    Retryable,
    /// Must never be retried.
    Terminal,
}

impl ErrorClass {
    /// Returns true for [`ErrorClass::Retryable`].
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Retryable)
    }

    /// Returns true for [`ErrorClass::Terminal`].
    pub fn is_terminal(self) -> bool {
        matches!(self, ErrorClass::Terminal)
    }
}

/// Maps an error to an [`ErrorClass`].
pub trait Classify<E> {
    /// Classify a single failure.
    fn classify(&self, error: &E) -> ErrorClass;
}

impl<E, F> Classify<E> for F
where
    F: Fn(&E) -> ErrorClass,
{
    fn classify(&self, error: &E) -> ErrorClass {
        self(error)
    }
}

/// Classifier that retries every failure.
///
/// Useful for polling loops where any error means "not there yet".
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E> Classify<E> for AlwaysRetry {
    fn classify(&self, _error: &E) -> ErrorClass {
        ErrorClass::Retryable
    }
}

/// Closed set of protocol-level rejections returned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectCode {
    /// The targeted resource has been closed.
    ResourceClosed,
    /// The targeted resource has not opened yet.
    ResourceNotOpen,
    /// The request arguments were rejected.
    InvalidInput,
    /// The backend rejected the call without giving a reason.
    Unspecified,
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectCode::ResourceClosed => "resource closed",
            RejectCode::ResourceNotOpen => "resource not yet open",
            RejectCode::InvalidInput => "invalid input",
            RejectCode::Unspecified => "unspecified rejection",
        };
        f.write_str(text)
    }
}

/// A ready-made error type for backend clients.
///
/// Loaders may use any error type; this one pairs with
/// [`BackendError::classify`] for the common case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend answered with a known protocol rejection.
    Rejected(RejectCode),
    /// The request never got a well-formed answer.
    Transport(String),
    /// Anything else.
    Unknown(String),
}

impl BackendError {
    /// Default classification: rejections are terminal, everything else retries.
    pub fn classify(error: &BackendError) -> ErrorClass {
        match error {
            BackendError::Rejected(_) => ErrorClass::Terminal,
            BackendError::Transport(_) | BackendError::Unknown(_) => ErrorClass::Retryable,
        }
    }

    /// Returns the rejection code, if this is a protocol rejection.
    pub fn reject_code(&self) -> Option<RejectCode> {
        match self {
            BackendError::Rejected(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Rejected(code) => write!(f, "backend rejected call: {}", code),
            BackendError::Transport(msg) => write!(f, "transport failure: {}", msg),
            BackendError::Unknown(msg) => write!(f, "unknown backend failure: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

#[cfg(feature = "proptest")]
impl proptest::arbitrary::Arbitrary for RejectCode {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::prelude::*;
        prop_oneof![
            Just(RejectCode::ResourceClosed),
            Just(RejectCode::ResourceNotOpen),
            Just(RejectCode::InvalidInput),
            Just(RejectCode::Unspecified),
        ]
        .boxed()
    }
}

#[cfg(feature = "proptest")]
impl proptest::arbitrary::Arbitrary for BackendError {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::prelude::*;
        prop_oneof![
            any::<RejectCode>().prop_map(BackendError::Rejected),
            ".*".prop_map(BackendError::Transport),
            ".*".prop_map(BackendError::Unknown),
        ]
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejections_are_terminal() {
        for code in [
            RejectCode::ResourceClosed,
            RejectCode::ResourceNotOpen,
            RejectCode::InvalidInput,
            RejectCode::Unspecified,
        ] {
            assert_eq!(
                BackendError::classify(&BackendError::Rejected(code)),
                ErrorClass::Terminal
            );
        }
    }

    #[test]
    fn test_transport_and_unknown_are_retryable() {
        let transport = BackendError::Transport("timeout".to_string());
        let unknown = BackendError::Unknown("???".to_string());
        assert!(BackendError::classify(&transport).is_retryable());
        assert!(BackendError::classify(&unknown).is_retryable());
    }

    #[test]
    fn test_closure_is_classifier() {
        let only_odd = |n: &u32| {
            if n % 2 == 1 {
                ErrorClass::Retryable
            } else {
                ErrorClass::Terminal
            }
        };
        assert!(only_odd.classify(&3).is_retryable());
        assert!(only_odd.classify(&4).is_terminal());
    }

    #[test]
    fn test_always_retry() {
        assert_eq!(
            Classify::<BackendError>::classify(
                &AlwaysRetry,
                &BackendError::Rejected(RejectCode::InvalidInput)
            ),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn test_display() {
        let err = BackendError::Rejected(RejectCode::ResourceNotOpen);
        assert_eq!(
            err.to_string(),
            "backend rejected call: resource not yet open"
        );
        assert_eq!(err.reject_code(), Some(RejectCode::ResourceNotOpen));
    }

    proptest! {
        #[test]
        fn prop_reject_code_iff_terminal(msg in ".*", code_idx in 0usize..4, kind in 0u8..3) {
            let codes = [
                RejectCode::ResourceClosed,
                RejectCode::ResourceNotOpen,
                RejectCode::InvalidInput,
                RejectCode::Unspecified,
            ];
            let err = match kind {
                0 => BackendError::Rejected(codes[code_idx]),
                1 => BackendError::Transport(msg),
                _ => BackendError::Unknown(msg),
            };
            prop_assert_eq!(
                BackendError::classify(&err).is_terminal(),
                err.reject_code().is_some()
            );
        }
    }
}
