//! Cache keys and caller identities.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// The principal a call is made on behalf of.
///
/// Cache tables are partitioned by identity, so two identities never observe
/// each other's certified results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Arc<str>);

impl Identity {
    /// Create an identity from its textual principal.
    pub fn new(principal: impl Into<Arc<str>>) -> Self {
        Self(principal.into())
    }

    /// The anonymous principal.
    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }

    /// The textual principal.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Signature of a logical call: method name plus serialized parameters.
///
/// The caller identity is not part of the key; it selects the table the key
/// is looked up in.
///
/// # Example
///
/// ```rust
/// use certcache::CacheKey;
///
/// let a = CacheKey::new("get_account", &("alice", 7u64)).unwrap();
/// let b = CacheKey::new("get_account", &("alice", 7u64)).unwrap();
/// let c = CacheKey::new("get_account", &("bob", 7u64)).unwrap();
///
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Arc<str>,
    params: Arc<str>,
}

impl CacheKey {
    /// Build a key from a method name and its parameters.
    ///
    /// Parameters are serialized to canonical JSON: map entries are sorted by
    /// key, so equal maps produce equal keys whatever their iteration order.
    /// Sequences keep their order; pass sets as `BTreeSet`.
    pub fn new<P>(method: &str, params: &P) -> Result<Self, CallerError>
    where
        P: Serialize + ?Sized,
    {
        if method.trim().is_empty() {
            return Err(CallerError::EmptyMethod);
        }
        let unserializable = |e: serde_json::Error| CallerError::Unserializable(e.to_string());
        let canonical = serde_json::to_value(params).map_err(unserializable)?;
        let params = serde_json::to_string(&canonical).map_err(unserializable)?;
        Ok(Self {
            method: method.into(),
            params: params.into(),
        })
    }

    /// Key for a method that takes no parameters.
    pub fn unit(method: &str) -> Result<Self, CallerError> {
        Self::new(method, &())
    }

    /// The method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The serialized parameters.
    pub fn params(&self) -> &str {
        &self.params
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.method, self.params)
    }
}

/// Invalid arguments supplied by the caller.
///
/// Raised synchronously, before any loader runs. Never cached, never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerError {
    /// The method name was empty.
    EmptyMethod,
    /// The parameters could not be serialized into a key.
    Unserializable(String),
    /// A retry policy that can never run a single attempt.
    InvalidPolicy(&'static str),
}

impl fmt::Display for CallerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerError::EmptyMethod => write!(f, "method name must not be empty"),
            CallerError::Unserializable(msg) => {
                write!(f, "call parameters are not serializable: {}", msg)
            }
            CallerError::InvalidPolicy(msg) => write!(f, "invalid retry policy: {}", msg),
        }
    }
}

impl std::error::Error for CallerError {}
