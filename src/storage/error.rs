//! Errors returned by the record store.

use thiserror::Error;

/// Errors that store operations hand back to their caller.
///
/// Neither variant is retried internally. `NotFound` is an ordinary outcome for
/// lookups and is reported to clients as a null reply, not as an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The TTL given to a write could not be parsed as a duration.
    #[error("invalid TTL '{spec}': {reason}")]
    InvalidTtl { spec: String, reason: String },

    /// The key is not present in the store.
    #[error("no such key: {0}")]
    NotFound(String),
}

impl StoreError {
    pub(crate) fn invalid_ttl(spec: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidTtl {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true for the `NotFound` variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
