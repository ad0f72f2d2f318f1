//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every layer converts its own error enum into this one at its boundary, and
/// the HTTP layer maps each variant to exactly one status code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input, failed validation or a rejected business rule.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A referenced record (family, product, warehouse, delivery, person) is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate natural key, delivered delivery, or a stale record version.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Store-layer failure (unacknowledged write, backend error).
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
