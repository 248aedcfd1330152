//! Error types for ERP operations.
//!
//! This module defines [`ErpError`] which covers every failure a read, write
//! or production run can surface: input validation, business invariants
//! enforced by the store, remote/network failures and authentication.

use thiserror::Error;

/// Errors that can occur while talking to the store or the cache.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErpError {
    /// Bad input shape, rejected before any remote call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A stock movement would drive a supply's stock below zero.
    #[error("Insufficient stock for supply {supply_id}: available {available}, requested {requested}")]
    InsufficientStock {
        /// The supply whose stock is too low.
        supply_id: String,
        /// Stock currently on hand.
        available: f64,
        /// Quantity the operation tried to consume.
        requested: f64,
    },

    /// Network or store failure. Retried before being surfaced.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The caller is not authenticated, or credentials were rejected.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The requested record does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Table or resource name.
        resource: String,
        /// Identifier that was looked up.
        id: String,
    },

    /// A write conflicted with existing data (duplicate key, stale update).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A payload could not be encoded or decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl ErpError {
    /// Shorthand for a [`ErpError::NotFound`] error.
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Returns true if retrying the same call could succeed.
    ///
    /// Only remote failures are retryable; validation, stock, auth and
    /// not-found errors are logical rejections.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl From<serde_json::Error> for ErpError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Result type alias using [`ErpError`].
pub type Result<T> = std::result::Result<T, ErpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_remote_errors_are_retryable() {
        assert!(ErpError::Remote("timeout".into()).is_retryable());
        assert!(!ErpError::Validation("bad".into()).is_retryable());
        assert!(!ErpError::Auth("no session".into()).is_retryable());
        assert!(!ErpError::not_found("insumos", "x").is_retryable());
        assert!(
            !ErpError::InsufficientStock {
                supply_id: "s1".into(),
                available: 1.0,
                requested: 2.0,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_messages_are_human_readable() {
        let err = ErpError::InsufficientStock {
            supply_id: "s1".into(),
            available: 10.0,
            requested: 11.0,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for supply s1: available 10, requested 11"
        );
        assert_eq!(
            ErpError::not_found("clientes", "42").to_string(),
            "clientes not found: 42"
        );
    }
}
