//! Engine Error Taxonomy
//!
//! Every failure in the engine maps onto one of seven kinds. The kinds
//! drive retry behavior, logging policy, and the wire-level error codes
//! the dispatcher emits:
//!
//! - `Validation` / `NotFound` / `Conflict` - surfaced, not retryable
//! - `Busy` - retried internally with backoff, surfaced after the budget
//! - `ProviderUnavailable` - recovered locally by the fallback embedder
//! - `Cancelled` - caller cancellation, quiet
//! - `Fatal` - corruption, schema mismatch, unrecoverable I/O

use rusqlite::ErrorCode;

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Input violates a schema or invariant
    #[error("validation: {0}")]
    Validation(String),
    /// Memory id does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Uniqueness or state precondition failed
    #[error("conflict: {0}")]
    Conflict(String),
    /// Transient lock or queue contention, retry budget exhausted
    #[error("busy: {0}")]
    Busy(String),
    /// Embedding provider failed and no fallback succeeded
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Caller cancelled the operation
    #[error("cancelled")]
    Cancelled,
    /// Corruption, schema mismatch, or unrecoverable I/O
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Stable machine-readable code for the wire envelope
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::Busy(_) => "busy",
            EngineError::ProviderUnavailable(_) => "provider_unavailable",
            EngineError::Cancelled => "cancelled",
            EngineError::Fatal(_) => "fatal",
        }
    }

    /// Whether the store may retry this error internally
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Busy(_))
    }

    /// Map a rusqlite error onto the taxonomy.
    ///
    /// Busy/locked are transient; constraint violations are conflicts;
    /// a corrupt or non-database file is fatal. Everything else is
    /// treated as fatal because it means the write path itself is broken.
    pub fn from_sqlite(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(f, _) => match f.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    EngineError::Busy(err.to_string())
                }
                ErrorCode::ConstraintViolation => EngineError::Conflict(err.to_string()),
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                    EngineError::Fatal(err.to_string())
                }
                _ => EngineError::Fatal(err.to_string()),
            },
            rusqlite::Error::QueryReturnedNoRows => {
                EngineError::NotFound("row not found".to_string())
            }
            _ => EngineError::Fatal(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::from_sqlite(err)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Fatal(format!("io: {err}"))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(EngineError::Validation("x".into()).code(), "validation");
        assert_eq!(EngineError::NotFound("x".into()).code(), "not_found");
        assert_eq!(EngineError::Cancelled.code(), "cancelled");
    }

    #[test]
    fn test_only_busy_is_retryable() {
        assert!(EngineError::Busy("locked".into()).is_retryable());
        assert!(!EngineError::Conflict("dup".into()).is_retryable());
        assert!(!EngineError::Fatal("corrupt".into()).is_retryable());
    }

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let err = EngineError::from_sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
