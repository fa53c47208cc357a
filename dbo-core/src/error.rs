//! Structured error types for dbo-core.
//!
//! Only two store signals are translated into stable kinds (unique-key
//! violation and missing row). Everything else from sqlx passes through in
//! `Store` so callers can still inspect the driver error.

use thiserror::Error;

/// Main error type for dbo-core operations
#[derive(Error, Debug)]
pub enum DboError {
    /// A unique constraint rejected the write
    #[error("duplicate record")]
    DuplicateRecord,

    /// Point lookup found no row
    #[error("record not found")]
    RecordNotFound,

    /// The unit of work panicked; carries the recovered payload
    #[error("transaction panic: {0}")]
    TransactionPanic(String),

    /// Pool construction or liveness check failed
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(#[source] sqlx::Error),

    /// The transaction deadline passed before the work finished
    #[error("transaction deadline exceeded")]
    DeadlineExceeded,

    /// The transaction was already committed or rolled back
    #[error("transaction already closed")]
    TransactionClosed,

    /// Rollback failed after the transaction had already failed
    #[error("{cause} (rollback also failed: {rollback})")]
    RollbackFailed {
        cause: Box<DboError>,
        rollback: sqlx::Error,
    },

    /// Condition clauses and parameters do not line up
    #[error("invalid condition: {0}")]
    Condition(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything else reported by the store
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Result type alias for dbo-core operations
pub type DboResult<T> = std::result::Result<T, DboError>;

impl DboError {
    /// Classify a write failure: unique violations become `DuplicateRecord`.
    pub fn from_write(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Self::DuplicateRecord;
            }
        }
        Self::Store(err)
    }

    /// Classify a read failure: sqlx's missing-row signal becomes `RecordNotFound`.
    pub fn from_read(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::RecordNotFound,
            other => Self::Store(other),
        }
    }

    pub fn condition(reason: impl Into<String>) -> Self {
        Self::Condition(reason.into())
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// The failure that started it all, looking through a failed rollback.
    pub fn root(&self) -> &DboError {
        match self {
            DboError::RollbackFailed { cause, .. } => cause.root(),
            other => other,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self.root(), DboError::DuplicateRecord)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), DboError::RecordNotFound)
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.root(), DboError::DeadlineExceeded)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self.root(), DboError::TransactionPanic(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DboError::TransactionPanic("boom".into());
        assert_eq!(err.to_string(), "transaction panic: boom");

        let err = DboError::condition("2 placeholders, 1 parameter");
        assert!(err.to_string().contains("invalid condition"));
    }

    #[test]
    fn row_not_found_maps_to_record_not_found() {
        let err = DboError::from_read(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());

        let err = DboError::from_read(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DboError::Store(sqlx::Error::PoolTimedOut)));
    }

    #[test]
    fn non_database_write_error_passes_through() {
        let err = DboError::from_write(sqlx::Error::PoolClosed);
        assert!(matches!(err, DboError::Store(sqlx::Error::PoolClosed)));
        assert!(!err.is_duplicate());
    }

    #[test]
    fn rollback_failure_keeps_original_cause() {
        let err = DboError::RollbackFailed {
            cause: Box::new(DboError::DeadlineExceeded),
            rollback: sqlx::Error::PoolClosed,
        };
        assert!(err.is_deadline_exceeded());
        assert!(err.to_string().starts_with("transaction deadline exceeded"));
        assert!(err.to_string().contains("rollback also failed"));
    }
}
