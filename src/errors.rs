use sea_orm::error::DbErr;

/// Error taxonomy for the ledger core and the workflows built on it.
///
/// Every variant is a local, recoverable condition surfaced to the caller;
/// deciding what is process-fatal belongs to the embedding host.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Invalid transfer state: {0}")]
    InvalidTransferState(String),

    /// Lock wait exceeded or serialization failure on a contended stock
    /// level key. Retryable by the caller.
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Wraps a database error, classifying contention failures as the
    /// retryable `StorageConflict` variant.
    ///
    /// Covers Postgres lock_timeout/deadlock messages and SQLite's
    /// single-writer "database is locked" busy error.
    pub fn db_error(error: DbErr) -> Self {
        let msg = error.to_string();
        let lowered = msg.to_lowercase();
        if lowered.contains("lock timeout")
            || lowered.contains("canceling statement due to lock")
            || lowered.contains("deadlock detected")
            || lowered.contains("database is locked")
            || lowered.contains("could not serialize access")
        {
            ServiceError::StorageConflict(msg)
        } else {
            ServiceError::DatabaseError(error)
        }
    }

    /// True when the caller may safely retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::StorageConflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_errors_map_to_storage_conflict() {
        let err = ServiceError::db_error(DbErr::Custom(
            "ERROR: canceling statement due to lock timeout".into(),
        ));
        assert!(matches!(err, ServiceError::StorageConflict(_)));
        assert!(err.is_retryable());

        let err = ServiceError::db_error(DbErr::Custom("database is locked".into()));
        assert!(matches!(err, ServiceError::StorageConflict(_)));
    }

    #[test]
    fn plain_db_errors_stay_database_errors() {
        let err = ServiceError::db_error(DbErr::Custom("no such table: accounts".into()));
        assert!(matches!(err, ServiceError::DatabaseError(_)));
        assert!(!err.is_retryable());
    }
}
