use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("username already taken")]
    DuplicateUsername,

    #[error("no account with id {0}")]
    AccountNotFound(i64),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage worker failed: {0}")]
    Worker(String),
}

impl StoreError {
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    #[must_use]
    pub const fn is_duplicate_username(&self) -> bool {
        matches!(self, Self::DuplicateUsername)
    }

    /// Whether this is a uniqueness or check constraint failure.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(StoreError::Timeout(Duration::from_secs(5)).is_timeout());
        assert!(StoreError::DuplicateUsername.is_duplicate_username());
        assert!(!StoreError::AccountNotFound(1).is_timeout());
    }

    #[test]
    fn test_constraint_violation_detection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: StoreError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_constraint_violation());
        assert!(!StoreError::DuplicateUsername.is_constraint_violation());
    }
}
