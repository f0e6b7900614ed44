//! Errors from storage operations.
//!
//! `Conflict` is the variant callers probe for: subnet bootstrap and host
//! registration treat it as benign (the row already exists), while lease
//! creation for a fresh MAC treats it as a request failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique or primary-key constraint was violated.
    #[error("already exists: {0}")]
    Conflict(String),

    /// The next address would fall past the subnet's `end`.
    #[error("address pool exhausted in subnet {subnet_id}")]
    PoolExhausted { subnet_id: i64 },

    /// A persisted column failed to parse back into its value type.
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub(crate) fn map_sqlx(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        sqlx::Error::Database(db)
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
        {
            StoreError::Conflict(db.to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_probe() {
        assert!(StoreError::Conflict("subnet 0".into()).is_conflict());
        assert!(!StoreError::NotFound("lease".into()).is_conflict());
        assert!(StoreError::NotFound("lease".into()).is_not_found());
    }

    #[test]
    fn display() {
        let err = StoreError::PoolExhausted { subnet_id: 1 };
        assert_eq!(err.to_string(), "address pool exhausted in subnet 1");
    }
}
