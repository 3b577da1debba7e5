use thiserror::Error;

/// Closed error sum for the database access layer.
///
/// `Unavailable`, `Timeout` and `PoolExhausted` are the transient kinds;
/// `Constraint` and `Query` are permanent and never retried.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database temporarily unavailable (circuit breaker open)")]
    Unavailable,

    #[error("Query timeout after multiple attempts")]
    Timeout,

    #[error("Connection pool exhausted - too many concurrent requests")]
    PoolExhausted,

    #[error("Database constraint error: {0}")]
    Constraint(String),

    #[error("Database query error: {0}")]
    Query(String),

    #[error("Database connection error")]
    Connection,

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Row decode error: {0}")]
    Decode(String),
}

impl DbError {
    /// Whether the retry policy may re-attempt after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbError::Timeout | DbError::PoolExhausted | DbError::Connection
        )
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DbError::Timeout.is_transient());
        assert!(DbError::PoolExhausted.is_transient());
        assert!(DbError::Connection.is_transient());
        assert!(!DbError::Unavailable.is_transient());
        assert!(!DbError::Constraint("duplicate".into()).is_transient());
        assert!(!DbError::Query("syntax".into()).is_transient());
    }
}
