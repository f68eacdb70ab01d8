use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    /// Returned only when every attempt of a transaction hit a serialization conflict.
    #[error("serialization error: transaction retries exhausted")]
    Serialization,

    #[error("no rows in result set")]
    NotFound,

    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("connection pool timeout: no connection available after {0:?}")]
    PoolTimeout(Duration),

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl DbError {
    /// SQLSTATE reported by the server, when the error came from one.
    pub fn sql_state(&self) -> Option<&tokio_postgres::error::SqlState> {
        match self {
            Self::Postgres(err) => err.code(),
            _ => None,
        }
    }

    /// True for errors produced by a cancelled or expired [`Context`](crate::Context).
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}
