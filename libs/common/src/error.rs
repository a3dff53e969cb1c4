//! Custom error types for the common library
//!
//! This module defines the infrastructure error types shared by the
//! storage and cache layers.

use redis::RedisError;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// A stored row could not be mapped back into a domain value
    #[error("Database integrity error: {0}")]
    Integrity(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

impl From<SqlxError> for DatabaseError {
    fn from(err: SqlxError) -> Self {
        DatabaseError::Query(err)
    }
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Custom error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache backend could not be reached or rejected the command
    #[error("Cache backend error: {0}")]
    Backend(#[from] RedisError),

    /// The requested key is absent, either never written or already expired
    #[error("Cache key not found: {0}")]
    Missing(String),

    /// The backend answered but failed its health check
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Type alias for Result with CacheError
pub type CacheResult<T> = Result<T, CacheError>;
