// src/client/error.rs

//! Errors produced by the connection layer.
//!
//! These are the shapes the classifier recognizes. A real driver adapter wraps
//! its own errors into one of them (or returns `std::io::Error` directly) so
//! classification never has to parse free text.

use std::fmt;
use thiserror::Error;

/// An error reported by the database server, carrying its SQLSTATE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreError {
    /// Five character SQLSTATE code.
    pub code: String,
    /// Primary human-readable message.
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub constraint: Option<String>,
}

impl StoreError {
    /// Create a server error with just a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_table(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self.table = Some(table.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.code)
    }
}

impl std::error::Error for StoreError {}

/// A transport-level failure that knows whether it was caused by a timeout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Network error: {message}")]
pub struct NetworkError {
    pub message: String,
    pub timeout: bool,
}

impl NetworkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), timeout: false }
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self { message: message.into(), timeout: true }
    }
}

/// Sentinel conditions raised by the driver itself rather than the server.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// Operation attempted on a transaction that was already committed or rolled back.
    #[error("Transaction error: transaction already closed")]
    TxClosed,

    /// Commit was requested but the server rolled the transaction back.
    #[error("Transaction error: commit unexpectedly resulted in rollback")]
    TxCommitRollback,

    /// No connection could be checked out of the pool in time.
    #[error("Connection pool error: pool exhausted")]
    PoolExhausted,

    /// The pool has been closed.
    #[error("Connection pool error: pool closed")]
    PoolClosed,

    /// The caller gave up while waiting for a connection.
    #[error("Connection pool error: acquire cancelled")]
    AcquireCancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_includes_code() {
        let err = StoreError::new("23505", "duplicate key value violates unique constraint")
            .with_constraint("users_email_key");
        assert_eq!(
            err.to_string(),
            "duplicate key value violates unique constraint (SQLSTATE 23505)"
        );
        assert_eq!(err.constraint.as_deref(), Some("users_email_key"));
    }

    #[test]
    fn test_network_error_timeout_flag() {
        assert!(NetworkError::timed_out("read deadline").timeout);
        assert!(!NetworkError::new("dial failed").timeout);
    }
}
