// src/classify/mod.rs

//! Error classification.
//!
//! [`classify`] turns whatever error an operation produced into a
//! [`DatabaseError`] with a stable [`ErrorKind`], so retry and alerting
//! decisions never depend on driver-specific message text. Classification is a
//! pure function of its input and never fails: anything unrecognized becomes
//! [`ErrorKind::Unknown`].

mod codes;

pub use codes::kind_for_code;

use crate::client::error::{DriverError, NetworkError, StoreError};
use crate::common::error::{BoxError, ResilienceError};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Stable taxonomy of database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectionFailed,
    ConnectionLost,
    ConnectionTimeout,
    ConnectionRefused,
    PoolExhausted,
    AuthenticationFailed,
    InsufficientPrivilege,
    SyntaxError,
    UndefinedTable,
    UndefinedColumn,
    UndefinedFunction,
    DataTypeMismatch,
    DivisionByZero,
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    TransactionRollback,
    SerializationFailure,
    DeadlockDetected,
    TransactionAborted,
    InvalidTransactionState,
    StringTruncation,
    NumericOutOfRange,
    InvalidTextRepresentation,
    InvalidDatetimeFormat,
    DiskFull,
    InsufficientMemory,
    SystemError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::ConnectionLost => "connection_lost",
            ErrorKind::ConnectionTimeout => "connection_timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::InsufficientPrivilege => "insufficient_privilege",
            ErrorKind::SyntaxError => "syntax_error",
            ErrorKind::UndefinedTable => "undefined_table",
            ErrorKind::UndefinedColumn => "undefined_column",
            ErrorKind::UndefinedFunction => "undefined_function",
            ErrorKind::DataTypeMismatch => "data_type_mismatch",
            ErrorKind::DivisionByZero => "division_by_zero",
            ErrorKind::UniqueViolation => "unique_violation",
            ErrorKind::ForeignKeyViolation => "foreign_key_violation",
            ErrorKind::NotNullViolation => "not_null_violation",
            ErrorKind::CheckViolation => "check_violation",
            ErrorKind::TransactionRollback => "transaction_rollback",
            ErrorKind::SerializationFailure => "serialization_failure",
            ErrorKind::DeadlockDetected => "deadlock_detected",
            ErrorKind::TransactionAborted => "transaction_aborted",
            ErrorKind::InvalidTransactionState => "invalid_transaction_state",
            ErrorKind::StringTruncation => "string_truncation",
            ErrorKind::NumericOutOfRange => "numeric_out_of_range",
            ErrorKind::InvalidTextRepresentation => "invalid_text_representation",
            ErrorKind::InvalidDatetimeFormat => "invalid_datetime_format",
            ErrorKind::DiskFull => "disk_full",
            ErrorKind::InsufficientMemory => "insufficient_memory",
            ErrorKind::SystemError => "system_error",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Failures to reach or stay connected to the server.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionFailed
                | ErrorKind::ConnectionLost
                | ErrorKind::ConnectionTimeout
                | ErrorKind::ConnectionRefused
                | ErrorKind::PoolExhausted
        )
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
        )
    }

    pub fn is_transaction_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransactionRollback
                | ErrorKind::SerializationFailure
                | ErrorKind::DeadlockDetected
                | ErrorKind::TransactionAborted
                | ErrorKind::InvalidTransactionState
        )
    }

    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::DataTypeMismatch
                | ErrorKind::DivisionByZero
                | ErrorKind::StringTruncation
                | ErrorKind::NumericOutOfRange
                | ErrorKind::InvalidTextRepresentation
                | ErrorKind::InvalidDatetimeFormat
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an error of `kind` (reported with store `code`) is worth retrying.
///
/// Transient connection and concurrency failures are retryable. Every
/// recognized violation, syntax or permission kind is not.
///
/// [`ErrorKind::Unknown`] is the one kind where the code matters: a store code
/// missing from the SQLSTATE table is retried, but an error that carries no
/// code at all is not. Plain string errors and unrecognized error types
/// therefore fail on the first attempt. See the "Retryability of unrecognized
/// errors" entry in DESIGN.md.
pub fn is_retryable(kind: ErrorKind, code: &str) -> bool {
    match kind {
        ErrorKind::ConnectionTimeout
        | ErrorKind::ConnectionLost
        | ErrorKind::PoolExhausted
        | ErrorKind::SerializationFailure
        | ErrorKind::DeadlockDetected => true,
        ErrorKind::Unknown => !code.is_empty(),
        _ => false,
    }
}

/// A classified database error.
#[derive(Debug, Clone)]
pub struct DatabaseError {
    kind: ErrorKind,
    code: String,
    message: String,
    detail: Option<String>,
    hint: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    column: Option<String>,
    constraint: Option<String>,
    retryable: bool,
    source: Option<Arc<dyn Error + Send + Sync + 'static>>,
}

impl DatabaseError {
    fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            retryable: is_retryable(kind, &code),
            kind,
            code,
            message: message.into(),
            detail: None,
            hint: None,
            schema: None,
            table: None,
            column: None,
            constraint: None,
            source: None,
        }
    }

    fn from_store(err: &StoreError) -> Self {
        Self {
            detail: err.detail.clone(),
            hint: err.hint.clone(),
            schema: err.schema.clone(),
            table: err.table.clone(),
            column: err.column.clone(),
            constraint: err.constraint.clone(),
            ..Self::new(kind_for_code(&err.code), err.code.clone(), err.message.clone())
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// The error this classification was produced from, when it was
    /// classified by value.
    pub fn original(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if !self.code.is_empty() {
            write!(f, " (SQLSTATE {})", self.code)?;
        }
        Ok(())
    }
}

impl Error for DatabaseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|err| err as &(dyn Error + 'static))
    }
}

impl From<BoxError> for DatabaseError {
    fn from(err: BoxError) -> Self {
        classify_owned(err)
    }
}

fn chain<'a>(err: &'a (dyn Error + 'static)) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(err), |err| (*err).source())
}

fn find<'a, T: Error + 'static>(err: &'a (dyn Error + 'static)) -> Option<&'a T> {
    chain(err).find_map(|err| err.downcast_ref::<T>())
}

/// Classify an error by reference.
///
/// The source chain is searched, in order of precedence, for a server error
/// with a SQLSTATE, a network error with a timeout flag, an OS-level I/O
/// error, and finally a driver sentinel. The first match decides the kind.
pub fn classify(err: &(dyn Error + 'static)) -> DatabaseError {
    if let Some(outcome) = find::<ResilienceError>(err) {
        return classify_outcome(outcome);
    }
    if let Some(classified) = find::<DatabaseError>(err) {
        return classified.clone();
    }

    if let Some(store) = find::<StoreError>(err) {
        return DatabaseError::from_store(store);
    }

    if let Some(net) = find::<NetworkError>(err) {
        let kind = if net.timeout { ErrorKind::ConnectionTimeout } else { ErrorKind::ConnectionFailed };
        return DatabaseError::new(kind, "", net.message.clone());
    }
    if let Some(elapsed) = find::<tokio::time::error::Elapsed>(err) {
        return DatabaseError::new(ErrorKind::ConnectionTimeout, "", elapsed.to_string());
    }

    if let Some(io_err) = find::<io::Error>(err) {
        let kind = match io_err.kind() {
            io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
            io::ErrorKind::TimedOut => ErrorKind::ConnectionTimeout,
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionAborted => {
                ErrorKind::ConnectionLost
            }
            _ => ErrorKind::SystemError,
        };
        return DatabaseError::new(kind, "", io_err.to_string());
    }

    if let Some(sentinel) = find::<DriverError>(err) {
        let kind = match sentinel {
            DriverError::TxClosed => ErrorKind::InvalidTransactionState,
            DriverError::TxCommitRollback => ErrorKind::TransactionRollback,
            DriverError::PoolExhausted => ErrorKind::PoolExhausted,
            DriverError::PoolClosed => ErrorKind::ConnectionFailed,
            DriverError::AcquireCancelled => ErrorKind::Unknown,
        };
        return DatabaseError::new(kind, "", sentinel.to_string());
    }

    DatabaseError::new(ErrorKind::Unknown, "", err.to_string())
}

/// Classify an owned error, keeping it as the result's source.
pub fn classify_owned(err: BoxError) -> DatabaseError {
    let mut classified = classify(err.as_ref());
    if classified.source.is_none() {
        classified.source = Some(Arc::from(err));
    }
    classified
}

// Outcomes of this crate's own managers classify as the failure they carry,
// so a retry loop wrapped around failover sees the underlying database error.
fn classify_outcome(outcome: &ResilienceError) -> DatabaseError {
    if let Some(cause) = outcome.cause() {
        return classify(cause);
    }
    match outcome {
        ResilienceError::NoHealthyNodes | ResilienceError::NotEnabled | ResilienceError::FailoverExhausted { .. } => {
            DatabaseError::new(ErrorKind::ConnectionFailed, "", outcome.to_string())
        }
        _ => DatabaseError::new(ErrorKind::Unknown, "", outcome.to_string()),
    }
}
