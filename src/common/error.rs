use thiserror::Error;

/// Boxed error returned by caller operations and connection collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal outcomes of resilient execution and configuration errors.
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("non-retryable error after {attempts} attempts: {source}")]
    NonRetryable {
        attempts: u32,
        #[source]
        source: BoxError,
    },

    #[error("operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: BoxError,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation cancelled during retry wait")]
    CancelledDuringWait,

    #[error("failover is not enabled")]
    NotEnabled,

    #[error("no healthy nodes available")]
    NoHealthyNodes,

    #[error("failover failed after {attempts} attempts{}", last_error_suffix(.source))]
    FailoverExhausted {
        attempts: u32,
        #[source]
        source: Option<BoxError>,
    },

    /// Error returned by the caller's operation, passed through untouched.
    #[error(transparent)]
    Operation(BoxError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

fn last_error_suffix(source: &Option<BoxError>) -> String {
    match source {
        Some(err) => format!(": {}", err),
        None => String::new(),
    }
}

impl ResilienceError {
    /// The error the caller's operation (or the connection layer) produced, if
    /// this outcome carries one.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            ResilienceError::NonRetryable { source, .. }
            | ResilienceError::RetriesExhausted { source, .. }
            | ResilienceError::Operation(source) => Some(source.as_ref()),
            ResilienceError::FailoverExhausted { source, .. } => source.as_deref(),
            _ => None,
        }
    }

    /// True for the two cancellation outcomes.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResilienceError::Cancelled | ResilienceError::CancelledDuringWait)
    }
}

pub type Result<T> = std::result::Result<T, ResilienceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_messages_are_distinct() {
        let exhausted = ResilienceError::RetriesExhausted {
            attempts: 4,
            source: "boom".into(),
        };
        let non_retryable = ResilienceError::NonRetryable {
            attempts: 1,
            source: "boom".into(),
        };
        assert_eq!(exhausted.to_string(), "operation failed after 4 attempts: boom");
        assert_eq!(non_retryable.to_string(), "non-retryable error after 1 attempts: boom");
        assert_eq!(ResilienceError::Cancelled.to_string(), "operation cancelled");
        assert_eq!(
            ResilienceError::CancelledDuringWait.to_string(),
            "operation cancelled during retry wait"
        );
    }

    #[test]
    fn test_failover_exhausted_message() {
        let bare = ResilienceError::FailoverExhausted { attempts: 3, source: None };
        assert_eq!(bare.to_string(), "failover failed after 3 attempts");

        let with_cause = ResilienceError::FailoverExhausted {
            attempts: 2,
            source: Some("connection refused".into()),
        };
        assert_eq!(with_cause.to_string(), "failover failed after 2 attempts: connection refused");
        assert!(with_cause.cause().is_some());
    }

    #[test]
    fn test_operation_error_is_transparent() {
        let err = ResilienceError::Operation("duplicate key".into());
        assert_eq!(err.to_string(), "duplicate key");
        assert!(!err.is_cancelled());
        assert!(ResilienceError::CancelledDuringWait.is_cancelled());
    }
}
