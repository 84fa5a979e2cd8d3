use thiserror::Error;

/// Type-erased error reported by a backend driver
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for the sqlconduit library
#[derive(Error, Debug)]
pub enum ConduitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The backend could not be reached or the connection string was rejected
    #[error("Connection error: {0}")]
    Connection(#[source] BackendError),
    /// A flat name/value list did not pair up
    #[error("Parameter count error: expected name/value pairs, got {count} items")]
    ParameterCount { count: usize },
    /// The driver reported a failure while preparing or running a statement
    #[error("Backend execution error: {0}")]
    BackendExecution(#[source] BackendError),
    /// The insert path could not read a numeric identity
    #[error("Identity parse error: expected a numeric identity, got {got}")]
    IdentityParse { got: String },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Column not found: {0}")]
    ColumnNotFound(String),
    #[error("Column type mismatch for {column}: expected {expected}, got {got}")]
    ColumnTypeMismatch {
        column: String,
        expected: String,
        got: String,
    },
    #[error("Parameter type mismatch: expected {expected}, got {got}")]
    ParameterTypeMismatch { expected: String, got: String },
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
}

impl ConduitError {
    pub fn connection<E>(err: E) -> Self
    where
        E: Into<BackendError>,
    {
        ConduitError::Connection(err.into())
    }

    pub fn backend<E>(err: E) -> Self
    where
        E: Into<BackendError>,
    {
        ConduitError::BackendExecution(err.into())
    }

    pub fn new_parameter_type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        ConduitError::ParameterTypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}

/// Type alias for Results using ConduitError
pub type Result<T> = std::result::Result<T, ConduitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_message_is_visible() {
        let err = ConduitError::backend("near \"SELEC\": syntax error");
        assert!(err.to_string().contains("syntax error"));
        assert!(matches!(err, ConduitError::BackendExecution(_)));
    }

    #[test]
    fn test_connection_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ConduitError::connection(io);
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_parameter_count_display() {
        let err = ConduitError::ParameterCount { count: 3 };
        assert_eq!(
            err.to_string(),
            "Parameter count error: expected name/value pairs, got 3 items"
        );
    }
}
