//! Error types for datapoint.
//!
//! Every core operation reports failures through [`DbError`]. Variants carry
//! the offending identifier and, where the driver gives enough to go on, a
//! suggestion the operator can act on.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("{object} not found: {id}")]
    NotFound { object: String, id: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String, suggestion: String },

    #[error("Timeout: {operation} {}", describe_limit(.limit_secs))]
    Timeout {
        operation: String,
        /// The deadline that elapsed, when the caller knows it.
        limit_secs: Option<u64>,
    },

    #[error("Introspection failed on connection {connection_id}: {message}")]
    IntrospectionFailed {
        message: String,
        connection_id: String,
    },

    #[error("Query compilation failed: {message}")]
    CompileFailed { message: String },

    #[error(
        "Dangerous operation blocked: {operation}. {reason}. Set 'allowUnfiltered' to true to proceed."
    )]
    DangerousOperationBlocked { operation: String, reason: String },

    #[error("Execution failed: {message}")]
    ExecutionFailed {
        message: String,
        /// e.g., "23505" for a unique violation
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Persisting connection {connection_id} failed: {message}")]
    PersistFailed {
        message: String,
        connection_id: String,
    },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    pub fn not_found(object: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            object: object.into(),
            id: id.into(),
        }
    }

    /// Shorthand for an unknown connection identifier.
    pub fn connection_not_found(connection_id: impl Into<String>) -> Self {
        Self::not_found("Connection", connection_id)
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, limit_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit_secs: Some(limit_secs),
        }
    }

    pub fn introspection(message: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self::IntrospectionFailed {
            message: message.into(),
            connection_id: connection_id.into(),
        }
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::CompileFailed {
            message: message.into(),
        }
    }

    pub fn dangerous_operation_blocked(
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::DangerousOperationBlocked {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn persist(message: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self::PersistFailed {
            message: message.into(),
            connection_id: connection_id.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::ConnectionFailed { .. } => "ConnectionFailed",
            Self::Timeout { .. } => "Timeout",
            Self::IntrospectionFailed { .. } => "IntrospectionFailed",
            Self::CompileFailed { .. } => "CompileFailed",
            Self::DangerousOperationBlocked { .. } => "DangerousOperationBlocked",
            Self::ExecutionFailed { .. } => "ExecutionFailed",
            Self::PersistFailed { .. } => "PersistFailed",
            Self::Transaction { .. } => "Transaction",
            Self::InvalidInput { .. } => "InvalidInput",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailed { suggestion, .. } => Some(suggestion),
            Self::ExecutionFailed { suggestion, .. } => Some(suggestion),
            Self::Timeout { .. } => {
                Some("Consider increasing the timeout or narrowing the query")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::Timeout { .. })
    }

    /// Re-tag a driver error raised while writing connection metadata.
    pub fn into_persist(self, connection_id: &str) -> Self {
        match self {
            Self::PersistFailed { .. } | Self::NotFound { .. } => self,
            other => Self::persist(other.to_string(), connection_id),
        }
    }

    /// Re-tag a driver error raised while reading catalog metadata.
    pub fn into_introspection(self, connection_id: &str) -> Self {
        match self {
            Self::IntrospectionFailed { .. } | Self::ConnectionFailed { .. } | Self::Timeout { .. } => {
                self
            }
            other => Self::introspection(other.to_string(), connection_id),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::CompileFailed { .. }
            | Self::DangerousOperationBlocked { .. }
            | Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::ExecutionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ConnectionFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::IntrospectionFailed { .. }
            | Self::PersistFailed { .. }
            | Self::Transaction { .. }
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convert sqlx errors to DbError.
fn describe_limit(limit_secs: &Option<u64>) -> String {
    match limit_secs {
        Some(secs) => format!("exceeded {}s", secs),
        None => "timed out".to_string(),
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(
                    db_err.message(),
                    code,
                    "Check the referenced tables and columns",
                )
            }
            sqlx::Error::RowNotFound => DbError::execution(
                "No rows returned",
                None,
                "Verify the filter values match existing data",
            ),
            // the pool's acquire timeout is not visible from here
            sqlx::Error::PoolTimedOut => DbError::Timeout {
                operation: "connection pool acquire".to_string(),
                limit_secs: None,
            },
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found in row: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({
            "kind": self.kind(),
            "error": self.to_string(),
        });
        if let Some(suggestion) = self.suggestion() {
            body["suggestion"] = serde_json::Value::from(suggestion);
        }
        if let Self::ExecutionFailed {
            sql_state: Some(code),
            ..
        } = &self
        {
            body["sqlState"] = serde_json::Value::from(code.as_str());
        }
        (status, Json(body)).into_response()
    }
}
