//! Error types for the SQL gateway.
//!
//! # Error Hierarchy
//!
//! ```text
//! GatewayError
//! ├── BadRequest      - malformed request, unparseable SQL, schema mismatch
//! ├── Unauthenticated - missing/invalid bearer token or JWT
//! ├── Forbidden        - allowlist rejection, RLS denial
//! ├── NotFound         - unknown REST resource
//! ├── Conflict         - constraint violation surfaced by storage
//! ├── Timeout          - operation queue or adapter deadline exceeded
//! ├── StorageFailure   - embedded store error
//! ├── ExternalFailure  - external adapter (Postgres/MySQL/remote SQLite) error
//! └── Internal         - unexpected internal errors
//! ```

use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway pipeline.
///
/// Every stage of the pipeline (AST parse, allowlist match, RLS rewrite,
/// cache lookup, queue dispatch, storage/adapter execution) returns this
/// type so the transport layer can classify failures uniformly.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The request body was malformed or the SQL text could not be parsed.
    #[error("bad request: {message}")]
    BadRequest {
        /// Human readable description of what was wrong with the request.
        message: String,
    },

    /// No credentials were presented, or the presented credentials were invalid.
    #[error("unauthenticated: {message}")]
    Unauthenticated {
        /// Reason authentication failed.
        message: String,
    },

    /// The statement was not found in the allowlist, or row-level security
    /// denied the operation.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Reason the operation was denied.
        message: String,
        /// The allowlist or RLS rule that caused the denial, if known.
        rule: Option<String>,
    },

    /// A named resource (REST route, cached entry) does not exist.
    #[error("{resource_type} not found: {identifier}")]
    NotFound {
        /// Kind of resource (e.g. "table", "route").
        resource_type: String,
        /// Identifier that was looked up.
        identifier: String,
    },

    /// The operation would violate a constraint enforced by the backing store.
    #[error("conflict: {message}")]
    Conflict {
        /// Error message from the store.
        message: String,
    },

    /// An operation exceeded its allotted time in the single-writer queue
    /// or against an external adapter.
    #[error("timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Timeout duration in milliseconds.
        timeout_ms: u64,
        /// Description of the operation that timed out.
        operation: String,
    },

    /// The embedded storage executor failed.
    #[error("storage failure: {message}")]
    StorageFailure {
        /// Error message from the embedded store.
        message: String,
        /// SQL state code if available.
        sql_state: Option<String>,
    },

    /// An external adapter (Postgres, MySQL, remote SQLite) failed.
    #[error("external adapter failure ({adapter}): {message}")]
    ExternalFailure {
        /// Which adapter raised the error (e.g. "postgres", "mysql").
        adapter: String,
        /// Error message from the adapter/driver.
        message: String,
    },

    /// Configuration is invalid or missing.
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message.
        message: String,
    },

    /// Unexpected internal error. Should be rare.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
        /// Optional source error for debugging.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl GatewayError {
    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    /// Create an authentication error.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated { message: message.into() }
    }

    /// Create a forbidden error with no named rule.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into(), rule: None }
    }

    /// Create a forbidden error naming the allowlist/RLS rule that denied it.
    #[must_use]
    pub fn forbidden_by_rule(message: impl Into<String>, rule: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into(), rule: Some(rule.into()) }
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotFound { resource_type: resource_type.into(), identifier: identifier.into() }
    }

    /// Create a storage failure error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageFailure { message: message.into(), sql_state: None }
    }

    /// Create an external adapter failure error.
    #[must_use]
    pub fn external(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalFailure { adapter: adapter.into(), message: message.into() }
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(timeout_ms: u64, operation: impl Into<String>) -> Self {
        Self::Timeout { timeout_ms, operation: operation.into() }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Check if this is a client error (4xx equivalent).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::BadRequest { .. }
                | Self::Unauthenticated { .. }
                | Self::Forbidden { .. }
                | Self::NotFound { .. }
                | Self::Conflict { .. }
        )
    }

    /// Check if this error is safe to retry unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::StorageFailure { .. } | Self::ExternalFailure { .. })
    }

    /// Get the HTTP status code equivalent.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Unauthenticated { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Timeout { .. } => 408,
            Self::StorageFailure { .. } | Self::ExternalFailure { .. } | Self::Configuration { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Get the stable error code used in JSON error responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::Unauthenticated { .. } => "UNAUTHENTICATED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::StorageFailure { .. } => "STORAGE_FAILURE",
            Self::ExternalFailure { .. } => "EXTERNAL_FAILURE",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::BadRequest { message: format!("invalid JSON: {e}") }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal { message: format!("I/O error: {e}"), source: Some(Box::new(e)) }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) => {
                let sql_state = db_err.code().map(|c| c.to_string());
                if is_unique_violation(sql_state.as_deref()) {
                    Self::Conflict { message: db_err.message().to_string() }
                } else {
                    Self::StorageFailure { message: db_err.message().to_string(), sql_state }
                }
            }
            sqlx::Error::PoolTimedOut => Self::timeout(0, "sqlite pool acquire"),
            other => Self::storage(other.to_string()),
        }
    }
}

/// Recognizes the unique-violation SQLSTATE/extended-error codes for the
/// dialects this gateway talks to directly via `sqlx`: Postgres
/// (`23505`) and SQLite (`2067` = `SQLITE_CONSTRAINT_UNIQUE`, `1555` =
/// `SQLITE_CONSTRAINT_PRIMARYKEY`), per spec §7's `Conflict` taxonomy.
fn is_unique_violation(code: Option<&str>) -> bool {
    matches!(code, Some("23505" | "2067" | "1555"))
}

#[cfg(feature = "axum-compat")]
mod axum_compat {
    use super::GatewayError;
    use axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    };

    impl IntoResponse for GatewayError {
        fn into_response(self) -> Response {
            let status =
                StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = serde_json::json!({
                "error": {
                    "code": self.error_code(),
                    "message": self.to_string(),
                }
            });
            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_is_client_error() {
        let err = GatewayError::bad_request("unexpected token");
        assert!(err.is_client_error());
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }

    #[test]
    fn storage_failure_is_server_error() {
        let err = GatewayError::storage("connection refused");
        assert!(!err.is_client_error());
        assert_eq!(err.status_code(), 500);
        assert!(err.is_retryable());
    }

    #[test]
    fn not_found_error_message() {
        let err = GatewayError::not_found("table", "widgets");
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "table not found: widgets");
    }

    #[test]
    fn forbidden_by_rule_carries_rule_name() {
        let err = GatewayError::forbidden_by_rule("statement not allowlisted", "select_widgets_v1");
        match err {
            GatewayError::Forbidden { rule, .. } => assert_eq!(rule.as_deref(), Some("select_widgets_v1")),
            _ => panic!("expected Forbidden"),
        }
    }

    #[test]
    fn timeout_is_retryable() {
        assert!(GatewayError::timeout(5000, "queue dispatch").is_retryable());
        assert!(!GatewayError::bad_request("bad").is_retryable());
    }

    #[test]
    fn from_serde_error_is_bad_request() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: GatewayError = json_err.into();
        assert!(matches!(err, GatewayError::BadRequest { .. }));
    }

    #[test]
    fn unique_violation_codes_are_recognized() {
        assert!(is_unique_violation(Some("23505")));
        assert!(is_unique_violation(Some("2067")));
        assert!(is_unique_violation(Some("1555")));
        assert!(!is_unique_violation(Some("42601")));
        assert!(!is_unique_violation(None));
    }

    #[test]
    fn conflict_is_a_client_error_with_409() {
        let err = GatewayError::Conflict { message: "duplicate key".to_string() };
        assert!(err.is_client_error());
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.error_code(), "CONFLICT");
    }
}
