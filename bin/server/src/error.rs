//! Error types for the server.
//!
//! `DispatchError` is returned as a value from every dispatch and mapped to
//! a user-safe HTTP response. `ServerError` covers the process lifecycle.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use keyhost_application::{ConfigurationError, OperationError};
use keyhost_integration::AuthError;
use serde_json::json;
use std::fmt;

/// Errors from dispatching one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No application has been registered.
    NoApplication,
    /// The application has no operation with this name.
    UnknownOperation { operation: String },
    /// The operation needs a credential and the store has none.
    AuthenticationRequired { service: String },
    /// The credential store failed.
    CredentialBackend { service: String, reason: String },
    /// The operation ran and failed.
    Operation(OperationError),
    /// The request was cancelled before the operation started.
    Cancelled,
}

impl DispatchError {
    /// Stable machine-readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoApplication => "no_application",
            Self::UnknownOperation { .. } => "unknown_operation",
            Self::AuthenticationRequired { .. } => "authentication_required",
            Self::CredentialBackend { .. } => "credential_backend_unavailable",
            Self::Operation(OperationError::InvalidArguments { .. }) => "invalid_arguments",
            Self::Operation(OperationError::CredentialRejected { .. }) => "credential_rejected",
            Self::Operation(_) => "operation_failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// HTTP status the error is reported with.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoApplication | Self::CredentialBackend { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnknownOperation { .. } => StatusCode::NOT_FOUND,
            Self::AuthenticationRequired { .. }
            | Self::Operation(OperationError::CredentialRejected { .. }) => StatusCode::UNAUTHORIZED,
            Self::Operation(OperationError::InvalidArguments { .. }) => StatusCode::BAD_REQUEST,
            Self::Operation(_) => StatusCode::BAD_GATEWAY,
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Credential backend details stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::CredentialBackend { service, .. } => {
                format!("credential backend for '{service}' is unavailable")
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoApplication => write!(f, "no application registered"),
            Self::UnknownOperation { operation } => {
                write!(f, "unknown operation '{operation}'")
            }
            Self::AuthenticationRequired { service } => {
                write!(f, "authentication required: no credential configured for '{service}'")
            }
            Self::CredentialBackend { service, reason } => {
                write!(f, "credential backend for '{service}' failed: {reason}")
            }
            Self::Operation(e) => write!(f, "{e}"),
            Self::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<AuthError> for DispatchError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingCredential { service } => Self::AuthenticationRequired { service },
            AuthError::BackendFailure { service, reason } => {
                Self::CredentialBackend { service, reason }
            }
        }
    }
}

impl From<OperationError> for DispatchError {
    fn from(e: OperationError) -> Self {
        Self::Operation(e)
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.code(),
            "message": self.public_message(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

/// Errors from the server lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// The server was wired incorrectly.
    Configuration(ConfigurationError),
    /// The listen socket could not be bound.
    Bind { address: String, reason: String },
    /// The accept loop failed.
    Serve { reason: String },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(f, "configuration error: {e}"),
            Self::Bind { address, reason } => {
                write!(f, "failed to bind to {address}: {reason}")
            }
            Self::Serve { reason } => write!(f, "server error: {reason}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<ConfigurationError> for ServerError {
    fn from(e: ConfigurationError) -> Self {
        Self::Configuration(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_maps_to_authentication_required() {
        let err = DispatchError::from(AuthError::MissingCredential {
            service: "jira".to_string(),
        });
        assert_eq!(err.code(), "authentication_required");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(err.to_string().contains("jira"));
    }

    #[test]
    fn backend_failure_hides_reason_from_caller() {
        let err = DispatchError::from(AuthError::BackendFailure {
            service: "jira".to_string(),
            reason: "vault at 10.0.0.5 refused connection".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.public_message().contains("10.0.0.5"));
        assert!(err.to_string().contains("10.0.0.5"));
    }

    #[test]
    fn operation_errors_keep_their_message() {
        let err = DispatchError::from(OperationError::Upstream {
            status: Some(500),
            reason: "jira is down".to_string(),
        });
        assert_eq!(err.code(), "operation_failed");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.public_message().contains("jira is down"));
    }

    #[test]
    fn invalid_arguments_is_bad_request() {
        let err = DispatchError::from(OperationError::invalid_arguments("missing field `key`"));
        assert_eq!(err.code(), "invalid_arguments");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn server_error_display() {
        let err = ServerError::Bind {
            address: "127.0.0.1:3000".to_string(),
            reason: "address in use".to_string(),
        };
        assert!(err.to_string().contains("127.0.0.1:3000"));
    }
}
