//! Error types for the application crate.
//!
//! - `OperationError`: An operation's own failure, passed through dispatch unchanged
//! - `ConfigurationError`: Wiring mistakes that must stop the process at startup

use std::fmt;

/// Errors returned by operation handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The arguments did not match what the operation expects.
    InvalidArguments { reason: String },
    /// The third-party API refused the credential (expired, revoked).
    CredentialRejected { reason: String },
    /// The third-party API answered with an error.
    Upstream { status: Option<u16>, reason: String },
    /// Any other failure inside the operation.
    Failed { reason: String },
}

impl OperationError {
    /// Creates an invalid-arguments error.
    #[must_use]
    pub fn invalid_arguments(reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            reason: reason.into(),
        }
    }

    /// Creates a credential-rejected error.
    #[must_use]
    pub fn credential_rejected(reason: impl Into<String>) -> Self {
        Self::CredentialRejected {
            reason: reason.into(),
        }
    }

    /// Creates a generic failure.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArguments { reason } => {
                write!(f, "invalid arguments: {reason}")
            }
            Self::CredentialRejected { reason } => {
                write!(f, "credential rejected: {reason}")
            }
            Self::Upstream { status, reason } => {
                if let Some(status) = status {
                    write!(f, "upstream error ({status}): {reason}")
                } else {
                    write!(f, "upstream error: {reason}")
                }
            }
            Self::Failed { reason } => write!(f, "operation failed: {reason}"),
        }
    }
}

impl std::error::Error for OperationError {}

/// Errors in how the process is wired together.
///
/// These are fatal at startup; the server must not start serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A second application was registered on a single-application server.
    ApplicationAlreadyRegistered { existing: String, rejected: String },
    /// The server was started without an application.
    NoApplication,
    /// Two operations in one application share a name.
    DuplicateOperation { application: String, operation: String },
    /// An application or operation name is unusable.
    InvalidName { reason: String },
    /// A configuration value is missing or invalid.
    InvalidSetting { key: String, reason: String },
    /// Configuration could not be loaded at all.
    LoadFailed { reason: String },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApplicationAlreadyRegistered { existing, rejected } => {
                write!(
                    f,
                    "application '{existing}' is already registered, cannot register '{rejected}'"
                )
            }
            Self::NoApplication => write!(f, "no application registered"),
            Self::DuplicateOperation {
                application,
                operation,
            } => {
                write!(
                    f,
                    "application '{application}' declares operation '{operation}' more than once"
                )
            }
            Self::InvalidName { reason } => write!(f, "invalid name: {reason}"),
            Self::InvalidSetting { key, reason } => {
                write!(f, "invalid setting '{key}': {reason}")
            }
            Self::LoadFailed { reason } => {
                write!(f, "failed to load configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}
