//! Error types for the integration crate.
//!
//! - `StoreError`: Failures of a credential backend itself
//! - `AuthError`: What an `Integration` reports to the code asking for a credential
//!
//! A secret that is simply absent is not a `StoreError`; stores report it
//! as `Ok(None)`.

use std::fmt;

/// Errors from credential store backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or answered with an error.
    Unavailable { store: &'static str, reason: String },
    /// The backend answered, but the answer could not be understood.
    InvalidResponse { store: &'static str, reason: String },
    /// The secret name cannot be used with this backend.
    InvalidName { name: String, reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { store, reason } => {
                write!(f, "{store} credential store unavailable: {reason}")
            }
            Self::InvalidResponse { store, reason } => {
                write!(f, "{store} credential store returned an invalid response: {reason}")
            }
            Self::InvalidName { name, reason } => {
                write!(f, "invalid secret name '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from resolving an integration's credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The store holds no secret for the service. Recoverable once an
    /// operator provides the secret.
    MissingCredential { service: String },
    /// The store itself failed.
    BackendFailure { service: String, reason: String },
}

impl AuthError {
    /// Returns the service name the failed resolution was for.
    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            Self::MissingCredential { service } | Self::BackendFailure { service, .. } => service,
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential { service } => {
                write!(f, "no credential configured for '{service}'")
            }
            Self::BackendFailure { service, reason } => {
                write!(f, "credential backend failed for '{service}': {reason}")
            }
        }
    }
}

impl std::error::Error for AuthError {}
