//! Credentials and the store abstraction they are resolved from.
//!
//! Secret values are wrapped in `secrecy` types from the moment a store
//! reads them. Nothing in this crate prints or logs a secret value.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;

/// A resolved secret bound to the name it answers to.
///
/// Immutable once resolved. Cloning shares the same secret allocation.
#[derive(Clone)]
pub struct Credential {
    name: String,
    secret: Arc<SecretString>,
    resolved_at: DateTime<Utc>,
}

impl Credential {
    /// Creates a credential resolved now.
    #[must_use]
    pub fn new(name: impl Into<String>, secret: SecretString) -> Self {
        Self {
            name: name.into(),
            secret: Arc::new(secret),
            resolved_at: Utc::now(),
        }
    }

    /// Returns the logical name this credential answers to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the plaintext secret.
    ///
    /// Keep the returned value on the stack of the call that needs it.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Returns when the credential was resolved from its store.
    #[must_use]
    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    /// Returns true if both handles come from the same resolution.
    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.secret, &other.secret)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("secret", &"[REDACTED]")
            .field("resolved_at", &self.resolved_at)
            .finish()
    }
}

/// A backend that maps secret names to secret values.
///
/// Implementations must be read-only and safe to call concurrently.
/// An absent secret is `Ok(None)`; `Err` is reserved for the backend
/// itself failing.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Short name of the backend, used in logs and errors.
    fn kind(&self) -> &'static str;

    /// Resolves a secret by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot answer.
    async fn resolve(&self, name: &str) -> Result<Option<SecretString>, StoreError>;
}
