//! Credential store backed by the process environment.

use crate::credential::CredentialStore;
use crate::error::StoreError;
use async_trait::async_trait;
use secrecy::SecretString;
use std::env::{self, VarError};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type Lookup = Arc<dyn Fn(&str) -> Result<String, VarError> + Send + Sync>;

/// Reads secrets from environment variables at resolve time.
///
/// The variable for a secret is the configured prefix followed by the
/// secret name upper-cased, with every character outside `[A-Za-z0-9]`
/// replaced by `_`. With prefix `KEYHOST_`, secret `jira-cloud` is read
/// from `KEYHOST_JIRA_CLOUD`.
///
/// Unset and empty variables are both treated as absent.
#[derive(Clone)]
pub struct EnvCredentialStore {
    prefix: String,
    lookup: Lookup,
}

impl EnvCredentialStore {
    /// Creates a store reading variables with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_lookup(prefix, |key| env::var(key))
    }

    /// Creates a store that reads variables through `lookup` instead of
    /// the process environment.
    #[must_use]
    pub fn with_lookup(
        prefix: impl Into<String>,
        lookup: impl Fn(&str) -> Result<String, VarError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            lookup: Arc::new(lookup),
        }
    }

    /// Returns the environment variable a secret name maps to.
    #[must_use]
    pub fn variable_name(&self, name: &str) -> String {
        let normalized: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{normalized}", self.prefix)
    }
}

impl Default for EnvCredentialStore {
    fn default() -> Self {
        Self::new("")
    }
}

impl fmt::Debug for EnvCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvCredentialStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    fn kind(&self) -> &'static str {
        "env"
    }

    async fn resolve(&self, name: &str) -> Result<Option<SecretString>, StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidName {
                name: name.to_string(),
                reason: "secret name is empty".to_string(),
            });
        }

        let variable = self.variable_name(name);
        match (self.lookup)(&variable) {
            Ok(value) if value.is_empty() => {
                debug!(variable = %variable, "environment variable is empty");
                Ok(None)
            }
            Ok(value) => Ok(Some(SecretString::new(value))),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => Err(StoreError::InvalidResponse {
                store: "env",
                reason: format!("{variable} is not valid unicode"),
            }),
        }
    }
}
