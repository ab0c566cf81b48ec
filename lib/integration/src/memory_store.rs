//! In-memory credential store for tests and local runs.

use crate::credential::CredentialStore;
use crate::error::StoreError;
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// A credential store backed by a map held in process memory.
///
/// Secrets can be inserted and removed at runtime, which makes it possible
/// to model an operator supplying or revoking a secret while the server runs.
#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret, returning the store.
    #[must_use]
    pub fn with_secret(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts or replaces a secret.
    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into());
    }

    /// Removes a secret. Returns true if it was present.
    pub fn remove(&self, name: &str) -> bool {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryCredentialStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            secrets: RwLock::new(
                iter.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn resolve(&self, name: &str) -> Result<Option<SecretString>, StoreError> {
        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        Ok(secrets.get(name).cloned().map(SecretString::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn resolves_present_secret() {
        let store = MemoryCredentialStore::new().with_secret("jira", "secret-abc");
        let secret = store.resolve("jira").await.unwrap().expect("present");
        assert_eq!(secret.expose_secret(), "secret-abc");
    }

    #[tokio::test]
    async fn absent_secret_is_none() {
        let store = MemoryCredentialStore::new();
        assert!(store.resolve("jira").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_and_remove_are_observed() {
        let store = MemoryCredentialStore::new();
        store.insert("jira", "first");
        assert!(store.resolve("jira").await.unwrap().is_some());

        assert!(store.remove("jira"));
        assert!(!store.remove("jira"));
        assert!(store.resolve("jira").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn collects_from_pairs() {
        let store: MemoryCredentialStore = [("jira", "a"), ("github", "b")].into_iter().collect();
        let secret = store.resolve("github").await.unwrap().expect("present");
        assert_eq!(secret.expose_secret(), "b");
    }
}
