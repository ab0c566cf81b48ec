//! Credential store backed by a HashiCorp Vault KV v2 secrets engine.

use crate::credential::CredentialStore;
use crate::error::StoreError;
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Connection settings for a Vault KV v2 mount.
#[derive(Clone)]
pub struct VaultSettings {
    /// Base URL of the Vault server, e.g. `https://vault.internal:8200`.
    pub address: String,
    /// Token sent as `X-Vault-Token`.
    pub token: SecretString,
    /// Mount path of the KV v2 engine.
    pub mount: String,
    /// Field inside each secret that holds the credential value.
    pub field: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl fmt::Debug for VaultSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSettings")
            .field("address", &self.address)
            .field("token", &"[REDACTED]")
            .field("mount", &self.mount)
            .field("field", &self.field)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Reads secrets from `GET {address}/v1/{mount}/data/{name}`.
///
/// A 404, or a secret without the configured field, is absent. Transport
/// errors and any other status are backend failures.
pub struct VaultCredentialStore {
    client: reqwest::Client,
    settings: VaultSettings,
}

impl VaultCredentialStore {
    /// Creates a store for the given Vault mount.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(mut settings: VaultSettings) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| StoreError::Unavailable {
                store: "vault",
                reason: format!("building HTTP client: {e}"),
            })?;

        settings.address = settings.address.trim_end_matches('/').to_string();
        settings.mount = settings.mount.trim_matches('/').to_string();

        Ok(Self { client, settings })
    }

    /// Returns the URL a secret name is read from.
    #[must_use]
    pub fn secret_url(&self, name: &str) -> String {
        format!(
            "{}/v1/{}/data/{}",
            self.settings.address, self.settings.mount, name
        )
    }

    fn validate_name(name: &str) -> Result<(), StoreError> {
        let reason = if name.is_empty() {
            "secret name is empty"
        } else if name.contains(['?', '#', '%', '\\']) {
            "secret name must not contain '?', '#', '%' or '\\'"
        } else if name.split('/').any(|segment| segment == "." || segment == "..") {
            "secret name must not contain '.' or '..' segments"
        } else {
            return Ok(());
        };

        Err(StoreError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    }
}

/// Pulls `data.data.{field}` out of a KV v2 read response.
fn extract_field(body: &JsonValue, field: &str) -> Option<String> {
    body.get("data")?
        .get("data")?
        .get(field)?
        .as_str()
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl fmt::Debug for VaultCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultCredentialStore")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialStore for VaultCredentialStore {
    fn kind(&self) -> &'static str {
        "vault"
    }

    #[instrument(skip(self), fields(mount = %self.settings.mount))]
    async fn resolve(&self, name: &str) -> Result<Option<SecretString>, StoreError> {
        Self::validate_name(name)?;

        let response = self
            .client
            .get(self.secret_url(name))
            .header("X-Vault-Token", self.settings.token.expose_secret().as_str())
            .send()
            .await
            .map_err(|e| StoreError::Unavailable {
                store: "vault",
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("secret not found in vault");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StoreError::Unavailable {
                store: "vault",
                reason: format!("unexpected status {status}"),
            });
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse {
                store: "vault",
                reason: e.to_string(),
            })?;

        let value = extract_field(&body, &self.settings.field);
        if value.is_none() {
            debug!(field = %self.settings.field, "secret has no usable value in field");
        }
        Ok(value.map(SecretString::new))
    }
}
