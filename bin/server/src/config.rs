//! Centralized server configuration.
//!
//! Loaded via the `config` crate from `KEYHOST_`-prefixed environment
//! variables, with `__` separating nested keys:
//!
//! ```text
//! KEYHOST_SERVICE_NAME=jira
//! KEYHOST_BIND_ADDRESS=0.0.0.0:3000
//! KEYHOST_CREDENTIAL_STORE__KIND=vault
//! KEYHOST_CREDENTIAL_STORE__ADDRESS=https://vault.internal:8200
//! KEYHOST_CREDENTIAL_STORE__TOKEN=...
//! KEYHOST_JIRA__BASE_URL=https://jira.example.com
//! ```
//!
//! The prefix keeps configuration apart from the secrets the env store
//! reads, which are looked up by bare service name.
//!
//! Values are not type-guessed: a token or inline secret such as `007`
//! stays the string it was written as. Numeric settings parse their own
//! strings.

use keyhost_application::ConfigurationError;
use keyhost_integration::{
    CredentialStore, EnvCredentialStore, FileCredentialStore, MemoryCredentialStore,
    VaultCredentialStore, VaultSettings,
};
use rootcause::prelude::Report;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, de};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable prefix for all server settings.
pub const ENV_PREFIX: &str = "KEYHOST";

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Service whose credential the hosted application uses.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Address the HTTP server listens on.
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Where credentials come from.
    #[serde(default)]
    pub credential_store: CredentialStoreConfig,

    /// Jira connection settings.
    #[serde(default)]
    pub jira: JiraConfig,
}

fn default_service_name() -> String {
    "jira".to_string()
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

/// Which credential store backs the integration.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialStoreConfig {
    /// Environment variables named after the service.
    Env {
        /// Prepended to the variable name.
        #[serde(default)]
        prefix: String,
    },
    /// One file per credential in a directory.
    File {
        #[serde(default = "default_secrets_directory")]
        directory: PathBuf,
    },
    /// HashiCorp Vault KV version 2.
    Vault {
        address: String,
        token: SecretString,
        #[serde(default = "default_vault_mount")]
        mount: String,
        #[serde(default = "default_vault_field")]
        field: String,
        #[serde(
            default = "default_vault_timeout_seconds",
            deserialize_with = "seconds"
        )]
        timeout_seconds: u64,
    },
    /// Secrets given inline. Meant for development.
    Memory {
        #[serde(default)]
        secrets: HashMap<String, SecretString>,
    },
}

fn default_secrets_directory() -> PathBuf {
    PathBuf::from("/run/secrets")
}

fn default_vault_mount() -> String {
    "secret".to_string()
}

fn default_vault_field() -> String {
    "token".to_string()
}

fn default_vault_timeout_seconds() -> u64 {
    10
}

/// Reads a number of seconds given either as a number or as a string.
fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(seconds) => Ok(seconds),
        Seconds::Text(text) => text
            .trim()
            .parse()
            .map_err(|e| de::Error::custom(format!("invalid number of seconds '{text}': {e}"))),
    }
}

impl Default for CredentialStoreConfig {
    fn default() -> Self {
        Self::Env {
            prefix: String::new(),
        }
    }
}

impl CredentialStoreConfig {
    /// Returns the store kind as written in configuration.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Env { .. } => "env",
            Self::File { .. } => "file",
            Self::Vault { .. } => "vault",
            Self::Memory { .. } => "memory",
        }
    }

    /// Builds the configured store.
    ///
    /// # Errors
    ///
    /// Returns an error if the Vault client cannot be built.
    pub fn build(self) -> Result<Arc<dyn CredentialStore>, Report<ConfigurationError>> {
        let store: Arc<dyn CredentialStore> = match self {
            Self::Env { prefix } => Arc::new(EnvCredentialStore::new(prefix)),
            Self::File { directory } => Arc::new(FileCredentialStore::new(directory)),
            Self::Vault {
                address,
                token,
                mount,
                field,
                timeout_seconds,
            } => {
                let settings = VaultSettings {
                    address,
                    token,
                    mount,
                    field,
                    timeout: Duration::from_secs(timeout_seconds),
                };
                let store =
                    VaultCredentialStore::new(settings).map_err(|e| {
                        ConfigurationError::InvalidSetting {
                            key: "credential_store".to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                Arc::new(store)
            }
            Self::Memory { secrets } => {
                let store = MemoryCredentialStore::new();
                for (name, secret) in secrets {
                    store.insert(name, secret.expose_secret().to_owned());
                }
                Arc::new(store)
            }
        };
        Ok(store)
    }
}

/// Jira connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct JiraConfig {
    /// Base URL of the Jira site.
    #[serde(default = "default_jira_base_url")]
    pub base_url: String,

    /// Per-request timeout, in seconds.
    #[serde(
        default = "default_jira_timeout_seconds",
        deserialize_with = "seconds"
    )]
    pub timeout_seconds: u64,
}

fn default_jira_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_jira_timeout_seconds() -> u64 {
    30
}

impl JiraConfig {
    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            base_url: default_jira_base_url(),
            timeout_seconds: default_jira_timeout_seconds(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is malformed.
    pub fn from_env() -> Result<Self, Report<ConfigurationError>> {
        Self::from_environment(environment())
    }

    fn from_environment(
        environment: config::Environment,
    ) -> Result<Self, Report<ConfigurationError>> {
        let config = config::Config::builder()
            .add_source(environment)
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| ConfigurationError::LoadFailed {
                reason: e.to_string(),
            })?;
        Ok(config)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
