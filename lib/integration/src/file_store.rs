//! Credential store backed by one file per secret.
//!
//! This is the layout container runtimes use for mounted secrets
//! (`/run/secrets/<name>`).

use crate::credential::CredentialStore;
use crate::error::StoreError;
use async_trait::async_trait;
use secrecy::SecretString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Reads `<directory>/<name>` for each secret.
///
/// A missing or empty file is absent. Trailing line endings are stripped.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    directory: PathBuf,
}

impl FileCredentialStore {
    /// Creates a store reading from the given directory.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Returns the directory secrets are read from.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn secret_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("secret name is empty"));
        }
        if name == "." || name == ".." {
            return Err(invalid("secret name must not be a relative directory"));
        }
        if name.contains(['/', '\\', '\0']) {
            return Err(invalid("secret name must not contain path separators"));
        }

        Ok(self.directory.join(name))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn resolve(&self, name: &str) -> Result<Option<SecretString>, StoreError> {
        let path = self.secret_path(name)?;

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let value = contents.trim_end_matches(['\r', '\n']);
                if value.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(SecretString::new(value.to_string())))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => Err(StoreError::InvalidResponse {
                store: "file",
                reason: format!("{} is not valid UTF-8", path.display()),
            }),
            Err(e) => Err(StoreError::Unavailable {
                store: "file",
                reason: format!("reading {}: {e}", path.display()),
            }),
        }
    }
}
