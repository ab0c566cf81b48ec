//! Credential resolution and integration binding for keyhost.
//!
//! This crate provides:
//!
//! - **Credential store trait**: `resolve(name)` over any secret backend
//! - **Stores**: environment, file, HashiCorp Vault and in-memory variants
//! - **Integration**: a service name bound to a store, with a
//!   resolve-once, cache-until-invalidated credential

pub mod credential;
pub mod env_store;
pub mod error;
pub mod file_store;
pub mod integration;
pub mod memory_store;
pub mod vault_store;

pub use credential::{Credential, CredentialStore};
pub use env_store::EnvCredentialStore;
pub use error::{AuthError, StoreError};
pub use file_store::FileCredentialStore;
pub use integration::Integration;
pub use memory_store::MemoryCredentialStore;
pub use vault_store::{VaultCredentialStore, VaultSettings};
