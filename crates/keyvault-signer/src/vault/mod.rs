//! Vault client capability.
//!
//! [`VaultClient`] is everything the resolver and the key signer need from a
//! key vault. [`KeyVaultClient`] speaks the Key Vault REST dialect over HTTPS;
//! [`MemoryVault`] keeps everything in process.

mod credential;
mod error;
mod http;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::reference::{CertificateRecord, KeyRecord, KeyReference};

pub use credential::{
    AccessToken, ClientSecretCredential, StaticToken, TokenCredential, credential_from_env,
    credential_from_lookup,
};
pub use error::VaultError;
pub use http::{API_VERSION, DEFAULT_TIMEOUT, KeyVaultClient, KeyVaultConnector};
pub use memory::{Failure, MemoryVault};

/// Operations against one vault endpoint.
///
/// Implementations are shared between the resolver and the key signer it
/// builds, and may be shared across concurrent resolutions, so they must be
/// safe for concurrent use.
#[async_trait]
pub trait VaultClient: Send + Sync {
    /// Fetch a certificate record. An empty version means the latest.
    async fn get_certificate(&self, name: &str, version: &str) -> Result<CertificateRecord, VaultError>;

    /// Fetch the public metadata of a key. An empty version means the latest.
    async fn get_key(&self, key: &KeyReference) -> Result<KeyRecord, VaultError>;

    /// Sign `digest` inside the vault with `key` using a JWA algorithm name (e.g. "RS256").
    async fn sign(&self, key: &KeyReference, algorithm: &str, digest: &[u8]) -> Result<Vec<u8>, VaultError>;
}

/// Builds a [`VaultClient`] bound to a vault endpoint.
#[async_trait]
pub trait VaultConnector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Arc<dyn VaultClient>, VaultError>;
}
