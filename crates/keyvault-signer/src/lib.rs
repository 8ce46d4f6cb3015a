//! Secure Boot signing identities backed by a remote key vault.
//!
//! [`SecureBootSigner`] resolves a certificate reference into the certificate
//! and a signer bound to the vault key behind it, and implements
//! [`pesign::CertificateSigner`] so the PE signing pipeline can use it like
//! any other identity.

pub mod error;
pub mod key;
pub mod reference;
pub mod secureboot;
pub mod vault;

pub use error::{ErrorKind, ResolveError, Stage};
pub use key::{KeySigner, KeySignerError};
pub use reference::{CertificateRecord, CertificateReference, KeyRecord, KeyReference};
pub use secureboot::SecureBootSigner;
pub use vault::{KeyVaultClient, KeyVaultConnector, MemoryVault, VaultClient, VaultConnector, VaultError};
