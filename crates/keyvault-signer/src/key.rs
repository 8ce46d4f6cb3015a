use std::sync::Arc;

use async_trait::async_trait;
use pesign::{DigestSigner, HashAlgorithm, SignError};
use rsa::pkcs8::EncodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};

use crate::reference::{InvalidKeyId, KeyReference};
use crate::vault::{VaultClient, VaultError};

const RSA_KEY_TYPES: &[&str] = &["RSA", "RSA-HSM"];

#[derive(Debug, thiserror::Error)]
pub enum KeySignerError {
    #[error("failed to fetch key {key}")]
    Lookup {
        key: KeyReference,
        #[source]
        source: VaultError,
    },
    #[error("key {0} is disabled")]
    Disabled(KeyReference),
    #[error("key {key} has unsupported type {key_type}")]
    UnsupportedKeyType { key: KeyReference, key_type: String },
    #[error("key {0} does not permit the sign operation")]
    SignNotPermitted(KeyReference),
    #[error("key {key} has an invalid RSA public key")]
    InvalidPublicKey {
        key: KeyReference,
        #[source]
        source: rsa::Error,
    },
    #[error("key {key} public key cannot be encoded")]
    PublicKeyEncoding {
        key: KeyReference,
        #[source]
        source: rsa::pkcs8::spki::Error,
    },
    #[error("vault returned an unusable identifier for key {key}")]
    InvalidKeyId {
        key: KeyReference,
        #[source]
        source: InvalidKeyId,
    },
}

impl KeySignerError {
    /// Whether the key does not exist, as opposed to existing but being unusable.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Lookup { source, .. } if source.is_not_found())
    }
}

/// A signer bound to one RSA key inside the vault.
///
/// Digests are sent to the vault and signed there; the private key is never
/// fetched.
pub struct KeySigner {
    client: Arc<dyn VaultClient>,
    key: KeyReference,
    public_key: RsaPublicKey,
    public_key_der: Vec<u8>,
}

impl KeySigner {
    /// Look the key up and check it can sign.
    ///
    /// When `key` asks for the latest version, the signer is pinned to the
    /// version the vault reports so every signature comes from the same key.
    pub async fn new(client: Arc<dyn VaultClient>, key: KeyReference) -> Result<Self, KeySignerError> {
        tracing::trace!(%key, "initialize key signer");
        let record = client.get_key(&key).await.map_err(|source| {
            tracing::error!(%key, err = %source, "failed to fetch key");
            KeySignerError::Lookup {
                key: key.clone(),
                source,
            }
        })?;

        let key = if key.version.is_empty() {
            let pinned = KeyReference::from_kid(&record.kid).map_err(|source| KeySignerError::InvalidKeyId {
                key: key.clone(),
                source,
            })?;
            if pinned.name != key.name {
                tracing::error!(%key, kid = %record.kid, "vault returned a different key");
                return Err(KeySignerError::InvalidKeyId {
                    key,
                    source: InvalidKeyId(record.kid),
                });
            }
            pinned
        } else {
            key
        };

        if !record.enabled {
            return Err(KeySignerError::Disabled(key));
        }
        if !RSA_KEY_TYPES.contains(&record.key_type.as_str()) {
            return Err(KeySignerError::UnsupportedKeyType {
                key,
                key_type: record.key_type,
            });
        }
        if !record.operations.is_empty() && !record.operations.iter().any(|op| op == "sign") {
            return Err(KeySignerError::SignNotPermitted(key));
        }

        let public_key = RsaPublicKey::new(
            BigUint::from_bytes_be(&record.modulus),
            BigUint::from_bytes_be(&record.exponent),
        )
        .map_err(|source| KeySignerError::InvalidPublicKey {
            key: key.clone(),
            source,
        })?;
        let public_key_der = public_key
            .to_public_key_der()
            .map_err(|source| KeySignerError::PublicKeyEncoding {
                key: key.clone(),
                source,
            })?
            .into_vec();

        tracing::debug!(%key, bits = public_key.size() * 8, "key signer ready");
        Ok(Self {
            client,
            key,
            public_key,
            public_key_der,
        })
    }

    pub fn key_reference(&self) -> &KeyReference {
        &self.key
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

/// JWA name of RSASSA-PKCS1-v1_5 with `hash`.
pub fn rsa_algorithm(hash: HashAlgorithm) -> &'static str {
    match hash {
        HashAlgorithm::Sha256 => "RS256",
        HashAlgorithm::Sha384 => "RS384",
        HashAlgorithm::Sha512 => "RS512",
    }
}

#[async_trait]
impl DigestSigner for KeySigner {
    async fn sign_digest(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>, SignError> {
        hash.check_digest(digest)?;
        let algorithm = rsa_algorithm(hash);
        let signature = self
            .client
            .sign(&self.key, algorithm, digest)
            .await
            .map_err(|err| {
                tracing::error!(key = %self.key, %algorithm, %err, "remote signing failed");
                SignError::Backend(Box::new(err))
            })?;

        if signature.len() != self.public_key.size() {
            return Err(SignError::Backend(Box::new(VaultError::InvalidResponse(format!(
                "key {}: expected {}-byte signature, got {}",
                self.key,
                self.public_key.size(),
                signature.len()
            )))));
        }
        Ok(signature)
    }

    fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    fn algorithm(&self) -> &str {
        "rsa-pkcs1v15"
    }
}
