use std::path::Path;

use async_trait::async_trait;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use x509_cert::Certificate;
use x509_cert::der::{Decode, DecodePem};

use crate::certificate::{CertificateSigner, public_key_matches};
use crate::error::Error;
use crate::signer::{DigestSigner, HashAlgorithm, SignError};

/// RSA PKCS#1 v1.5 signing identity backed by a certificate and key held in memory.
///
/// Meant for development images and offline signing; production keys should
/// stay inside a vault or HSM.
pub struct LocalSigner {
    certificate: Certificate,
    key: LocalKey,
}

struct LocalKey {
    private_key: RsaPrivateKey,
    public_key_der: Vec<u8>,
}

impl LocalSigner {
    /// Build from a DER certificate and a DER PKCS#8 RSA private key.
    pub fn from_der(cert_der: &[u8], key_der: &[u8]) -> Result<Self, Error> {
        let certificate = Certificate::from_der(cert_der).map_err(Error::Certificate)?;
        let private_key = RsaPrivateKey::from_pkcs8_der(key_der).map_err(Error::PrivateKey)?;
        Self::new(certificate, private_key)
    }

    /// Build from a PEM certificate and a PEM PKCS#8 RSA private key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, Error> {
        let certificate = Certificate::from_pem(cert_pem.as_bytes()).map_err(Error::Certificate)?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(key_pem).map_err(Error::PrivateKey)?;
        Self::new(certificate, private_key)
    }

    pub fn from_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self, Error> {
        let cert_pem = read(cert_path.as_ref())?;
        let key_pem = read(key_path.as_ref())?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    fn new(certificate: Certificate, private_key: RsaPrivateKey) -> Result<Self, Error> {
        let public_key_der = private_key
            .to_public_key()
            .to_public_key_der()
            .map_err(Error::PublicKey)?
            .into_vec();
        let key = LocalKey { private_key, public_key_der };
        if !public_key_matches(&certificate, &key) {
            return Err(Error::KeyMismatch);
        }
        tracing::debug!(
            subject = %certificate.tbs_certificate.subject,
            "loaded local signing identity"
        );
        Ok(Self { certificate, key })
    }
}

fn read(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl DigestSigner for LocalKey {
    async fn sign_digest(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>, SignError> {
        hash.check_digest(digest)?;
        Ok(self.private_key.sign(hash.pkcs1v15(), digest)?)
    }

    fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    fn algorithm(&self) -> &str {
        "rsa-pkcs1v15"
    }
}

impl CertificateSigner for LocalSigner {
    fn signer(&self) -> &dyn DigestSigner {
        &self.key
    }

    fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}
