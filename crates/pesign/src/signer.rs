use async_trait::async_trait;
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Hash algorithms a digest may be computed with before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Length in bytes of a digest produced by this algorithm.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// PKCS#1 v1.5 padding scheme carrying this algorithm's DigestInfo prefix.
    pub fn pkcs1v15(self) -> Pkcs1v15Sign {
        match self {
            Self::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            Self::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            Self::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        }
    }

    /// Fails with [`SignError::DigestLength`] unless `digest` has the expected size.
    pub fn check_digest(self, digest: &[u8]) -> Result<(), SignError> {
        if digest.len() != self.digest_len() {
            return Err(SignError::DigestLength {
                hash: self,
                expected: self.digest_len(),
                actual: digest.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("{hash} digest must be {expected} bytes, got {actual}")]
    DigestLength {
        hash: HashAlgorithm,
        expected: usize,
        actual: usize,
    },
    #[error("key cannot produce {0} signatures")]
    UnsupportedKey(String),
    #[error("signing backend failed")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("RSA signing failed")]
    Rsa(#[from] rsa::Error),
}

/// Signs precomputed digests with a key the caller never sees.
///
/// Implementations may be local (a key in memory) or remote (a key held by a
/// vault or HSM), so signing is async.
#[async_trait]
pub trait DigestSigner: Send + Sync {
    /// Sign a digest that was computed with `hash`. Returns raw signature bytes.
    async fn sign_digest(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>, SignError>;

    /// DER-encoded SubjectPublicKeyInfo of the signing key.
    fn public_key_der(&self) -> &[u8];

    /// Signature scheme identifier (e.g. "rsa-pkcs1v15").
    fn algorithm(&self) -> &str;
}
