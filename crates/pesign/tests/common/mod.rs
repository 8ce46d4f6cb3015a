use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::SeedableRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use sha2::{Digest, Sha256};

pub const RSA_KEY_BITS: usize = 2048;

/// Deterministic RSA key: the SHA-256 of `seed` seeds the CSPRNG.
pub fn rsa_key(seed: &str) -> RsaPrivateKey {
    let hash = Sha256::digest(seed.as_bytes());
    let mut rng = ChaCha20Rng::from_seed(hash.into());
    RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).unwrap()
}

pub struct Identity {
    pub key: RsaPrivateKey,
    pub key_pem: String,
    pub key_der: Vec<u8>,
    pub cert_pem: String,
    pub cert_der: Vec<u8>,
}

/// Self-signed certificate with common name `cn` for the key derived from `seed`.
pub fn self_signed(seed: &str, cn: &str) -> Identity {
    let key = rsa_key(seed);
    let key_pem = key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
    let key_der = key.to_pkcs8_der().unwrap().as_bytes().to_vec();

    let key_pair = KeyPair::from_pem(&key_pem).unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, cn);
    params.distinguished_name = name;
    let cert = params.self_signed(&key_pair).unwrap();

    Identity {
        key,
        key_pem,
        key_der,
        cert_pem: cert.pem(),
        cert_der: cert.der().to_vec(),
    }
}
