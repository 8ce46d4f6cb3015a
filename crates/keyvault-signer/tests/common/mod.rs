#![allow(dead_code)]

use std::sync::OnceLock;

use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::SeedableRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use x509_cert::Certificate;
use x509_cert::der::Encode;

pub const RSA_KEY_BITS: usize = 2048;
pub const BOOT_SUBJECT: &str = "Talos Secure Boot Signing";

#[derive(Clone)]
pub struct Identity {
    pub key: RsaPrivateKey,
    pub cert_der: Vec<u8>,
}

/// Deterministic RSA key: the SHA-256 of `seed` seeds the CSPRNG.
fn rsa_key(seed: &str) -> RsaPrivateKey {
    let hash = Sha256::digest(seed.as_bytes());
    let mut rng = ChaCha20Rng::from_seed(hash.into());
    RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).unwrap()
}

fn self_signed(seed: &str, cn: &str) -> Identity {
    let key = rsa_key(seed);
    let key_pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
    let key_pair = KeyPair::from_pem(&key_pem).unwrap();

    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, cn);
    params.distinguished_name = name;
    let cert = params.self_signed(&key_pair).unwrap();

    Identity {
        key,
        cert_der: cert.der().to_vec(),
    }
}

/// The identity most tests sign with. Generated once per test binary.
pub fn boot_identity() -> &'static Identity {
    static IDENTITY: OnceLock<Identity> = OnceLock::new();
    IDENTITY.get_or_init(|| self_signed("boot-seed", BOOT_SUBJECT))
}

/// An unrelated identity, for mismatch cases.
pub fn other_identity() -> &'static Identity {
    static IDENTITY: OnceLock<Identity> = OnceLock::new();
    IDENTITY.get_or_init(|| self_signed("other-seed", "Someone Else"))
}

pub fn certificate_public_key(certificate: &Certificate) -> RsaPublicKey {
    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .unwrap();
    RsaPublicKey::from_public_key_der(&spki).unwrap()
}
