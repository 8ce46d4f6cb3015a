use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use pesign::HashAlgorithm;
use rsa::RsaPrivateKey;
use rsa::traits::PublicKeyParts;
use url::Url;

use super::error::VaultError;
use super::{VaultClient, VaultConnector};
use crate::reference::{CertificateRecord, KeyRecord, KeyReference};

/// Failure modes a [`MemoryVault`] can be told to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NotFound,
    Unauthorized,
    Forbidden,
    Unavailable,
}

impl Failure {
    fn into_error(self, resource: String) -> VaultError {
        let message = "injected failure".to_string();
        match self {
            Failure::NotFound => VaultError::NotFound { resource, message },
            Failure::Unauthorized => VaultError::Unauthorized { resource, message },
            Failure::Forbidden => VaultError::Forbidden { resource, message },
            Failure::Unavailable => VaultError::Unavailable {
                resource,
                status: 503,
                message,
            },
        }
    }
}

/// An in-process vault.
///
/// Clones share state, so a test can keep a handle to inject failures and
/// read call counters while the resolver owns another. Versions are kept in
/// insertion order and the last one inserted is the latest.
#[derive(Clone)]
pub struct MemoryVault {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Url,
    state: Mutex<State>,
    connects: AtomicUsize,
    certificate_lookups: AtomicUsize,
    key_lookups: AtomicUsize,
    signatures: AtomicUsize,
}

#[derive(Default)]
struct State {
    certificates: HashMap<String, Vec<StoredCertificate>>,
    keys: HashMap<String, Vec<StoredKey>>,
    connect_failure: Option<Failure>,
    certificate_failure: Option<Failure>,
    key_failure: Option<Failure>,
    latency: Duration,
}

struct StoredCertificate {
    version: String,
    cer: Vec<u8>,
    kid: Option<String>,
}

struct StoredKey {
    version: String,
    private_key: RsaPrivateKey,
    key_type: String,
    enabled: bool,
}

fn latest_or<'a, T>(versions: &'a [T], version: &str, version_of: impl Fn(&T) -> &str) -> Option<&'a T> {
    if version.is_empty() {
        versions.last()
    } else {
        versions.iter().find(|item| version_of(item) == version)
    }
}

impl MemoryVault {
    pub fn new(endpoint: Url) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint,
                state: Mutex::new(State::default()),
                connects: AtomicUsize::new(0),
                certificate_lookups: AtomicUsize::new(0),
                key_lookups: AtomicUsize::new(0),
                signatures: AtomicUsize::new(0),
            }),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the maps consistent.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a certificate version. `key` becomes the record's key identifier.
    pub fn insert_certificate(&self, name: &str, version: &str, cer: Vec<u8>, key: Option<&KeyReference>) {
        let kid = key.map(|key| key.to_kid(self.endpoint()));
        self.insert_certificate_with_kid(name, version, cer, kid);
    }

    /// Store a certificate version with a raw key identifier.
    pub fn insert_certificate_with_kid(&self, name: &str, version: &str, cer: Vec<u8>, kid: Option<String>) {
        self.state()
            .certificates
            .entry(name.to_string())
            .or_default()
            .push(StoredCertificate {
                version: version.to_string(),
                cer,
                kid,
            });
    }

    pub fn insert_key(&self, name: &str, version: &str, private_key: RsaPrivateKey) {
        self.insert_key_with_type(name, version, private_key, "RSA-HSM");
    }

    pub fn insert_key_with_type(&self, name: &str, version: &str, private_key: RsaPrivateKey, key_type: &str) {
        self.state().keys.entry(name.to_string()).or_default().push(StoredKey {
            version: version.to_string(),
            private_key,
            key_type: key_type.to_string(),
            enabled: true,
        });
    }

    pub fn set_key_enabled(&self, key: &KeyReference, enabled: bool) {
        let mut state = self.state();
        if let Some(stored) = state
            .keys
            .get_mut(&key.name)
            .and_then(|versions| versions.iter_mut().find(|k| k.version == key.version))
        {
            stored.enabled = enabled;
        }
    }

    pub fn fail_connect(&self, failure: Option<Failure>) {
        self.state().connect_failure = failure;
    }

    pub fn fail_certificate_lookup(&self, failure: Option<Failure>) {
        self.state().certificate_failure = failure;
    }

    pub fn fail_key_lookup(&self, failure: Option<Failure>) {
        self.state().key_failure = failure;
    }

    /// Delay applied before every client operation.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn certificate_lookups(&self) -> usize {
        self.inner.certificate_lookups.load(Ordering::SeqCst)
    }

    pub fn key_lookups(&self) -> usize {
        self.inner.key_lookups.load(Ordering::SeqCst)
    }

    pub fn signatures(&self) -> usize {
        self.inner.signatures.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn key_record(&self, key: &KeyReference, stored: &StoredKey) -> KeyRecord {
        let public_key = stored.private_key.to_public_key();
        KeyRecord {
            kid: KeyReference::new(&key.name, &stored.version).to_kid(self.endpoint()),
            key_type: stored.key_type.clone(),
            operations: vec!["sign".to_string(), "verify".to_string()],
            enabled: stored.enabled,
            modulus: public_key.n().to_bytes_be(),
            exponent: public_key.e().to_bytes_be(),
        }
    }
}

fn hash_for(algorithm: &str) -> Option<HashAlgorithm> {
    match algorithm {
        "RS256" => Some(HashAlgorithm::Sha256),
        "RS384" => Some(HashAlgorithm::Sha384),
        "RS512" => Some(HashAlgorithm::Sha512),
        _ => None,
    }
}

#[async_trait]
impl VaultClient for MemoryVault {
    async fn get_certificate(&self, name: &str, version: &str) -> Result<CertificateRecord, VaultError> {
        self.inner.certificate_lookups.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let resource = format!("certificate {name}");
        let state = self.state();
        if let Some(failure) = state.certificate_failure {
            return Err(failure.into_error(resource));
        }
        let stored = state
            .certificates
            .get(name)
            .and_then(|versions| latest_or(versions, version, |c| c.version.as_str()))
            .ok_or_else(|| Failure::NotFound.into_error(resource))?;
        Ok(CertificateRecord {
            id: format!(
                "{}/certificates/{name}/{}",
                self.endpoint().as_str().trim_end_matches('/'),
                stored.version
            ),
            cer: stored.cer.clone(),
            kid: stored.kid.clone(),
        })
    }

    async fn get_key(&self, key: &KeyReference) -> Result<KeyRecord, VaultError> {
        self.inner.key_lookups.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let resource = format!("key {key}");
        let state = self.state();
        if let Some(failure) = state.key_failure {
            return Err(failure.into_error(resource));
        }
        let stored = state
            .keys
            .get(&key.name)
            .and_then(|versions| latest_or(versions, &key.version, |k| k.version.as_str()))
            .ok_or_else(|| Failure::NotFound.into_error(resource))?;
        Ok(self.key_record(key, stored))
    }

    async fn sign(&self, key: &KeyReference, algorithm: &str, digest: &[u8]) -> Result<Vec<u8>, VaultError> {
        self.inner.signatures.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let resource = format!("key {key}");
        let hash = hash_for(algorithm).ok_or_else(|| VaultError::Rejected {
            resource: resource.clone(),
            status: 400,
            message: format!("unsupported algorithm {algorithm}"),
        })?;

        let state = self.state();
        let stored = state
            .keys
            .get(&key.name)
            .and_then(|versions| latest_or(versions, &key.version, |k| k.version.as_str()))
            .ok_or_else(|| Failure::NotFound.into_error(resource.clone()))?;
        if !stored.enabled {
            return Err(Failure::Forbidden.into_error(resource));
        }
        stored
            .private_key
            .sign(hash.pkcs1v15(), digest)
            .map_err(|err| VaultError::Rejected {
                resource,
                status: 400,
                message: err.to_string(),
            })
    }
}

#[async_trait]
impl VaultConnector for MemoryVault {
    async fn connect(&self, endpoint: &Url) -> Result<Arc<dyn VaultClient>, VaultError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.state().connect_failure {
            return Err(failure.into_error(format!("vault {endpoint}")));
        }
        if endpoint != self.endpoint() {
            return Err(VaultError::Configuration(format!(
                "no vault at {endpoint} (serving {})",
                self.endpoint()
            )));
        }
        Ok(Arc::new(self.clone()))
    }
}
