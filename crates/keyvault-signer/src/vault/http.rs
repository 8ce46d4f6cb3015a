use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::credential::{TokenCredential, credential_from_env};
use super::error::VaultError;
use super::{VaultClient, VaultConnector};
use crate::reference::{CertificateRecord, KeyRecord, KeyReference};

pub const API_VERSION: &str = "7.4";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Key Vault REST client bound to one vault endpoint.
///
/// Cheap to clone; clones share the connection pool and credential.
#[derive(Clone)]
pub struct KeyVaultClient {
    http: reqwest::Client,
    endpoint: Url,
    credential: Arc<dyn TokenCredential>,
}

#[derive(Deserialize)]
struct CertificateBundle {
    id: String,
    kid: Option<String>,
    cer: Option<String>,
}

#[derive(Deserialize)]
struct KeyBundle {
    key: JsonWebKey,
    #[serde(default)]
    attributes: Attributes,
}

#[derive(Deserialize)]
struct JsonWebKey {
    kid: String,
    kty: String,
    #[serde(default)]
    key_ops: Vec<String>,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Default, Deserialize)]
struct Attributes {
    enabled: Option<bool>,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    alg: &'a str,
    value: String,
}

#[derive(Deserialize)]
struct KeyOperationResult {
    value: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl KeyVaultClient {
    pub fn new(endpoint: Url, credential: Arc<dyn TokenCredential>) -> Result<Self, VaultError> {
        Self::with_timeout(endpoint, credential, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        endpoint: Url,
        credential: Arc<dyn TokenCredential>,
        timeout: Duration,
    ) -> Result<Self, VaultError> {
        validate_endpoint(&endpoint)?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| VaultError::Configuration(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            http,
            endpoint,
            credential,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `{endpoint}/{segments...}?api-version=...`, skipping empty segments so an
    /// empty version addresses the latest object.
    fn url(&self, segments: &[&str]) -> Result<Url, VaultError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| VaultError::Configuration(format!("{} cannot be a base URL", self.endpoint)))?
            .pop_if_empty()
            .extend(segments.iter().filter(|s| !s.is_empty()));
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, resource: &str) -> Result<T, VaultError> {
        let token = self.credential.token().await?;
        let response = request
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(VaultError::Transport)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|err| VaultError::InvalidResponse(format!("{resource}: {err}")));
        }

        let message = match response.json::<ErrorEnvelope>().await {
            Ok(envelope) if envelope.error.code.is_empty() => envelope.error.message,
            Ok(envelope) => format!("{}: {}", envelope.error.code, envelope.error.message),
            Err(_) => status.to_string(),
        };
        Err(VaultError::from_status(status, resource, message))
    }
}

#[async_trait]
impl VaultClient for KeyVaultClient {
    async fn get_certificate(&self, name: &str, version: &str) -> Result<CertificateRecord, VaultError> {
        let resource = format!("certificate {name}");
        tracing::trace!(%name, %version, "get certificate");
        let url = self.url(&["certificates", name, version])?;
        let bundle: CertificateBundle = self.send(self.http.get(url), &resource).await?;

        let cer = match bundle.cer {
            Some(cer) => STANDARD
                .decode(cer)
                .map_err(|err| VaultError::InvalidResponse(format!("{resource}: invalid cer encoding: {err}")))?,
            None => Vec::new(),
        };
        tracing::debug!(%name, id = %bundle.id, "received certificate");
        Ok(CertificateRecord {
            id: bundle.id,
            cer,
            kid: bundle.kid,
        })
    }

    async fn get_key(&self, key: &KeyReference) -> Result<KeyRecord, VaultError> {
        let resource = format!("key {key}");
        tracing::trace!(%key, "get key");
        let url = self.url(&["keys", &key.name, &key.version])?;
        let bundle: KeyBundle = self.send(self.http.get(url), &resource).await?;

        let jwk = bundle.key;
        let modulus = decode_optional(jwk.n.as_deref(), &resource, "n")?;
        let exponent = decode_optional(jwk.e.as_deref(), &resource, "e")?;
        tracing::debug!(%key, kid = %jwk.kid, kty = %jwk.kty, "received key");
        Ok(KeyRecord {
            kid: jwk.kid,
            key_type: jwk.kty,
            operations: jwk.key_ops,
            enabled: bundle.attributes.enabled.unwrap_or(true),
            modulus,
            exponent,
        })
    }

    async fn sign(&self, key: &KeyReference, algorithm: &str, digest: &[u8]) -> Result<Vec<u8>, VaultError> {
        let resource = format!("key {key}");
        tracing::trace!(%key, %algorithm, "sign digest");
        let url = self.url(&["keys", &key.name, &key.version, "sign"])?;
        let body = SignRequest {
            alg: algorithm,
            value: URL_SAFE_NO_PAD.encode(digest),
        };
        let result: KeyOperationResult = self.send(self.http.post(url).json(&body), &resource).await?;
        decode_base64url(&result.value)
            .map_err(|err| VaultError::InvalidResponse(format!("{resource}: invalid signature encoding: {err}")))
    }
}

fn decode_optional(value: Option<&str>, resource: &str, field: &str) -> Result<Vec<u8>, VaultError> {
    match value {
        Some(value) => decode_base64url(value)
            .map_err(|err| VaultError::InvalidResponse(format!("{resource}: invalid {field}: {err}"))),
        None => Ok(Vec::new()),
    }
}

/// JOSE values are unpadded base64url, but tolerate padding.
fn decode_base64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value.trim_end_matches('='))
}

fn validate_endpoint(endpoint: &Url) -> Result<(), VaultError> {
    if !matches!(endpoint.scheme(), "https" | "http") {
        return Err(VaultError::Configuration(format!(
            "vault endpoint {endpoint} must use http or https"
        )));
    }
    if endpoint.host_str().is_none_or(str::is_empty) {
        return Err(VaultError::Configuration(format!("vault endpoint {endpoint} has no host")));
    }
    Ok(())
}

/// Connects [`KeyVaultClient`]s, resolving the credential from the
/// environment at connect time unless one was supplied.
pub struct KeyVaultConnector {
    credential: Option<Arc<dyn TokenCredential>>,
    timeout: Duration,
}

impl KeyVaultConnector {
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            credential: Some(credential),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_env() -> Self {
        Self {
            credential: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Per-request timeout of the clients this connector builds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl VaultConnector for KeyVaultConnector {
    /// Fails before any data request if the endpoint is unusable or the
    /// credential cannot produce a token.
    async fn connect(&self, endpoint: &Url) -> Result<Arc<dyn VaultClient>, VaultError> {
        validate_endpoint(endpoint)?;
        let credential = match &self.credential {
            Some(credential) => credential.clone(),
            None => credential_from_env()?,
        };
        credential.token().await.map_err(|err| {
            tracing::error!(%endpoint, err = %err, "failed to acquire vault token");
            err
        })?;
        let client = KeyVaultClient::with_timeout(endpoint.clone(), credential, self.timeout)?;
        Ok(Arc::new(client))
    }
}
