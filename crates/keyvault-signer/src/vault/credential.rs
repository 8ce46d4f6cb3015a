use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use super::error::VaultError;

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const VAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// Tokens closer than this to expiry are refreshed before use.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// A bearer token for vault requests.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<Instant>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    fn is_fresh(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at.saturating_duration_since(now) > REFRESH_MARGIN,
            None => true,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn token(&self) -> Result<AccessToken, VaultError>;
}

/// A pre-issued token, e.g. from `az account get-access-token`.
#[derive(Debug, Clone)]
pub struct StaticToken(AccessToken);

impl StaticToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(AccessToken::new(secret, None))
    }
}

#[async_trait]
impl TokenCredential for StaticToken {
    async fn token(&self) -> Result<AccessToken, VaultError> {
        Ok(self.0.clone())
    }
}

/// OAuth2 client-credentials flow against the identity platform.
pub struct ClientSecretCredential {
    token_url: Url,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
    cache: Mutex<Option<AccessToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

impl ClientSecretCredential {
    pub fn new(
        authority_host: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, VaultError> {
        let mut token_url = Url::parse(authority_host)
            .map_err(|err| VaultError::Configuration(format!("invalid authority host {authority_host:?}: {err}")))?;
        token_url
            .path_segments_mut()
            .map_err(|_| VaultError::Configuration(format!("invalid authority host {authority_host:?}")))?
            .pop_if_empty()
            .extend([tenant_id, "oauth2", "v2.0", "token"]);
        Ok(Self {
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http: reqwest::Client::new(),
            cache: Mutex::new(None),
        })
    }

    async fn request_token(&self) -> Result<AccessToken, VaultError> {
        tracing::trace!(client_id = %self.client_id, "requesting vault access token");
        let response = self
            .http
            .post(self.token_url.clone())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", VAULT_SCOPE),
            ])
            .send()
            .await
            .map_err(|err| VaultError::Credential(format!("token request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<TokenErrorResponse>().await {
                Ok(body) if !body.error_description.is_empty() => body.error_description,
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            tracing::error!(client_id = %self.client_id, %status, "token request rejected");
            return Err(VaultError::Credential(message));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| VaultError::Credential(format!("invalid token response: {err}")))?;
        tracing::debug!(client_id = %self.client_id, expires_in = body.expires_in, "received vault access token");
        Ok(AccessToken::new(
            body.access_token,
            Some(Instant::now() + Duration::from_secs(body.expires_in)),
        ))
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn token(&self) -> Result<AccessToken, VaultError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref().filter(|token| token.is_fresh(Instant::now())) {
            return Ok(token.clone());
        }
        let token = self.request_token().await?;
        *cache = Some(token.clone());
        Ok(token)
    }
}

/// Pick a credential from the process environment.
///
/// `AZURE_KEYVAULT_TOKEN` wins; otherwise `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`
/// and `AZURE_CLIENT_SECRET` select the client-credentials flow, with
/// `AZURE_AUTHORITY_HOST` overriding the identity endpoint.
pub fn credential_from_env() -> Result<Arc<dyn TokenCredential>, VaultError> {
    credential_from_lookup(|name| std::env::var(name).ok())
}

pub fn credential_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn TokenCredential>, VaultError> {
    let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

    if let Some(token) = var("AZURE_KEYVAULT_TOKEN") {
        return Ok(Arc::new(StaticToken::new(token)));
    }

    match (var("AZURE_TENANT_ID"), var("AZURE_CLIENT_ID"), var("AZURE_CLIENT_SECRET")) {
        (Some(tenant_id), Some(client_id), Some(client_secret)) => {
            let authority = var("AZURE_AUTHORITY_HOST").unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string());
            Ok(Arc::new(ClientSecretCredential::new(
                &authority,
                &tenant_id,
                client_id,
                client_secret,
            )?))
        }
        _ => Err(VaultError::Credential(
            "set AZURE_KEYVAULT_TOKEN or AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET".to_string(),
        )),
    }
}
