use std::fmt;

use url::Url;

/// Identifies a certificate inside a key vault.
///
/// An empty version selects the most recent version; the vault resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateReference {
    endpoint: Url,
    name: String,
    version: String,
}

impl CertificateReference {
    pub fn new(endpoint: Url, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            endpoint,
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn latest(endpoint: Url, name: impl Into<String>) -> Self {
        Self::new(endpoint, name, "")
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for CertificateReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_versioned(f, &self.name, &self.version)
    }
}

/// A (name, version) pair naming one key inside the vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyReference {
    pub name: String,
    pub version: String,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid key identifier {0:?}")]
pub struct InvalidKeyId(pub String);

impl KeyReference {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse a vault key identifier of the form `{vault}/keys/{name}[/{version}]`.
    pub fn from_kid(kid: &str) -> Result<Self, InvalidKeyId> {
        let url = Url::parse(kid).map_err(|_| InvalidKeyId(kid.to_string()))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            ["keys", name] => Ok(Self::new(*name, "")),
            ["keys", name, version] => Ok(Self::new(*name, *version)),
            _ => Err(InvalidKeyId(kid.to_string())),
        }
    }

    /// The key identifier this reference has inside the vault at `endpoint`.
    pub fn to_kid(&self, endpoint: &Url) -> String {
        let base = endpoint.as_str().trim_end_matches('/');
        if self.version.is_empty() {
            format!("{base}/keys/{}", self.name)
        } else {
            format!("{base}/keys/{}/{}", self.name, self.version)
        }
    }
}

impl fmt::Display for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_versioned(f, &self.name, &self.version)
    }
}

fn write_versioned(f: &mut fmt::Formatter<'_>, name: &str, version: &str) -> fmt::Result {
    if version.is_empty() {
        write!(f, "{name}@latest")
    } else {
        write!(f, "{name}@{version}")
    }
}

/// A certificate as stored in the vault: DER bytes plus metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub id: String,
    pub cer: Vec<u8>,
    /// Identifier of the key backing this certificate.
    pub kid: Option<String>,
}

/// Public metadata of a vault key. The private half is never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub kid: String,
    pub key_type: String,
    pub operations: Vec<String>,
    pub enabled: bool,
    /// Big-endian RSA modulus.
    pub modulus: Vec<u8>,
    /// Big-endian RSA public exponent.
    pub exponent: Vec<u8>,
}
