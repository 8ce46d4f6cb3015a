use std::fmt;

use url::Url;
use x509_cert::der;

use crate::key::KeySignerError;
use crate::reference::{CertificateReference, InvalidKeyId, KeyReference};
use crate::vault::VaultError;

/// Remote steps of certificate resolution that can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    FetchCertificate,
    InitializeKeySigner,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Connect => "building client",
            Stage::FetchCertificate => "getting certificate",
            Stage::InitializeKeySigner => "initializing key signer",
        })
    }
}

/// Coarse classification of a [`ResolveError`], for callers deciding what to tell an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad endpoint or credential.
    Connectivity,
    /// The certificate could not be fetched.
    Lookup,
    /// The vault returned a certificate record that cannot be trusted.
    MalformedData,
    /// The key behind the certificate is missing, unusable or does not match.
    KeyInitialization,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to build client for {endpoint}")]
    Client {
        endpoint: Url,
        #[source]
        source: VaultError,
    },
    #[error("failed to get certificate {reference}")]
    Lookup {
        reference: CertificateReference,
        #[source]
        source: VaultError,
    },
    #[error("failed to decode certificate")]
    Decode(#[source] der::Error),
    #[error("failed to decode certificate: record {0} has no key reference")]
    MissingKeyReference(CertificateReference),
    #[error("failed to decode certificate: record {reference} has an invalid key reference")]
    InvalidKeyReference {
        reference: CertificateReference,
        #[source]
        source: InvalidKeyId,
    },
    #[error("failed to initialize key signer")]
    KeySigner(#[source] KeySignerError),
    #[error("failed to initialize key signer: key {key} does not match certificate {reference}")]
    KeyMismatch {
        reference: CertificateReference,
        key: KeyReference,
    },
    #[error("certificate resolution cancelled while {0}")]
    Cancelled(Stage),
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Client { .. } => ErrorKind::Connectivity,
            Self::Lookup { .. } => ErrorKind::Lookup,
            Self::Decode(_) | Self::MissingKeyReference(_) | Self::InvalidKeyReference { .. } => {
                ErrorKind::MalformedData
            }
            Self::KeySigner(_) | Self::KeyMismatch { .. } => ErrorKind::KeyInitialization,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// The vault failure underneath, if this error came from a vault call.
    pub fn vault_error(&self) -> Option<&VaultError> {
        match self {
            Self::Client { source, .. } | Self::Lookup { source, .. } => Some(source),
            Self::KeySigner(KeySignerError::Lookup { source, .. }) => Some(source),
            _ => None,
        }
    }
}
