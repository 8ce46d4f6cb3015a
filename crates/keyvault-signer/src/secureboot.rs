use std::future::Future;

use pesign::{CertificateSigner, DigestSigner, public_key_matches};
use tokio_util::sync::CancellationToken;
use x509_cert::Certificate;
use x509_cert::der::Decode;

use crate::error::{ResolveError, Stage};
use crate::key::KeySigner;
use crate::reference::{CertificateReference, KeyReference};
use crate::vault::{KeyVaultConnector, VaultConnector};

/// A certificate from the vault paired with a signer bound to its key.
///
/// Built once per signing session by [`SecureBootSigner::resolve`]; nothing is
/// cached between resolutions.
pub struct SecureBootSigner {
    reference: CertificateReference,
    certificate: Certificate,
    certificate_der: Vec<u8>,
    key_signer: KeySigner,
}

impl SecureBootSigner {
    /// Resolve `reference` against the Key Vault REST API, taking the
    /// credential from the environment.
    pub async fn new(reference: CertificateReference, cancel: &CancellationToken) -> Result<Self, ResolveError> {
        Self::resolve(&KeyVaultConnector::from_env(), reference, cancel).await
    }

    /// Fetch the certificate, derive its key reference from the record and
    /// bind a signer to that key.
    ///
    /// Each remote step races `cancel`; once it fires the in-flight call is
    /// dropped and [`ResolveError::Cancelled`] is returned. Nothing is retried.
    pub async fn resolve(
        connector: &dyn VaultConnector,
        reference: CertificateReference,
        cancel: &CancellationToken,
    ) -> Result<Self, ResolveError> {
        let endpoint = reference.endpoint();
        tracing::trace!(%endpoint, certificate = %reference, "resolve secure boot signer");

        let client = cancellable(cancel, Stage::Connect, connector.connect(endpoint))
            .await?
            .map_err(|source| {
                tracing::error!(%endpoint, err = %source, "failed to build client");
                ResolveError::Client {
                    endpoint: endpoint.clone(),
                    source,
                }
            })?;

        let record = cancellable(
            cancel,
            Stage::FetchCertificate,
            client.get_certificate(reference.name(), reference.version()),
        )
        .await?
        .map_err(|source| {
            tracing::error!(certificate = %reference, err = %source, "failed to get certificate");
            ResolveError::Lookup {
                reference: reference.clone(),
                source,
            }
        })?;

        let certificate = Certificate::from_der(&record.cer).map_err(|err| {
            tracing::error!(certificate = %reference, id = %record.id, %err, "failed to decode certificate");
            ResolveError::Decode(err)
        })?;

        let Some(kid) = record.kid.as_deref() else {
            tracing::error!(certificate = %reference, id = %record.id, "certificate record has no key reference");
            return Err(ResolveError::MissingKeyReference(reference));
        };
        let key = KeyReference::from_kid(kid).map_err(|source| ResolveError::InvalidKeyReference {
            reference: reference.clone(),
            source,
        })?;

        let key_signer = cancellable(cancel, Stage::InitializeKeySigner, KeySigner::new(client, key))
            .await?
            .map_err(|err| {
                tracing::error!(certificate = %reference, %err, "failed to initialize key signer");
                ResolveError::KeySigner(err)
            })?;

        if !public_key_matches(&certificate, &key_signer) {
            tracing::error!(
                certificate = %reference,
                key = %key_signer.key_reference(),
                "key does not match certificate public key"
            );
            return Err(ResolveError::KeyMismatch {
                reference,
                key: key_signer.key_reference().clone(),
            });
        }

        tracing::debug!(
            certificate = %reference,
            key = %key_signer.key_reference(),
            subject = %certificate.tbs_certificate.subject,
            "resolved secure boot signer"
        );
        Ok(Self {
            reference,
            certificate,
            certificate_der: record.cer,
            key_signer,
        })
    }

    pub fn reference(&self) -> &CertificateReference {
        &self.reference
    }

    /// The certificate exactly as the vault returned it.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    pub fn key_reference(&self) -> &KeyReference {
        self.key_signer.key_reference()
    }

    pub fn key_signer(&self) -> &KeySigner {
        &self.key_signer
    }
}

impl CertificateSigner for SecureBootSigner {
    fn signer(&self) -> &dyn DigestSigner {
        &self.key_signer
    }

    fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, stage: Stage, future: F) -> Result<F::Output, ResolveError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::warn!(%stage, "certificate resolution cancelled");
            Err(ResolveError::Cancelled(stage))
        }
        output = future => Ok(output),
    }
}
