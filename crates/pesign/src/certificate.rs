use x509_cert::Certificate;
use x509_cert::der::Encode;

use crate::error::Error;
use crate::signer::DigestSigner;

/// A signing identity: a certificate plus a signer for its private key.
///
/// Both accessors are side-effect free and return the same objects for the
/// lifetime of the value.
pub trait CertificateSigner: Send + Sync {
    fn signer(&self) -> &dyn DigestSigner;

    fn certificate(&self) -> &Certificate;
}

/// Whether `signer` holds the key whose public half is embedded in `certificate`.
pub fn public_key_matches(certificate: &Certificate, signer: &dyn DigestSigner) -> bool {
    match certificate.tbs_certificate.subject_public_key_info.to_der() {
        Ok(spki) => spki == signer.public_key_der(),
        Err(err) => {
            tracing::warn!(%err, "failed to encode certificate public key");
            false
        }
    }
}

/// Rejects identities whose signer cannot produce signatures the certificate verifies.
pub fn check_pair(identity: &dyn CertificateSigner) -> Result<(), Error> {
    if public_key_matches(identity.certificate(), identity.signer()) {
        Ok(())
    } else {
        Err(Error::KeyMismatch)
    }
}
