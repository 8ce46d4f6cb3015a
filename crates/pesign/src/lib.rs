//! Signing identities for UEFI Secure Boot executables.
//!
//! A [`CertificateSigner`] pairs an X.509 certificate with a [`DigestSigner`]
//! bound to the matching private key. The PE/COFF signing pipeline only talks
//! to this contract, so the key can live in a remote vault, an HSM or a local
//! file without the pipeline knowing which.

pub mod certificate;
pub mod error;
pub mod local;
pub mod signer;

pub use certificate::{CertificateSigner, check_pair, public_key_matches};
pub use error::Error;
pub use local::LocalSigner;
pub use signer::{DigestSigner, HashAlgorithm, SignError};

pub use x509_cert::Certificate;
