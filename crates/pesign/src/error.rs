use std::path::PathBuf;

use x509_cert::der;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode certificate")]
    Certificate(#[source] der::Error),
    #[error("failed to decode private key")]
    PrivateKey(#[source] rsa::pkcs8::Error),
    #[error("failed to encode public key")]
    PublicKey(#[source] rsa::pkcs8::spki::Error),
    #[error("signing key does not match the certificate public key")]
    KeyMismatch,
}
