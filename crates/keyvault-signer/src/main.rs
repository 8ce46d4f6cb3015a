use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use keyvault_signer::vault::KeyVaultConnector;
use keyvault_signer::{CertificateReference, SecureBootSigner};
use pesign::{CertificateSigner, HashAlgorithm};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Hash {
    Sha256,
    Sha384,
    Sha512,
}

impl From<Hash> for HashAlgorithm {
    fn from(hash: Hash) -> Self {
        match hash {
            Hash::Sha256 => HashAlgorithm::Sha256,
            Hash::Sha384 => HashAlgorithm::Sha384,
            Hash::Sha512 => HashAlgorithm::Sha512,
        }
    }
}

#[derive(Parser)]
#[clap(about = "Resolve Secure Boot signing identities from a key vault")]
struct Args {
    #[clap(long, env = "AZURE_KEY_VAULT_URL")]
    vault_url: Url,
    #[clap(long, env = "AZURE_CERT_ID")]
    cert_id: String,
    /// Certificate version; empty selects the latest.
    #[clap(long, env = "AZURE_CERT_VERSION", default_value = "")]
    cert_version: String,
    /// Overall deadline for resolution and signing, in seconds.
    #[clap(long, env = "KEYVAULT_SIGN_TIMEOUT", default_value = "30")]
    timeout: u64,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the certificate and the key it is bound to.
    Inspect,
    /// Sign a hex-encoded digest.
    SignDigest {
        #[clap(long, value_enum, default_value = "sha256")]
        hash: Hash,
        digest: String,
    },
    /// Hash a file and sign the digest.
    SignFile {
        #[clap(long, value_enum, default_value = "sha256")]
        hash: Hash,
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);

    let cancel = CancellationToken::new();
    spawn_cancel_on(cancel.clone(), timeout);

    let connector = KeyVaultConnector::from_env().timeout(timeout);
    let reference = CertificateReference::new(args.vault_url, args.cert_id, args.cert_version);

    let identity = SecureBootSigner::resolve(&connector, reference, &cancel)
        .await
        .context("resolving signing identity")?;

    match args.command {
        Command::Inspect => inspect(&identity)?,
        Command::SignDigest { hash, digest } => {
            let digest = hex::decode(digest.trim()).context("digest is not valid hex")?;
            sign(&identity, hash.into(), &digest, &cancel).await?;
        }
        Command::SignFile { hash, path } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let hash = HashAlgorithm::from(hash);
            sign(&identity, hash, &hash.digest(&data), &cancel).await?;
        }
    }
    Ok(())
}

/// Cancel on Ctrl-C or when the deadline passes.
fn spawn_cancel_on(cancel: CancellationToken, timeout: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::warn!("interrupted"),
            _ = tokio::time::sleep(timeout) => tracing::warn!(?timeout, "deadline exceeded"),
        }
        cancel.cancel();
    });
}

fn inspect(identity: &SecureBootSigner) -> Result<()> {
    let tbs = &identity.certificate().tbs_certificate;
    let not_before: DateTime<Utc> = tbs.validity.not_before.to_system_time().into();
    let not_after: DateTime<Utc> = tbs.validity.not_after.to_system_time().into();

    println!("certificate: {}", identity.reference());
    println!("subject:     {}", tbs.subject);
    println!("issuer:      {}", tbs.issuer);
    println!("serial:      {}", hex::encode(tbs.serial_number.as_bytes()));
    println!("not before:  {}", not_before.to_rfc3339());
    println!("not after:   {}", not_after.to_rfc3339());
    println!("key:         {}", identity.key_reference());
    println!("sha256:      {}", hex::encode(Sha256::digest(identity.certificate_der())));
    Ok(())
}

async fn sign(
    identity: &SecureBootSigner,
    hash: HashAlgorithm,
    digest: &[u8],
    cancel: &CancellationToken,
) -> Result<()> {
    let signer = identity.signer();
    let signature = tokio::select! {
        _ = cancel.cancelled() => bail!("signing cancelled"),
        signature = signer.sign_digest(digest, hash) => signature.context("signing digest")?,
    };
    tracing::info!(key = %identity.key_reference(), %hash, algorithm = signer.algorithm(), "signed digest");
    println!("{}", hex::encode(signature));
    Ok(())
}
