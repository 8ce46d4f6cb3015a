mod common;

use std::time::Duration;

use keyvault_signer::vault::Failure;
use keyvault_signer::{
    CertificateReference, ErrorKind, KeyReference, KeySignerError, MemoryVault, ResolveError,
    SecureBootSigner, Stage, VaultError,
};
use pesign::{CertificateSigner, HashAlgorithm, SignError, check_pair};
use tokio_util::sync::CancellationToken;
use url::Url;

use common::{BOOT_SUBJECT, boot_identity, certificate_public_key, other_identity};

fn endpoint() -> Url {
    Url::parse("https://talos.vault.azure.net").unwrap()
}

/// A vault holding `boot-cert` (latest) backed by `boot-key` version `v3`.
fn boot_vault() -> MemoryVault {
    let identity = boot_identity();
    let vault = MemoryVault::new(endpoint());
    vault.insert_key("boot-key", "v1", other_identity().key.clone());
    vault.insert_key("boot-key", "v3", identity.key.clone());
    vault.insert_certificate(
        "boot-cert",
        "2f3c",
        identity.cert_der.clone(),
        Some(&KeyReference::new("boot-key", "v3")),
    );
    vault
}

async fn resolve(vault: &MemoryVault, name: &str, version: &str) -> Result<SecureBootSigner, ResolveError> {
    let reference = CertificateReference::new(endpoint(), name, version);
    SecureBootSigner::resolve(vault, reference, &CancellationToken::new()).await
}

#[tokio::test]
async fn resolves_latest_certificate_and_bound_key() {
    let vault = boot_vault();

    let identity = resolve(&vault, "boot-cert", "").await.unwrap();

    assert_eq!(
        identity.certificate().tbs_certificate.subject.to_string(),
        format!("CN={BOOT_SUBJECT}")
    );
    assert_eq!(identity.key_reference(), &KeyReference::new("boot-key", "v3"));
    assert_eq!(identity.certificate_der(), boot_identity().cert_der.as_slice());
    check_pair(&identity).unwrap();
}

#[tokio::test]
async fn signatures_verify_against_certificate_key() {
    let vault = boot_vault();
    let identity = resolve(&vault, "boot-cert", "").await.unwrap();
    let public_key = certificate_public_key(identity.certificate());

    for hash in [HashAlgorithm::Sha256, HashAlgorithm::Sha384, HashAlgorithm::Sha512] {
        let digest = hash.digest(b"vmlinuz.efi");
        let signature = identity.signer().sign_digest(&digest, hash).await.unwrap();
        public_key.verify(hash.pkcs1v15(), &digest, &signature).unwrap();
    }
    assert_eq!(vault.signatures(), 3);
    assert_eq!(identity.signer().algorithm(), "rsa-pkcs1v15");
}

#[tokio::test]
async fn wrong_digest_length_never_reaches_vault() {
    let vault = boot_vault();
    let identity = resolve(&vault, "boot-cert", "").await.unwrap();

    let err = identity
        .signer()
        .sign_digest(&[0u8; 20], HashAlgorithm::Sha256)
        .await
        .unwrap_err();
    assert!(matches!(err, SignError::DigestLength { .. }));
    assert_eq!(vault.signatures(), 0);
}

#[tokio::test]
async fn pinned_version_is_passed_through() {
    let vault = boot_vault();
    vault.insert_certificate("boot-cert", "9a1b", b"newer but broken".to_vec(), None);

    let identity = resolve(&vault, "boot-cert", "2f3c").await.unwrap();
    assert_eq!(identity.reference().version(), "2f3c");

    let err = resolve(&vault, "boot-cert", "").await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::MalformedData);
}

#[tokio::test]
async fn malformed_certificate_is_rejected_before_key_lookup() {
    let vault = boot_vault();
    vault.insert_certificate(
        "garbage-cert",
        "v1",
        b"definitely not DER".to_vec(),
        Some(&KeyReference::new("boot-key", "v3")),
    );

    let err = resolve(&vault, "garbage-cert", "").await.err().unwrap();
    assert!(matches!(err, ResolveError::Decode(_)));
    assert_eq!(err.kind(), ErrorKind::MalformedData);
    assert!(err.to_string().contains("failed to decode certificate"));
    assert_eq!(vault.key_lookups(), 0);
}

#[tokio::test]
async fn truncated_certificate_is_rejected() {
    let vault = boot_vault();
    let der = &boot_identity().cert_der;
    vault.insert_certificate(
        "truncated-cert",
        "v1",
        der[..der.len() / 2].to_vec(),
        Some(&KeyReference::new("boot-key", "v3")),
    );

    let err = resolve(&vault, "truncated-cert", "").await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::MalformedData);
}

#[tokio::test]
async fn missing_key_reference_is_malformed_data() {
    let vault = boot_vault();
    vault.insert_certificate("orphan-cert", "v1", boot_identity().cert_der.clone(), None);

    let err = resolve(&vault, "orphan-cert", "").await.err().unwrap();
    assert!(matches!(err, ResolveError::MissingKeyReference(_)));
    assert_eq!(err.kind(), ErrorKind::MalformedData);
    assert_eq!(vault.key_lookups(), 0);
}

#[tokio::test]
async fn unparsable_key_reference_is_malformed_data() {
    let vault = boot_vault();
    vault.insert_certificate_with_kid(
        "odd-cert",
        "v1",
        boot_identity().cert_der.clone(),
        Some("https://talos.vault.azure.net/secrets/boot-key/v3".to_string()),
    );

    let err = resolve(&vault, "odd-cert", "").await.err().unwrap();
    assert!(matches!(err, ResolveError::InvalidKeyReference { .. }));
    assert_eq!(err.kind(), ErrorKind::MalformedData);
    assert_eq!(vault.key_lookups(), 0);
}

#[tokio::test]
async fn lookup_failures_wrap_cause_and_skip_key_signer() {
    for failure in [Failure::NotFound, Failure::Forbidden, Failure::Unavailable] {
        let vault = boot_vault();
        vault.fail_certificate_lookup(Some(failure));

        let err = resolve(&vault, "boot-cert", "").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Lookup, "{failure:?}");
        assert!(err.to_string().starts_with("failed to get certificate boot-cert"));
        let cause = err.vault_error().unwrap();
        match failure {
            Failure::NotFound => assert!(cause.is_not_found()),
            Failure::Forbidden => assert!(cause.is_unauthorized()),
            Failure::Unavailable => assert!(cause.is_transient()),
            Failure::Unauthorized => unreachable!(),
        }
        assert_eq!(vault.key_lookups(), 0);
    }
}

#[tokio::test]
async fn unknown_certificate_is_lookup_error() {
    let vault = boot_vault();
    let err = resolve(&vault, "no-such-cert", "").await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Lookup);
    assert!(err.vault_error().unwrap().is_not_found());
}

#[tokio::test]
async fn connect_failure_is_connectivity_error() {
    let vault = boot_vault();
    vault.fail_connect(Some(Failure::Unauthorized));

    let err = resolve(&vault, "boot-cert", "").await.err().unwrap();
    assert!(matches!(err, ResolveError::Client { .. }));
    assert_eq!(err.kind(), ErrorKind::Connectivity);
    assert!(err.to_string().starts_with("failed to build client"));
    assert_eq!(vault.certificate_lookups(), 0);
}

#[tokio::test]
async fn missing_key_is_key_initialization_error() {
    let vault = boot_vault();
    vault.insert_certificate(
        "dangling-cert",
        "v1",
        boot_identity().cert_der.clone(),
        Some(&KeyReference::new("deleted-key", "v1")),
    );

    let err = resolve(&vault, "dangling-cert", "").await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::KeyInitialization);
    assert!(err.to_string().starts_with("failed to initialize key signer"));
    match err {
        ResolveError::KeySigner(inner) => assert!(inner.is_not_found()),
        other => panic!("expected KeySigner, got {other:?}"),
    }
}

#[tokio::test]
async fn disabled_key_is_key_initialization_error() {
    let vault = boot_vault();
    vault.set_key_enabled(&KeyReference::new("boot-key", "v3"), false);

    let err = resolve(&vault, "boot-cert", "").await.err().unwrap();
    assert!(matches!(err, ResolveError::KeySigner(KeySignerError::Disabled(_))));
}

#[tokio::test]
async fn non_rsa_key_is_rejected() {
    let vault = boot_vault();
    vault.insert_key_with_type("ec-key", "v1", boot_identity().key.clone(), "EC-HSM");
    vault.insert_certificate(
        "ec-cert",
        "v1",
        boot_identity().cert_der.clone(),
        Some(&KeyReference::new("ec-key", "v1")),
    );

    let err = resolve(&vault, "ec-cert", "").await.err().unwrap();
    assert!(matches!(
        err,
        ResolveError::KeySigner(KeySignerError::UnsupportedKeyType { .. })
    ));
}

#[tokio::test]
async fn key_not_matching_certificate_is_rejected() {
    let vault = boot_vault();
    vault.insert_certificate(
        "mismatched-cert",
        "v1",
        boot_identity().cert_der.clone(),
        Some(&KeyReference::new("boot-key", "v1")),
    );

    let err = resolve(&vault, "mismatched-cert", "").await.err().unwrap();
    assert!(matches!(err, ResolveError::KeyMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::KeyInitialization);
}

#[tokio::test]
async fn unversioned_key_reference_pins_latest_version() {
    let vault = boot_vault();
    vault.insert_certificate_with_kid(
        "floating-cert",
        "v1",
        boot_identity().cert_der.clone(),
        Some("https://talos.vault.azure.net/keys/boot-key".to_string()),
    );

    let identity = resolve(&vault, "floating-cert", "").await.unwrap();
    assert_eq!(identity.key_reference(), &KeyReference::new("boot-key", "v3"));
}

#[tokio::test]
async fn repeated_resolution_yields_identical_certificates() {
    let vault = boot_vault();

    let first = resolve(&vault, "boot-cert", "").await.unwrap();
    let second = resolve(&vault, "boot-cert", "").await.unwrap();

    assert_eq!(first.certificate_der(), second.certificate_der());
    assert_eq!(first.key_reference(), second.key_reference());
    assert_eq!(vault.connects(), 2);
    assert_eq!(vault.certificate_lookups(), 2);
}

#[tokio::test]
async fn concurrent_resolutions_are_independent() {
    let vault = boot_vault();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let vault = vault.clone();
            tokio::spawn(async move { resolve(&vault, "boot-cert", "").await.map(|s| s.certificate_der().to_vec()) })
        })
        .collect();

    for task in tasks {
        let der = task.await.unwrap().unwrap();
        assert_eq!(der, boot_identity().cert_der);
    }
    assert_eq!(vault.connects(), 8);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_fetch_returns_promptly() {
    let vault = boot_vault();
    vault.set_latency(Duration::from_secs(3600));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let reference = CertificateReference::latest(endpoint(), "boot-cert");
    let err = SecureBootSigner::resolve(&vault, reference, &cancel).await.err().unwrap();

    assert!(matches!(err, ResolveError::Cancelled(Stage::FetchCertificate)));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(vault.key_lookups(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_key_lookup_returns_promptly() {
    let vault = boot_vault();
    vault.set_latency(Duration::from_secs(10));

    // The certificate arrives at 10s; the key lookup would finish at 20s.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let reference = CertificateReference::latest(endpoint(), "boot-cert");
    let err = SecureBootSigner::resolve(&vault, reference, &cancel).await.err().unwrap();

    assert!(matches!(err, ResolveError::Cancelled(Stage::InitializeKeySigner)));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(vault.certificate_lookups(), 1);
    assert_eq!(vault.key_lookups(), 1);
    assert_eq!(vault.signatures(), 0);
}

#[tokio::test]
async fn already_cancelled_token_stops_before_connecting() {
    let vault = boot_vault();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let reference = CertificateReference::latest(endpoint(), "boot-cert");
    let err = SecureBootSigner::resolve(&vault, reference, &cancel).await.err().unwrap();
    assert!(matches!(err, ResolveError::Cancelled(Stage::Connect)));
    assert_eq!(vault.connects(), 0);
}

#[tokio::test]
async fn wrong_endpoint_is_connectivity_error() {
    let vault = boot_vault();
    let reference = CertificateReference::latest(Url::parse("https://elsewhere.vault.azure.net").unwrap(), "boot-cert");

    let err = SecureBootSigner::resolve(&vault, reference, &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Connectivity);
    assert!(matches!(err.vault_error(), Some(VaultError::Configuration(_))));
}

#[tokio::test]
async fn default_connector_rejects_unusable_endpoint() {
    let reference = CertificateReference::latest(Url::parse("ftp://talos.vault.azure.net").unwrap(), "boot-cert");

    let err = SecureBootSigner::new(reference, &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Connectivity);
    assert!(matches!(err.vault_error(), Some(VaultError::Configuration(_))));
}
