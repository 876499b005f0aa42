//! Keyless signing and transparency-log verification
//!
//! Signing hands an identity token to cosign, which obtains a short-lived
//! certificate and records the signature in the log. Verification never
//! runs cosign: the trust anchor is rebuilt from the log entry recorded for
//! the manifest digest.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use x509_cert::der::{asn1::ObjectIdentifier, DecodePem, Encode};
use x509_cert::Certificate;

use super::locator::ToolLocator;
use super::{ArtifactPaths, SignatureBackend, SignatureType};
use crate::error::{IntegrityError, Result};
use crate::manifest::hasher::hash_bytes;
use crate::process::{ToolCommand, ToolOutput};
use crate::rekor::{LogEntry, TransparencyLog};

const BACKEND: &str = "sigstore_keyless";

/// The `sigstore_keyless` signature backend
pub struct KeylessBackend {
    locator: Arc<dyn ToolLocator>,
    log: Arc<dyn TransparencyLog>,
    timeout: Option<Duration>,
    identity_token: Option<String>,
}

impl KeylessBackend {
    pub fn new(
        locator: Arc<dyn ToolLocator>,
        log: Arc<dyn TransparencyLog>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            locator,
            log,
            timeout,
            identity_token: None,
        }
    }

    pub fn with_identity_token(mut self, token: Option<String>) -> Self {
        self.identity_token = token;
        self
    }
}

#[async_trait]
impl SignatureBackend for KeylessBackend {
    fn signature_type(&self) -> SignatureType {
        SignatureType::SigstoreKeyless
    }

    async fn sign(&self, artifacts: &ArtifactPaths) -> Result<ToolOutput> {
        let token = self.identity_token.as_deref().ok_or_else(|| {
            IntegrityError::InvalidRequest("keyless signing requires an identity token".to_string())
        })?;
        let cosign = self.locator.locate().await?;

        let output = ToolCommand::new(&cosign)
            .arg("sign-blob")
            .arg("--identity-token")
            .arg(token)
            .arg("--output-signature")
            .arg(&artifacts.signature)
            .arg(&artifacts.manifest)
            .env("COSIGN_EXPERIMENTAL", "1")
            .current_dir(&artifacts.target)
            .timeout(self.timeout)
            .output()
            .await?
            .ok_or_failed("cosign sign-blob")?;

        info!("Signed {} keylessly", artifacts.manifest.display());
        Ok(output)
    }

    async fn verify(&self, artifacts: &ArtifactPaths) -> Result<ToolOutput> {
        let manifest = read(&artifacts.manifest).await?;
        let signature_file = read(&artifacts.signature).await?;

        let entry = verify_against_log(self.log.as_ref(), &manifest, &signature_file).await?;

        let message = format!(
            "Signature verified against transparency log entry {}",
            entry.uuid
        );
        info!("{}", message);
        Ok(ToolOutput {
            code: Some(0),
            stdout: message,
            stderr: String::new(),
        })
    }
}

async fn read(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| IntegrityError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Check a base64 signature file over `manifest` using the log as trust anchor
///
/// Returns the log entry that vouched for the signature.
pub async fn verify_against_log(
    log: &dyn TransparencyLog,
    manifest: &[u8],
    signature_file: &[u8],
) -> Result<LogEntry> {
    let signature = STANDARD
        .decode(String::from_utf8_lossy(signature_file).trim())
        .map_err(|e| IntegrityError::SignatureInvalid {
            backend: BACKEND,
            detail: format!("signature file is not base64: {e}"),
        })?;

    let digest = hash_bytes(manifest);
    let uuids = log.search_by_digest(&digest).await?;
    let uuid = uuids
        .first()
        .ok_or_else(|| IntegrityError::LogLookupFailed {
            query: format!("sha256:{digest}"),
            reason: "no entries recorded for this manifest".to_string(),
        })?;
    if uuids.len() > 1 {
        debug!("{} log entries for sha256:{}; using {}", uuids.len(), digest, uuid);
    }

    let entry = log.fetch_entry(uuid).await?;

    if entry.signature != signature {
        warn!("On-disk signature differs from log entry {}", entry.uuid);
        return Err(IntegrityError::SignatureLogMismatch {
            uuid: entry.uuid.clone(),
        });
    }

    verify_with_certificate(&entry.certificate_pem, manifest, &signature).map_err(|detail| {
        IntegrityError::SignatureInvalid {
            backend: BACKEND,
            detail: format!("{detail}\nlog entry: {}", entry.body),
        }
    })?;

    Ok(entry)
}

/// ECDSA P-256 / SHA-256 check of `signature` over `message` with the
/// certificate's subject key. Errors name the key algorithm found.
pub fn verify_with_certificate(
    certificate_pem: &str,
    message: &[u8],
    signature: &[u8],
) -> std::result::Result<(), String> {
    let certificate = Certificate::from_pem(certificate_pem.as_bytes())
        .map_err(|e| format!("failed to parse certificate: {e}"))?;

    let spki = &certificate.tbs_certificate.subject_public_key_info;
    let algorithm = algorithm_name(&spki.algorithm.oid);

    let spki_der = spki
        .to_der()
        .map_err(|e| format!("public key type is {algorithm}; failed to encode key: {e}"))?;
    let key = VerifyingKey::from_public_key_der(&spki_der)
        .map_err(|e| format!("public key type is {algorithm}, expected a P-256 key: {e}"))?;

    let signature = Signature::from_der(signature)
        .or_else(|_| Signature::from_slice(signature))
        .map_err(|e| format!("public key type is {algorithm}; malformed ECDSA signature: {e}"))?;

    key.verify(message, &signature)
        .map_err(|e| format!("public key type is {algorithm}; {e}"))
}

fn algorithm_name(oid: &ObjectIdentifier) -> String {
    match oid.to_string().as_str() {
        "1.2.840.10045.2.1" => "id-ecPublicKey".to_string(),
        "1.2.840.113549.1.1.1" => "rsaEncryption".to_string(),
        "1.3.101.112" => "Ed25519".to_string(),
        other => other.to_string(),
    }
}
