//! Signature backends
//!
//! Three backends share one capability interface. The signature type is
//! parsed once, key material is bound at construction, and the orchestrators
//! only ever see a `Box<dyn SignatureBackend>`.
//!
//! | type               | sign                    | verify                          |
//! |--------------------|-------------------------|---------------------------------|
//! | `gpg`              | `gpg --detach-sign`     | `gpg --verify`                  |
//! | `sigstore`         | `cosign sign-blob --key`| `cosign verify-blob --key`      |
//! | `sigstore_keyless` | `cosign sign-blob` + id token | Rekor lookup + certificate key |

pub mod cosign;
pub mod gpg;
pub mod keyless;
pub mod locator;

pub use cosign::CosignBackend;
pub use gpg::{GpgBackend, IsolatedKeyring};
pub use keyless::KeylessBackend;
pub use locator::{CosignLocator, FixedLocator, ToolLocator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::IntegrityConfig;
use crate::error::{IntegrityError, Result};
use crate::manifest::{MANIFEST_FILENAME, SIGNATURE_FILENAME};
use crate::process::ToolOutput;
use crate::rekor::RekorClient;

/// Supported signature schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    /// Offline key pair managed by gpg
    Gpg,
    /// Cosign key pair, recorded in the transparency log
    Sigstore,
    /// Short-lived certificate bound to an identity token
    SigstoreKeyless,
}

impl SignatureType {
    pub const SUPPORTED: &'static [&'static str] = &["gpg", "sigstore", "sigstore_keyless"];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureType::Gpg => "gpg",
            SignatureType::Sigstore => "sigstore",
            SignatureType::SigstoreKeyless => "sigstore_keyless",
        }
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureType {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gpg" => Ok(SignatureType::Gpg),
            "sigstore" => Ok(SignatureType::Sigstore),
            "sigstore_keyless" => Ok(SignatureType::SigstoreKeyless),
            other => Err(IntegrityError::unsupported(
                "signature type",
                other,
                Self::SUPPORTED,
            )),
        }
    }
}

/// Locations of the manifest and its signature inside a target tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub target: PathBuf,
    pub manifest: PathBuf,
    pub signature: PathBuf,
}

impl ArtifactPaths {
    pub fn for_target(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            manifest: target.join(MANIFEST_FILENAME),
            signature: target.join(SIGNATURE_FILENAME),
        }
    }
}

/// Key material supplied by the caller, already path-expanded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMaterial {
    pub private_key: Option<PathBuf>,
    pub public_key: Option<PathBuf>,
    pub identity_token: Option<String>,
}

/// Sign and verify a manifest with one signature scheme
#[async_trait]
pub trait SignatureBackend: Send + Sync {
    fn signature_type(&self) -> SignatureType;

    /// Write a detached signature for `artifacts.manifest` to `artifacts.signature`
    async fn sign(&self, artifacts: &ArtifactPaths) -> Result<ToolOutput>;

    /// Verify `artifacts.signature` against `artifacts.manifest`
    async fn verify(&self, artifacts: &ArtifactPaths) -> Result<ToolOutput>;
}

/// Build the backend for a signature type with its key material bound
pub fn backend_for(
    signature_type: SignatureType,
    keys: KeyMaterial,
    config: &IntegrityConfig,
) -> Result<Box<dyn SignatureBackend>> {
    let timeout = config.command_timeout();

    let backend: Box<dyn SignatureBackend> = match signature_type {
        SignatureType::Gpg => Box::new(
            GpgBackend::new(config.gpg_program.clone(), timeout)
                .with_private_key(keys.private_key)
                .with_public_key(keys.public_key),
        ),
        SignatureType::Sigstore => {
            let locator = Arc::new(CosignLocator::new(config.cosign.clone(), timeout));
            Box::new(
                CosignBackend::new(locator, timeout)
                    .with_private_key(keys.private_key)
                    .with_public_key(keys.public_key),
            )
        }
        SignatureType::SigstoreKeyless => {
            let locator = Arc::new(CosignLocator::new(config.cosign.clone(), timeout));
            let log = Arc::new(RekorClient::new(
                config.rekor_url.clone(),
                config.http_timeout(),
            )?);
            Box::new(KeylessBackend::new(locator, log, timeout).with_identity_token(keys.identity_token))
        }
    };

    Ok(backend)
}
