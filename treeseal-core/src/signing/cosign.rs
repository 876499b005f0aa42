//! Key-based signing through the cosign executable

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::locator::ToolLocator;
use super::{ArtifactPaths, SignatureBackend, SignatureType};
use crate::error::{IntegrityError, Result};
use crate::process::{ToolCommand, ToolOutput};

/// The `sigstore` signature backend
pub struct CosignBackend {
    locator: Arc<dyn ToolLocator>,
    timeout: Option<Duration>,
    private_key: Option<PathBuf>,
    public_key: Option<PathBuf>,
}

impl CosignBackend {
    pub fn new(locator: Arc<dyn ToolLocator>, timeout: Option<Duration>) -> Self {
        Self {
            locator,
            timeout,
            private_key: None,
            public_key: None,
        }
    }

    pub fn with_private_key(mut self, key: Option<PathBuf>) -> Self {
        self.private_key = key;
        self
    }

    pub fn with_public_key(mut self, key: Option<PathBuf>) -> Self {
        self.public_key = key;
        self
    }

    fn require(key: &Option<PathBuf>, what: &str) -> Result<PathBuf> {
        key.clone()
            .ok_or_else(|| IntegrityError::InvalidRequest(format!("sigstore {what} requires a key")))
    }
}

#[async_trait]
impl SignatureBackend for CosignBackend {
    fn signature_type(&self) -> SignatureType {
        SignatureType::Sigstore
    }

    async fn sign(&self, artifacts: &ArtifactPaths) -> Result<ToolOutput> {
        let key = Self::require(&self.private_key, "signing")?;
        let cosign = self.locator.locate().await?;

        let output = ToolCommand::new(&cosign)
            .arg("sign-blob")
            .arg("--key")
            .arg(&key)
            .arg("--output-signature")
            .arg(&artifacts.signature)
            .arg(&artifacts.manifest)
            .current_dir(&artifacts.target)
            .timeout(self.timeout)
            .output()
            .await?
            .ok_or_failed("cosign sign-blob")?;

        info!("Signed {} with cosign key {}", artifacts.manifest.display(), key.display());
        Ok(output)
    }

    async fn verify(&self, artifacts: &ArtifactPaths) -> Result<ToolOutput> {
        let key = Self::require(&self.public_key, "verification")?;
        let cosign = self.locator.locate().await?;

        let output = ToolCommand::new(&cosign)
            .arg("verify-blob")
            .arg("--key")
            .arg(&key)
            .arg("--signature")
            .arg(&artifacts.signature)
            .arg(&artifacts.manifest)
            .current_dir(&artifacts.target)
            .timeout(self.timeout)
            .output()
            .await?;

        if !output.success() {
            warn!("cosign rejected signature {}", artifacts.signature.display());
            return Err(IntegrityError::SignatureInvalid {
                backend: "sigstore",
                detail: output.stderr.trim().to_string(),
            });
        }

        info!("cosign signature verified for {}", artifacts.manifest.display());
        Ok(output)
    }
}
