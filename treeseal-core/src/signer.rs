//! Sign a tree: generate the manifest, then sign it

use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::config::IntegrityConfig;
use crate::error::{IntegrityError, Result};
use crate::manifest::ManifestEngine;
use crate::outcome::{SignOutcome, StepResult};
use crate::process::ToolOutput;
use crate::request::{parse_types, resolve_existing, SignRequest};
use crate::signing::{backend_for, ArtifactPaths, KeyMaterial, SignatureBackend, SignatureType};

pub struct Signer {
    target: PathBuf,
    signature_type: SignatureType,
    engine: ManifestEngine,
    backend: Box<dyn SignatureBackend>,
}

impl Signer {
    /// Validate the request and resolve its backend
    pub fn new(request: SignRequest, config: &IntegrityConfig) -> Result<Self> {
        let types = parse_types(&request.resource_type, &request.signature_type, &request.scm)?;
        let working_dir = request.working_dir.as_deref();
        let target = resolve_existing("target directory", &request.target, working_dir)?;

        let private_key = request
            .private_key
            .as_deref()
            .map(|key| resolve_existing("private key", key, working_dir))
            .transpose()?;

        match types.signature {
            SignatureType::Sigstore if private_key.is_none() => {
                return Err(IntegrityError::InvalidRequest(
                    "signature type \"sigstore\" requires private_key".to_string(),
                ));
            }
            SignatureType::SigstoreKeyless if request.identity_token.is_none() => {
                return Err(IntegrityError::InvalidRequest(
                    "signature type \"sigstore_keyless\" requires identity_token".to_string(),
                ));
            }
            _ => {}
        }

        let keys = KeyMaterial {
            private_key,
            public_key: None,
            identity_token: request.identity_token,
        };
        let backend = backend_for(types.signature, keys, config)?;

        Ok(Self {
            target,
            signature_type: types.signature,
            engine: ManifestEngine::from_config(types.scm, config),
            backend,
        })
    }

    /// Replace the signature backend, keeping everything else
    pub fn with_backend(mut self, backend: Box<dyn SignatureBackend>) -> Self {
        self.signature_type = backend.signature_type();
        self.backend = backend;
        self
    }

    /// Replace the manifest engine
    pub fn with_engine(mut self, engine: ManifestEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Generate the manifest and sign it; signing is skipped if generation fails
    #[instrument(
        name = "sign_tree",
        skip(self),
        fields(target = %self.target.display(), signature_type = %self.signature_type)
    )]
    pub async fn sign(&self) -> SignOutcome {
        let artifacts = ArtifactPaths::for_target(&self.target);

        let digest_result = match self.engine.generate(&self.target).await {
            Ok(manifest) => StepResult::succeeded(ToolOutput {
                code: Some(0),
                stdout: format!("{} files recorded in {}", manifest.len(), artifacts.manifest.display()),
                stderr: String::new(),
            }),
            Err(e) => return SignOutcome::new(StepResult::failed_with(e), None),
        };

        let sign_result = StepResult::from_result(self.sign_manifest(&artifacts).await);
        let outcome = SignOutcome::new(digest_result, Some(sign_result));
        if !outcome.failed() {
            info!("Signed {}", self.target.display());
        }
        outcome
    }

    async fn sign_manifest(&self, artifacts: &ArtifactPaths) -> Result<ToolOutput> {
        remove_previous_signature(&artifacts.signature).await?;
        self.backend.sign(artifacts).await
    }
}

async fn remove_previous_signature(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!("Removed previous signature {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IntegrityError::Write {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
