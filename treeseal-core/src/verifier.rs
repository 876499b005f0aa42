//! Verify a tree: check the manifest against the tree, then check the signature

use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::config::IntegrityConfig;
use crate::error::{IntegrityError, Result};
use crate::manifest::ManifestEngine;
use crate::outcome::{StepResult, VerifyOutcome};
use crate::process::ToolOutput;
use crate::request::{parse_types, resolve_existing, VerifyRequest};
use crate::signing::{backend_for, ArtifactPaths, KeyMaterial, SignatureBackend, SignatureType};

pub struct Verifier {
    target: PathBuf,
    signature_type: SignatureType,
    engine: ManifestEngine,
    backend: Box<dyn SignatureBackend>,
}

impl Verifier {
    /// Validate the request and resolve its backend
    pub fn new(request: VerifyRequest, config: &IntegrityConfig) -> Result<Self> {
        let types = parse_types(&request.resource_type, &request.signature_type, &request.scm)?;
        let working_dir = request.working_dir.as_deref();
        let target = resolve_existing("target directory", &request.target, working_dir)?;

        let public_key = request
            .public_key
            .as_deref()
            .map(|key| resolve_existing("public key", key, working_dir))
            .transpose()?;

        if types.signature == SignatureType::Sigstore && public_key.is_none() {
            return Err(IntegrityError::InvalidRequest(
                "signature type \"sigstore\" requires public_key".to_string(),
            ));
        }

        let keys = KeyMaterial {
            private_key: None,
            public_key,
            identity_token: None,
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

    /// Check the tree, then the signature; the signature is only checked for
    /// a tree that still matches its manifest
    #[instrument(
        name = "verify_tree",
        skip(self),
        fields(target = %self.target.display(), signature_type = %self.signature_type)
    )]
    pub async fn verify(&self) -> VerifyOutcome {
        let artifacts = ArtifactPaths::for_target(&self.target);

        let digest_result = match self.engine.check(&self.target).await {
            Ok(()) => StepResult::succeeded(ToolOutput {
                code: Some(0),
                stdout: "tree matches manifest".to_string(),
                stderr: String::new(),
            }),
            Err(e) => return VerifyOutcome::new(StepResult::failed_with(e), None),
        };

        let verify_result = StepResult::from_result(self.verify_signature(&artifacts).await);
        let outcome = VerifyOutcome::new(digest_result, Some(verify_result));
        if !outcome.failed() {
            info!("Verified {}", self.target.display());
        }
        outcome
    }

    async fn verify_signature(&self, artifacts: &ArtifactPaths) -> Result<ToolOutput> {
        if !artifacts.signature.exists() {
            return Err(IntegrityError::PathNotFound {
                what: "signature file",
                path: artifacts.signature.clone(),
            });
        }
        self.backend.verify(artifacts).await
    }
}
