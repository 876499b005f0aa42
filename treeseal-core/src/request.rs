//! Caller-facing request parameters
//!
//! Requests deserialize straight from the JSON/YAML a host layer passes in.
//! Everything is validated when an orchestrator is constructed, before any
//! file is touched.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{IntegrityError, Result};
use crate::signing::SignatureType;
use crate::tree::ScmKind;

/// Kinds of resource that can be sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    /// A version-controlled directory tree
    Tree,
}

impl ResourceType {
    pub const SUPPORTED: &'static [&'static str] = &["tree"];
}

impl FromStr for ResourceType {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tree" => Ok(ResourceType::Tree),
            other => Err(IntegrityError::unsupported("resource type", other, Self::SUPPORTED)),
        }
    }
}

fn default_resource_type() -> String {
    "tree".to_string()
}

fn default_signature_type() -> String {
    "gpg".to_string()
}

fn default_scm() -> String {
    "git".to_string()
}

/// Parameters for [`crate::Signer`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    pub target: PathBuf,
    #[serde(default = "default_signature_type")]
    pub signature_type: String,
    #[serde(default = "default_scm")]
    pub scm: String,
    /// Base for relative `target` and key paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    #[serde(default, alias = "keyless_signer_id", skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,
}

impl SignRequest {
    pub fn new(target: impl Into<PathBuf>, signature_type: SignatureType) -> Self {
        Self {
            resource_type: default_resource_type(),
            target: target.into(),
            signature_type: signature_type.to_string(),
            scm: default_scm(),
            ..Default::default()
        }
    }

    pub fn with_private_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    pub fn with_identity_token(mut self, token: impl Into<String>) -> Self {
        self.identity_token = Some(token.into());
        self
    }
}

/// Parameters for [`crate::Verifier`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    pub target: PathBuf,
    #[serde(default = "default_signature_type")]
    pub signature_type: String,
    #[serde(default = "default_scm")]
    pub scm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PathBuf>,
}

impl VerifyRequest {
    pub fn new(target: impl Into<PathBuf>, signature_type: SignatureType) -> Self {
        Self {
            resource_type: default_resource_type(),
            target: target.into(),
            signature_type: signature_type.to_string(),
            scm: default_scm(),
            ..Default::default()
        }
    }

    pub fn with_public_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.public_key = Some(key.into());
        self
    }
}

/// Type strings parsed into their enums
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ParsedTypes {
    pub signature: SignatureType,
    pub scm: ScmKind,
}

/// Parse the request's type strings; the resource type is checked first
pub(crate) fn parse_types(resource: &str, signature: &str, scm: &str) -> Result<ParsedTypes> {
    match resource.parse::<ResourceType>()? {
        ResourceType::Tree => Ok(ParsedTypes {
            signature: signature.parse()?,
            scm: scm.parse()?,
        }),
    }
}

/// Expand `~/`, anchor relative paths at `working_dir`, and require existence
pub(crate) fn resolve_existing(
    what: &'static str,
    path: &Path,
    working_dir: Option<&Path>,
) -> Result<PathBuf> {
    let resolved = resolve(path, working_dir);
    if resolved.exists() {
        Ok(resolved)
    } else {
        Err(IntegrityError::PathNotFound {
            what,
            path: resolved,
        })
    }
}

fn resolve(path: &Path, working_dir: Option<&Path>) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    };

    match working_dir {
        Some(base) if expanded.is_relative() => base.join(expanded),
        _ => expanded,
    }
}
