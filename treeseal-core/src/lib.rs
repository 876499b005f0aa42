//! Treeseal: digest manifests and detached signatures for source trees
//!
//! A tree is sealed by recording the SHA-256 of every committed file in
//! `sha256sum.txt` and signing that manifest. Verification first checks the
//! tree against the manifest, then the signature against the manifest.

pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod outcome;
pub mod process;
pub mod rekor;
pub mod request;
pub mod signer;
pub mod signing;
pub mod tree;
pub mod verifier;

pub use config::IntegrityConfig;
pub use error::{ErrorKind, IntegrityError, Result};
pub use manifest::{Manifest, ManifestEngine, MANIFEST_FILENAME, SIGNATURE_FILENAME};
pub use outcome::{SignOutcome, StepResult, VerifyOutcome};
pub use request::{ResourceType, SignRequest, VerifyRequest};
pub use signer::Signer;
pub use signing::{SignatureBackend, SignatureType};
pub use verifier::Verifier;
