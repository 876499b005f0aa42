//! Two-part results of sign and verify runs
//!
//! The digest step and the signature step are reported separately so a
//! caller can tell "the tree changed" apart from "the signature is bad".

use serde::{Serialize, Serializer};

use crate::error::{ErrorKind, IntegrityError};
use crate::process::ToolOutput;

/// Serialized form of a step error
#[derive(Serialize)]
struct ErrorReport<'a> {
    kind: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    added: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    removed: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    changed: Option<&'a [String]>,
}

fn serialize_error<S: Serializer>(error: &Option<IntegrityError>, serializer: S) -> Result<S::Ok, S::Error> {
    let Some(error) = error else {
        return serializer.serialize_none();
    };

    let (added, removed, changed) = match error {
        IntegrityError::FilenameMismatch { added, removed } => {
            (Some(added.as_slice()), Some(removed.as_slice()), None)
        }
        IntegrityError::DigestMismatch { changed } => (None, None, Some(changed.as_slice())),
        _ => (None, None, None),
    };

    serializer.serialize_some(&ErrorReport {
        kind: error.kind(),
        message: error.to_string(),
        added,
        removed,
        changed,
    })
}

/// Outcome of one step
#[derive(Debug, Default, Serialize)]
pub struct StepResult {
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<IntegrityError>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

impl StepResult {
    pub fn succeeded(output: ToolOutput) -> Self {
        Self {
            error: None,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }

    /// A failed step; the error is logged here so every failure that reaches
    /// a caller has also reached the log
    pub fn failed_with(error: IntegrityError) -> Self {
        tracing::error!("{}", error);
        error.log_if_security_critical();
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn from_result(result: crate::error::Result<ToolOutput>) -> Self {
        match result {
            Ok(output) => Self::succeeded(output),
            Err(e) => Self::failed_with(e),
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(IntegrityError::kind)
    }
}

/// Result of [`crate::Signer::sign`]
#[derive(Debug, Serialize)]
pub struct SignOutcome {
    pub digest_result: StepResult,
    /// Absent when manifest generation failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_result: Option<StepResult>,
    pub failed: bool,
}

impl SignOutcome {
    pub(crate) fn new(digest_result: StepResult, sign_result: Option<StepResult>) -> Self {
        let failed = digest_result.failed() || sign_result.as_ref().map_or(true, StepResult::failed);
        Self {
            digest_result,
            sign_result,
            failed,
        }
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// The first error encountered, if any
    pub fn error(&self) -> Option<&IntegrityError> {
        self.digest_result
            .error
            .as_ref()
            .or_else(|| self.sign_result.as_ref().and_then(|r| r.error.as_ref()))
    }
}

/// Result of [`crate::Verifier::verify`]
#[derive(Debug, Serialize)]
pub struct VerifyOutcome {
    pub digest_result: StepResult,
    /// Absent when the tree no longer matches the manifest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_result: Option<StepResult>,
    pub failed: bool,
}

impl VerifyOutcome {
    pub(crate) fn new(digest_result: StepResult, verify_result: Option<StepResult>) -> Self {
        let failed = digest_result.failed() || verify_result.as_ref().map_or(true, StepResult::failed);
        Self {
            digest_result,
            verify_result,
            failed,
        }
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn error(&self) -> Option<&IntegrityError> {
        self.digest_result
            .error
            .as_ref()
            .or_else(|| self.verify_result.as_ref().and_then(|r| r.error.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_digest_failure_serializes_lists() {
        let outcome = VerifyOutcome::new(
            StepResult::failed_with(IntegrityError::FilenameMismatch {
                added: vec!["new.txt".to_string()],
                removed: vec![],
            }),
            None,
        );
        assert!(outcome.failed());

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["failed"], json!(true));
        assert_eq!(value["digest_result"]["error"]["kind"], json!("consistency"));
        assert_eq!(value["digest_result"]["error"]["added"], json!(["new.txt"]));
        assert!(value.get("verify_result").is_none());
    }

    #[test]
    fn test_success_has_no_error_field() {
        let outcome = SignOutcome::new(
            StepResult::succeeded(ToolOutput::default()),
            Some(StepResult::succeeded(ToolOutput {
                code: Some(0),
                stdout: "signed".to_string(),
                stderr: String::new(),
            })),
        );
        assert!(!outcome.failed());
        assert!(outcome.error().is_none());

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["sign_result"]["stdout"], json!("signed"));
        assert!(value["digest_result"].get("error").is_none());
    }

    #[test]
    fn test_signature_step_failure_fails_outcome() {
        let outcome = VerifyOutcome::new(
            StepResult::succeeded(ToolOutput::default()),
            Some(StepResult::failed_with(IntegrityError::SignatureInvalid {
                backend: "gpg",
                detail: "BAD signature".to_string(),
            })),
        );
        assert!(outcome.failed());
        assert!(!outcome.digest_result.failed());
        assert_eq!(
            outcome.verify_result.as_ref().and_then(StepResult::kind),
            Some(ErrorKind::SignatureInvalid)
        );
    }
}
