//! Error types with a machine-checkable kind and an actionable message

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse failure category callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unsupported resource, signature or SCM type, or a malformed request
    Validation,
    /// Missing target directory, key file or signature artifact
    Path,
    /// Reading or writing the manifest or a tracked file failed
    Io,
    /// The manifest text (or a filename destined for it) is not well-formed
    ManifestFormat,
    /// The tree no longer matches the manifest
    Consistency,
    /// An external executable could not be located or installed
    ToolUnavailable,
    /// An external executable ran and reported failure
    ToolFailed,
    /// An external executable exceeded its time budget
    TimedOut,
    /// A signature did not verify
    SignatureInvalid,
    /// The transparency log had no usable entry
    LogLookupFailed,
}

/// Everything that can go wrong while sealing or checking a tree
#[derive(Error, Debug)]
pub enum IntegrityError {
    /// A type string named something this build does not support
    #[error("Unsupported {what}: \"{value}\"\n\nSupported values: {supported}")]
    Unsupported {
        what: &'static str,
        value: String,
        supported: String,
    },

    /// The request is missing something the selected backend requires
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A path supplied by the caller does not exist
    #[error("{what} not found: {path}")]
    PathNotFound { what: &'static str, path: PathBuf },

    /// Failed to read a file
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write or remove a file
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A manifest line does not follow `<64 hex> <filename>`
    #[error("Malformed manifest at line {line}: {reason}")]
    MalformedManifest { line: usize, reason: String },

    /// A tracked path cannot be written to the manifest without ambiguity
    #[error("Tracked path cannot be recorded in the manifest: {name:?}\n\nManifest lines are newline separated, so paths must be UTF-8 without line breaks.")]
    AmbiguousFilename { name: String },

    /// The set of tracked files differs from the set in the manifest
    #[error("The following files are detected as differences.\nAdded: {added:?}\nRemoved: {removed:?}")]
    FilenameMismatch {
        added: Vec<String>,
        removed: Vec<String>,
    },

    /// Tracked files whose content no longer matches the recorded digest
    #[error("Checksum failed: the following files were changed from the signed state: {changed:?}")]
    DigestMismatch { changed: Vec<String> },

    /// An external executable could not be found or installed
    #[error("{tool} is unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// An external executable exited unsuccessfully
    #[error("{tool} exited with status {}\n{stderr}", exit_status(.code))]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    /// An external executable did not finish in time
    #[error("{tool} timed out after {seconds}s")]
    TimedOut { tool: String, seconds: u64 },

    /// Cryptographic verification failed
    #[error("Signature verification failed ({backend}): {detail}")]
    SignatureInvalid { backend: &'static str, detail: String },

    /// The on-disk signature differs from the one recorded in the log
    #[error("The signature is different from the one recorded in the transparency log (entry {uuid})")]
    SignatureLogMismatch { uuid: String },

    /// No usable transparency log entry could be obtained
    #[error("Transparency log lookup failed for {query}: {reason}")]
    LogLookupFailed { query: String, reason: String },
}

pub type Result<T> = std::result::Result<T, IntegrityError>;

fn exit_status(code: &Option<i32>) -> String {
    code.map_or_else(|| "<signal>".to_string(), |c| c.to_string())
}

impl IntegrityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IntegrityError::Unsupported { .. } | IntegrityError::InvalidRequest(_) => {
                ErrorKind::Validation
            }
            IntegrityError::PathNotFound { .. } => ErrorKind::Path,
            IntegrityError::Read { .. } | IntegrityError::Write { .. } => ErrorKind::Io,
            IntegrityError::MalformedManifest { .. } | IntegrityError::AmbiguousFilename { .. } => {
                ErrorKind::ManifestFormat
            }
            IntegrityError::FilenameMismatch { .. } | IntegrityError::DigestMismatch { .. } => {
                ErrorKind::Consistency
            }
            IntegrityError::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            IntegrityError::ToolFailed { .. } => ErrorKind::ToolFailed,
            IntegrityError::TimedOut { .. } => ErrorKind::TimedOut,
            IntegrityError::SignatureInvalid { .. } | IntegrityError::SignatureLogMismatch { .. } => {
                ErrorKind::SignatureInvalid
            }
            IntegrityError::LogLookupFailed { .. } => ErrorKind::LogLookupFailed,
        }
    }

    /// Shorthand for an unsupported-value error listing the accepted names
    pub(crate) fn unsupported(what: &'static str, value: &str, supported: &[&str]) -> Self {
        IntegrityError::Unsupported {
            what,
            value: value.to_string(),
            supported: supported.join(", "),
        }
    }

    /// Log tree drift and signature failures on the security target
    pub fn log_if_security_critical(&self) {
        match self.kind() {
            ErrorKind::Consistency | ErrorKind::SignatureInvalid => {
                tracing::error!(target: "security", "INTEGRITY VIOLATION: {}", self);
            }
            _ => {}
        }
    }
}
