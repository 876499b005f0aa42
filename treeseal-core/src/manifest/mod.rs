//! Digest manifest: the signed description of a tree
//!
//! On disk the manifest is UTF-8 text, one `"<digest> <filename>"` line per
//! tracked file, sorted by filename and joined with `\n`. Lines are split at
//! the FIRST space: the digest column is fixed-width hex, so filenames may
//! contain spaces, but never line breaks.

pub mod engine;
pub mod hasher;

pub use engine::ManifestEngine;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{IntegrityError, Result};
use hasher::is_sha256_hex;

/// Manifest file name inside the target directory
pub const MANIFEST_FILENAME: &str = "sha256sum.txt";

/// Detached signature file name inside the target directory
pub const SIGNATURE_FILENAME: &str = "sha256sum.txt.sig";

/// Ordered filename → digest listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    /// Build from `(filename, digest)` pairs, rejecting filenames the text
    /// format cannot hold
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map = BTreeMap::new();
        for (filename, digest) in entries {
            if filename.is_empty() || filename.contains('\n') || filename.contains('\r') {
                return Err(IntegrityError::AmbiguousFilename { name: filename });
            }
            map.insert(filename, digest);
        }
        Ok(Self { entries: map })
    }

    /// Parse manifest text
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for (index, raw_line) in text.split('\n').enumerate() {
            let line_no = index + 1;
            // Tolerate CRLF checkouts; filenames never contain '\r'
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
            if line.is_empty() {
                continue;
            }

            let (digest, filename) =
                line.split_once(' ')
                    .ok_or_else(|| IntegrityError::MalformedManifest {
                        line: line_no,
                        reason: "expected \"<digest> <filename>\"".to_string(),
                    })?;

            if !is_sha256_hex(digest) {
                return Err(IntegrityError::MalformedManifest {
                    line: line_no,
                    reason: format!("not a lowercase SHA-256 hex digest: {digest:?}"),
                });
            }
            if filename.is_empty() {
                return Err(IntegrityError::MalformedManifest {
                    line: line_no,
                    reason: "empty filename".to_string(),
                });
            }
            if entries
                .insert(filename.to_string(), digest.to_string())
                .is_some()
            {
                return Err(IntegrityError::MalformedManifest {
                    line: line_no,
                    reason: format!("duplicate entry for {filename:?}"),
                });
            }
        }

        Ok(Self { entries })
    }

    /// Render to the on-disk text form (no trailing newline)
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(filename, digest)| format!("{digest} {filename}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Load and parse a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| IntegrityError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    /// Write the rendered manifest, replacing any previous file
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render()).map_err(|e| IntegrityError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// `(filename, digest)` pairs in filename order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(filename, digest)| (filename.as_str(), digest.as_str()))
    }

    pub fn filenames(&self) -> BTreeSet<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn digest_for(&self, filename: &str) -> Option<&str> {
        self.entries.get(filename).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
