//! Manifest generation and drift checking
//!
//! `check` runs two ordered phases. The filename phase compares the tracked
//! set against the manifest and short-circuits on any difference; only a tree
//! with an identical file set reaches the content phase. The current set is
//! the committed files still present in the working tree, so a deleted file
//! is reported as removed.

use std::collections::BTreeSet;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::hasher::hash_file;
use super::{Manifest, MANIFEST_FILENAME};
use crate::config::IntegrityConfig;
use crate::error::{IntegrityError, Result};
use crate::tree::{lister_for, ScmKind, TreeLister};

/// Digest placeholder for files the manifest does not know about
const NOT_FOUND: &str = "__not_found__";

/// Builds and checks manifests over a tree's tracked files
pub struct ManifestEngine {
    lister: Box<dyn TreeLister>,
}

impl ManifestEngine {
    pub fn new(lister: Box<dyn TreeLister>) -> Self {
        Self { lister }
    }

    /// Engine backed by the configured SCM executable
    pub fn from_config(scm: ScmKind, config: &IntegrityConfig) -> Self {
        Self::new(lister_for(scm, &config.git_program, config.command_timeout()))
    }

    pub fn manifest_path(root: &Path) -> PathBuf {
        root.join(MANIFEST_FILENAME)
    }

    /// List tracked files (excluding manifest and signature artifacts)
    pub async fn tracked_files(&self, root: &Path) -> Result<Vec<String>> {
        self.lister.list(root, MANIFEST_FILENAME).await
    }

    /// Compute a fresh manifest in memory
    pub async fn compute(&self, root: &Path) -> Result<Manifest> {
        let files = self.tracked_files(root).await?;
        let mut entries = Vec::with_capacity(files.len());
        for filename in files {
            let digest = hash_file(&root.join(&filename)).await?;
            entries.push((filename, digest));
        }
        Manifest::from_entries(entries)
    }

    /// Compute the manifest and write it to `<root>/sha256sum.txt`
    pub async fn generate(&self, root: &Path) -> Result<Manifest> {
        let manifest = self.compute(root).await?;
        let path = Self::manifest_path(root);
        manifest.save(&path)?;
        info!(
            "Wrote manifest with {} entries to {}",
            manifest.len(),
            path.display()
        );
        Ok(manifest)
    }

    /// Check the stored manifest against the current tree
    pub async fn check(&self, root: &Path) -> Result<()> {
        let path = Self::manifest_path(root);
        let signed = Manifest::load(&path)?;
        let tracked = Self::present_files(root, self.tracked_files(root).await?).await?;

        Self::check_filenames(&signed, &tracked)?;
        debug!("Filename check passed for {} files", tracked.len());

        self.check_digests(root, &signed, &tracked).await?;
        info!("Manifest check passed for {}", root.display());
        Ok(())
    }

    /// Drop committed files that no longer exist in the working tree
    async fn present_files(root: &Path, tracked: Vec<String>) -> Result<Vec<String>> {
        let mut present = Vec::with_capacity(tracked.len());
        for filename in tracked {
            let path = root.join(&filename);
            match tokio::fs::symlink_metadata(&path).await {
                Ok(_) => present.push(filename),
                Err(e) if e.kind() == IoErrorKind::NotFound => {
                    debug!("{} is tracked but missing from the working tree", filename);
                }
                Err(source) => return Err(IntegrityError::Read { path, source }),
            }
        }
        Ok(present)
    }

    fn check_filenames(signed: &Manifest, tracked: &[String]) -> Result<()> {
        let signed_names = signed.filenames();
        let current_names: BTreeSet<&str> = tracked.iter().map(String::as_str).collect();

        if signed_names == current_names {
            return Ok(());
        }

        let added: Vec<String> = current_names
            .difference(&signed_names)
            .map(|s| s.to_string())
            .collect();
        let removed: Vec<String> = signed_names
            .difference(&current_names)
            .map(|s| s.to_string())
            .collect();

        Err(IntegrityError::FilenameMismatch { added, removed })
    }

    async fn check_digests(&self, root: &Path, signed: &Manifest, tracked: &[String]) -> Result<()> {
        let mut changed = Vec::new();

        for filename in tracked {
            let current = hash_file(&root.join(filename)).await?;

            let expected = signed.digest_for(filename).unwrap_or(NOT_FOUND);
            if current != expected {
                debug!(
                    "Digest mismatch for {}: expected {}, actual {}",
                    filename, expected, current
                );
                changed.push(filename.clone());
            }
        }

        if changed.is_empty() {
            Ok(())
        } else {
            Err(IntegrityError::DigestMismatch { changed })
        }
    }
}
