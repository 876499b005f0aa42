//! Tracked-file listing from the latest committed snapshot
//!
//! Only committed content counts: uncommitted edits, untracked files and
//! symbolic links never show up in a listing.

use async_trait::async_trait;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::{IntegrityError, Result};
use crate::process::ToolCommand;

/// Git mode for a symbolic link entry
const SYMLINK_MODE: &str = "120000";

/// Snapshot backends this build can list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScmKind {
    Git,
}

impl ScmKind {
    pub const SUPPORTED: &'static [&'static str] = &["git"];
}

impl FromStr for ScmKind {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "git" => Ok(ScmKind::Git),
            other => Err(IntegrityError::unsupported("SCM type", other, Self::SUPPORTED)),
        }
    }
}

/// Source of the canonical tracked-file set
#[async_trait]
pub trait TreeLister: Send + Sync {
    /// List tracked, non-symlink files under `root`, relative to `root`,
    /// skipping entries whose basename starts with `exclude_prefix`.
    /// The result is sorted ascending.
    async fn list(&self, root: &Path, exclude_prefix: &str) -> Result<Vec<String>>;
}

/// Lists the `HEAD` tree through the git executable
#[derive(Debug, Clone)]
pub struct GitLister {
    program: String,
    timeout: Option<Duration>,
}

impl GitLister {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl Default for GitLister {
    fn default() -> Self {
        Self::new("git", None)
    }
}

#[async_trait]
impl TreeLister for GitLister {
    async fn list(&self, root: &Path, exclude_prefix: &str) -> Result<Vec<String>> {
        // Run from `root` so the listing is scoped to its subtree and paths
        // come back relative to it
        let output = ToolCommand::new(&self.program)
            .args(["ls-tree", "-r", "-z", "HEAD"])
            .current_dir(root)
            .timeout(self.timeout)
            .output_raw()
            .await?;

        if !output.status.success() {
            return Err(IntegrityError::ToolFailed {
                tool: "git".to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let files = parse_ls_tree(&output.stdout, exclude_prefix)?;
        debug!(
            "Listed {} tracked files under {}",
            files.len(),
            root.display()
        );
        Ok(files)
    }
}

/// Resolve a lister for the requested SCM kind
pub fn lister_for(kind: ScmKind, git_program: &str, timeout: Option<Duration>) -> Box<dyn TreeLister> {
    match kind {
        ScmKind::Git => Box::new(GitLister::new(git_program, timeout)),
    }
}

/// Parse NUL-separated `git ls-tree -r -z` records: `<mode> <type> <object>\t<path>`
fn parse_ls_tree(raw: &[u8], exclude_prefix: &str) -> Result<Vec<String>> {
    let mut files = Vec::new();

    for bytes in raw.split(|b| *b == 0).filter(|r| !r.is_empty()) {
        let record = std::str::from_utf8(bytes).map_err(|_| IntegrityError::AmbiguousFilename {
            name: String::from_utf8_lossy(bytes).into_owned(),
        })?;

        let Some((meta, path)) = record.split_once('\t') else {
            debug!("Skipping unrecognised ls-tree record: {:?}", record);
            continue;
        };

        let mut fields = meta.split_whitespace();
        let mode = fields.next().unwrap_or_default();
        let kind = fields.next().unwrap_or_default();

        // Submodules show up as "commit" entries; symlinks as blobs with 120000
        if kind != "blob" || mode == SYMLINK_MODE {
            continue;
        }

        let basename = path.rsplit('/').next().unwrap_or(path);
        if basename.starts_with(exclude_prefix) {
            continue;
        }

        if path.contains('\n') || path.contains('\r') {
            return Err(IntegrityError::AmbiguousFilename {
                name: path.to_string(),
            });
        }

        files.push(path.to_string());
    }

    files.sort();
    Ok(files)
}
