//! Locating (and if needed installing) the cosign executable
//!
//! Lookup order:
//! 1. The configured path, if any (no fallback when it is missing)
//! 2. `cosign` on the search path
//! 3. The cached self-installed copy
//! 4. Download the pinned release for this OS/CPU into the cache path

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CosignConfig;
use crate::error::{IntegrityError, Result};
use crate::process::ToolCommand;

const TOOL: &str = "cosign";

/// Upper bound on the whole release download, body included
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Resolves the path of an external executable
#[async_trait]
pub trait ToolLocator: Send + Sync {
    async fn locate(&self) -> Result<PathBuf>;
}

/// Always returns the same path
#[derive(Debug, Clone)]
pub struct FixedLocator(pub PathBuf);

#[async_trait]
impl ToolLocator for FixedLocator {
    async fn locate(&self) -> Result<PathBuf> {
        Ok(self.0.clone())
    }
}

/// Finds cosign on this machine, downloading the pinned release as a last resort
pub struct CosignLocator {
    config: CosignConfig,
    timeout: Option<Duration>,
    download_timeout: Duration,
    search_path: Option<OsString>,
}

impl CosignLocator {
    pub fn new(config: CosignConfig, timeout: Option<Duration>) -> Self {
        Self {
            config,
            timeout,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            search_path: None,
        }
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Search these directories instead of `$PATH`
    pub fn with_search_path(mut self, paths: impl Into<OsString>) -> Self {
        self.search_path = Some(paths.into());
        self
    }

    fn unavailable(reason: impl Into<String>) -> IntegrityError {
        IntegrityError::ToolUnavailable {
            tool: TOOL.to_string(),
            reason: reason.into(),
        }
    }

    fn find_on_path(&self) -> Option<PathBuf> {
        let found = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
                which::which_in(TOOL, Some(paths), cwd)
            }
            None => which::which(TOOL),
        };
        found.ok()
    }

    /// Download URL of the pinned release for this platform
    pub fn download_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.config.download_base_url.trim_end_matches('/'),
            self.config.version,
            release_asset_name(std::env::consts::OS, std::env::consts::ARCH)
        )
    }

    async fn install(&self) -> Result<PathBuf> {
        let url = self.download_url();
        let dest = &self.config.cache_path;
        info!("Installing cosign {} from {} to {}", self.config.version, url, dest.display());

        let client = reqwest::Client::builder()
            .user_agent("treeseal")
            .timeout(self.download_timeout)
            .build()
            .map_err(|e| Self::unavailable(format!("failed to create HTTP client: {e}")))?;

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unavailable(format!("download from {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::unavailable(format!(
                "download failed: HTTP {} for {}",
                response.status(),
                url
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::unavailable(format!("failed to read download: {e}")))?;

        write_executable(dest, &bytes).await?;

        // Fetches the TUF root; cosign still works for key-based flows without it
        match ToolCommand::new(dest)
            .arg("initialize")
            .timeout(self.timeout)
            .output()
            .await
        {
            Ok(output) if output.success() => debug!("cosign initialize succeeded"),
            Ok(output) => warn!("cosign initialize failed: {}", output.stderr.trim()),
            Err(e) => warn!("cosign initialize failed: {}", e),
        }

        Ok(dest.clone())
    }
}

#[async_trait]
impl ToolLocator for CosignLocator {
    async fn locate(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config.path {
            if path.is_file() {
                debug!("Using configured cosign at {}", path.display());
                return Ok(path.clone());
            }
            return Err(Self::unavailable(format!(
                "configured path {} does not exist",
                path.display()
            )));
        }

        if let Some(path) = self.find_on_path() {
            debug!("Using cosign from search path: {}", path.display());
            return Ok(path);
        }

        if self.config.cache_path.is_file() {
            debug!("Using cached cosign at {}", self.config.cache_path.display());
            return Ok(self.config.cache_path.clone());
        }

        self.install().await
    }
}

/// Write `bytes` to `dest` with mode 0755, never leaving a partial file at `dest`
async fn write_executable(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| write_err(parent, e))?;
    }

    let partial = dest.with_extension("partial");
    tokio::fs::write(&partial, bytes)
        .await
        .map_err(|e| write_err(&partial, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| write_err(&partial, e))?;
    }

    tokio::fs::rename(&partial, dest)
        .await
        .map_err(|e| write_err(dest, e))
}

fn write_err(path: &Path, e: std::io::Error) -> IntegrityError {
    IntegrityError::Write {
        path: path.to_path_buf(),
        source: e,
    }
}

/// Release asset name for an OS/CPU pair, e.g. `cosign-linux-amd64`
pub fn release_asset_name(os: &str, arch: &str) -> String {
    let os = match os {
        "macos" => "darwin",
        other => other,
    };
    let arch = match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        other => other,
    };
    format!("{TOOL}-{os}-{arch}")
}
