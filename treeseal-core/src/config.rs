//! Runtime configuration
//!
//! ## Configuration Sources (in precedence order)
//!
//! 1. Environment variables (`TREESEAL_REKOR_URL`, `TREESEAL_COSIGN_PATH`,
//!    `TREESEAL_COMMAND_TIMEOUT`)
//! 2. A YAML file passed to [`IntegrityConfig::load`]
//! 3. Built-in defaults
//!
//! ```yaml
//! rekor_url: https://rekor.sigstore.dev
//! command_timeout_seconds: 120
//! cosign:
//!   version: v1.4.1
//!   cache_path: /tmp/cosign
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_REKOR_URL: &str = "https://rekor.sigstore.dev";
pub const DEFAULT_COSIGN_VERSION: &str = "v1.4.1";
pub const DEFAULT_COSIGN_CACHE_PATH: &str = "/tmp/cosign";
pub const DEFAULT_COSIGN_DOWNLOAD_BASE: &str = "https://github.com/sigstore/cosign/releases/download";

const ENV_REKOR_URL: &str = "TREESEAL_REKOR_URL";
const ENV_COSIGN_PATH: &str = "TREESEAL_COSIGN_PATH";
const ENV_COMMAND_TIMEOUT: &str = "TREESEAL_COMMAND_TIMEOUT";

/// Top-level configuration shared by the signer and verifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrityConfig {
    /// Base URL of the Rekor transparency log
    #[serde(default = "default_rekor_url")]
    pub rekor_url: String,

    /// Timeout for transparency log HTTP calls
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,

    /// Timeout for external tools (git, gpg, cosign); unset means wait forever
    #[serde(default)]
    pub command_timeout_seconds: Option<u64>,

    #[serde(default = "default_git_program")]
    pub git_program: String,

    #[serde(default = "default_gpg_program")]
    pub gpg_program: String,

    #[serde(default)]
    pub cosign: CosignConfig,
}

/// Where to find (or install) the cosign executable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CosignConfig {
    /// Explicit executable path; skips every other lookup step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Release pinned for self-installation
    #[serde(default = "default_cosign_version")]
    pub version: String,

    /// Location of the self-installed executable
    #[serde(default = "default_cosign_cache_path")]
    pub cache_path: PathBuf,

    #[serde(default = "default_cosign_download_base")]
    pub download_base_url: String,
}

fn default_rekor_url() -> String {
    DEFAULT_REKOR_URL.to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_git_program() -> String {
    "git".to_string()
}

fn default_gpg_program() -> String {
    "gpg".to_string()
}

fn default_cosign_version() -> String {
    DEFAULT_COSIGN_VERSION.to_string()
}

fn default_cosign_cache_path() -> PathBuf {
    PathBuf::from(DEFAULT_COSIGN_CACHE_PATH)
}

fn default_cosign_download_base() -> String {
    DEFAULT_COSIGN_DOWNLOAD_BASE.to_string()
}

impl Default for CosignConfig {
    fn default() -> Self {
        Self {
            path: None,
            version: default_cosign_version(),
            cache_path: default_cosign_cache_path(),
            download_base_url: default_cosign_download_base(),
        }
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            rekor_url: default_rekor_url(),
            http_timeout_seconds: default_http_timeout(),
            command_timeout_seconds: None,
            git_program: default_git_program(),
            gpg_program: default_gpg_program(),
            cosign: CosignConfig::default(),
        }
    }
}

impl IntegrityConfig {
    /// Load configuration from an optional YAML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: IntegrityConfig = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_REKOR_URL) {
            debug!("Using Rekor URL from {}: {}", ENV_REKOR_URL, url);
            self.rekor_url = url;
        }

        if let Ok(path) = std::env::var(ENV_COSIGN_PATH) {
            debug!("Using cosign from {}: {}", ENV_COSIGN_PATH, path);
            self.cosign.path = Some(PathBuf::from(path));
        }

        if let Ok(raw) = std::env::var(ENV_COMMAND_TIMEOUT) {
            match raw.parse::<u64>() {
                Ok(seconds) => self.command_timeout_seconds = Some(seconds),
                Err(_) => warn!(
                    "Ignoring {}={:?}: expected a whole number of seconds",
                    ENV_COMMAND_TIMEOUT, raw
                ),
            }
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_seconds.map(Duration::from_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}
