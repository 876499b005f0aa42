//! Offline key signing through gpg
//!
//! Without key material the caller's default keyring is used. With a key
//! file, a throwaway keyring is created under a temporary `--homedir`,
//! seeded only with that key, and torn down when the operation finishes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::{ArtifactPaths, SignatureBackend, SignatureType};
use crate::error::{IntegrityError, Result};
use crate::process::{ToolCommand, ToolOutput};

/// Longest a dropped keyring waits for its agent to stop
pub const AGENT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A keyring that exists only for the lifetime of this value
///
/// Dropping it stops any agent gpg started for the home directory and then
/// removes the directory.
pub struct IsolatedKeyring {
    home: TempDir,
    gpg: String,
    gpgconf: PathBuf,
    timeout: Option<Duration>,
}

impl IsolatedKeyring {
    /// Create an empty keyring
    pub fn create(gpg: &str, timeout: Option<Duration>) -> Result<Self> {
        let home = tempfile::Builder::new()
            .prefix("treeseal-gnupg-")
            .tempdir()
            .map_err(|e| IntegrityError::Write {
                path: std::env::temp_dir(),
                source: e,
            })?;
        debug!("Created isolated keyring at {}", home.path().display());

        Ok(Self {
            home,
            gpg: gpg.to_string(),
            gpgconf: gpgconf_for(gpg),
            timeout,
        })
    }

    /// Create a keyring holding exactly the keys in `key_file`
    pub async fn with_key(gpg: &str, key_file: &Path, timeout: Option<Duration>) -> Result<Self> {
        let keyring = Self::create(gpg, timeout)?;
        keyring.import(key_file).await?;
        Ok(keyring)
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    /// Import an armored or binary key file
    pub async fn import(&self, key_file: &Path) -> Result<ToolOutput> {
        let output = self
            .command()
            .arg("--import")
            .arg(key_file)
            .output()
            .await?
            .ok_or_failed("gpg --import")?;
        debug!("Imported {} into isolated keyring", key_file.display());
        Ok(output)
    }

    /// A gpg invocation bound to this keyring
    pub fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.gpg)
            .arg("--homedir")
            .arg(self.home.path())
            .arg("--batch")
            .timeout(self.timeout)
    }
}

impl Drop for IsolatedKeyring {
    /// Blocks the current thread while gpgconf stops the agent, for at most
    /// the command timeout (capped at [`AGENT_SHUTDOWN_TIMEOUT`])
    fn drop(&mut self) {
        // The agent holds sockets inside the home directory
        let spawned = std::process::Command::new(&self.gpgconf)
            .arg("--homedir")
            .arg(self.home.path())
            .args(["--kill", "all"])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                debug!("gpgconf --kill failed for {}: {}", self.home.path().display(), e);
                return;
            }
        };

        let limit = self
            .timeout
            .map_or(AGENT_SHUTDOWN_TIMEOUT, |t| t.min(AGENT_SHUTDOWN_TIMEOUT));
        let deadline = Instant::now() + limit;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(20)),
                Ok(None) => {
                    warn!(
                        "gpgconf --kill did not finish within {:?} for {}",
                        limit,
                        self.home.path().display()
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    return;
                }
                Err(e) => {
                    debug!("gpgconf --kill failed for {}: {}", self.home.path().display(), e);
                    return;
                }
            }
        }
    }
}

/// gpgconf lives next to the configured gpg executable
fn gpgconf_for(gpg: &str) -> PathBuf {
    match Path::new(gpg).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join("gpgconf"),
        _ => PathBuf::from("gpgconf"),
    }
}

/// The `gpg` signature backend
pub struct GpgBackend {
    program: String,
    timeout: Option<Duration>,
    private_key: Option<PathBuf>,
    public_key: Option<PathBuf>,
}

impl GpgBackend {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
            private_key: None,
            public_key: None,
        }
    }

    pub fn with_private_key(mut self, key: Option<PathBuf>) -> Self {
        self.private_key = key;
        self
    }

    pub fn with_public_key(mut self, key: Option<PathBuf>) -> Self {
        self.public_key = key;
        self
    }

    fn ambient_command(&self) -> ToolCommand {
        ToolCommand::new(&self.program)
            .arg("--batch")
            .timeout(self.timeout)
    }
}

#[async_trait]
impl SignatureBackend for GpgBackend {
    fn signature_type(&self) -> SignatureType {
        SignatureType::Gpg
    }

    async fn sign(&self, artifacts: &ArtifactPaths) -> Result<ToolOutput> {
        // Keep the keyring alive until gpg has finished signing
        let keyring = match &self.private_key {
            Some(key) => Some(IsolatedKeyring::with_key(&self.program, key, self.timeout).await?),
            None => {
                info!("No private key supplied; signing with the default gpg key");
                None
            }
        };

        let command = match &keyring {
            Some(keyring) => keyring.command(),
            None => self.ambient_command(),
        };

        let output = command
            .args(["--yes", "--detach-sign", "--output"])
            .arg(&artifacts.signature)
            .arg(&artifacts.manifest)
            .output()
            .await?
            .ok_or_failed("gpg --detach-sign")?;

        info!("Signed {} with gpg", artifacts.manifest.display());
        Ok(output)
    }

    async fn verify(&self, artifacts: &ArtifactPaths) -> Result<ToolOutput> {
        let keyring = match &self.public_key {
            Some(key) => Some(IsolatedKeyring::with_key(&self.program, key, self.timeout).await?),
            None => None,
        };

        let command = match &keyring {
            Some(keyring) => keyring.command(),
            None => self.ambient_command(),
        };

        let output = command
            .arg("--verify")
            .arg(&artifacts.signature)
            .arg(&artifacts.manifest)
            .output()
            .await?;

        if !output.success() {
            warn!(
                "gpg rejected signature {}: exit {:?}",
                artifacts.signature.display(),
                output.code
            );
            return Err(IntegrityError::SignatureInvalid {
                backend: "gpg",
                detail: output.stderr.trim().to_string(),
            });
        }

        info!("gpg signature verified for {}", artifacts.manifest.display());
        Ok(output)
    }
}
