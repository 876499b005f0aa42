//! Test helper functions for integration tests
//!
//! Shared across the test files using the tests/common/ pattern. Not every
//! test binary uses every helper.
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Once;
use treeseal_core::error::IntegrityError;
use treeseal_core::manifest::hasher::hash_bytes;
use treeseal_core::process::ToolOutput;
use treeseal_core::rekor::{LogEntry, TransparencyLog};
use treeseal_core::signing::{ArtifactPaths, SignatureBackend, SignatureType};

static INIT: Once = Once::new();

/// Initialize logging for tests (only once per test run)
pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn tool_available(name: &str) -> bool {
    which::which(name).is_ok()
}

fn run(program: &str, dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new(program).args(args).current_dir(dir).output()?;
    if !output.status.success() {
        bail!(
            "{} {:?} failed: {}",
            program,
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run git with a fixed identity and commit signing disabled
pub fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let mut full = vec![
        "-c",
        "user.name=Treeseal Test",
        "-c",
        "user.email=test@example.com",
        "-c",
        "commit.gpgsign=false",
    ];
    full.extend_from_slice(args);
    run("git", dir, &full)
}

/// Initialize a repository containing `files`, all committed
pub fn init_repo(dir: &Path, files: &[(&str, &str)]) -> Result<()> {
    git(dir, &["init", "-q"])?;
    write_files(dir, files)?;
    commit_all(dir, "initial")
}

pub fn write_files(dir: &Path, files: &[(&str, &str)]) -> Result<()> {
    for (name, content) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }
    Ok(())
}

pub fn commit_all(dir: &Path, message: &str) -> Result<()> {
    git(dir, &["add", "-A"])?;
    git(dir, &["commit", "-q", "--allow-empty", "-m", message])?;
    Ok(())
}

/// An exported gpg key pair
pub struct GpgKeyPair {
    pub secret: PathBuf,
    pub public: PathBuf,
}

/// Generate an unprotected key pair in a throwaway homedir and export it into `out_dir`
pub fn generate_gpg_key(out_dir: &Path, name: &str) -> Result<GpgKeyPair> {
    let home = tempfile::TempDir::new()?;
    let home_str = home.path().to_string_lossy().into_owned();
    let uid = format!("{name} <{name}@example.com>");
    let secret = out_dir.join(format!("{name}.sec.asc"));
    let public = out_dir.join(format!("{name}.pub.asc"));
    let secret_str = secret.to_string_lossy().into_owned();
    let public_str = public.to_string_lossy().into_owned();

    let base = [
        "--homedir",
        home_str.as_str(),
        "--batch",
        "--pinentry-mode",
        "loopback",
        "--passphrase",
        "",
    ];

    let result = (|| -> Result<()> {
        let mut args = base.to_vec();
        args.extend_from_slice(&["--quick-gen-key", uid.as_str(), "default", "default", "never"]);
        run("gpg", out_dir, &args)?;

        let mut args = base.to_vec();
        args.extend_from_slice(&["--armor", "--output", secret_str.as_str(), "--export-secret-keys"]);
        run("gpg", out_dir, &args)?;

        let mut args = base.to_vec();
        args.extend_from_slice(&["--armor", "--output", public_str.as_str(), "--export"]);
        run("gpg", out_dir, &args)?;
        Ok(())
    })();

    let _ = Command::new("gpgconf")
        .args(["--homedir", home_str.as_str(), "--kill", "all"])
        .output();

    result?;
    Ok(GpgKeyPair { secret, public })
}

/// In-memory transparency log keyed by manifest digest
#[derive(Default)]
pub struct MemoryLog {
    index: HashMap<String, Vec<String>>,
    entries: HashMap<String, LogEntry>,
}

impl MemoryLog {
    pub fn record(&mut self, uuid: &str, manifest: &[u8], signature: &[u8], certificate_pem: &str) {
        self.index
            .entry(hash_bytes(manifest))
            .or_default()
            .push(uuid.to_string());
        self.entries.insert(
            uuid.to_string(),
            LogEntry {
                uuid: uuid.to_string(),
                body: format!("{{\"kind\":\"hashedrekord\",\"uuid\":\"{uuid}\"}}"),
                signature: signature.to_vec(),
                certificate_pem: certificate_pem.to_string(),
            },
        );
    }
}

#[async_trait]
impl TransparencyLog for MemoryLog {
    async fn search_by_digest(&self, digest_hex: &str) -> treeseal_core::Result<Vec<String>> {
        Ok(self.index.get(digest_hex).cloned().unwrap_or_default())
    }

    async fn fetch_entry(&self, uuid: &str) -> treeseal_core::Result<LogEntry> {
        self.entries
            .get(uuid)
            .cloned()
            .ok_or_else(|| IntegrityError::LogLookupFailed {
                query: format!("entry {uuid}"),
                reason: "not found".to_string(),
            })
    }
}

/// Backend that appends a marker to the signature file instead of signing
pub struct AppendingBackend;

#[async_trait]
impl SignatureBackend for AppendingBackend {
    fn signature_type(&self) -> SignatureType {
        SignatureType::Gpg
    }

    async fn sign(&self, artifacts: &ArtifactPaths) -> treeseal_core::Result<ToolOutput> {
        use std::io::Write;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&artifacts.signature)
            .map_err(|e| IntegrityError::Write {
                path: artifacts.signature.clone(),
                source: e,
            })?;
        file.write_all(b"signature\n").map_err(|e| IntegrityError::Write {
            path: artifacts.signature.clone(),
            source: e,
        })?;
        Ok(ToolOutput {
            code: Some(0),
            ..Default::default()
        })
    }

    async fn verify(&self, _artifacts: &ArtifactPaths) -> treeseal_core::Result<ToolOutput> {
        Ok(ToolOutput {
            code: Some(0),
            ..Default::default()
        })
    }
}

/// A fake cosign that writes `fakesig` on sign-blob and accepts only that on verify-blob
#[cfg(unix)]
pub fn fake_cosign(dir: &Path) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("cosign");
    fs::write(
        &path,
        r#"#!/bin/sh
cmd=$1; shift
out=""; sig=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output-signature) out=$2; shift 2 ;;
    --signature) sig=$2; shift 2 ;;
    --key) shift 2 ;;
    *) shift ;;
  esac
done
case "$cmd" in
  sign-blob) printf fakesig > "$out" ;;
  verify-blob)
    if [ "$(cat "$sig")" != "fakesig" ]; then
      echo "error: invalid signature when validating ASN.1 encoded signature" >&2
      exit 1
    fi
    echo "Verified OK" ;;
  *) exit 2 ;;
esac
"#,
    )?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}
