//! External tool execution
//!
//! Every tool (git, gpg, cosign) is spawned from an argument vector. Nothing
//! goes through a shell, so paths and filenames are never reinterpreted.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{IntegrityError, Result};

/// Captured result of a finished tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`IntegrityError::ToolFailed`]
    pub fn ok_or_failed(self, tool: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(IntegrityError::ToolFailed {
                tool: tool.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// A single tool invocation, built up like `std::process::Command`
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: PathBuf::from(program.as_ref()),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn args_slice(&self) -> &[OsString] {
        &self.args
    }

    /// Short name used in logs and errors
    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// Run to completion and capture output; a non-zero exit is not an error here
    pub async fn output(self) -> Result<ToolOutput> {
        let raw = self.output_raw().await?;
        Ok(ToolOutput {
            code: raw.status.code(),
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
        })
    }

    /// Like [`ToolCommand::output`], keeping stdout and stderr as bytes
    pub async fn output_raw(self) -> Result<Output> {
        let tool = self.tool_name();
        debug!("Running {}: {:?} {:?}", tool, self.program, self.args);

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| IntegrityError::ToolUnavailable {
                tool: tool.clone(),
                reason: format!("failed to spawn {}: {}", self.program.display(), e),
            })?;

        let waited = match self.timeout {
            // Dropping the future on timeout drops the child, which kills it
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| IntegrityError::TimedOut {
                    tool: tool.clone(),
                    seconds: limit.as_secs(),
                })?,
            None => child.wait_with_output().await,
        };

        let output = waited.map_err(|e| IntegrityError::ToolUnavailable {
            tool: tool.clone(),
            reason: format!("failed to wait for {}: {}", self.program.display(), e),
        })?;

        debug!("{} exited with {:?}", tool, output.status.code());
        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let output = ToolCommand::new("sh")
            .args(["-c", "printf hello; exit 3"])
            .output()
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.code, Some(3));
        assert!(!output.success());

        let err = output.ok_or_failed("sh").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolFailed);
    }

    #[tokio::test]
    async fn test_raw_output_keeps_non_utf8_bytes() {
        let output = ToolCommand::new("printf")
            .arg("a\\377b")
            .output_raw()
            .await
            .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout, b"a\xffb");
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_interpreted() {
        let output = ToolCommand::new("printf")
            .args(["%s", "$(echo injected); rm -rf /"])
            .output()
            .await
            .unwrap();
        assert_eq!(output.stdout, "$(echo injected); rm -rf /");
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_failure() {
        let err = ToolCommand::new("sleep")
            .arg("5")
            .timeout(Some(Duration::from_millis(100)))
            .output()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let err = ToolCommand::new("/nonexistent/treeseal-tool")
            .output()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolUnavailable);
    }

    #[tokio::test]
    async fn test_env_and_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = ToolCommand::new("sh")
            .args(["-c", "printf \"$TREESEAL_TEST:\"; pwd"])
            .env("TREESEAL_TEST", "set")
            .current_dir(dir.path())
            .output()
            .await
            .unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(output.stdout.starts_with("set:"));
        assert!(output.stdout.trim_end().ends_with(
            canonical.file_name().unwrap().to_str().unwrap()
        ));
    }
}
