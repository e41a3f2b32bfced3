//! Type-safe git command builder.
//!
//! Every git invocation goes through [`GitCommand`], which gives consistent
//! logging under the `git` target, timeouts, and mapping of failures onto
//! [`FlakeError`] variants.
//!
//! ```rust,no_run
//! use flakelock::git::command_builder::GitCommand;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let head = GitCommand::rev_parse_commit("HEAD")
//!     .current_dir("/path/to/repo")
//!     .execute_stdout()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::constants::{GIT_CLONE_TIMEOUT, GIT_EXPORT_TIMEOUT, GIT_FETCH_TIMEOUT};
use crate::core::FlakeError;
use crate::utils::platform::get_git_command;

/// Builder for a single git invocation.
pub struct GitCommand {
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    env_vars: Vec<(String, String)>,
    timeout_duration: Option<Duration>,
    context: Option<String>,
    /// URL being cloned, reported in [`FlakeError::GitCloneFailed`]
    clone_url: Option<String>,
}

impl Default for GitCommand {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            current_dir: None,
            // Never prompt for credentials; a prompt would hang until the timeout
            env_vars: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
            timeout_duration: Some(Duration::from_secs(300)),
            context: None,
            clone_url: None,
        }
    }
}

impl GitCommand {
    /// Create an empty command.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the command in `dir` (passed to git as `-C dir`).
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Override the timeout; `None` waits forever.
    pub const fn with_timeout(mut self, duration: Option<Duration>) -> Self {
        self.timeout_duration = duration;
        self
    }

    /// Label used in log lines, e.g. the repository being fetched.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn full_args(&self) -> Vec<String> {
        let mut full_args = Vec::new();
        if let Some(ref dir) = self.current_dir {
            full_args.push("-C".to_string());
            full_args.push(dir.display().to_string());
        }
        full_args.extend(self.args.iter().cloned());
        full_args
    }

    fn operation(&self) -> String {
        self.args.first().cloned().unwrap_or_else(|| "unknown".to_string())
    }

    /// Run the command and capture its output.
    pub async fn execute(self) -> Result<GitCommandOutput> {
        let start = std::time::Instant::now();
        let git_command = get_git_command();
        let full_args = self.full_args();

        let mut cmd = Command::new(git_command);
        cmd.args(&full_args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        match &self.context {
            Some(ctx) => tracing::debug!(
                target: "git",
                "({}) Executing command: {} {}",
                ctx,
                git_command,
                full_args.join(" ")
            ),
            None => tracing::debug!(
                target: "git",
                "Executing command: {} {}",
                git_command,
                full_args.join(" ")
            ),
        }

        let output_future = cmd.output();
        let output = if let Some(duration) = self.timeout_duration {
            if let Ok(result) = timeout(duration, output_future).await {
                result.with_context(|| format!("Failed to execute git {}", full_args.join(" ")))?
            } else {
                tracing::warn!(
                    target: "git",
                    "Command timed out after {} seconds: git {}",
                    duration.as_secs(),
                    full_args.join(" ")
                );
                return Err(FlakeError::GitCommandError {
                    operation: self.operation(),
                    stderr: format!(
                        "timed out after {}s; run `git {}` by hand to see where it stalls",
                        duration.as_secs(),
                        full_args.join(" ")
                    ),
                }
                .into());
            }
        } else {
            output_future
                .await
                .with_context(|| format!("Failed to execute git {}", full_args.join(" ")))?
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::debug!(
                target: "git",
                "Command failed with exit code: {:?}",
                output.status.code()
            );
            if !stderr.is_empty() {
                tracing::debug!(target: "git", "Error: {}", stderr.trim());
            }

            let error = if self.args.first().is_some_and(|arg| arg == "clone") {
                FlakeError::GitCloneFailed {
                    url: self.clone_url.unwrap_or_else(|| "unknown".to_string()),
                    reason: stderr,
                }
            } else {
                FlakeError::GitCommandError {
                    operation: self.operation(),
                    stderr: if stderr.is_empty() {
                        stdout
                    } else {
                        stderr
                    },
                }
            };
            return Err(error.into());
        }

        tracing::trace!(target: "git", "git {} finished in {:?}", self.operation(), start.elapsed());

        Ok(GitCommandOutput {
            stdout,
            stderr,
        })
    }

    /// Run the command and return its trimmed stdout.
    pub async fn execute_stdout(self) -> Result<String> {
        let output = self.execute().await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Run the command, discarding its output.
    pub async fn execute_success(self) -> Result<()> {
        self.execute().await?;
        Ok(())
    }
}

/// Captured output of a successful git command.
pub struct GitCommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl GitCommand {
    /// `git clone --bare <url> <target>` with the clone timeout.
    pub fn clone_bare(url: &str, target: impl AsRef<Path>) -> Self {
        let mut cmd = Self::new()
            .args(["clone", "--bare", "--quiet"])
            .arg(url)
            .arg(target.as_ref().display().to_string())
            .with_timeout(Some(GIT_CLONE_TIMEOUT));
        cmd.clone_url = Some(url.to_string());
        cmd
    }

    /// Fetch all branches and tags of `url` into a bare mirror.
    pub fn fetch_mirror(url: &str) -> Self {
        Self::new()
            .args(["fetch", "--quiet", "--prune", "--force"])
            .arg(url)
            .args(["+refs/heads/*:refs/heads/*", "+refs/tags/*:refs/tags/*"])
            .with_timeout(Some(GIT_FETCH_TIMEOUT))
    }

    /// Resolve a ref or revision to the full hash of the commit it names.
    pub fn rev_parse_commit(rev: &str) -> Self {
        Self::new().args(["rev-parse", "--verify", "--quiet"]).arg(format!("{rev}^{{commit}}"))
    }

    /// Succeeds only if `rev` names a commit present in the repository.
    pub fn commit_exists(rev: &str) -> Self {
        Self::new().args(["cat-file", "-e"]).arg(format!("{rev}^{{commit}}"))
    }

    /// Count the commits reachable from `rev`.
    pub fn rev_list_count(rev: &str) -> Self {
        Self::new().args(["rev-list", "--count", rev])
    }

    /// Write the tree of `rev` as an uncompressed tarball to `output`.
    pub fn archive(rev: &str, output: impl AsRef<Path>) -> Self {
        Self::new()
            .args(["archive", "--format=tar", "-o"])
            .arg(output.as_ref().display().to_string())
            .arg(rev)
            .with_timeout(Some(GIT_EXPORT_TIMEOUT))
    }
}
