// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `rndc` invocation and the subprocess seam shared with `nsupdate`.
//!
//! Every external command goes through [`CommandRunner`] so that tests can
//! substitute a recording fake for the real BIND9 tools.

use crate::constants::RNDC_EXECUTABLE;
use crate::dns_errors::{CommandError, DnsError, ZoneWriteError};
use crate::metrics;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs an external program to completion.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, feeding `stdin` if given.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the process cannot be spawned, exceeds its
    /// deadline, or exits with a non-zero status.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError>;
}

/// [`CommandRunner`] backed by `tokio::process`.
///
/// The child is killed if the deadline expires or the calling future is dropped.
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, CommandError> {
        let spawn_failed = |e: std::io::Error| CommandError::SpawnFailed {
            program: program.to_string(),
            reason: e.to_string(),
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_failed)?;

        let input = stdin.map(str::to_owned);
        let pipe = child.stdin.take();
        let completion = async move {
            if let (Some(input), Some(mut pipe)) = (input, pipe) {
                pipe.write_all(input.as_bytes()).await?;
                // Closing stdin signals end of input
                drop(pipe);
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, completion)
            .await
            .map_err(|_| CommandError::Timeout {
                program: program.to_string(),
                args: args.join(" "),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(spawn_failed)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(CommandError::NonZeroExit {
                program: program.to_string(),
                args: args.join(" "),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }
}

/// `rndc -c <conf>` client.
#[derive(Clone)]
pub struct Rndc {
    runner: Arc<dyn CommandRunner>,
    conf_path: PathBuf,
}

impl Rndc {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, conf_path: PathBuf) -> Self {
        Self { runner, conf_path }
    }

    /// Run one rndc sub-command and return its standard output.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] on spawn failure, timeout or non-zero exit.
    pub async fn command(&self, args: &[&str]) -> Result<String, CommandError> {
        let mut full_args = vec!["-c".to_string(), self.conf_path.display().to_string()];
        full_args.extend(args.iter().map(ToString::to_string));

        debug!(args = %full_args.join(" "), "Running rndc");
        let result = self.runner.run(RNDC_EXECUTABLE, &full_args, None).await;
        metrics::record_rndc_command(args.first().copied().unwrap_or_default(), result.is_ok());
        result.map(|output| output.stdout)
    }

    /// Suspend dynamic updates and flush journals to the master files.
    ///
    /// # Errors
    ///
    /// See [`Rndc::command`].
    pub async fn freeze(&self) -> Result<(), CommandError> {
        self.command(&["freeze"]).await.map(drop)
    }

    /// Reload frozen zones from disk and resume dynamic updates.
    ///
    /// # Errors
    ///
    /// See [`Rndc::command`].
    pub async fn thaw(&self) -> Result<(), CommandError> {
        self.command(&["thaw"]).await.map(drop)
    }

    /// Re-read named.conf so new zones are loaded.
    ///
    /// # Errors
    ///
    /// See [`Rndc::command`].
    pub async fn reconfig(&self) -> Result<(), CommandError> {
        self.command(&["reconfig"]).await.map(drop)
    }

    /// Write dynamic zone changes back to their master files.
    ///
    /// # Errors
    ///
    /// See [`Rndc::command`].
    pub async fn sync(&self) -> Result<(), CommandError> {
        self.command(&["sync"]).await.map(drop)
    }

    /// Run `work` between `rndc freeze` and `rndc thaw`.
    ///
    /// Once the freeze succeeds, thaw is always issued, whatever `work`
    /// returns. The sequence runs on its own task, so dropping the returned
    /// future does not leave the nameserver frozen.
    ///
    /// # Errors
    ///
    /// Returns the freeze failure, the error from `work`, or the thaw
    /// failure, in that order of precedence.
    pub async fn frozen<F, Fut, T>(&self, work: F) -> Result<T, DnsError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DnsError>> + Send + 'static,
        T: Send + 'static,
    {
        let rndc = self.clone();
        let handle = tokio::spawn(async move {
            rndc.freeze().await?;
            let outcome = work().await;
            let thawed = rndc.thaw().await;
            match (outcome, thawed) {
                (Ok(value), Ok(())) => Ok(value),
                (Ok(_), Err(e)) => Err(DnsError::from(e)),
                (Err(e), Ok(())) => Err(e),
                (Err(e), Err(thaw_error)) => {
                    warn!(error = %thaw_error, "rndc thaw failed after an aborted zone write");
                    Err(e)
                }
            }
        });

        handle.await.map_err(|e| ZoneWriteError::TaskAborted {
            reason: e.to_string(),
        })?
    }
}

#[cfg(test)]
#[path = "rndc_tests.rs"]
mod rndc_tests;
