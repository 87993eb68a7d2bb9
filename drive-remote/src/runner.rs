//! Command runner: one command over a pooled connection.
//!
//! Success means exit status 0, whatever the command wrote to stderr.
//! Callers that want informational stderr ask for it with [`Capture`]
//! instead of having failures reinterpreted. No retries happen here.

use crate::error::{RemoteError, Result};
use crate::pool::ConnectionPool;
use crate::transport::CommandOutput;
use clusterdrive_core::HostAddr;
use futures_util::future::join_all;
use std::sync::Arc;

/// Which stream a successful command returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Capture {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error, for tools that report on it.
    Stderr,
    /// Standard output followed by standard error.
    Combined,
}

/// A shell command plus the stream its result is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    /// Shell text, run as-is.
    pub command: String,
    /// Stream returned on success.
    pub capture: Capture,
}

impl RemoteCommand {
    /// A command returning its stdout.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            capture: Capture::Stdout,
        }
    }

    /// Builder: choose the returned stream.
    pub fn capture(mut self, capture: Capture) -> Self {
        self.capture = capture;
        self
    }
}

impl From<&str> for RemoteCommand {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

/// Runs commands over connections from a [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct CommandRunner {
    pool: Arc<ConnectionPool>,
}

impl CommandRunner {
    /// Create a runner over `pool`.
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run `command` on `host` and return the raw output without judging
    /// the exit status.
    pub async fn exec(&self, command: &str, host: &str) -> Result<CommandOutput> {
        let addr: HostAddr = host.parse()?;
        let conn = self.pool.acquire(&addr).await?;
        tracing::debug!("[{}] $ {}", addr, command);
        let output = conn.exec(command).await?;
        tracing::debug!("[{}] exit status {:?}", addr, output.exit_status);
        Ok(output)
    }

    /// Run `command` on `host`; return trimmed stdout on exit 0.
    pub async fn run(&self, command: &str, host: &str) -> Result<String> {
        self.run_command(&RemoteCommand::new(command), host).await
    }

    /// Run `command` on `host`; return its chosen stream on exit 0.
    ///
    /// Any other exit yields [`RemoteError::CommandFailed`] with the command,
    /// host, exit status and stderr.
    pub async fn run_command(&self, command: &RemoteCommand, host: &str) -> Result<String> {
        let output = self.exec(&command.command, host).await?;
        if !output.success() {
            return Err(RemoteError::CommandFailed {
                command: command.command.clone(),
                host: host.to_string(),
                exit_status: output.exit_status,
                stderr: output.stderr,
            });
        }

        Ok(match command.capture {
            Capture::Stdout => output.stdout.trim().to_string(),
            Capture::Stderr => output.stderr.trim().to_string(),
            Capture::Combined => {
                let stdout = output.stdout.trim();
                let stderr = output.stderr.trim();
                match (stdout.is_empty(), stderr.is_empty()) {
                    (_, true) => stdout.to_string(),
                    (true, false) => stderr.to_string(),
                    (false, false) => format!("{}\n{}", stdout, stderr),
                }
            }
        })
    }

    /// Run `command` on every host concurrently.
    ///
    /// Results come back in the order of `hosts`; execution order across
    /// hosts is unspecified.
    pub async fn run_on_all(&self, command: &str, hosts: &[String]) -> Vec<(String, Result<String>)> {
        let runs = hosts.iter().map(|host| async move {
            let result = self.run(command, host).await;
            (host.clone(), result)
        });
        join_all(runs).await
    }
}
