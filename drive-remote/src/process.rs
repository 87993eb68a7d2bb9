//! Waiting for processes on a node to exit.
//!
//! The set of ids is fixed by one snapshot at the start. Later polls only
//! ask whether those ids are still alive, so work started after the
//! snapshot never extends the wait.

use crate::error::{RemoteError, Result};
use crate::retry::with_retry;
use crate::runner::CommandRunner;
use crate::transport::CommandOutput;
use clusterdrive_core::{snapshot_command, ProcessSnapshot, RetryConfig, PGREP_NO_MATCH};
use std::sync::Arc;
use std::time::Duration;

/// Polls snapshotted processes until they exit.
#[derive(Debug, Clone)]
pub struct ProcessWatcher {
    runner: Arc<CommandRunner>,
}

impl ProcessWatcher {
    /// Create a watcher over `runner`.
    pub fn new(runner: Arc<CommandRunner>) -> Self {
        Self { runner }
    }

    /// Snapshot processes on `host` matching `pattern` and wait until all of
    /// them have exited.
    ///
    /// Returns at once when nothing matches. Otherwise polls up to
    /// `attempts` times, `delay` apart, failing with
    /// [`RemoteError::StillRunning`] (wrapped in the retry error) if any
    /// captured process outlives the polls.
    pub async fn await_completion(
        &self,
        host: &str,
        pattern: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<()> {
        let query = snapshot_command(pattern)?;
        let output = self.runner.exec(&query, host).await?;
        let snapshot = match output.exit_status {
            Some(0) => ProcessSnapshot::parse(&output.stdout),
            Some(PGREP_NO_MATCH) => ProcessSnapshot::default(),
            _ => return Err(failed(query, host, output)),
        };

        if snapshot.is_empty() {
            tracing::debug!("No processes matching {:?} on {}", pattern, host);
            return Ok(());
        }
        tracing::info!(
            "Waiting for {} processes matching {:?} on {}",
            snapshot.pids().len(),
            pattern,
            host
        );

        let runner: &CommandRunner = &self.runner;
        let snapshot = &snapshot;
        let liveness = snapshot.liveness_command();
        let liveness = liveness.as_str();
        let config = RetryConfig::fixed(attempts, delay);

        with_retry(&config, move || async move {
            let output = runner.exec(liveness, host).await?;
            let alive = match output.exit_status {
                Some(0) => snapshot.still_alive(&output.stdout),
                // ps exits 1 when none of the ids exist any more
                Some(1) => Vec::new(),
                _ => return Err(failed(liveness.to_string(), host, output)),
            };
            if alive.is_empty() {
                Ok(())
            } else {
                Err(RemoteError::StillRunning {
                    host: host.to_string(),
                    pids: alive,
                })
            }
        })
        .await
        .map_err(RemoteError::from)
    }
}

fn failed(command: String, host: &str, output: CommandOutput) -> RemoteError {
    RemoteError::CommandFailed {
        command,
        host: host.to_string(),
        exit_status: output.exit_status,
        stderr: output.stderr,
    }
}
