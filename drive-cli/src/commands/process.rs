//! Wait for matching processes on a node to exit.

use super::Remote;
use crate::config::Config;
use anyhow::{Context, Result};
use clusterdrive_remote::ProcessWatcher;
use std::time::Duration;

/// Run the await-process command.
pub async fn run(
    config: &Config,
    host: &str,
    pattern: &str,
    attempts: u32,
    delay_secs: u64,
) -> Result<()> {
    let remote = Remote::connect(config)?;
    let host = remote.host(host)?;
    let watcher = ProcessWatcher::new(remote.runner.clone());

    let result = watcher
        .await_completion(&host, pattern, attempts, Duration::from_secs(delay_secs))
        .await;
    remote.shutdown().await;
    result.with_context(|| format!("Processes matching {:?} on {} did not exit", pattern, host))?;

    println!("No processes matching {:?} remain on {}", pattern, host);
    Ok(())
}
