//! Run a shell command on one or more hosts.

use super::Remote;
use crate::config::Config;
use anyhow::Result;
use clusterdrive_remote::{with_retry, RemoteError};
use futures_util::future::join_all;

/// Run the exec command.
pub async fn run(config: &Config, hosts: &[String], command: &str, retry: bool) -> Result<()> {
    let remote = Remote::connect(config)?;
    let hosts = hosts
        .iter()
        .map(|h| remote.host(h))
        .collect::<Result<Vec<_>>>()?;

    let results = if retry {
        let policy = config.retry.to_retry_config();
        let policy = &policy;
        let runner = remote.runner.as_ref();
        join_all(hosts.iter().map(|host| async move {
            let result = with_retry(policy, move || runner.run(command, host))
                .await
                .map_err(RemoteError::from);
            (host.clone(), result)
        }))
        .await
    } else {
        remote.runner.run_on_all(command, &hosts).await
    };
    remote.shutdown().await;

    let mut failed = 0;
    for (host, result) in &results {
        match result {
            Ok(output) => {
                println!("[{}]", host);
                if !output.is_empty() {
                    println!("{}", output);
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("[{}] error: {}", host, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} hosts failed", failed, results.len());
    }
    Ok(())
}
