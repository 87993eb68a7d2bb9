//! Apply a service action to one node.

use super::Remote;
use crate::config::Config;
use anyhow::{Context, Result};
use clusterdrive_core::{ServiceAction, ServiceCommand};
use clusterdrive_remote::ServiceExecutor;
use std::time::Duration;

/// Run the service command.
pub async fn run(
    config: &Config,
    host: &str,
    product: &str,
    node_type: &str,
    action: &str,
    delay_secs: u64,
) -> Result<()> {
    // Reject bad input before opening any connection.
    let action = ServiceAction::parse(product, action, node_type)?
        .with_delay(Duration::from_secs(delay_secs));
    let units = config.unit_table();
    ServiceCommand::plan(&action, &units)?;

    let remote = Remote::connect(config)?;
    let host = remote.host(host)?;
    let executor = ServiceExecutor::new(remote.runner.clone())
        .with_units(units)
        .with_retry_policy(
            config.service.attempts,
            Duration::from_secs(config.service.delay_secs),
        );

    let result = executor.execute(&action, &host).await;
    remote.shutdown().await;
    let output = result.with_context(|| format!("{} {} on {} failed", action.action, product, host))?;

    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
