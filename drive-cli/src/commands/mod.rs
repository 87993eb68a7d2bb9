//! CLI command implementations.

pub mod exec;
pub mod process;
pub mod readiness;
pub mod service;

use crate::config::Config;
use anyhow::{Context, Result};
use clusterdrive_core::HostAddr;
use clusterdrive_remote::{CommandRunner, ConnectionPool, SshCredentials, SshDialer};
use std::sync::Arc;
use std::time::Duration;

/// Pooled SSH access built from the `[ssh]` section.
pub struct Remote {
    pub runner: Arc<CommandRunner>,
    default_port: u16,
}

impl Remote {
    /// Build a runner over a fresh pool.
    pub fn connect(config: &Config) -> Result<Self> {
        let key_path = config
            .ssh
            .key_path
            .clone()
            .context("No SSH key configured (set ssh.key_path or pass --key)")?;
        let dialer = SshDialer::new(SshCredentials::new(config.ssh.user.clone(), key_path))
            .with_connect_timeout(Duration::from_secs(config.ssh.connect_timeout_secs));
        let pool = Arc::new(ConnectionPool::new(Arc::new(dialer)));
        Ok(Self {
            runner: Arc::new(CommandRunner::new(pool)),
            default_port: config.ssh.port,
        })
    }

    /// Normalize `raw` to `host:port`, applying the configured port.
    pub fn host(&self, raw: &str) -> Result<String> {
        let addr = HostAddr::parse_with_default_port(raw, self.default_port)?;
        Ok(addr.to_string())
    }

    /// Close every pooled connection.
    pub async fn shutdown(&self) {
        self.runner.pool().close_all().await;
    }
}
