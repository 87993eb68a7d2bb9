//! # clusterdrive
//!
//! Drive and validate k3s/rke2 test clusters.
//!
//! ## Commands
//!
//! - `exec`: Run a shell command on one or more hosts
//! - `service`: Stop, start, restart, check, enable a node's unit, or rotate certificates
//! - `await-process`: Wait for matching processes on a node to exit
//! - `wait-nodes`: Wait until enough cluster nodes are ready
//! - `wait-pods`: Wait until enough pods are ready
//!
//! ## Example
//!
//! ```bash
//! # Restart the agent unit on a worker
//! clusterdrive service --host 10.0.0.12 --product k3s --node-type agent --action restart
//!
//! # Wait for the uninstall script to finish
//! clusterdrive await-process --host 10.0.0.12 --pattern k3s-uninstall.sh
//!
//! # Wait for 3 ready nodes, JSON report
//! clusterdrive --json wait-nodes --min-ready 3
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

use commands::{exec, process, readiness, service};
use config::Config;

/// Drive and validate k3s/rke2 test clusters.
#[derive(Parser, Debug)]
#[command(name = "clusterdrive")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./clusterdrive.toml if present)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// SSH user, overriding ssh.user
    #[arg(long, global = true)]
    user: Option<String>,

    /// SSH private key, overriding ssh.key_path
    #[arg(long, global = true)]
    key: Option<PathBuf>,

    /// Print readiness reports as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a shell command on one or more hosts
    Exec {
        /// Target host (host or host:port); repeat for several
        #[arg(long = "host", required = true)]
        hosts: Vec<String>,

        /// Retry each host with the [retry] policy
        #[arg(long)]
        retry: bool,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Apply a service action to a node
    Service {
        /// Target host
        #[arg(long)]
        host: String,

        /// Product whose unit is managed (k3s, rke2)
        #[arg(long)]
        product: String,

        /// Node role (server, agent)
        #[arg(long)]
        node_type: String,

        /// stop, start, restart, status, enable or rotate
        #[arg(long)]
        action: String,

        /// Seconds to wait before issuing the command
        #[arg(long, default_value = "0")]
        delay_secs: u64,
    },

    /// Wait for processes matching a pattern to exit
    AwaitProcess {
        /// Target host
        #[arg(long)]
        host: String,

        /// Pattern matched against full command lines
        #[arg(long)]
        pattern: String,

        /// Liveness checks before giving up
        #[arg(long, default_value = "30")]
        attempts: u32,

        /// Seconds between checks
        #[arg(long, default_value = "5")]
        delay_secs: u64,
    },

    /// Wait until enough nodes are ready
    WaitNodes {
        /// Ready nodes required (0 = all)
        #[arg(long, default_value = "0")]
        min_ready: usize,

        /// Label selector
        #[arg(long, short = 'l')]
        selector: Option<String>,

        /// Seconds before giving up (default: readiness.timeout_secs)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Wait until enough pods are ready
    WaitPods {
        /// Namespace (default: all namespaces)
        #[arg(long, short)]
        namespace: Option<String>,

        /// Label selector
        #[arg(long, short = 'l')]
        selector: Option<String>,

        /// Ready pods required (0 = all)
        #[arg(long, default_value = "0")]
        min_ready: usize,

        /// Server nodes in the cluster, for the CNI operator exception
        #[arg(long, requires = "agents")]
        servers: Option<usize>,

        /// Agent nodes in the cluster, for the CNI operator exception
        #[arg(long, requires = "servers")]
        agents: Option<usize>,

        /// Seconds before giving up (default: readiness.timeout_secs)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

/// Install the tracing subscriber. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(user) = cli.user {
        config.ssh.user = user;
    }
    if let Some(key) = cli.key {
        config.ssh.key_path = Some(key);
    }
    tracing::debug!("Configuration: {:?}", config);

    match cli.command {
        Commands::Exec {
            hosts,
            retry,
            command,
        } => {
            exec::run(&config, &hosts, &command.join(" "), retry).await?;
        }
        Commands::Service {
            host,
            product,
            node_type,
            action,
            delay_secs,
        } => {
            service::run(&config, &host, &product, &node_type, &action, delay_secs).await?;
        }
        Commands::AwaitProcess {
            host,
            pattern,
            attempts,
            delay_secs,
        } => {
            process::run(&config, &host, &pattern, attempts, delay_secs).await?;
        }
        Commands::WaitNodes {
            min_ready,
            selector,
            timeout_secs,
        } => {
            readiness::nodes(&config, min_ready, selector, timeout_secs, cli.json).await?;
        }
        Commands::WaitPods {
            namespace,
            selector,
            min_ready,
            servers,
            agents,
            timeout_secs,
        } => {
            let topology = servers
                .zip(agents)
                .map(|(servers, agents)| readiness::Topology { servers, agents });
            readiness::pods(
                &config,
                namespace.as_deref(),
                selector,
                min_ready,
                topology,
                timeout_secs,
                cli.json,
            )
            .await?;
        }
    }

    Ok(())
}
