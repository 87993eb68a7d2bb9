//! Wait for nodes or pods to become ready.

use crate::config::Config;
use anyhow::{Context, Result};
use clusterdrive_cluster::{
    await_nodes_ready, await_pods_ready, ReadinessReport, ReadinessRequest,
};
use clusterdrive_core::CniRule;
use std::time::Duration;

/// Topology used for the CNI operator exception.
#[derive(Debug, Clone, Copy)]
pub struct Topology {
    pub servers: usize,
    pub agents: usize,
}

fn request(config: &Config, min_ready: usize, timeout_secs: Option<u64>) -> ReadinessRequest {
    let timeout = timeout_secs.unwrap_or(config.readiness.timeout_secs);
    ReadinessRequest::new(min_ready, Duration::from_secs(timeout))
        .with_poll_interval(Duration::from_secs(config.readiness.poll_interval_secs))
}

async fn client() -> Result<kube::Client> {
    kube::Client::try_default()
        .await
        .context("Failed to create cluster client (check KUBECONFIG)")
}

/// Run the wait-nodes command.
pub async fn nodes(
    config: &Config,
    min_ready: usize,
    selector: Option<String>,
    timeout_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    let request = request(config, min_ready, timeout_secs);
    let report = await_nodes_ready(client().await?, selector, &request)
        .await
        .context("Nodes did not become ready")?;
    print_report("nodes", &report, json)
}

/// Run the wait-pods command.
pub async fn pods(
    config: &Config,
    namespace: Option<&str>,
    selector: Option<String>,
    min_ready: usize,
    topology: Option<Topology>,
    timeout_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    let mut request = request(config, min_ready, timeout_secs);
    if let Some(topology) = topology {
        request = request.with_cni_rule(CniRule {
            pod_prefix: config.readiness.cni_operator_prefix.clone(),
            servers: topology.servers,
            agents: topology.agents,
        });
    }

    let report = await_pods_ready(client().await?, namespace, selector, &request)
        .await
        .context("Pods did not become ready")?;
    print_report("pods", &report, json)
}

fn print_report(kind: &str, report: &ReadinessReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!(
            "{}/{} {} ready (target {}) after {:.1}s",
            report.summary.ready,
            report.summary.total,
            kind,
            report.summary.target,
            report.elapsed.as_secs_f64()
        );
    }
    Ok(())
}
