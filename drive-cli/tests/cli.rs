//! End-to-end checks of the clusterdrive binary that need no hosts or cluster.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn clusterdrive(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("clusterdrive").unwrap();
    cmd.current_dir(dir.path()).env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    clusterdrive(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("service"))
        .stdout(predicate::str::contains("await-process"))
        .stdout(predicate::str::contains("wait-nodes"))
        .stdout(predicate::str::contains("wait-pods"));
}

#[test]
fn unknown_action_fails_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    clusterdrive(&dir)
        .args([
            "service",
            "--host",
            "10.255.255.1",
            "--product",
            "k3s",
            "--node-type",
            "server",
            "--action",
            "reload",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported service action 'reload'"));
}

#[test]
fn unknown_node_type_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    clusterdrive(&dir)
        .args([
            "service", "--host", "10.255.255.1", "--product", "rke2", "--node-type", "worker",
            "--action", "stop",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported node type 'worker'"));
}

#[test]
fn unknown_product_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    clusterdrive(&dir)
        .args([
            "service", "--host", "10.255.255.1", "--product", "microk8s", "--node-type",
            "server", "--action", "rotate",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no service unit registered"));
}

#[test]
fn missing_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    clusterdrive(&dir)
        .args(["--config", "absent.toml", "exec", "--host", "10.0.0.1", "uptime"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn malformed_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = std::fs::File::create(dir.path().join("clusterdrive.toml")).unwrap();
    writeln!(file, "[retry]\nattempts = \"many\"").unwrap();

    clusterdrive(&dir)
        .args(["exec", "--host", "10.0.0.1", "uptime"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse config file"));
}

#[test]
fn exec_requires_a_key() {
    let dir = tempfile::tempdir().unwrap();
    clusterdrive(&dir)
        .args(["--user", "ubuntu", "exec", "--host", "10.0.0.1", "uptime"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No SSH key configured"));
}

#[test]
fn topology_needs_both_counts() {
    let dir = tempfile::tempdir().unwrap();
    clusterdrive(&dir)
        .args(["wait-pods", "--servers", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--agents"));
}
