//! Integration tests driving the ray2 binary.
//!
//! Everything here sticks to workflows that need no cluster: config
//! validation and head resolution against a `manual` provider, which is
//! fully determined by the YAML.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_cluster_yaml(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("cluster.yaml");
    std::fs::write(
        &path,
        r#"
cluster_name: dev
provider:
  type: manual
  head_ip: 203.0.113.7
  worker_ips:
    - 203.0.113.8
auth:
  ssh_user: ubuntu
  ssh_private_key: /keys/cluster
"#,
    )
    .unwrap();
    path
}

#[test]
fn help_lists_the_workflows() {
    Command::cargo_bin("ray2")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("execute"))
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("login"))
        .stdout(predicate::str::contains("shutdown"));
}

#[test]
fn validate_accepts_a_manual_cluster() {
    let dir = TempDir::new().unwrap();
    let config = write_cluster_yaml(&dir);

    Command::cargo_bin("ray2")
        .unwrap()
        .arg("validate")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("manual"));
}

#[test]
fn validate_rejects_malformed_yaml() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("cluster.yaml");
    std::fs::write(&config, "cluster_name: [unclosed").unwrap();

    Command::cargo_bin("ray2")
        .unwrap()
        .arg("validate")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse"));
}

#[test]
fn login_prints_only_the_ssh_invocation() {
    let dir = TempDir::new().unwrap();
    let config = write_cluster_yaml(&dir);

    Command::cargo_bin("ray2")
        .unwrap()
        .arg("login")
        .arg(&config)
        .assert()
        .success()
        .stdout("ssh -i /keys/cluster ubuntu@203.0.113.7\n");
}

#[test]
fn shutdown_fails_without_a_bootstrap_config() {
    Command::cargo_bin("ray2")
        .unwrap()
        .arg("shutdown")
        .arg("--config")
        .arg("/nonexistent/bootstrap.yaml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn execute_requires_a_command() {
    let dir = TempDir::new().unwrap();
    let config = write_cluster_yaml(&dir);

    Command::cargo_bin("ray2")
        .unwrap()
        .arg("execute")
        .arg(&config)
        .assert()
        .failure();
}
