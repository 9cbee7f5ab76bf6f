//! Configuration schema definitions.
//!
//! A cluster is described by a single YAML document that names the cluster,
//! selects a node provider, carries the SSH auth material, and declares the
//! file mounts to synchronize onto the head node. The schema uses serde with
//! a tagged enum for provider selection.
//!
//! # Schema Overview
//!
//! ```text
//! ClusterConfig (root)
//! ├── cluster_name           - Display name, used in messages and errors
//! ├── ProviderConfig         - Tagged enum selecting the node provider
//! │   ├── External           - Shell-command backend fronting any cloud CLI
//! │   └── Manual             - Statically declared head/worker addresses
//! ├── AuthConfig             - SSH user and private key
//! └── file_mounts            - remote path -> local path, declaration order
//! ```

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Root configuration for one cluster.
///
/// Loaded once per command invocation and read-only thereafter.
///
/// # YAML Structure
///
/// ```yaml
/// cluster_name: dev
/// provider:
///   type: manual
///   head_ip: 203.0.113.7
///   worker_ips: [203.0.113.8]
/// auth:
///   ssh_user: ubuntu
///   ssh_private_key: ~/.ssh/id_rsa
/// file_mounts:
///   ~/app: ./app
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Name of the cluster, used for messages and error reporting.
    pub cluster_name: String,

    /// Node provider configuration determining how instances are listed
    /// and terminated.
    pub provider: ProviderConfig,

    /// SSH authentication material for reaching cluster nodes.
    pub auth: AuthConfig,

    /// Files and directories to synchronize onto the head node, keyed by
    /// remote destination path. Declaration order is preserved and is the
    /// order transfers happen in.
    #[serde(default)]
    pub file_mounts: IndexMap<String, String>,
}

/// SSH authentication material.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Remote user to connect as.
    pub ssh_user: String,

    /// Path to the private key. A leading `~` is expanded at session setup.
    pub ssh_private_key: PathBuf,
}

/// Provider configuration specifying how cluster nodes are managed.
///
/// This is a tagged enum selecting the backend based on the `type` field.
/// The tag doubles as the registry key: providers are resolved from it once
/// at startup.
///
/// | Type | Description |
/// |------|-------------|
/// | `external` | Shell commands front a cloud CLI (EC2, GCP, anything) |
/// | `manual` | Fixed head/worker addresses for bare-metal clusters |
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// List and terminate nodes through user-supplied shell commands.
    External(ExternalProviderConfig),

    /// A statically declared cluster with fixed addresses.
    Manual(ManualProviderConfig),
}

/// Configuration for the external shell-command provider.
///
/// The provider shells out for both operations, so any cloud CLI can be
/// wrapped in a short script. Command templates carry placeholders:
///
/// - **list_command**: `{filter}` is replaced with a quoted JSON object of
///   required tags. The command must print a JSON array of nodes:
///   `[{"id": "i-abc", "tags": {"ray:NodeType": "Head"}, "ip": "1.2.3.4"}]`.
///   Terminated instances must not be included.
/// - **terminate_command**: `{node_id}` is replaced with the quoted id.
///
/// # Example
///
/// ```yaml
/// provider:
///   type: external
///   list_command: "./scripts/ec2-nodes.sh list {filter}"
///   terminate_command: "./scripts/ec2-nodes.sh terminate {node_id}"
///   timeout_secs: 120
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExternalProviderConfig {
    /// Command template printing the node inventory as JSON.
    pub list_command: String,

    /// Command template requesting termination of one node.
    pub terminate_command: String,

    /// Working directory for provider commands.
    pub working_dir: Option<PathBuf>,

    /// Timeout for a single provider command, in seconds.
    ///
    /// Default: 300
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    300
}

/// Configuration for a statically declared cluster.
///
/// For bare-metal or hand-provisioned machines with known addresses.
/// Termination is not supported: the machines are not ours to deprovision.
///
/// # Example
///
/// ```yaml
/// provider:
///   type: manual
///   head_ip: 203.0.113.7
///   worker_ips:
///     - 203.0.113.8
///     - 203.0.113.9
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManualProviderConfig {
    /// Address of the head node.
    pub head_ip: String,

    /// Addresses of the worker nodes.
    #[serde(default)]
    pub worker_ips: Vec<String>,
}
