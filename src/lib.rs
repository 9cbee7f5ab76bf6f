//! ray2: control-plane utility for provisioned compute clusters.
//!
//! Given a declarative cluster description, this crate locates the
//! cluster's head node, keeps the node's on-disk configuration in step with
//! what was declared, synchronizes files to it, and executes commands on it
//! over SSH.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Provider**: gateway to the backend owning the instances (list by
//!   tag, terminate by id)
//! - **Head resolution**: the exactly-one-head policy
//! - **Fingerprint**: stable digest of the declared runtime config, used
//!   to skip redundant synchronization
//! - **Updater**: the per-invocation SSH session (file sync, remote
//!   commands, quoting)
//! - **Commands**: the user-facing workflows composing the above
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ray2::config::load_config(Path::new("cluster.yaml"))?;
//!     let provider = ray2::provider::for_config(&config);
//!     let head = ray2::head::resolve_head(provider.as_ref(), &config.cluster_name).await?;
//!     println!("head node: {}", head.id);
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod fingerprint;
pub mod head;
pub mod provider;
pub mod updater;

// Re-export commonly used types
pub use config::{ClusterConfig, load_config};
pub use fingerprint::{RuntimeFingerprint, fingerprint};
pub use head::{HeadError, resolve_head};
pub use provider::{NodeProvider, NodeRecord};
pub use updater::{NodeUpdater, RemoteOutput, SyncOutcome, UpdaterError};
