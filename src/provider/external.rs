//! External shell-command provider.
//!
//! Lists and terminates nodes through user-supplied shell commands, so any
//! cloud CLI can be wrapped in a short script without this tool linking a
//! vendor SDK.
//!
//! # Protocol
//!
//! ## Listing
//! ```bash
//! list_command {filter}
//! ```
//! `{filter}` is replaced with a quoted JSON object of required tags, e.g.
//! `'{"ray:NodeType":"Head"}'`. Output: a JSON array on stdout:
//! ```json
//! [{"id": "i-0abc", "tags": {"ray:NodeType": "Head"}, "ip": "1.2.3.4"}]
//! ```
//! Terminated instances must not be listed.
//!
//! ## Termination
//! ```bash
//! terminate_command {node_id}
//! ```
//! A zero exit status means the request was accepted; the backend may
//! finish asynchronously.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{NodeProvider, NodeRecord, ProviderError, ProviderResult};
use crate::config::ExternalProviderConfig;

/// One node as reported on the wire by the list command.
#[derive(Debug, Deserialize)]
struct WireNode {
    id: String,
    #[serde(default)]
    tags: HashMap<String, String>,
    ip: Option<String>,
}

impl From<WireNode> for NodeRecord {
    fn from(node: WireNode) -> Self {
        NodeRecord {
            id: node.id,
            tags: node.tags,
            public_ip: node.ip,
        }
    }
}

/// Provider that shells out for both gateway operations.
pub struct ExternalProvider {
    config: ExternalProviderConfig,
}

impl ExternalProvider {
    pub fn new(config: ExternalProviderConfig) -> Self {
        Self { config }
    }

    /// Run one substituted command template to completion.
    async fn run(&self, command: &str) -> ProviderResult<std::process::Output> {
        let parts = shell_words::split(command)
            .map_err(|e| ProviderError::CommandFailed(format!("Bad command template: {}", e)))?;
        if parts.is_empty() {
            return Err(ProviderError::CommandFailed(
                "Empty command template".to_string(),
            ));
        }

        debug!("Running provider command: {:?}", parts);

        let mut cmd = tokio::process::Command::new(&parts[0]);
        cmd.args(&parts[1..]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let output = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| {
            ProviderError::Timeout(format!(
                "Provider command did not finish within {}s",
                self.config.timeout_secs
            ))
        })?
        .map_err(|e| ProviderError::CommandFailed(format!("Failed to spawn: {}", e)))?;

        if !output.status.success() {
            return Err(ProviderError::CommandFailed(format!(
                "{:?} exited with {}: {}",
                parts[0],
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl NodeProvider for ExternalProvider {
    async fn list_nodes(
        &self,
        filter: &HashMap<String, String>,
    ) -> ProviderResult<Vec<NodeRecord>> {
        let filter_json = serde_json::to_string(filter)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let command = self
            .config
            .list_command
            .replace("{filter}", &shell_words::quote(&filter_json));

        let output = self.run(&command).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        let nodes: Vec<WireNode> = serde_json::from_str(stdout.trim()).map_err(|e| {
            ProviderError::InvalidResponse(format!("list command did not print a node array: {}", e))
        })?;

        // The command may ignore the filter and dump everything; filter
        // again locally so callers can rely on the contract.
        Ok(nodes
            .into_iter()
            .map(NodeRecord::from)
            .filter(|node| node.matches(filter))
            .collect())
    }

    async fn terminate_node(&self, id: &str) -> ProviderResult<()> {
        let command = self
            .config
            .terminate_command
            .replace("{node_id}", &shell_words::quote(id));

        self.run(&command).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "external"
    }
}
