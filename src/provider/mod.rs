//! Node provider traits and implementations.
//!
//! A provider is the gateway to whatever backend owns the cluster's
//! instances. The core only ever needs two operations from it: list the
//! nodes matching a tag filter, and request termination of one node. The
//! trait keeps the orchestration layer polymorphic over backends; concrete
//! implementations live in the submodules.

pub mod external;
pub mod manual;
pub mod mock;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::{ClusterConfig, ProviderConfig};

/// Tag carrying a node's role within the cluster.
pub const TAG_NODE_TYPE: &str = "ray:NodeType";

/// Node-type tag value for the head node.
pub const NODE_TYPE_HEAD: &str = "Head";

/// Node-type tag value for worker nodes.
pub const NODE_TYPE_WORKER: &str = "Worker";

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider command failed: {0}")]
    CommandFailed(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Provider timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A provider-reported cluster instance.
///
/// Records are produced by the provider and only ever read by the core.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    /// Opaque provider-assigned instance id.
    pub id: String,

    /// Instance tags; at minimum the node-type tag.
    pub tags: HashMap<String, String>,

    /// Public address, when the backend knows one.
    pub public_ip: Option<String>,
}

impl NodeRecord {
    /// Whether this node's tags are a superset of `filter`.
    ///
    /// An empty filter matches every node.
    pub fn matches(&self, filter: &HashMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.tags.get(key) == Some(value))
    }
}

/// Build the tag filter selecting nodes of one type.
pub fn node_type_filter(node_type: &str) -> HashMap<String, String> {
    HashMap::from([(TAG_NODE_TYPE.to_string(), node_type.to_string())])
}

/// Gateway to the backend that owns the cluster's instances.
///
/// Implementations hold no state between calls and perform no retries;
/// every error propagates to the caller, which decides whether it is fatal.
#[async_trait]
pub trait NodeProvider: Send + Sync {
    /// List all live nodes whose tags are a superset of `filter`.
    ///
    /// An empty filter matches every node in the cluster's namespace.
    /// Terminated instances are never included.
    async fn list_nodes(
        &self,
        filter: &HashMap<String, String>,
    ) -> ProviderResult<Vec<NodeRecord>>;

    /// Request termination of one node.
    ///
    /// Fire-and-forget: asynchronous backends may return before the
    /// instance is fully gone, and the core does not poll for completion.
    async fn terminate_node(&self, id: &str) -> ProviderResult<()>;

    /// Provider name (for logging and messages).
    fn name(&self) -> &'static str;
}

/// Resolve the configured provider.
///
/// The serde tag on [`ProviderConfig`] is the registry key; resolution
/// happens once at startup and the orchestration layer only ever sees the
/// trait object.
pub fn for_config(config: &ClusterConfig) -> Box<dyn NodeProvider> {
    match &config.provider {
        ProviderConfig::External(cfg) => Box::new(external::ExternalProvider::new(cfg.clone())),
        ProviderConfig::Manual(cfg) => Box::new(manual::ManualProvider::new(cfg.clone())),
    }
}
