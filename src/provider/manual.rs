//! Statically declared cluster provider.
//!
//! For bare-metal or hand-provisioned machines: the node inventory comes
//! straight from the config, with the head and workers at fixed addresses.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{
    NODE_TYPE_HEAD, NODE_TYPE_WORKER, NodeProvider, NodeRecord, ProviderError, ProviderResult,
    TAG_NODE_TYPE,
};
use crate::config::ManualProviderConfig;

pub struct ManualProvider {
    config: ManualProviderConfig,
}

impl ManualProvider {
    pub fn new(config: ManualProviderConfig) -> Self {
        Self { config }
    }

    fn inventory(&self) -> Vec<NodeRecord> {
        let mut nodes = vec![NodeRecord {
            id: "head".to_string(),
            tags: HashMap::from([(TAG_NODE_TYPE.to_string(), NODE_TYPE_HEAD.to_string())]),
            public_ip: Some(self.config.head_ip.clone()),
        }];

        for (index, ip) in self.config.worker_ips.iter().enumerate() {
            nodes.push(NodeRecord {
                id: format!("worker-{}", index),
                tags: HashMap::from([(TAG_NODE_TYPE.to_string(), NODE_TYPE_WORKER.to_string())]),
                public_ip: Some(ip.clone()),
            });
        }

        nodes
    }
}

#[async_trait]
impl NodeProvider for ManualProvider {
    async fn list_nodes(
        &self,
        filter: &HashMap<String, String>,
    ) -> ProviderResult<Vec<NodeRecord>> {
        Ok(self
            .inventory()
            .into_iter()
            .filter(|node| node.matches(filter))
            .collect())
    }

    async fn terminate_node(&self, id: &str) -> ProviderResult<()> {
        Err(ProviderError::Unsupported(format!(
            "manual provider cannot terminate node {}; deprovision the machine directly",
            id
        )))
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::node_type_filter;

    fn provider() -> ManualProvider {
        ManualProvider::new(ManualProviderConfig {
            head_ip: "10.0.0.1".to_string(),
            worker_ips: vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()],
        })
    }

    #[tokio::test]
    async fn lists_declared_nodes() {
        let provider = provider();

        let all = provider.list_nodes(&HashMap::new()).await.unwrap();
        assert_eq!(all.len(), 3);

        let heads = provider
            .list_nodes(&node_type_filter(NODE_TYPE_HEAD))
            .await
            .unwrap();
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].public_ip.as_deref(), Some("10.0.0.1"));

        let workers = provider
            .list_nodes(&node_type_filter(NODE_TYPE_WORKER))
            .await
            .unwrap();
        assert_eq!(workers.len(), 2);
    }

    #[tokio::test]
    async fn terminate_is_unsupported() {
        let err = provider().terminate_node("worker-0").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
    }
}
