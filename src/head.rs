//! Head node resolution.

use crate::provider::{NODE_TYPE_HEAD, NodeProvider, NodeRecord, ProviderError, node_type_filter};

/// Errors from head resolution.
#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    #[error("Head node of cluster ({cluster}) not found!")]
    NotFound { cluster: String },

    #[error(
        "Cluster ({cluster}) has {count} nodes tagged as head; expected exactly one. \
         This usually means provisioning launched a duplicate head."
    )]
    Ambiguous { cluster: String, count: usize },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Resolve the cluster's single head node.
///
/// Zero heads is fatal for every workflow that needs one. More than one is
/// treated as a provisioning fault rather than silently picking a winner.
pub async fn resolve_head(
    provider: &dyn NodeProvider,
    cluster_name: &str,
) -> Result<NodeRecord, HeadError> {
    let mut heads = provider
        .list_nodes(&node_type_filter(NODE_TYPE_HEAD))
        .await?;

    match heads.len() {
        0 => Err(HeadError::NotFound {
            cluster: cluster_name.to_string(),
        }),
        1 => Ok(heads.remove(0)),
        count => Err(HeadError::Ambiguous {
            cluster: cluster_name.to_string(),
            count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use crate::provider::{NODE_TYPE_WORKER, TAG_NODE_TYPE};
    use std::collections::HashMap;

    fn node(id: &str, node_type: &str) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            tags: HashMap::from([(TAG_NODE_TYPE.to_string(), node_type.to_string())]),
            public_ip: Some("10.0.0.1".to_string()),
        }
    }

    #[tokio::test]
    async fn no_head_is_not_found() {
        let provider = MockProvider::new(vec![node("w0", NODE_TYPE_WORKER)]);
        let err = resolve_head(&provider, "dev").await.unwrap_err();
        match err {
            HeadError::NotFound { cluster } => assert_eq!(cluster, "dev"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn single_head_resolves() {
        let provider = MockProvider::new(vec![
            node("w0", NODE_TYPE_WORKER),
            node("h", NODE_TYPE_HEAD),
        ]);
        let head = resolve_head(&provider, "dev").await.unwrap();
        assert_eq!(head.id, "h");
    }

    #[tokio::test]
    async fn duplicate_heads_are_ambiguous() {
        let provider = MockProvider::new(vec![
            node("h1", NODE_TYPE_HEAD),
            node("h2", NODE_TYPE_HEAD),
        ]);
        let err = resolve_head(&provider, "dev").await.unwrap_err();
        match err {
            HeadError::Ambiguous { cluster, count } => {
                assert_eq!(cluster, "dev");
                assert_eq!(count, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
