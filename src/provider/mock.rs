//! In-memory provider for tests.
//!
//! Holds a fixed node inventory and records termination requests in order.
//! Terminated nodes drop out of subsequent listings, matching the gateway
//! contract that dead instances are never reported.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{NodeProvider, NodeRecord, ProviderError, ProviderResult};

#[derive(Default)]
struct MockState {
    nodes: Vec<NodeRecord>,
    terminated: Vec<String>,
}

/// Scripted provider used by unit and workflow tests.
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
    /// When set, every termination request fails with this message.
    fail_terminations: Option<String>,
}

impl MockProvider {
    pub fn new(nodes: Vec<NodeRecord>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                nodes,
                terminated: Vec::new(),
            })),
            fail_terminations: None,
        }
    }

    /// Make every termination request fail, for teardown best-effort tests.
    pub fn failing_terminations(mut self, message: &str) -> Self {
        self.fail_terminations = Some(message.to_string());
        self
    }

    /// Ids passed to `terminate_node`, in call order.
    pub async fn terminated(&self) -> Vec<String> {
        self.state.lock().await.terminated.clone()
    }
}

#[async_trait]
impl NodeProvider for MockProvider {
    async fn list_nodes(
        &self,
        filter: &HashMap<String, String>,
    ) -> ProviderResult<Vec<NodeRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .iter()
            .filter(|node| !state.terminated.contains(&node.id))
            .filter(|node| node.matches(filter))
            .cloned()
            .collect())
    }

    async fn terminate_node(&self, id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().await;
        state.terminated.push(id.to_string());
        match &self.fail_terminations {
            Some(message) => Err(ProviderError::CommandFailed(message.clone())),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
