//! Process-wide cache of remote agent identifiers.
//!
//! Creating an agent on the run service is slow and leaves a remote object
//! behind, so each `(model, name)` pair is registered at most once per
//! process. The registry is constructed at startup and handed to every stage
//! that needs it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use super::client::RunClient;
use super::types::{AgentDefinition, RunFailure};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AgentKey {
    model: String,
    name: String,
}

/// Populate-once map from `(model, name)` to remote agent id.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    cells: Mutex<HashMap<AgentKey, Arc<OnceCell<String>>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the remote id for `definition`, creating the agent on first use.
    ///
    /// Concurrent callers for the same key wait on a single creation. A failed
    /// creation leaves the key empty so a later call can retry.
    pub async fn get_or_create(
        &self,
        client: &dyn RunClient,
        definition: &AgentDefinition,
    ) -> Result<String, RunFailure> {
        let cell = self.cell_for(definition);
        let id = cell
            .get_or_try_init(|| async {
                tracing::info!(
                    agent = %definition.name,
                    model = %definition.model,
                    "Creating remote agent"
                );
                client.create_agent(definition).await
            })
            .await?;
        Ok(id.clone())
    }

    /// Number of agents registered so far.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell_for(&self, definition: &AgentDefinition) -> Arc<OnceCell<String>> {
        let key = AgentKey {
            model: definition.model.clone(),
            name: definition.name.clone(),
        };
        Arc::clone(self.lock().entry(key).or_default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AgentKey, Arc<OnceCell<String>>>> {
        // A poisoned map only means another task panicked mid-insert; the
        // cells themselves are still consistent.
        self.cells
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunClient;

    #[tokio::test]
    async fn creates_each_agent_once() {
        let client = ScriptedRunClient::new();
        let registry = AgentRegistry::new();
        let writer = AgentDefinition::new("writer", "gpt-4o-mini", "write");

        let first = registry.get_or_create(&client, &writer).await.unwrap();
        let second = registry.get_or_create(&client, &writer).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.created_agents(), vec!["writer".to_string()]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn model_is_part_of_the_key() {
        let client = ScriptedRunClient::new();
        let registry = AgentRegistry::new();

        registry
            .get_or_create(&client, &AgentDefinition::new("writer", "model-a", "write"))
            .await
            .unwrap();
        registry
            .get_or_create(&client, &AgentDefinition::new("writer", "model-b", "write"))
            .await
            .unwrap();

        assert_eq!(client.created_agents().len(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_creation() {
        let client = Arc::new(ScriptedRunClient::new());
        let registry = Arc::new(AgentRegistry::new());
        let definition = AgentDefinition::new("planner", "gpt-4o-mini", "plan");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = Arc::clone(&client);
                let registry = Arc::clone(&registry);
                let definition = definition.clone();
                tokio::spawn(async move {
                    registry
                        .get_or_create(client.as_ref(), &definition)
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "agent-planner");
        }
        assert_eq!(client.created_agents().len(), 1);
    }
}
