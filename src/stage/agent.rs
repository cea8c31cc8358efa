//! Model-backed stage: one remote run per invocation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use super::{SchemaKind, Stage, StageError, StageOutput};
use crate::pipeline::PipelineContext;
use crate::run::{AgentDefinition, AgentRegistry, RunController};
use crate::tools::ToolRegistry;

/// Shared machinery every model-backed stage runs through.
#[derive(Debug)]
pub struct AgentRuntime {
    controller: RunController,
    agents: Arc<AgentRegistry>,
}

impl AgentRuntime {
    pub fn new(controller: RunController, agents: Arc<AgentRegistry>) -> Self {
        Self { controller, agents }
    }

    pub fn controller(&self) -> &RunController {
        &self.controller
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }
}

/// Builds the message a stage submits from the pipeline state so far.
pub type PromptBuilder = dyn Fn(&PipelineContext) -> Result<String, StageError> + Send + Sync;

/// Stage that submits a message to a remote agent and returns its reply.
#[derive(Clone)]
pub struct AgentStage {
    name: String,
    schema: SchemaKind,
    definition: AgentDefinition,
    prompt: Arc<PromptBuilder>,
    tools: ToolRegistry,
    runtime: Arc<AgentRuntime>,
}

impl std::fmt::Debug for AgentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStage")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("agent", &self.definition.name)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl AgentStage {
    pub fn new<F>(
        name: impl Into<String>,
        schema: SchemaKind,
        definition: AgentDefinition,
        runtime: Arc<AgentRuntime>,
        prompt: F,
    ) -> Self
    where
        F: Fn(&PipelineContext) -> Result<String, StageError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            schema,
            definition,
            prompt: Arc::new(prompt),
            tools: ToolRegistry::new(),
            runtime,
        }
    }

    /// Tool handlers served during this stage's runs.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    fn failed(&self, source: crate::run::RunFailure) -> StageError {
        StageError::Run {
            stage: self.name.clone(),
            source,
        }
    }
}

#[async_trait]
impl Stage for AgentStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> SchemaKind {
        self.schema
    }

    #[instrument(skip(self, ctx), fields(stage = %self.name, agent = %self.definition.name))]
    async fn invoke(&self, ctx: &PipelineContext) -> Result<StageOutput, StageError> {
        let message = (self.prompt)(ctx)?;
        let client = self.runtime.controller.client();
        let agent_id = self
            .runtime
            .agents
            .get_or_create(client.as_ref(), &self.definition)
            .await
            .map_err(|e| self.failed(e))?;
        let text = self
            .runtime
            .controller
            .run(ctx.session_id(), &agent_id, &message, &self.tools)
            .await
            .map_err(|e| self.failed(e))?;
        Ok(StageOutput::Text(text))
    }
}
