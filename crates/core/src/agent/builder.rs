use std::sync::Arc;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use toolwire_model::ModelProvider;

use super::Agent;
use crate::model_client::{ModelClient, TranscriptFn};
use crate::tool::{AnyTool, Tool, ToolObject};

/// Model turns allowed per [`Agent::invoke`] unless configured otherwise.
pub const DEFAULT_MAX_STEPS: usize = 25;

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(crate) model_client: ModelClient,
    pub(crate) tools: Vec<Box<dyn ToolObject>>,
    pub(crate) system_prompt: Option<String>,
    pub(crate) max_steps: usize,
    pub(crate) backoff: ExponentialBackoff,
    pub(crate) on_transcript: Option<TranscriptFn>,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            tools: vec![],
            system_prompt: None,
            max_steps: DEFAULT_MAX_STEPS,
            backoff: ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_secs(1))
                .with_max_elapsed_time(Some(Duration::from_secs(60)))
                .build(),
            on_transcript: None,
        }
    }

    /// Sets the system prompt that starts every conversation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.push(Box::new(AnyTool(tool)));
        self
    }

    /// Registers several tools of the same type.
    #[inline]
    pub fn with_tools<T: Tool>(self, tools: impl IntoIterator<Item = T>) -> Self {
        tools.into_iter().fold(self, Self::with_tool)
    }

    /// Limits how many times the model is called for one input.
    #[inline]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets how rate-limited model requests are retried.
    #[inline]
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Attaches a callback receiving message deltas as they stream in.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        self.on_transcript = Some(Arc::new(on_transcript));
        self
    }

    /// Builds the agent.
    #[inline]
    pub fn build(self) -> Agent {
        Agent::from_builder(self)
    }
}
