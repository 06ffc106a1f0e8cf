mod builder;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::time::Duration;

use backoff::ExponentialBackoff;
use toolwire_model::{
    ModelMessage, ModelProviderError, ModelRequest, ToolCallRequest,
    ToolCallResult,
};
use tracing::Instrument;

use crate::conversation::Conversation;
use crate::model_client::{ModelClient, ModelClientResponse, TranscriptFn};
use crate::tool::Executor as ToolExecutor;
pub use builder::{AgentBuilder, DEFAULT_MAX_STEPS};

/// Errors that end an agent run.
#[derive(Debug)]
pub enum Error {
    /// The model provider failed and retrying did not help.
    Model(Box<dyn ModelProviderError>),
    /// The model kept asking for tools after this many turns.
    StepLimitExceeded(usize),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Model(err) => write!(f, "model error ({}): {err}", err.kind()),
            Error::StepLimitExceeded(steps) => {
                write!(f, "no final answer after {steps} model turns")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Model(err) => Some(err.as_ref()),
            Error::StepLimitExceeded(_) => None,
        }
    }
}

/// A ReAct-style agent: the model is called in a loop, and every tool it
/// asks for is executed and fed back, until it answers without tool
/// calls.
pub struct Agent {
    model_client: ModelClient,
    tool_executor: ToolExecutor,
    system_prompt: Option<String>,
    max_steps: usize,
    backoff: ExponentialBackoff,
    on_transcript: Option<TranscriptFn>,
}

impl Agent {
    fn from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            model_client,
            tools,
            system_prompt,
            max_steps,
            backoff,
            on_transcript,
        } = builder;

        Self {
            model_client,
            tool_executor: ToolExecutor::with_tools(tools),
            system_prompt,
            max_steps,
            backoff,
            on_transcript,
        }
    }

    /// Answers `input`, returning the whole conversation.
    ///
    /// Tool failures never end the run, they are reported back to the
    /// model as the tool result.
    pub async fn invoke<S: Into<String>>(
        &self,
        input: S,
    ) -> Result<Conversation, Error> {
        let mut conversation = Conversation::default();
        if let Some(system_prompt) = &self.system_prompt {
            conversation.push(ModelMessage::System(system_prompt.clone()));
        }
        conversation.push(ModelMessage::User(input.into()));
        let tools = self.tool_executor.definitions();

        for step in 1..=self.max_steps {
            let request = ModelRequest {
                messages: conversation.messages(),
                tools: tools.clone(),
            };
            let resp = self
                .send_with_retry(request)
                .instrument(debug_span!("model turn", step))
                .await?;
            conversation.usage.accumulate(resp.usage);

            let tool_calls = resp.tool_calls.clone();
            conversation.push(ModelMessage::Assistant {
                content: resp.content,
                tool_calls: resp.tool_calls,
            });
            if tool_calls.is_empty() {
                debug!("got a final answer after {step} turns");
                return Ok(conversation);
            }

            for result in self.run_tools(tool_calls).await {
                conversation.push(ModelMessage::Tool(result));
            }
        }

        warn!("step limit of {} reached", self.max_steps);
        Err(Error::StepLimitExceeded(self.max_steps))
    }

    async fn send_with_retry(
        &self,
        request: ModelRequest,
    ) -> Result<ModelClientResponse, Error> {
        let operation = || {
            let model_client = self.model_client.clone();
            let request = request.clone();
            let on_transcript = self.on_transcript.clone();
            async move {
                model_client
                    .send_request(request, on_transcript)
                    .await
                    .map_err(|err| {
                        if err.kind().is_transient() {
                            backoff::Error::transient(err)
                        } else {
                            backoff::Error::permanent(err)
                        }
                    })
            }
        };
        let notify = |err: Box<dyn ModelProviderError>, after: Duration| {
            warn!("model request failed ({err}), retrying in {after:?}");
        };
        backoff::future::retry_notify(self.backoff.clone(), operation, notify)
            .await
            .map_err(Error::Model)
    }

    /// Runs the requested tools concurrently. Results keep the order of
    /// the requests.
    async fn run_tools(
        &self,
        requests: Vec<ToolCallRequest>,
    ) -> Vec<ToolCallResult> {
        let mut tasks = Vec::with_capacity(requests.len());
        self.tool_executor.handle_requests(requests, |req, fut| {
            let span = debug_span!("tool", name = %req.name, id = %req.id);
            tasks.push((req, tokio::spawn(fut.instrument(span))));
        });

        let mut results = Vec::with_capacity(tasks.len());
        for (req, task) in tasks {
            let content = match task.await {
                Ok(Ok(output)) => output,
                Ok(Err(err)) => {
                    warn!("tool {} failed: {err}", req.name);
                    format!("Error: {}", err.reason())
                }
                Err(err) => {
                    error!("tool {} panicked: {err}", req.name);
                    format!("Error: tool {} did not complete", req.name)
                }
            };
            results.push(ToolCallResult {
                id: req.id,
                name: req.name,
                content,
            });
        }
        results
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("system_prompt", &self.system_prompt)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}
