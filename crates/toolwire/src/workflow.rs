//! The interactive query workflow.

use std::io::Write;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use toolwire_core::AgentBuilder;
use toolwire_core::conversation::Conversation;
use toolwire_core::tool::Tool;
use toolwire_mcp::{ClientSession, Connector, SessionHandle};
use toolwire_model::ModelProvider;
use tracing::Instrument;

use crate::Error;
use crate::tools::load_mcp_tools;

/// Query answered when the user enters nothing.
pub const DEFAULT_QUERY: &str = "Get me weather alerts and forecast for NYC";

/// Instructions given to the model before every query.
pub const SYSTEM_PROMPT: &str = include_str!("system_prompt.md");

const BAR_CHAR: &str = "▎";

/// One question answered by a model using the tools of an MCP server.
pub struct Workflow<P> {
    provider: P,
    endpoint: String,
    system_prompt: String,
    show_progress: bool,
}

impl<P: ModelProvider + 'static> Workflow<P> {
    /// Creates a workflow that answers with `provider`, using the tools
    /// served at `endpoint`.
    pub fn new<S: Into<String>>(provider: P, endpoint: S) -> Self {
        Self {
            provider,
            endpoint: endpoint.into(),
            system_prompt: SYSTEM_PROMPT.trim_end().to_owned(),
            show_progress: true,
        }
    }

    /// Replaces the default weather assistant prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Hides the spinner shown while the agent runs.
    #[inline]
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Connects `handle`, reads one query from `input`, answers it and
    /// writes the transcript to `output`.
    ///
    /// Once connected, the handle is cleaned up before this returns,
    /// whether the run succeeded or not.
    pub async fn run<C, R, W>(
        self,
        handle: &mut SessionHandle<C>,
        input: R,
        output: &mut W,
    ) -> Result<Conversation, Error>
    where
        C: Connector<Session = ClientSession>,
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        handle.connect(&self.endpoint).await?;
        info!("connected to {}", self.endpoint);

        let result = match handle.session() {
            Some(session) => self.converse(session, input, output).await,
            None => Err(toolwire_mcp::Error::invalid_state()
                .with_reason("no session after connect")
                .into()),
        };
        handle.cleanup().await;
        result
    }

    async fn converse<R, W>(
        self,
        session: &ClientSession,
        input: R,
        output: &mut W,
    ) -> Result<Conversation, Error>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let tools = load_mcp_tools(session).await?;
        let names: Vec<_> = tools.iter().map(|tool| tool.name()).collect();
        writeln!(output, "Tool list : {names:?}")?;

        write!(output, "Query : ")?;
        output.flush()?;
        let query = read_query(input).await?;
        debug!("query: {query}");

        let agent = AgentBuilder::with_model_provider(self.provider)
            .with_system_prompt(self.system_prompt)
            .with_tools(tools)
            .build();

        let spinner = self.show_progress.then(thinking_spinner);
        let result = agent.invoke(query).instrument(info_span!("invoke")).await;
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        let conversation = result?;

        for item in conversation.items() {
            writeln!(output, "{item}")?;
        }
        let usage = conversation.usage();
        writeln!(
            output,
            "{} {}",
            BAR_CHAR.bright_cyan(),
            format!(
                "tokens: {} prompt, {} completion",
                usage.prompt_tokens, usage.completion_tokens
            )
            .dimmed()
        )?;
        Ok(conversation)
    }
}

/// Reads one line; an empty line or end of input selects
/// [`DEFAULT_QUERY`].
async fn read_query<R: AsyncBufRead + Unpin>(mut input: R) -> std::io::Result<String> {
    let mut line = String::new();
    input.read_line(&mut line).await?;
    let query = line.trim();
    if query.is_empty() {
        Ok(DEFAULT_QUERY.to_owned())
    } else {
        Ok(query.to_owned())
    }
}

fn thinking_spinner() -> ProgressBar {
    let style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(style);
    spinner.set_message("🤔 Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
