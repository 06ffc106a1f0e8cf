use serde_json::Value;
use toolwire_core::tool::{Error as ToolError, Tool, ToolResult};
use toolwire_mcp::{ClientSession, Error as McpError, Peer};

/// A tool served by an MCP server.
///
/// Calls are forwarded over the session the tool was loaded from; once
/// that session is closed every call fails with an execution error.
#[derive(Clone, Debug)]
pub struct McpTool {
    peer: Peer,
    name: String,
    description: String,
    schema: Value,
}

impl McpTool {
    /// Wraps a tool advertised through `peer`.
    pub fn new(peer: Peer, tool: toolwire_mcp::Tool) -> Self {
        Self {
            peer,
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            schema: tool.input_schema,
        }
    }
}

impl Tool for McpTool {
    type Input = Value;

    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn description(&self) -> &str {
        &self.description
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let peer = self.peer.clone();
        let name = self.name.clone();
        async move {
            let arguments = match input {
                Value::Null => None,
                input => Some(input),
            };
            match peer.call_tool(&name, arguments).await {
                Ok(result) if result.is_error => {
                    Err(ToolError::execution_error().with_reason(result.text()))
                }
                Ok(result) => Ok(result.text()),
                Err(err) => {
                    Err(ToolError::execution_error().with_reason(err.to_string()))
                }
            }
        }
    }
}

/// Lists the tools of the server behind `session`.
pub async fn load_mcp_tools(
    session: &ClientSession,
) -> Result<Vec<McpTool>, McpError> {
    let peer = session.peer();
    let tools = peer.list_tools().await?;
    debug!("server offers {} tools", tools.len());
    Ok(tools
        .into_iter()
        .map(|tool| McpTool::new(peer.clone(), tool))
        .collect())
}
