use std::collections::HashMap;
use std::future::ready;
use std::pin::Pin;

use toolwire_model::{ModelTool, ToolCallRequest};

use crate::tool::{Error, ToolObject, ToolResult};

/// An executor that handles tool call requests from the model.
pub struct Executor {
    // Registration order, so the model sees tools in a stable order.
    names: Vec<String>,
    tools: HashMap<String, Box<dyn ToolObject>>,
}

impl Executor {
    pub fn with_tools(tools: Vec<Box<dyn ToolObject>>) -> Self {
        let mut names = Vec::with_capacity(tools.len());
        let mut tool_map = HashMap::with_capacity(tools.len());
        for tool in tools {
            let name = tool.name().to_owned();
            if tool_map.insert(name.clone(), tool).is_some() {
                warn!("tool {name} registered twice, keeping the last one");
            } else {
                names.push(name);
            }
        }
        Self {
            names,
            tools: tool_map,
        }
    }

    pub fn definitions(&self) -> Vec<ModelTool> {
        self.names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Starts every requested tool call through `spawner`.
    ///
    /// Requests for unknown tools are still handed to `spawner`, with a
    /// future that resolves to a [`NotFound`](crate::tool::ErrorKind::NotFound)
    /// error, so every request gets a result.
    pub fn handle_requests<S>(&self, requests: Vec<ToolCallRequest>, spawner: S)
    where
        S: FnMut(ToolCallRequest, Pin<Box<dyn Future<Output = ToolResult> + Send>>),
    {
        let mut spawner = spawner;

        let span = debug_span!("tool executor");
        let _enter = span.enter();
        for req in requests {
            let Some(tool) = self.tools.get(&req.name) else {
                warn!("tool not found: {}", req.name);
                let err = Error::not_found()
                    .with_reason(format!("no tool named {}", req.name));
                spawner(req, Box::pin(ready(Err(err))));
                continue;
            };
            trace!("spawning a tool ({}) with args: {:?}", req.id, req.arguments);
            let fut = tool.execute(req.arguments.clone());
            spawner(req, fut);
        }
    }
}
