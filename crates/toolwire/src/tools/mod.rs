//! Tools offered to the agent.

mod mcp;

pub use mcp::{McpTool, load_mcp_tools};
