//! A weather assistant that answers questions with the tools of a remote
//! MCP server.
//!
//! The [`Workflow`] connects a [`SessionHandle`](toolwire_mcp::SessionHandle)
//! to the server, offers every remote tool to the agent, and prints the
//! resulting conversation.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod config;
mod error;
pub mod telemetry;
pub mod tools;
pub mod workflow;

pub use error::Error;
pub use workflow::Workflow;

/// Re-exports of [`toolwire_core`], for implementing more tools.
pub mod core {
    pub use toolwire_core::*;
}
