//! Core logic including the agent loop, tool execution and the
//! conversation transcript.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod model_client;
pub mod tool;

pub use agent::{Agent, AgentBuilder, DEFAULT_MAX_STEPS, Error as AgentError};
