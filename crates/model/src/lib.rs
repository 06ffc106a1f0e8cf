//! Provider-agnostic types shared by the agent and the model backends.
//!
//! The agent only talks to models through the [`ModelProvider`] trait, so
//! a backend can be swapped (a chat-completions API, a plain text
//! generation service, a scripted fake in tests) without touching the
//! agent loop.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
