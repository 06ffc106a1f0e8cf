//! Incremental `text/event-stream` decoding over HTTP response bodies.
//!
//! Both the chat-completions provider and the MCP transport read
//! server-sent events, so the decoder lives in its own crate.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod chunks;
mod event;

pub use chunks::{Chunks, ChunksError};
pub use event::{Error, Sse, SseEvent};
