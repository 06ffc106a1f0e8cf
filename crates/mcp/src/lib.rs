//! A Model Context Protocol client for remote tool servers.
//!
//! [`SessionHandle`] is the entry point: it opens a transport to a server,
//! negotiates a session on it and releases both in reverse order. The
//! default [`SseConnector`] speaks the "HTTP with SSE" transport, other
//! [`Connector`]s can be plugged in to reach servers differently.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod connector;
mod error;
mod handle;
pub mod proto;
mod session;
mod transport;

pub use connector::{Connector, SseConnector, SseConnectorConfig};
pub use error::{Error, ErrorKind};
pub use handle::{HandleStatus, SessionHandle};
pub use proto::{CallToolResult, Content, Tool};
pub use session::{ClientSession, Peer, Session};
pub use transport::{MessageStreams, SseTransport, Transport};
