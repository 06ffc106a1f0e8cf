use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::io;

use toolwire_core::AgentError;

use crate::config::ConfigError;

/// Errors that end a workflow run.
#[derive(Debug)]
pub enum Error {
    /// The settings are incomplete.
    Config(ConfigError),
    /// The tool server could not be reached or misbehaved.
    Mcp(toolwire_mcp::Error),
    /// The agent gave up.
    Agent(AgentError),
    /// Reading the query or writing the transcript failed.
    Io(io::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(err) => write!(f, "configuration error: {err}"),
            Error::Mcp(err) => write!(f, "MCP error: {err}"),
            Error::Agent(err) => write!(f, "agent error: {err}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Config(err) => Some(err),
            Error::Mcp(err) => Some(err),
            Error::Agent(err) => Some(err),
            Error::Io(err) => Some(err),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<toolwire_mcp::Error> for Error {
    fn from(err: toolwire_mcp::Error) -> Self {
        Error::Mcp(err)
    }
}

impl From<AgentError> for Error {
    fn from(err: AgentError) -> Self {
        Error::Agent(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
