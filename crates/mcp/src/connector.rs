use reqwest::Client;

use crate::error::Error;
use crate::proto::Implementation;
use crate::session::{ClientSession, Session};
use crate::transport::{SseTransport, Transport};

/// Opens transports and negotiates sessions on them.
///
/// [`SessionHandle`] drives the two steps and owns their results, so a
/// connector never has to release anything itself.
///
/// [`SessionHandle`]: crate::SessionHandle
pub trait Connector: Send + Sync {
    /// The transport this connector opens.
    type Transport: Transport;
    /// The session this connector negotiates.
    type Session: Session;

    /// Opens a transport to `endpoint`.
    fn open(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<Self::Transport, Error>> + Send;

    /// Negotiates a session over an open transport.
    fn negotiate(
        &self,
        transport: &mut Self::Transport,
    ) -> impl Future<Output = Result<Self::Session, Error>> + Send;
}

/// Client identification sent during the handshake.
#[derive(Clone, Debug)]
pub struct SseConnectorConfig {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

impl Default for SseConnectorConfig {
    fn default() -> Self {
        Self {
            name: "toolwire".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// Connects to MCP servers over the "HTTP with SSE" transport.
#[derive(Clone, Debug, Default)]
pub struct SseConnector {
    client: Client,
    config: SseConnectorConfig,
}

impl SseConnector {
    /// Creates a connector that identifies itself with `config`.
    #[inline]
    pub fn new(config: SseConnectorConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Uses the given HTTP client for both the stream and posted messages.
    #[inline]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

impl Connector for SseConnector {
    type Transport = SseTransport;
    type Session = ClientSession;

    fn open(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<Self::Transport, Error>> + Send {
        SseTransport::open(self.client.clone(), endpoint)
    }

    fn negotiate(
        &self,
        transport: &mut Self::Transport,
    ) -> impl Future<Output = Result<Self::Session, Error>> + Send {
        let streams = transport.take_streams();
        let client_info = Implementation {
            name: self.config.name.clone(),
            version: self.config.version.clone(),
        };
        async move {
            let streams = streams.ok_or_else(|| {
                Error::handshake().with_reason("transport already in use")
            })?;
            ClientSession::negotiate(streams, client_info).await
        }
    }
}
