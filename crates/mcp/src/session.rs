//! The logical MCP session negotiated on top of a transport.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, ErrorKind};
use crate::proto::{
    CallToolParams, CallToolResult, Implementation, InitializeParams,
    InitializeResult, JsonRpcMessage, LATEST_PROTOCOL_VERSION,
    ListToolsParams, ListToolsResult, RequestId, SUPPORTED_PROTOCOL_VERSIONS,
    Tool, error_code,
};
use crate::transport::MessageStreams;

/// A negotiated session owned by a [`SessionHandle`].
///
/// [`SessionHandle`]: crate::SessionHandle
pub trait Session: Send {
    /// Ends the session. Must be called before the transport is closed.
    fn close(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
}

type PendingMap = HashMap<RequestId, oneshot::Sender<Result<Value, Error>>>;

#[derive(Debug)]
struct PeerInner {
    outbound: mpsc::UnboundedSender<JsonRpcMessage>,
    // `None` once the session is closed.
    pending: Mutex<Option<PendingMap>>,
    next_id: AtomicI64,
}

/// A cloneable sender of requests to the server.
///
/// Clones stay usable until the session closes, after which every call
/// fails with [`ErrorKind::Closed`].
#[derive(Clone, Debug)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    fn new(outbound: mpsc::UnboundedSender<JsonRpcMessage>) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                outbound,
                pending: Mutex::new(Some(HashMap::new())),
                next_id: AtomicI64::new(0),
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingMap>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends a request and waits for its result.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, Error> {
        let id =
            RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        match self.pending().as_mut() {
            Some(pending) => {
                pending.insert(id.clone(), tx);
            }
            None => return Err(Error::closed()),
        }
        let _entry = PendingEntry {
            peer: self,
            id: id.clone(),
        };

        trace!("sending request {id}: {method}");
        let msg = JsonRpcMessage::request(id, method, params);
        if self.inner.outbound.send(msg).is_err() {
            return Err(Error::closed().with_reason("transport is gone"));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::closed()),
        }
    }

    /// Sends a notification.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::closed());
        }
        self.inner
            .outbound
            .send(JsonRpcMessage::notification(method, params))
            .map_err(|_| Error::closed().with_reason("transport is gone"))
    }

    /// Lists every tool the server offers, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, Error> {
        let mut tools = vec![];
        let mut cursor = None;
        let mut seen = HashSet::new();
        loop {
            let params = to_params(&ListToolsParams { cursor })?;
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = from_result(result)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if seen.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    warn!("server repeated cursor {next:?}, stopping");
                    break;
                }
                None => break,
            }
        }
        Ok(tools)
    }

    /// Invokes a tool.
    ///
    /// A tool that ran but failed is reported through
    /// [`CallToolResult::is_error`], not as an `Err`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, Error> {
        let params = to_params(&CallToolParams {
            name: name.to_owned(),
            arguments,
        })?;
        let result = self.request("tools/call", params).await?;
        from_result(result)
    }

    /// Checks that the server is responsive.
    pub async fn ping(&self) -> Result<(), Error> {
        self.request("ping", None).await.map(|_| ())
    }

    /// Returns `true` once the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.pending().is_none()
    }

    fn complete(&self, id: &RequestId, result: Result<Value, Error>) {
        let tx = self.pending().as_mut().and_then(|p| p.remove(id));
        match tx {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!("got a response for unknown request {id}"),
        }
    }

    fn reply(&self, msg: JsonRpcMessage) {
        if self.inner.outbound.send(msg).is_err() {
            debug!("dropping reply, transport is gone");
        }
    }

    /// Fails all pending requests and rejects new ones.
    fn shutdown(&self) {
        let Some(pending) = self.pending().take() else {
            return;
        };
        for (_, tx) in pending {
            _ = tx.send(Err(Error::closed()));
        }
    }
}

/// Forgets a pending request when its caller stops waiting.
struct PendingEntry<'a> {
    peer: &'a Peer,
    id: RequestId,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if let Some(pending) = self.peer.pending().as_mut() {
            pending.remove(&self.id);
        }
    }
}

fn to_params<T: serde::Serialize>(params: &T) -> Result<Option<Value>, Error> {
    serde_json::to_value(params)
        .map(Some)
        .map_err(|err| Error::protocol().with_reason(format!("{err}")))
}

fn from_result<T: serde::de::DeserializeOwned>(
    result: Value,
) -> Result<T, Error> {
    serde_json::from_value(result).map_err(|err| {
        Error::protocol().with_reason(format!("malformed result: {err}"))
    })
}

/// An initialized MCP client session.
#[derive(Debug)]
pub struct ClientSession {
    peer: Peer,
    server: InitializeResult,
    dispatcher: Option<JoinHandle<()>>,
}

impl ClientSession {
    /// Runs the `initialize` handshake over `streams`.
    ///
    /// Every failure is reported as [`ErrorKind::Handshake`].
    pub async fn negotiate(
        streams: MessageStreams,
        client_info: Implementation,
    ) -> Result<Self, Error> {
        let MessageStreams { outbound, inbound } = streams;
        let peer = Peer::new(outbound);
        let dispatcher = tokio::spawn(dispatch(peer.clone(), inbound));

        match initialize(&peer, client_info).await {
            Ok(server) => {
                info!(
                    "initialized session with {} {} (protocol {})",
                    server.server_info.name,
                    server.server_info.version,
                    server.protocol_version
                );
                Ok(Self {
                    peer,
                    server,
                    dispatcher: Some(dispatcher),
                })
            }
            Err(err) => {
                peer.shutdown();
                dispatcher.abort();
                Err(err.into_kind(ErrorKind::Handshake))
            }
        }
    }

    /// Returns a peer for sending requests.
    #[inline]
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Returns what the server reported during the handshake.
    #[inline]
    pub fn server(&self) -> &InitializeResult {
        &self.server
    }
}

impl Session for ClientSession {
    async fn close(&mut self) -> Result<(), Error> {
        self.peer.shutdown();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
            if let Err(err) = dispatcher.await {
                if !err.is_cancelled() {
                    return Err(Error::closed()
                        .with_reason(format!("dispatcher failed: {err}")));
                }
            }
            debug!("closed session with {}", self.server.server_info.name);
        }
        Ok(())
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.peer.shutdown();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }
}

async fn initialize(
    peer: &Peer,
    client_info: Implementation,
) -> Result<InitializeResult, Error> {
    let params = to_params(&InitializeParams {
        protocol_version: LATEST_PROTOCOL_VERSION.to_owned(),
        capabilities: Value::Object(Default::default()),
        client_info,
    })?;
    let result = peer.request("initialize", params).await?;
    let result: InitializeResult = from_result(result)?;
    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
        return Err(Error::handshake().with_reason(format!(
            "unsupported protocol version {}",
            result.protocol_version
        )));
    }
    peer.notify("notifications/initialized", None)?;
    Ok(result)
}

async fn dispatch(
    peer: Peer,
    mut inbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
) {
    while let Some(msg) = inbound.recv().await {
        match msg {
            JsonRpcMessage::Response(resp) => {
                peer.complete(&resp.id, Ok(resp.result));
            }
            JsonRpcMessage::Error(err) => {
                let error = Error::rpc().with_reason(format!(
                    "{} ({})",
                    err.error.message, err.error.code
                ));
                peer.complete(&err.id, Err(error));
            }
            JsonRpcMessage::Request(req) => {
                let reply = if req.method == "ping" {
                    JsonRpcMessage::response(
                        req.id,
                        Value::Object(Default::default()),
                    )
                } else {
                    debug!("rejecting server request {}", req.method);
                    JsonRpcMessage::error(
                        req.id,
                        error_code::METHOD_NOT_FOUND,
                        "Method not found",
                    )
                };
                peer.reply(reply);
            }
            JsonRpcMessage::Notification(n) => {
                debug!("got notification {}", n.method);
            }
        }
    }
    debug!("inbound stream ended");
    peer.shutdown();
}
