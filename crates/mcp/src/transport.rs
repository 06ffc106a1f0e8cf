//! Transports carry JSON-RPC messages between the client and one server.

use mime::Mime;
use reqwest::{Client, Url, header};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use toolwire_sse::{Chunks, Sse};

use crate::error::Error;
use crate::proto::{JsonRpcMessage, error_code};

/// A bidirectional message pipe owned by a [`SessionHandle`].
///
/// [`SessionHandle`]: crate::SessionHandle
pub trait Transport: Send {
    /// Releases the underlying connection.
    ///
    /// Calling `close` more than once is allowed and does nothing after
    /// the first call.
    fn close(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// The channel ends a session uses to talk through a transport.
#[derive(Debug)]
pub struct MessageStreams {
    /// Messages to deliver to the server.
    pub outbound: mpsc::UnboundedSender<JsonRpcMessage>,
    /// Messages received from the server.
    pub inbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
}

impl MessageStreams {
    /// Creates two connected stream pairs, what one side sends the other
    /// receives.
    pub fn duplex() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: a_tx,
                inbound: b_rx,
            },
            Self {
                outbound: b_tx,
                inbound: a_rx,
            },
        )
    }
}

/// MCP "HTTP with SSE" client transport.
///
/// Server messages arrive as `message` events on a long-lived `GET`
/// stream, client messages are `POST`ed to the URL announced by the
/// first `endpoint` event.
#[derive(Debug)]
pub struct SseTransport {
    endpoint: Url,
    streams: Option<MessageStreams>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl SseTransport {
    /// Opens the event stream at `url` and waits for the message endpoint.
    pub async fn open(client: Client, url: &str) -> Result<Self, Error> {
        let url = Url::parse(url).map_err(|err| {
            Error::connection().with_reason(format!("invalid url {url}: {err}"))
        })?;

        debug!("opening event stream at {url}");
        let resp = client
            .get(url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| Error::connection().with_reason(format!("{err}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::connection()
                .with_reason(format!("unexpected status {status}")));
        }
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let is_event_stream = content_type
            .and_then(|v| v.parse().ok())
            .map(|m: Mime| {
                m.type_() == mime::TEXT && m.subtype().as_str() == "event-stream"
            })
            .unwrap_or(false);
        if !is_event_stream {
            return Err(Error::connection().with_reason(format!(
                "unexpected content type: {content_type:?}"
            )));
        }

        let sse = Sse::new(Chunks::from_response(resp));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        // The writer only holds a weak sender, so the inbound channel closes
        // as soon as the event stream ends.
        let weak_inbound = inbound_tx.downgrade();
        let mut reader = AbortOnDrop(Some(tokio::spawn(read_events(
            sse,
            url,
            endpoint_tx,
            inbound_tx,
        ))));
        let endpoint = match endpoint_rx.await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(Error::connection()
                    .with_reason("stream ended before the endpoint event"));
            }
        };
        info!("message endpoint is {endpoint}");

        let writer = tokio::spawn(write_messages(
            client,
            endpoint.clone(),
            outbound_rx,
            weak_inbound,
        ));

        Ok(Self {
            endpoint,
            streams: Some(MessageStreams {
                outbound: outbound_tx,
                inbound: inbound_rx,
            }),
            reader: reader.0.take(),
            writer: Some(writer),
        })
    }

    /// Returns the URL messages are posted to.
    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Takes the message streams. Returns `None` after the first call.
    #[inline]
    pub fn take_streams(&mut self) -> Option<MessageStreams> {
        self.streams.take()
    }

    /// Returns `true` once the transport has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }
}

impl Transport for SseTransport {
    async fn close(&mut self) -> Result<(), Error> {
        self.streams = None;
        let mut result = Ok(());
        for task in [self.reader.take(), self.writer.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    result = Err(Error::closed()
                        .with_reason(format!("transport task failed: {err}")));
                }
            }
        }
        debug!("closed transport for {}", self.endpoint);
        result
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        for task in [self.reader.take(), self.writer.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

/// Aborts the task when dropped, unless it has been taken out.
struct AbortOnDrop(Option<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

async fn read_events(
    mut sse: Sse,
    base: Url,
    endpoint_tx: oneshot::Sender<Result<Url, Error>>,
    inbound: mpsc::UnboundedSender<JsonRpcMessage>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    loop {
        let event = match sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("event stream ended");
                break;
            }
            Err(err) => {
                warn!("event stream failed: {err}");
                break;
            }
        };

        match event.event_type() {
            "endpoint" => {
                let Some(tx) = endpoint_tx.take() else {
                    warn!("ignoring repeated endpoint event");
                    continue;
                };
                let resolved = resolve_endpoint(&base, &event.data);
                let failed = resolved.is_err();
                _ = tx.send(resolved);
                if failed {
                    return;
                }
            }
            "message" => match serde_json::from_str(&event.data) {
                Ok(msg) => {
                    if inbound.send(msg).is_err() {
                        debug!("inbound receiver dropped");
                        return;
                    }
                }
                Err(err) => {
                    warn!("skipping undecodable message: {err}");
                }
            },
            other => trace!("ignoring event of type {other}"),
        }
    }
}

async fn write_messages(
    client: Client,
    endpoint: Url,
    mut outbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
    inbound: mpsc::WeakUnboundedSender<JsonRpcMessage>,
) {
    while let Some(msg) = outbound.recv().await {
        let result = client
            .post(endpoint.clone())
            .json(&msg)
            .send()
            .await
            .map_err(|err| format!("{err}"))
            .and_then(|resp| {
                let status = resp.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(format!("unexpected status {status}"))
                }
            });
        let Err(reason) = result else {
            continue;
        };

        error!("failed to post message: {reason}");
        if let JsonRpcMessage::Request(req) = msg {
            // Answer the request locally so the caller does not wait
            // forever.
            if let Some(inbound) = inbound.upgrade() {
                _ = inbound.send(JsonRpcMessage::error(
                    req.id,
                    error_code::INTERNAL_ERROR,
                    reason,
                ));
            }
        }
    }
}

/// Resolves the announced endpoint against the stream URL.
fn resolve_endpoint(base: &Url, announced: &str) -> Result<Url, Error> {
    let endpoint = base.join(announced.trim()).map_err(|err| {
        Error::connection()
            .with_reason(format!("invalid endpoint {announced:?}: {err}"))
    })?;
    if endpoint.origin() != base.origin() {
        return Err(Error::connection().with_reason(format!(
            "endpoint origin does not match the stream: {endpoint}"
        )));
    }
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::{Value, json};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    use super::*;
    use crate::error::ErrorKind;
    use crate::proto::RequestId;

    fn base() -> Url {
        Url::parse("http://0.0.0.0:8000/sse").unwrap()
    }

    #[test]
    fn test_resolve_relative_endpoint() {
        let endpoint =
            resolve_endpoint(&base(), "/messages/?session_id=9f2c\n").unwrap();
        assert_eq!(
            endpoint.as_str(),
            "http://0.0.0.0:8000/messages/?session_id=9f2c"
        );
    }

    #[test]
    fn test_resolve_absolute_endpoint() {
        let endpoint =
            resolve_endpoint(&base(), "http://0.0.0.0:8000/messages").unwrap();
        assert_eq!(endpoint.path(), "/messages");

        let err = resolve_endpoint(&base(), "http://evil.example/messages")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    fn preloaded(chunks: &[&'static [u8]]) -> Sse {
        let chunks = chunks
            .iter()
            .map(|c| Bytes::from_static(c))
            .collect::<VecDeque<_>>();
        Sse::new(Chunks::from_vec_deque(chunks))
    }

    #[tokio::test]
    async fn test_reader_forwards_messages() {
        let sse = preloaded(&[
            b": keep-alive\n\n",
            b"event: endpoint\ndata: /messages/?session_id=1\n\n",
            b"event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":0,",
            b"\"result\":{}}\n\n",
            b"event: message\ndata: not json\n\n",
            // Not UTF-8: only this event is lost.
            b"event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"\xff\"}\n\n",
            b"event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"x\"}\n\n",
        ]);
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        read_events(sse, base(), endpoint_tx, inbound_tx).await;

        let endpoint = endpoint_rx.await.unwrap().unwrap();
        assert_eq!(endpoint.path(), "/messages/");
        assert_eq!(
            inbound_rx.recv().await,
            Some(JsonRpcMessage::response(
                RequestId::Number(0),
                serde_json::json!({})
            ))
        );
        assert_eq!(
            inbound_rx.recv().await,
            Some(JsonRpcMessage::notification("x", None))
        );
        // The reader is gone, so the channel is closed.
        assert_eq!(inbound_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_reader_without_endpoint() {
        let sse = preloaded(&[b"event: message\ndata: {}\n\n"]);
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
        read_events(sse, base(), endpoint_tx, inbound_tx).await;
        assert!(endpoint_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_open_invalid_url() {
        let err = SseTransport::open(Client::new(), "not a url")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    /// How the stub HTTP server answers.
    struct ServerConfig {
        status: u16,
        content_type: &'static str,
        endpoint: Option<&'static str>,
        post_status: u16,
    }

    impl Default for ServerConfig {
        fn default() -> Self {
            Self {
                status: 200,
                content_type: "text/event-stream",
                endpoint: Some("/messages/?session_id=1"),
                post_status: 202,
            }
        }
    }

    /// A stub MCP server speaking just enough HTTP/1.1.
    struct StubServer {
        url: String,
        /// Events pushed on the open event stream.
        events: mpsc::UnboundedSender<String>,
        /// Bodies of posted messages.
        posted: mpsc::UnboundedReceiver<Value>,
        /// Fires once the client hangs up the event stream.
        stream_closed: oneshot::Receiver<()>,
    }

    type Shared<T> = Arc<Mutex<Option<T>>>;

    async fn stub_server(config: ServerConfig) -> StubServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (posted_tx, posted_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();
        let config = Arc::new(config);
        let events_rx = Arc::new(Mutex::new(Some(events_rx)));
        let closed_tx = Arc::new(Mutex::new(Some(closed_tx)));

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(
                    stream,
                    Arc::clone(&config),
                    Arc::clone(&events_rx),
                    posted_tx.clone(),
                    Arc::clone(&closed_tx),
                ));
            }
        });

        StubServer {
            url: format!("http://{addr}/sse"),
            events: events_tx,
            posted: posted_rx,
            stream_closed: closed_rx,
        }
    }

    async fn serve_connection(
        stream: TcpStream,
        config: Arc<ServerConfig>,
        events: Shared<mpsc::UnboundedReceiver<String>>,
        posted: mpsc::UnboundedSender<Value>,
        closed: Shared<oneshot::Sender<()>>,
    ) {
        let mut stream = BufReader::new(stream);
        loop {
            let mut request_line = String::new();
            if stream.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                return;
            }
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                stream.read_line(&mut line).await.unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }

            if request_line.starts_with("POST") {
                let mut body = vec![0; content_length];
                stream.read_exact(&mut body).await.unwrap();
                posted.send(serde_json::from_slice(&body).unwrap()).unwrap();
                let head = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-length: 0\r\n\r\n",
                    config.post_status
                );
                stream.get_mut().write_all(head.as_bytes()).await.unwrap();
                continue;
            }

            let mut head = format!(
                "HTTP/1.1 {} Stub\r\ncontent-type: {}\r\n",
                config.status, config.content_type
            );
            if config.status != 200 {
                head.push_str("content-length: 0\r\n\r\n");
                stream.get_mut().write_all(head.as_bytes()).await.unwrap();
                return;
            }
            head.push_str("connection: close\r\n\r\n: hello\n\n");
            if let Some(endpoint) = config.endpoint {
                head.push_str(&format!("event: endpoint\ndata: {endpoint}\n\n"));
            }
            stream.get_mut().write_all(head.as_bytes()).await.unwrap();

            let mut events = events.lock().unwrap().take().unwrap();
            let mut buf = [0; 64];
            loop {
                tokio::select! {
                    read = stream.read(&mut buf) => {
                        if matches!(read, Ok(0) | Err(_)) {
                            break;
                        }
                    }
                    Some(event) = events.recv() => {
                        let event = format!("event: message\ndata: {event}\n\n");
                        if stream.get_mut().write_all(event.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
            }
            if let Some(closed) = closed.lock().unwrap().take() {
                let _ = closed.send(());
            }
            return;
        }
    }

    #[tokio::test]
    async fn test_open_rejects_status() {
        let server = stub_server(ServerConfig {
            status: 404,
            ..Default::default()
        })
        .await;
        let err = SseTransport::open(Client::new(), &server.url)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.reason().contains("404"), "{err}");
    }

    #[tokio::test]
    async fn test_open_rejects_content_type() {
        for content_type in ["application/json", "application/event-stream"] {
            let server = stub_server(ServerConfig {
                content_type,
                ..Default::default()
            })
            .await;
            let err = SseTransport::open(Client::new(), &server.url)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Connection);
            assert!(err.reason().contains("content type"), "{err}");
        }
    }

    #[tokio::test]
    async fn test_open_rejects_foreign_endpoint() {
        let mut server = stub_server(ServerConfig {
            endpoint: Some("http://evil.example/messages"),
            ..Default::default()
        })
        .await;
        let err = SseTransport::open(Client::new(), &server.url)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.reason().contains("origin"), "{err}");
        timeout(Duration::from_secs(5), &mut server.stream_closed)
            .await
            .expect("event stream left open")
            .unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_open_releases_stream() {
        let mut server = stub_server(ServerConfig {
            endpoint: None,
            ..Default::default()
        })
        .await;
        let open = SseTransport::open(Client::new(), &server.url);
        assert!(timeout(Duration::from_millis(300), open).await.is_err());
        timeout(Duration::from_secs(5), &mut server.stream_closed)
            .await
            .expect("event stream left open")
            .unwrap();
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let mut server = stub_server(ServerConfig::default()).await;
        let mut transport =
            SseTransport::open(Client::new(), &server.url).await.unwrap();
        assert_eq!(transport.endpoint().path(), "/messages/");
        assert_eq!(transport.endpoint().query(), Some("session_id=1"));

        let mut streams = transport.take_streams().unwrap();
        assert!(transport.take_streams().is_none());
        streams
            .outbound
            .send(JsonRpcMessage::notification("notifications/initialized", None))
            .unwrap();
        assert_eq!(
            server.posted.recv().await.unwrap(),
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })
        );

        server
            .events
            .send(r#"{"jsonrpc":"2.0","id":3,"result":{"tools":[]}}"#.to_owned())
            .unwrap();
        assert_eq!(
            streams.inbound.recv().await,
            Some(JsonRpcMessage::response(
                RequestId::Number(3),
                json!({ "tools": [] })
            ))
        );

        transport.close().await.unwrap();
        assert!(transport.is_closed());
        timeout(Duration::from_secs(5), &mut server.stream_closed)
            .await
            .expect("event stream left open")
            .unwrap();
        // Closing again is a no-op.
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_post_answers_request() {
        let mut server = stub_server(ServerConfig {
            post_status: 500,
            ..Default::default()
        })
        .await;
        let mut transport =
            SseTransport::open(Client::new(), &server.url).await.unwrap();
        let mut streams = transport.take_streams().unwrap();

        streams
            .outbound
            .send(JsonRpcMessage::request(RequestId::Number(7), "tools/list", None))
            .unwrap();
        assert_eq!(server.posted.recv().await.unwrap()["id"], 7);
        match streams.inbound.recv().await {
            Some(JsonRpcMessage::Error(err)) => {
                assert_eq!(err.id, RequestId::Number(7));
                assert_eq!(err.error.code, error_code::INTERNAL_ERROR);
                assert!(err.error.message.contains("500"), "{}", err.error.message);
            }
            other => panic!("expected an error response, got {other:?}"),
        }
        transport.close().await.unwrap();
    }

    #[test]
    fn test_duplex() {
        let (mut client, mut server) = MessageStreams::duplex();
        client
            .outbound
            .send(JsonRpcMessage::notification("a", None))
            .unwrap();
        server
            .outbound
            .send(JsonRpcMessage::notification("b", None))
            .unwrap();
        assert_eq!(server.inbound.try_recv().unwrap().method(), Some("a"));
        assert_eq!(client.inbound.try_recv().unwrap().method(), Some("b"));
    }
}
