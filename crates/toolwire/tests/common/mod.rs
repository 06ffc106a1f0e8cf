//! An in-memory weather MCP server.

#![allow(dead_code)]

use serde_json::{Value, json};
use toolwire_mcp::MessageStreams;
use toolwire_mcp::proto::{Implementation, JsonRpcMessage, JsonRpcRequest, error_code};
use toolwire_mcp::{ClientSession, Connector, Error, Transport};
use tokio::task::JoinHandle;

pub fn client_info() -> Implementation {
    Implementation {
        name: "Weather-Agent".to_owned(),
        version: "0.0.0".to_owned(),
    }
}

/// Answers requests until the client goes away.
pub async fn serve(mut streams: MessageStreams) {
    while let Some(msg) = streams.inbound.recv().await {
        let JsonRpcMessage::Request(req) = msg else {
            continue;
        };
        let reply = match handle_request(&req) {
            Some(result) => JsonRpcMessage::response(req.id, result),
            None => JsonRpcMessage::error(
                req.id,
                error_code::METHOD_NOT_FOUND,
                "method not found",
            ),
        };
        if streams.outbound.send(reply).is_err() {
            break;
        }
    }
}

fn handle_request(req: &JsonRpcRequest) -> Option<Value> {
    let params = req.params.clone().unwrap_or(Value::Null);
    let result = match req.method.as_str() {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "weather", "version": "1.9.4" }
        }),
        "tools/list" => json!({
            "tools": [
                {
                    "name": "get_alerts",
                    "description": "Get weather alerts for a US state.",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "state": { "type": "string" } },
                        "required": ["state"]
                    }
                },
                {
                    "name": "get_forecast",
                    "description": "Get weather forecast for a location.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "latitude": { "type": "number" },
                            "longitude": { "type": "number" }
                        },
                        "required": ["latitude", "longitude"]
                    }
                }
            ]
        }),
        "tools/call" => call_tool(&params),
        _ => return None,
    };
    Some(result)
}

fn call_tool(params: &Value) -> Value {
    let args = &params["arguments"];
    match params["name"].as_str() {
        Some("get_alerts") => match args["state"].as_str() {
            Some(state) => text(format!("No active alerts for {state}."), false),
            None => text("missing argument: state".to_owned(), true),
        },
        Some("get_forecast") => text(
            format!(
                "Forecast for {}, {}: Sunny, 72°F.",
                args["latitude"], args["longitude"]
            ),
            false,
        ),
        other => text(format!("Unknown tool: {other:?}"), true),
    }
}

fn text(text: String, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error
    })
}

/// Reaches the in-memory server for `stub://weather`, nothing else.
pub struct WeatherConnector;

pub struct WeatherTransport {
    client: Option<MessageStreams>,
    server: JoinHandle<()>,
}

impl Transport for WeatherTransport {
    async fn close(&mut self) -> Result<(), Error> {
        self.server.abort();
        Ok(())
    }
}

impl Connector for WeatherConnector {
    type Transport = WeatherTransport;
    type Session = ClientSession;

    async fn open(&self, endpoint: &str) -> Result<WeatherTransport, Error> {
        if endpoint != "stub://weather" {
            return Err(Error::connection().with_reason("connection refused"));
        }
        let (client, server) = MessageStreams::duplex();
        Ok(WeatherTransport {
            client: Some(client),
            server: tokio::spawn(serve(server)),
        })
    }

    async fn negotiate(
        &self,
        transport: &mut WeatherTransport,
    ) -> Result<ClientSession, Error> {
        let streams = transport
            .client
            .take()
            .ok_or_else(|| Error::handshake().with_reason("already negotiated"))?;
        ClientSession::negotiate(streams, client_info()).await
    }
}
