//! JSON-RPC framing and the subset of MCP messages the client uses.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision requested during `initialize`.
pub const LATEST_PROTOCOL_VERSION: &str = "2024-11-05";

/// Protocol revisions this client can talk.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &["2024-11-05", "2025-03-26", "2025-06-18"];

pub(crate) const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes used by the client.
pub mod error_code {
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

// --------
// JSON-RPC
// --------

/// A request id, either a number or a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

/// A request that expects a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlates the response.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A one-way message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A successful response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request being answered.
    pub id: RequestId,
    /// Method result.
    pub result: Value,
}

/// The error object of a failed response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Additional information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A failed response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request being answered.
    pub id: RequestId,
    /// What went wrong.
    pub error: ErrorObject,
}

/// Any message exchanged over a transport.
///
/// The variant order matters for deserialization: a request is the only
/// shape with both `id` and `method`, and a notification is whatever has
/// a `method` but no `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request.
    Request(JsonRpcRequest),
    /// A successful response.
    Response(JsonRpcResponse),
    /// A failed response.
    Error(JsonRpcError),
    /// A notification.
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Creates a request message.
    pub fn request(id: RequestId, method: &str, params: Option<Value>) -> Self {
        JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            method: method.to_owned(),
            params,
        })
    }

    /// Creates a notification message.
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.to_owned(),
            params,
        })
    }

    /// Creates a successful response message.
    pub fn response(id: RequestId, result: Value) -> Self {
        JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result,
        })
    }

    /// Creates a failed response message.
    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        JsonRpcMessage::Error(JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            error: ErrorObject {
                code,
                message: message.into(),
                data: None,
            },
        })
    }

    /// Returns the method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(req) => Some(&req.method),
            JsonRpcMessage::Notification(n) => Some(&n.method),
            _ => None,
        }
    }
}

// ---
// MCP
// ---

/// Name and version of a client or server implementation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    pub version: String,
}

/// Parameters of the `initialize` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Requested protocol revision.
    pub protocol_version: String,
    /// Client capabilities.
    pub capabilities: Value,
    /// Client identity.
    pub client_info: Implementation,
}

/// Result of the `initialize` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision chosen by the server.
    pub protocol_version: String,
    /// Server capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Server identity.
    pub server_info: Implementation,
    /// Usage hints for the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// A tool offered by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Tool name.
    pub name: String,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments object.
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// Parameters of `tools/list`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ListToolsParams {
    /// Opaque pagination cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of `tools/list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// One page of tools.
    pub tools: Vec<Tool>,
    /// Cursor of the next page, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters of `tools/call`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name.
    pub name: String,
    /// Arguments object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// A piece of tool output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "ContentRepr", into = "ContentRepr")]
pub enum Content {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Base64 encoded image.
    Image {
        /// Encoded bytes.
        data: String,
        /// MIME type of the image.
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The resource contents.
        resource: Value,
    },
    /// Any other content part, kept as received.
    Other(Value),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ContentRepr {
    Known(KnownContent),
    Other(Value),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

impl From<ContentRepr> for Content {
    fn from(repr: ContentRepr) -> Self {
        match repr {
            ContentRepr::Known(KnownContent::Text { text }) => Content::Text { text },
            ContentRepr::Known(KnownContent::Image { data, mime_type }) => {
                Content::Image { data, mime_type }
            }
            ContentRepr::Known(KnownContent::Resource { resource }) => {
                Content::Resource { resource }
            }
            ContentRepr::Other(value) => Content::Other(value),
        }
    }
}

impl From<Content> for ContentRepr {
    fn from(content: Content) -> Self {
        match content {
            Content::Text { text } => ContentRepr::Known(KnownContent::Text { text }),
            Content::Image { data, mime_type } => {
                ContentRepr::Known(KnownContent::Image { data, mime_type })
            }
            Content::Resource { resource } => {
                ContentRepr::Known(KnownContent::Resource { resource })
            }
            Content::Other(value) => ContentRepr::Other(value),
        }
    }
}

/// Result of `tools/call`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Output of the tool.
    #[serde(default)]
    pub content: Vec<Content>,
    /// Whether the tool reported a failure.
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Joins the content into one string: text parts verbatim, everything
    /// else as JSON.
    pub fn text(&self) -> String {
        let parts: Vec<String> = self
            .content
            .iter()
            .map(|content| match content {
                Content::Text { text } => text.clone(),
                Content::Other(value) => value.to_string(),
                other => serde_json::to_string(other).unwrap_or_default(),
            })
            .collect();
        parts.join("\n")
    }
}
