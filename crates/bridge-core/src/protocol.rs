//! JSON-RPC 2.0 wire types and the MCP tool listing payloads.
//!
//! Messages are one JSON object per line:
//!
//! ```text
//! {"jsonrpc":"2.0","id":7,"method":"tools/list","params":{}}\n
//! ```
//!
//! Incoming lines are decoded in two steps. [`Envelope::probe`] reads only
//! `id` and `method` to classify the line; the full typed [`Message`] is
//! decoded afterwards and only for lines the caller actually wants.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

pub const JSONRPC_VERSION: &str = "2.0";

/// Outgoing JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a request with a numeric id.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Value::Number(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// JSON-RPC notification (a method call without an id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    /// The `result` payload, or the `error` object as [`BridgeError::Protocol`].
    pub fn into_result(self) -> Result<Option<Value>> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(self.result),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<RpcError> for BridgeError {
    fn from(err: RpcError) -> Self {
        BridgeError::Protocol {
            code: err.code,
            message: err.message,
        }
    }
}

/// What kind of message a line holds, judged from `id` and `method` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Notification,
}

/// First-pass view of an incoming line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    /// `None` when absent or `null`.
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
}

impl Envelope {
    /// Peek at a line. Returns `None` when it is not a JSON object.
    pub fn probe(line: &[u8]) -> Option<Self> {
        serde_json::from_slice(line).ok()
    }

    pub fn kind(&self) -> MessageKind {
        match (&self.id, &self.method) {
            (Some(_), Some(_)) => MessageKind::Request,
            (Some(_), None) => MessageKind::Response,
            (None, _) => MessageKind::Notification,
        }
    }

    /// The id as an unsigned integer, when it is one.
    pub fn id_u64(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// Second pass: decode the full message now that its kind is known.
    pub fn into_message(self, line: &[u8]) -> Result<Message> {
        Ok(match self.kind() {
            MessageKind::Request => Message::Request(serde_json::from_slice(line)?),
            MessageKind::Response => Message::Response(serde_json::from_slice(line)?),
            MessageKind::Notification => Message::Notification(serde_json::from_slice(line)?),
        })
    }
}

/// A fully decoded incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl Message {
    /// Decode a line in both passes.
    pub fn decode(line: &[u8]) -> Result<Self> {
        let envelope = serde_json::from_slice::<Envelope>(line)?;
        envelope.into_message(line)
    }
}

/// A tool advertised by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

impl Tool {
    /// Names listed in the input schema's `required` array.
    pub fn required_fields(&self) -> BTreeSet<String> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// `result` of a `tools/list` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(rename = "nextCursor", default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Value>,
}

impl ListToolsResult {
    /// Cursor for the next page, or `None` when the listing is complete.
    ///
    /// Absent, `null` and `""` cursors all end the listing. Any other value
    /// is echoed back verbatim.
    pub fn continuation(&self) -> Option<&Value> {
        match &self.next_cursor {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(cursor) => Some(cursor),
        }
    }
}

/// Params for a `tools/list` request.
pub fn list_tools_params(cursor: Option<&Value>) -> Value {
    match cursor {
        Some(cursor) => serde_json::json!({ "cursor": cursor }),
        None => serde_json::json!({}),
    }
}
