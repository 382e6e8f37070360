//! JSON-RPC 2.0 message types.
//!
//! One frame is one JSON object on the wire. The discriminant is structural:
//! `id` + `method` is a request, `id` + (`result` | `error`) is a response,
//! `method` without `id` is a notification. Batches are not part of this
//! protocol; the transport delivers exactly one frame per line.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// The only accepted protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Zero-sized marker that serializes as the literal `"2.0"` and refuses
/// anything else on the way in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// Request identifier: string, integer, or null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
    /// Explicit null id (accepted on the wire, echoed back verbatim).
    Null,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// A JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version marker.
    pub jsonrpc: JsonRpcVersion,
    /// Request identifier, echoed in the response.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request.
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC notification (no response expected).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version marker.
    pub jsonrpc: JsonRpcVersion,
    /// Method name.
    pub method: String,
    /// Notification parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Build a notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Stable numeric code.
    pub code: i32,
    /// User-safe message.
    pub message: String,
    /// Redacted detail object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response payload: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Successful result.
    Success {
        /// The result value.
        result: Value,
    },
    /// Error outcome.
    Error {
        /// The error object.
        error: JsonRpcError,
    },
}

/// A JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version marker.
    pub jsonrpc: JsonRpcVersion,
    /// Identifier of the request this answers.
    pub id: RequestId,
    /// Result or error, never both.
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    /// Successful response for `id`.
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            payload: ResponsePayload::Success { result },
        }
    }

    /// Error response for `id`.
    pub fn error(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            payload: ResponsePayload::Error { error },
        }
    }

    /// The result value, when successful.
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            ResponsePayload::Success { result } => Some(result),
            ResponsePayload::Error { .. } => None,
        }
    }

    /// The error object, when failed.
    pub fn error_object(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            ResponsePayload::Success { .. } => None,
            ResponsePayload::Error { error } => Some(error),
        }
    }

    /// Whether this is a success response.
    pub fn is_success(&self) -> bool {
        matches!(self.payload, ResponsePayload::Success { .. })
    }
}

/// One validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A response to an earlier request.
    Response(JsonRpcResponse),
    /// A one-way notification.
    Notification(JsonRpcNotification),
}

impl Frame {
    /// The method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }
}
