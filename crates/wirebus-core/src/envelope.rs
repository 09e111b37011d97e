use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::TransportError;
use crate::ids::SessionId;

/// Reserved metadata key naming the connection an envelope came from or goes to.
pub const SESSION_ID_KEY: &str = "session_id";

pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Correlation token. JSON-RPC allows either a string or an integer.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    String(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// JSON-RPC error object carried in the `error` slot of a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, msg)
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// The unit exchanged over every binding.
///
/// A request carries `method` (and usually `id` and `params`); a response
/// echoes the request `id` and carries exactly one of `result` or `error`.
/// `metadata` is filled in by the transport and is never part of the wire
/// encoding, so a peer cannot smuggle routing data through its payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(skip)]
    pub metadata: Option<HashMap<String, String>>,
}

/// Keeps an explicit `null` as `Some(Value::Null)` so `"result": null` survives a round trip.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    pub fn request(
        id: impl Into<MessageId>,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_owned()),
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            ..Default::default()
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_owned()),
            method: Some(method.into()),
            params,
            ..Default::default()
        }
    }

    pub fn response(id: Option<MessageId>, result: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_owned()),
            id,
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn error_response(id: Option<MessageId>, error: RpcError) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_owned()),
            id,
            error: Some(error),
            ..Default::default()
        }
    }

    /// Build a response to `self`, carrying over its id and metadata so the
    /// push binding can route it back to the originating connection.
    pub fn reply(&self, outcome: Result<Value, RpcError>) -> Self {
        let mut resp = match outcome {
            Ok(result) => Self::response(self.id.clone(), result),
            Err(error) => Self::error_response(self.id.clone(), error),
        };
        resp.metadata = self.metadata.clone();
        resp
    }

    pub fn is_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    pub fn is_response(&self) -> bool {
        self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }

    /// The reserved routing key, if metadata is attached and the key is present.
    pub fn session_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(SESSION_ID_KEY))
            .map(String::as_str)
    }

    pub fn with_session(mut self, session_id: &SessionId) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(SESSION_ID_KEY.to_owned(), session_id.to_string());
        self
    }

    /// Canonical single-line JSON encoding. Metadata is not included.
    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(TransportError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        serde_json::from_slice(bytes).map_err(TransportError::Decode)
    }
}
