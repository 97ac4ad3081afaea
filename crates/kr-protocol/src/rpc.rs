//! JSON-RPC 2.0 envelopes
//!
//! Outbound calls are serialized as `{"jsonrpc":"2.0","id":n,"method":m,"params":p}`.
//! Inbound frames are either responses (`{id, result}` / `{id, error}`) or
//! notifications (`{method, params}` without an `id`). The presence of `id` is
//! the only thing that tells the two apart.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::CodecError;

/// JSON-RPC version tag sent with every request
pub const JSONRPC_VERSION: &str = "2.0";

/// Identifier correlating a request with its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u32);

impl RequestId {
    /// Create a new request ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RequestId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Outbound call envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    jsonrpc: &'static str,
    /// Correlation id
    pub id: RequestId,
    /// Fully qualified method name, e.g. `Player.GetActivePlayers`
    pub method: String,
    /// Structured parameters; omitted from the wire when null
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    /// Create a new request
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize into a single JSON text frame
    pub fn to_frame(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Error object reported by the host for a failed call
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct RpcError {
    /// Host error code
    pub code: i64,
    /// Host error message, passed through untouched
    pub message: String,
    /// Optional structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error without details
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Response to an earlier request
    Response {
        id: RequestId,
        outcome: Result<Value, RpcError>,
    },
    /// Unsolicited server notification
    Notification { method: String, params: Value },
}

/// Loose shape used to classify frames before building `InboundMessage`
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default, deserialize_with = "present")]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Distinguish an explicit `null` from a missing field
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl InboundMessage {
    /// Parse a single JSON text frame
    pub fn parse(frame: &str) -> Result<Self, CodecError> {
        let raw: RawEnvelope = serde_json::from_str(frame)?;

        match raw.id {
            Some(id) => {
                let id = id
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .map(RequestId)
                    .ok_or_else(|| {
                        CodecError::MalformedEnvelope(format!("unusable response id: {}", id))
                    })?;

                let outcome = match (raw.error, raw.result) {
                    (Some(error), _) => Err(error),
                    (None, Some(result)) => Ok(result),
                    (None, None) => {
                        return Err(CodecError::MalformedEnvelope(format!(
                            "response {} has neither result nor error",
                            id
                        )))
                    }
                };

                Ok(InboundMessage::Response { id, outcome })
            }
            None => match raw.method {
                Some(method) => Ok(InboundMessage::Notification {
                    method,
                    params: raw.params,
                }),
                None => Err(CodecError::MalformedEnvelope(
                    "frame has neither id nor method".to_string(),
                )),
            },
        }
    }
}
