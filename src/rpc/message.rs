//! JSON-RPC 2.0 envelopes.
//!
//! The bridge only looks at `method` and `id`; `params`, `result` and
//! `error.data` are carried as opaque [`Value`]s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation identifier of a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    /// An explicit `"id": null`. Still a call, answered with a null id.
    Null,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Null => f.write_str("null"),
        }
    }
}

/// A call (with `id`) or a notification (without). Serde alone reads
/// `"id": null` as a missing id; [`parse_payload`] restores it as
/// [`RequestId::Null`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }
}

/// A response envelope. `id` serializes as `null` when it could not be
/// recovered from the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// One element of an inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Call(Request),
    Notification(Request),
    /// A client's reply to a server-initiated request. The bridge never
    /// issues those, so replies are accepted and dropped.
    Reply(Value),
    Invalid {
        id: Option<RequestId>,
        reason: String,
    },
}

/// A parsed request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Incoming),
    Batch(Vec<Incoming>),
}

impl Payload {
    pub fn items(&self) -> &[Incoming] {
        match self {
            Payload::Single(item) => std::slice::from_ref(item),
            Payload::Batch(items) => items,
        }
    }

    pub fn into_items(self) -> Vec<Incoming> {
        match self {
            Payload::Single(item) => vec![item],
            Payload::Batch(items) => items,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Payload::Batch(_))
    }
}

/// Parse an HTTP body (or stdio line) into a single envelope or a batch.
///
/// A body that is not JSON, an empty batch, or a lone element that is not an
/// envelope is a [`BridgeError::MalformedRequest`]. Invalid elements inside a
/// batch are kept as [`Incoming::Invalid`] so each gets its own error reply.
pub fn parse_payload(bytes: &[u8]) -> Result<Payload, BridgeError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| BridgeError::MalformedRequest(format!("invalid JSON: {}", e)))?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(BridgeError::MalformedRequest("empty batch".into()));
            }
            Ok(Payload::Batch(items.into_iter().map(classify).collect()))
        }
        Value::Object(_) => match classify(value) {
            Incoming::Invalid { reason, .. } => Err(BridgeError::MalformedRequest(reason)),
            item => Ok(Payload::Single(item)),
        },
        _ => Err(BridgeError::MalformedRequest(
            "expected a JSON-RPC object or batch".into(),
        )),
    }
}

fn classify(value: Value) -> Incoming {
    let Some(obj) = value.as_object() else {
        return Incoming::Invalid {
            id: None,
            reason: "batch element is not an object".into(),
        };
    };

    let id = obj
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Incoming::Invalid {
            id,
            reason: "missing or unsupported `jsonrpc` version".into(),
        };
    }

    if obj.contains_key("method") {
        let explicit_null_id = obj.get("id").is_some_and(Value::is_null);
        return match serde_json::from_value::<Request>(value) {
            Ok(mut req) if explicit_null_id => {
                req.id = Some(RequestId::Null);
                Incoming::Call(req)
            }
            Ok(req) if req.is_notification() => Incoming::Notification(req),
            Ok(req) => Incoming::Call(req),
            Err(e) => Incoming::Invalid {
                id,
                reason: format!("invalid request: {}", e),
            },
        };
    }

    if obj.contains_key("result") || obj.contains_key("error") {
        return Incoming::Reply(value);
    }

    Incoming::Invalid {
        id,
        reason: "envelope has neither `method` nor `result`/`error`".into(),
    }
}
