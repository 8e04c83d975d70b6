//! JSON-RPC 2.0 wire model.
//!
//! `params`, `result` and `id` are arbitrary JSON, so they are kept as
//! [`serde_json::Value`] rather than a typed escape hatch: the matcher
//! branches on parameter shape (array vs object) and the merge path
//! branches on the scalar type of `id`.
//!
//! A response whose `jsonrpc` field is the empty string is the *empty
//! sentinel*: it means "no data" (cache miss, or a batch position the
//! upstream never answered) without being an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version carried by every real request and response.
pub const JSONRPC_VERSION: &str = "2.0";

/// A single JSON-RPC 2.0 request.
///
/// `remote_addr` is an annotation attached while parsing the inbound HTTP
/// request; it never crosses the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(skip)]
    pub remote_addr: Option<String>,
}

impl RpcRequest {
    pub fn new(id: Value, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
            remote_addr: None,
        }
    }
}

/// A single JSON-RPC 2.0 response.
///
/// `result` is present on success, `error` on failure. The default value is
/// the empty sentinel (see module docs).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// A successful response carrying `result`.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response carrying `code` and `message`.
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// True for the empty sentinel.
    pub fn is_empty(&self) -> bool {
        self.jsonrpc.is_empty()
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)
    }
}

/// Structural ID equality with numeric coercion.
///
/// JSON does not distinguish numeric types and IDs may cross the
/// storage boundary as floats, so any integer-valued numeric is reduced to
/// `i64` before comparison. Strings compare as strings, nulls equal nulls.
pub fn id_equal(a: &Value, b: &Value) -> bool {
    match (coerce_numeric(a), coerce_numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn coerce_numeric(v: &Value) -> Option<i64> {
    let n = v.as_number()?;
    n.as_i64()
        .or_else(|| n.as_u64().map(|u| u as i64))
        .or_else(|| n.as_f64().map(|f| f as i64))
}

/// Finds a request by ID, first match wins.
pub fn find_by_id<'a>(requests: &'a [RpcRequest], id: &Value) -> Option<&'a RpcRequest> {
    requests.iter().find(|req| id_equal(&req.id, id))
}

/// Position of the request matching `id`, first match wins.
pub fn position_by_id(requests: &[RpcRequest], id: &Value) -> Option<usize> {
    requests.iter().position(|req| id_equal(&req.id, id))
}

/// A body whose first non-whitespace byte is `[` is a JSON-RPC batch.
pub fn is_batch(body: &[u8]) -> bool {
    body.iter()
        .find(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
        .map(|b| *b == b'[')
        .unwrap_or(false)
}
