//! Body parsing, serialization and JSON-RPC error shapes.
//!
//! A body is a batch iff its first non-whitespace byte is `[`; a single
//! object parses into a one-element list so the rest of the pipeline only
//! deals with lists. The inverse holds on the way out: one-element lists
//! serialize as a bare object.

use serde_json::Value;

use crate::types::{is_batch, RpcRequest, RpcResponse};

/// Malformed inbound request.
pub const JSONRPC_INVALID_PARAMS: i64 = -32602;
/// Upstream or internal failure, including the unauthorized surface.
pub const JSONRPC_INTERNAL: i64 = -32603;

/// Parses an inbound body into requests, preserving order. An empty body
/// yields a single synthetic request whose method is the URL path.
pub fn parse_requests(
    path: &str,
    remote_addr: Option<String>,
    body: &[u8],
) -> Result<Vec<RpcRequest>, serde_json::Error> {
    let mut requests = if body.is_empty() {
        Vec::new()
    } else {
        parse_request_body(body)?
    };
    if requests.is_empty() {
        requests.push(RpcRequest {
            method: path.to_string(),
            ..Default::default()
        });
    }
    for request in &mut requests {
        request.remote_addr = remote_addr.clone();
    }
    Ok(requests)
}

pub fn parse_request_body(body: &[u8]) -> Result<Vec<RpcRequest>, serde_json::Error> {
    if is_batch(body) {
        serde_json::from_slice(body)
    } else {
        serde_json::from_slice::<RpcRequest>(body).map(|request| vec![request])
    }
}

pub fn parse_response_body(body: &[u8]) -> Result<Vec<RpcResponse>, serde_json::Error> {
    if is_batch(body) {
        serde_json::from_slice(body)
    } else {
        serde_json::from_slice::<RpcResponse>(body).map(|response| vec![response])
    }
}

/// Serializes requests for the upstream: a bare object for one request, a
/// JSON array otherwise.
pub fn encode_requests(requests: &[RpcRequest]) -> Result<Vec<u8>, serde_json::Error> {
    if requests.len() == 1 {
        serde_json::to_vec(&requests[0])
    } else {
        serde_json::to_vec(requests)
    }
}

/// Serializes the merged response set: empty for zero, a bare object for
/// one, an array otherwise.
pub fn encode_responses(responses: &[RpcResponse]) -> Result<Vec<u8>, serde_json::Error> {
    match responses.len() {
        0 => Ok(Vec::new()),
        1 => serde_json::to_vec(&responses[0]),
        _ => serde_json::to_vec(responses),
    }
}

/// Splits response positions into (non-empty, empty) index sets.
pub fn split_empty_positions(responses: &[RpcResponse]) -> (Vec<usize>, Vec<usize>) {
    let mut non_empty = Vec::new();
    let mut empty = Vec::new();
    for (idx, response) in responses.iter().enumerate() {
        if response.is_empty() {
            empty.push(idx);
        } else {
            non_empty.push(idx);
        }
    }
    (non_empty, empty)
}

/// The error body for a failed authentication attempt.
pub fn unauthenticated() -> RpcResponse {
    RpcResponse::error(Value::Null, JSONRPC_INTERNAL, "Unauthorized")
}
