//! The batch-aware cache-and-forward engine.
//!
//! One call to [`ProxyEngine::handle`] is one HTTP transaction:
//!
//! 1. parse the body (single, batch, or empty → synthetic path request);
//! 2. look every request up in the cache, forcing the caller's ID onto
//!    hits so a shared cache entry answers under the right identifier;
//! 3. forward only the misses, as a bare object when there is exactly one;
//! 4. merge upstream responses back by ID — the upstream may reorder or
//!    short-change a batch, unanswered positions keep the empty sentinel;
//! 5. write successful cacheable responses through the cacher;
//! 6. answer in the caller's original order.
//!
//! Cache failures never fail the transaction: reads degrade to misses and
//! write errors are logged.

use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use serde_json::Value;
use tracing::{debug, error, warn};
use url::Url;

use crate::cache::ResponseCacher;
use crate::metrics;
use crate::types::{position_by_id, RpcRequest, RpcResponse};

use super::requests::{
    encode_requests, encode_responses, parse_requests, parse_response_body,
    split_empty_positions, JSONRPC_INTERNAL, JSONRPC_INVALID_PARAMS,
};

/// What the HTTP layer sends back: a status and a JSON body.
#[derive(Debug)]
pub struct EngineOutput {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl EngineOutput {
    fn rpc_error(status: StatusCode, id: Value, code: i64, message: String) -> Self {
        let response = RpcResponse::error(id, code, message);
        Self {
            status,
            body: serde_json::to_vec(&response).unwrap_or_default(),
        }
    }

    fn assembled(responses: &[RpcResponse]) -> Self {
        match encode_responses(responses) {
            Ok(body) => Self {
                status: StatusCode::OK,
                body,
            },
            Err(err) => {
                error!(error = %err, "cannot serialize prepared responses");
                Self::rpc_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Value::Null,
                    JSONRPC_INTERNAL,
                    err.to_string(),
                )
            }
        }
    }
}

pub struct ProxyEngine {
    cacher: Arc<ResponseCacher>,
    client: reqwest::Client,
    upstream: Url,
    debug_http_request: bool,
    debug_http_response: bool,
}

impl ProxyEngine {
    pub fn new(
        cacher: Arc<ResponseCacher>,
        upstream: Url,
        debug_http_request: bool,
        debug_http_response: bool,
    ) -> Self {
        Self {
            cacher,
            client: reqwest::Client::new(),
            upstream,
            debug_http_request,
            debug_http_response,
        }
    }

    pub fn cacher(&self) -> &Arc<ResponseCacher> {
        &self.cacher
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Runs one transaction. `authorization` is the caller's bearer header,
    /// forwarded to the upstream unchanged.
    pub async fn handle(
        &self,
        path: &str,
        authorization: Option<&str>,
        remote_addr: Option<String>,
        body: &[u8],
    ) -> EngineOutput {
        metrics::record_request();
        let start = Instant::now();

        let parsed = match parse_requests(path, remote_addr, body) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(error = %err, "failed to parse requests");
                metrics::record_request_error();
                return EngineOutput::rpc_error(
                    StatusCode::BAD_REQUEST,
                    Value::Null,
                    JSONRPC_INVALID_PARAMS,
                    err.to_string(),
                );
            }
        };
        let methods: Vec<String> = parsed.iter().map(|r| r.method.clone()).collect();
        for method in &methods {
            metrics::record_request_for_method(method);
        }

        let mut prepared = self.from_cache(&parsed).await;
        let (cached_idx, forward_idx) = split_empty_positions(&prepared);

        let cached_methods: Vec<String> = cached_idx
            .iter()
            .map(|&idx| parsed[idx].method.clone())
            .collect();
        if !cached_methods.is_empty() {
            metrics::record_cached_methods(&cached_methods);
        }

        let forward: Vec<RpcRequest> = forward_idx
            .iter()
            .map(|&idx| parsed[idx].clone())
            .collect();
        if forward.is_empty() {
            debug!("returning fully cached response");
            return EngineOutput::assembled(&prepared);
        }

        let out_body = match encode_requests(&forward) {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, "cannot serialize upstream request body");
                metrics::record_error_methods(&methods);
                return EngineOutput::rpc_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Value::Null,
                    JSONRPC_INTERNAL,
                    err.to_string(),
                );
            }
        };
        if self.debug_http_request {
            debug!(body = %String::from_utf8_lossy(&out_body), "forwarding request");
        }

        let mut upstream_request = self
            .client
            .post(self.upstream.clone())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(out_body);
        if let Some(authorization) = authorization {
            upstream_request =
                upstream_request.header(http::header::AUTHORIZATION, authorization);
        }

        let result = upstream_request.send().await;
        metrics::record_request_duration(start.elapsed().as_secs_f64() * 1000.0);

        let upstream_response = match result {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "upstream request failed");
                metrics::record_error_methods(&methods);
                return EngineOutput::rpc_error(
                    StatusCode::BAD_GATEWAY,
                    Value::Null,
                    JSONRPC_INTERNAL,
                    err.to_string(),
                );
            }
        };
        let upstream_status = upstream_response.status();
        let raw = match upstream_response.bytes().await {
            Ok(raw) => raw,
            Err(err) => {
                error!(error = %err, "cannot read upstream response body");
                metrics::record_error_methods(&methods);
                return EngineOutput::rpc_error(
                    StatusCode::BAD_GATEWAY,
                    Value::Null,
                    JSONRPC_INTERNAL,
                    err.to_string(),
                );
            }
        };
        if self.debug_http_response {
            debug!(
                status = upstream_status.as_u16(),
                body = %String::from_utf8_lossy(&raw),
                "upstream response",
            );
        }

        // Nothing to merge and nothing to store: hand the upstream body
        // back untouched.
        if cached_methods.is_empty() && !self.all_cacheable(&parsed) {
            return EngineOutput {
                status: upstream_status,
                body: raw.to_vec(),
            };
        }

        let responses = match parse_response_body(&raw) {
            Ok(responses) => responses,
            Err(err) => {
                error!(error = %err, "cannot parse upstream response");
                metrics::record_error_methods(&methods);
                return EngineOutput::rpc_error(
                    upstream_status,
                    Value::Null,
                    JSONRPC_INTERNAL,
                    String::from_utf8_lossy(&raw).into_owned(),
                );
            }
        };

        for response in responses {
            let Some(position) = position_by_id(&parsed, &response.id) else {
                warn!(id = %response.id, "upstream response with unknown id");
                continue;
            };
            if response.error.is_none() {
                let request = &parsed[position];
                if self.cacher.matcher().is_cacheable(&request.method) {
                    if let Err(err) = self.cacher.set(request, &response).await {
                        error!(error = %err, method = %request.method, "cannot store cached response");
                    }
                }
            }
            prepared[position] = response;
        }

        EngineOutput::assembled(&prepared)
    }

    /// Pre-fills a response slot per request from the cache. Read failures
    /// degrade to misses; hits are re-stamped with the caller's ID.
    async fn from_cache(&self, requests: &[RpcRequest]) -> Vec<RpcResponse> {
        let mut prepared = Vec::with_capacity(requests.len());
        for request in requests {
            let mut response = match self.cacher.get(request).await {
                Ok(response) => response,
                Err(err) => {
                    error!(method = %request.method, error = %err, "cannot read cached response");
                    RpcResponse::default()
                }
            };
            response.id = request.id.clone();
            prepared.push(response);
        }
        prepared
    }

    fn all_cacheable(&self, requests: &[RpcRequest]) -> bool {
        requests
            .iter()
            .all(|request| self.cacher.matcher().is_cacheable(&request.method))
    }
}
