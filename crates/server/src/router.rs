//! Route table and handlers.
//!
//! Everything that is not an operational endpoint is the JSON-RPC
//! entrypoint: the authenticated group catches any path and hands the raw
//! body to the proxy engine, mirroring how the upstream node accepts RPC
//! on arbitrary paths. Operational endpoints (`/healthz`, `/ready`,
//! `/metrics`) stay outside the auth group.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use fulcrum_core::metrics;
use fulcrum_core::proxy::ProxyEngine;
use serde_json::json;

use crate::middleware::auth::require_jwt;

/// Shared state for handlers and the auth middleware.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProxyEngine>,
    pub jwt_secret: Arc<Vec<u8>>,
    pub jwt_alg: Arc<str>,
}

impl AppState {
    pub fn new(engine: Arc<ProxyEngine>, jwt_secret: Vec<u8>, jwt_alg: &str) -> Self {
        Self {
            engine,
            jwt_secret: Arc::new(jwt_secret),
            jwt_alg: Arc::from(jwt_alg),
        }
    }
}

pub fn build(state: AppState) -> Router {
    let rpc = Router::new()
        .fallback(handle_rpc)
        .layer(from_fn_with_state(state.clone(), require_jwt));

    Router::new()
        .route("/healthz", get(handle_health))
        .route("/ready", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .merge(rpc)
        .with_state(state)
}

/// The JSON-RPC entrypoint. Accepts a single object or a batch; the
/// engine owns parsing, caching, forwarding and merging.
async fn handle_rpc(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let remote_addr = client_ip(&headers, connect_info.map(|info| info.0));

    let output = state
        .engine
        .handle(uri.path(), authorization, remote_addr, &body)
        .await;

    (
        output.status,
        [
            ("X-rpc-proxy", "rpc-proxy"),
            (header::CONTENT_TYPE.as_str(), "application/json"),
        ],
        output.body,
    )
        .into_response()
}

/// Original client IP: proxy headers first, then the socket address.
fn client_ip(headers: &HeaderMap, addr: Option<SocketAddr>) -> Option<String> {
    if let Some(ip) = headers
        .get("CF-Connecting-IP")
        .and_then(|value| value.to_str().ok())
    {
        return Some(ip.to_string());
    }
    if let Some(forwarded) = headers
        .get("X-Forwarded-For")
        .and_then(|value| value.to_str().ok())
    {
        // Only the first hop: A.B.C.D[,X.X.X.X,...]
        if let Some(first) = forwarded.split(',').next() {
            return Some(first.trim().to_string());
        }
    }
    addr.map(|addr| addr.ip().to_string())
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn handle_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics::render(),
    )
}
