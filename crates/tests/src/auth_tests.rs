//! End-to-end tests for the authenticated HTTP surface.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use fulcrum_core::auth::mint_token;
use fulcrum_core::types::{RpcRequest, RpcResponse};
use serde_json::json;
use server::router::{self, AppState};
use tower::util::ServiceExt;

use crate::mock_infrastructure::RpcMockBuilder;
use crate::support::{build_engine, test_config, TEST_SECRET};

const METHOD: &str = "test";

fn make_app(upstream_url: &str) -> axum::Router {
    let config = test_config(upstream_url, &[METHOD]);
    let (engine, _) = build_engine(&config);
    router::build(AppState::new(
        engine,
        config.jwt_secret_bytes(),
        &config.jwt_alg,
    ))
}

fn bearer() -> String {
    let token = mint_token(TEST_SECRET.as_bytes(), "HS256", &["read".to_string()])
        .expect("token mints");
    format!("Bearer {token}")
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn authenticated_request_is_proxied() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream
        .mock_response(&RpcResponse::success(json!("1"), json!(15)))
        .await;

    let app = make_app(&upstream.url());
    let rpc_request = RpcRequest::new(json!("1"), METHOD, json!(["1", "2"]));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header("authorization", bearer())
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&rpc_request).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("X-rpc-proxy").unwrap(), "rpc-proxy");
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );

    let body = body_json(response).await;
    assert_eq!(body["result"], json!(15));
    assert_eq!(body["id"], json!("1"));
}

#[tokio::test]
async fn missing_token_gets_jsonrpc_unauthorized() {
    let upstream = RpcMockBuilder::new().await;
    let app = make_app(&upstream.url());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/")
        .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"test"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["jsonrpc"], "2.0");
    assert!(body.get("id").is_none());
    assert_eq!(body["error"]["code"], -32603);
    assert_eq!(body["error"]["message"], "Unauthorized");
}

#[tokio::test]
async fn malformed_rpc_body_is_a_bad_request() {
    let upstream = RpcMockBuilder::new().await;
    let app = make_app(&upstream.url());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header("authorization", bearer())
        .body(Body::from("{broken"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn rpc_is_reachable_under_any_path() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream
        .mock_response(&RpcResponse::success(json!("1"), json!(15)))
        .await;

    let app = make_app(&upstream.url());
    let rpc_request = RpcRequest::new(json!("1"), METHOD, json!(["1", "2"]));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/rpc/v0")
        .header("authorization", bearer())
        .body(Body::from(serde_json::to_vec(&rpc_request).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn batch_roundtrips_through_the_router() {
    let responses = vec![
        RpcResponse::success(json!("2"), json!(16)),
        RpcResponse::success(json!("1"), json!(15)),
    ];
    let mut upstream = RpcMockBuilder::new().await;
    upstream.mock_batch_response(&responses).await;

    let app = make_app(&upstream.url());
    let batch = vec![
        RpcRequest::new(json!("1"), METHOD, json!(["1"])),
        RpcRequest::new(json!("2"), METHOD, json!(["2"])),
    ];
    let request = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header("authorization", bearer())
        .body(Body::from(serde_json::to_vec(&batch).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let merged = body.as_array().unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0]["id"], json!("1"));
    assert_eq!(merged[0]["result"], json!(15));
    assert_eq!(merged[1]["id"], json!("2"));
    assert_eq!(merged[1]["result"], json!(16));
}
