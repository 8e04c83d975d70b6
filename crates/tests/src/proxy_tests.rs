//! End-to-end tests for the batch cache-and-forward path.

use fulcrum_core::proxy::requests::parse_response_body;
use fulcrum_core::types::{RpcRequest, RpcResponse};
use serde_json::json;

use crate::mock_infrastructure::RpcMockBuilder;
use crate::support::{build_engine, test_config};

const METHOD: &str = "test";

fn encode(request: &RpcRequest) -> Vec<u8> {
    serde_json::to_vec(request).expect("request serializes")
}

fn encode_batch(requests: &[RpcRequest]) -> Vec<u8> {
    serde_json::to_vec(requests).expect("requests serialize")
}

#[tokio::test]
async fn single_miss_populates_cache() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream
        .mock_response(&RpcResponse::success(json!("1"), json!(15)))
        .await
        .expect(1);

    let config = test_config(&upstream.url(), &[METHOD]);
    let (engine, cacher) = build_engine(&config);

    let request = RpcRequest::new(json!("1"), METHOD, json!(["1", "2"]));

    // First call misses and forwards.
    let output = engine.handle("/", None, None, &encode(&request)).await;
    assert_eq!(output.status.as_u16(), 200);
    let responses = parse_response_body(&output.body).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].result, Some(json!(15)));
    assert_eq!(responses[0].id, json!("1"));

    // Second identical call is served from cache without touching the
    // upstream; the mock allows exactly one hit.
    let output = engine.handle("/", None, None, &encode(&request)).await;
    assert_eq!(output.status.as_u16(), 200);
    let responses = parse_response_body(&output.body).unwrap();
    assert_eq!(responses[0].result, Some(json!(15)));

    upstream.assert_async().await;

    let cached = cacher.get(&request).await.unwrap();
    assert_eq!(cached.result, Some(json!(15)));
    assert_eq!(cached.id, json!("1"));
}

#[tokio::test]
async fn batched_partial_hit_forwards_single_object() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream
        .mock_single_object_request("20", &RpcResponse::success(json!("20"), json!(16)))
        .await
        .expect(1);

    let config = test_config(&upstream.url(), &[METHOD]);
    let (engine, cacher) = build_engine(&config);

    let cached_request = RpcRequest::new(json!("10"), METHOD, json!(["1", "2"]));
    let fresh_request = RpcRequest::new(json!("20"), METHOD, json!(["2", "3"]));
    cacher
        .set(&cached_request, &RpcResponse::success(json!("10"), json!(15)))
        .await
        .unwrap();

    let body = encode_batch(&[cached_request.clone(), fresh_request.clone()]);
    let output = engine.handle("/", None, None, &body).await;
    assert_eq!(output.status.as_u16(), 200);

    // The upstream only ever saw a bare object for id "20".
    upstream.assert_async().await;

    let responses = parse_response_body(&output.body).unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, json!("10"));
    assert_eq!(responses[0].result, Some(json!(15)));
    assert_eq!(responses[1].id, json!("20"));
    assert_eq!(responses[1].result, Some(json!(16)));
}

#[tokio::test]
async fn upstream_reorder_is_undone() {
    let methods = ["test1", "test2", "test3", "test4", "test5"];
    let requests: Vec<RpcRequest> = methods
        .iter()
        .enumerate()
        .map(|(idx, method)| {
            RpcRequest::new(json!((idx + 1).to_string()), *method, json!(["1"]))
        })
        .collect();
    let mut responses: Vec<RpcResponse> = requests
        .iter()
        .map(|request| RpcResponse::success(request.id.clone(), request.id.clone()))
        .collect();
    responses.reverse();

    let mut upstream = RpcMockBuilder::new().await;
    upstream.mock_batch_response(&responses).await;

    let config = test_config(&upstream.url(), &methods);
    let (engine, cacher) = build_engine(&config);

    let output = engine.handle("/", None, None, &encode_batch(&requests)).await;
    assert_eq!(output.status.as_u16(), 200);

    let merged = parse_response_body(&output.body).unwrap();
    assert_eq!(merged.len(), methods.len());
    for (idx, response) in merged.iter().enumerate() {
        assert_eq!(response.id, json!((idx + 1).to_string()));
    }

    // Every response landed in the cache under its originating request.
    for request in &requests {
        let cached = cacher.get(request).await.unwrap();
        assert_eq!(cached.id, request.id);
    }
}

#[tokio::test]
async fn short_upstream_batch_leaves_sentinel() {
    let requests = vec![
        RpcRequest::new(json!("1"), "test1", json!(["1"])),
        RpcRequest::new(json!("2"), "test2", json!(["1"])),
    ];
    // The upstream only answers the second request.
    let mut upstream = RpcMockBuilder::new().await;
    upstream
        .mock_batch_response(&[RpcResponse::success(json!("2"), json!(7))])
        .await;

    let config = test_config(&upstream.url(), &["test1", "test2"]);
    let (engine, _) = build_engine(&config);

    let output = engine.handle("/", None, None, &encode_batch(&requests)).await;
    let merged = parse_response_body(&output.body).unwrap();
    assert_eq!(merged.len(), 2);
    assert!(merged[0].is_empty());
    assert_eq!(merged[0].id, json!("1"));
    assert_eq!(merged[1].result, Some(json!(7)));
}

#[tokio::test]
async fn cache_hit_takes_the_callers_id() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream
        .mock_response(&RpcResponse::success(json!("10"), json!(15)))
        .await;

    let config = test_config(&upstream.url(), &[METHOD]);
    let (engine, cacher) = build_engine(&config);

    let original = RpcRequest::new(json!("10"), METHOD, json!(["1", "2"]));
    cacher
        .set(&original, &RpcResponse::success(json!("10"), json!(15)))
        .await
        .unwrap();

    // Same params, different caller ID: the hit answers under the new ID.
    let caller = RpcRequest::new(json!("99"), METHOD, json!(["1", "2"]));
    let output = engine.handle("/", None, None, &encode(&caller)).await;
    let responses = parse_response_body(&output.body).unwrap();
    assert_eq!(responses[0].id, json!("99"));
    assert_eq!(responses[0].result, Some(json!(15)));
}

#[tokio::test]
async fn numeric_id_merges_across_float_encoding() {
    let mut upstream = RpcMockBuilder::new().await;
    // The upstream echoes the ID as a float.
    upstream
        .mock_response(&RpcResponse::success(json!(7.0), json!("ok")))
        .await;

    let config = test_config(&upstream.url(), &[METHOD]);
    let (engine, cacher) = build_engine(&config);

    let request = RpcRequest::new(json!(7), METHOD, json!(["1"]));
    let output = engine.handle("/", None, None, &encode(&request)).await;
    let responses = parse_response_body(&output.body).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].result, Some(json!("ok")));

    let cached = cacher.get(&request).await.unwrap();
    assert_eq!(cached.result, Some(json!("ok")));
}

#[tokio::test]
async fn malformed_body_is_rejected_without_forwarding() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream
        .mock_response(&RpcResponse::success(json!(1), json!(1)))
        .await
        .expect(0);

    let config = test_config(&upstream.url(), &[METHOD]);
    let (engine, _) = build_engine(&config);

    let output = engine.handle("/", None, None, b"{not json").await;
    assert_eq!(output.status.as_u16(), 400);

    let body: serde_json::Value = serde_json::from_slice(&output.body).unwrap();
    assert_eq!(body["error"]["code"], -32602);
    upstream.assert_async().await;
}

#[tokio::test]
async fn rpc_errors_pass_through_and_are_not_cached() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream
        .mock_response(&RpcResponse::error(json!("1"), -32000, "no state"))
        .await;

    let config = test_config(&upstream.url(), &[METHOD]);
    let (engine, cacher) = build_engine(&config);

    let request = RpcRequest::new(json!("1"), METHOD, json!(["1", "2"]));
    let output = engine.handle("/", None, None, &encode(&request)).await;
    assert_eq!(output.status.as_u16(), 200);

    let responses = parse_response_body(&output.body).unwrap();
    let error = responses[0].error.as_ref().unwrap();
    assert_eq!(error.code, -32000);
    assert_eq!(error.message, "no state");

    assert!(cacher.get(&request).await.unwrap().is_empty());
}

#[tokio::test]
async fn unparseable_upstream_body_is_wrapped() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream.mock_garbage_response(200, "<html>oops</html>").await;

    let config = test_config(&upstream.url(), &[METHOD]);
    let (engine, _) = build_engine(&config);

    let request = RpcRequest::new(json!("1"), METHOD, json!(["1"]));
    let output = engine.handle("/", None, None, &encode(&request)).await;
    assert_eq!(output.status.as_u16(), 200);

    let body: serde_json::Value = serde_json::from_slice(&output.body).unwrap();
    assert_eq!(body["error"]["code"], -32603);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("<html>oops</html>"));
}

#[tokio::test]
async fn uncacheable_traffic_passes_through_verbatim() {
    let raw = r#"{"jsonrpc":"2.0","id":"1","result":"untouched"}"#;
    let mut upstream = RpcMockBuilder::new().await;
    upstream.mock_garbage_response(200, raw).await;

    // No cache_methods at all: nothing is cacheable.
    let config = test_config(&upstream.url(), &[]);
    let (engine, _) = build_engine(&config);

    let request = RpcRequest::new(json!("1"), "anything", json!(["1"]));
    let output = engine.handle("/", None, None, &encode(&request)).await;
    assert_eq!(output.status.as_u16(), 200);
    assert_eq!(output.body, raw.as_bytes());
}

#[tokio::test]
async fn empty_body_synthesizes_path_request() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream
        .mock_response(&RpcResponse::success(json!(1), json!("pong")))
        .await;

    let config = test_config(&upstream.url(), &[]);
    let (engine, _) = build_engine(&config);

    let output = engine.handle("/rpc/v0", None, None, b"").await;
    assert_eq!(output.status.as_u16(), 200);
}
