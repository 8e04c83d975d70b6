//! Mock upstream for JSON-RPC testing.
//!
//! Wraps mockito with builders for the response shapes the proxy cares
//! about: single objects, batches, reordered batches, and bodies matched
//! against what the proxy actually forwards.

use fulcrum_core::types::RpcResponse;
use mockito::{Matcher, Mock, Server, ServerGuard};

/// Builder for a mock upstream RPC endpoint.
pub struct RpcMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl RpcMockBuilder {
    pub async fn new() -> Self {
        Self {
            server: Server::new_async().await,
            mocks: Vec::new(),
        }
    }

    /// Base URL of the mock server.
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Answers any POST with the given response object.
    pub async fn mock_response(&mut self, response: &RpcResponse) -> &mut Self {
        let body = serde_json::to_string(response).expect("response serializes");
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
        self.mocks.push(mock);
        self
    }

    /// Answers any POST with a batch of responses, exactly as given — the
    /// caller controls the order to exercise reordering behavior.
    pub async fn mock_batch_response(&mut self, responses: &[RpcResponse]) -> &mut Self {
        let body = serde_json::to_string(responses).expect("responses serialize");
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
        self.mocks.push(mock);
        self
    }

    /// Expects a *single object* request body (not an array) carrying the
    /// given ID, and answers with `response`. Asserting on this mock proves
    /// the proxy collapsed a partially-cached batch down to a bare object.
    pub async fn mock_single_object_request(
        &mut self,
        id: &str,
        response: &RpcResponse,
    ) -> &mut Self {
        let body = serde_json::to_string(response).expect("response serializes");
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Matcher::Regex(format!(
                r#"^\{{"jsonrpc":"2\.0","id":"{id}""#
            )))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
        self.mocks.push(mock);
        self
    }

    /// Answers any POST with a non-JSON body and the given status.
    pub async fn mock_garbage_response(&mut self, status: usize, body: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(status)
            .with_body(body.to_string())
            .create_async()
            .await;
        self.mocks.push(mock);
        self
    }

    /// Caps how many times the most recent mock may be hit.
    pub fn expect(&mut self, hits: usize) -> &mut Self {
        if let Some(mock) = self.mocks.pop() {
            self.mocks.push(mock.expect(hits));
        }
        self
    }

    /// Asserts every registered expectation.
    pub async fn assert_async(&self) {
        for mock in &self.mocks {
            mock.assert_async().await;
        }
    }
}
