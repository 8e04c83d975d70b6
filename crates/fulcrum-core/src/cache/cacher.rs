//! Response cacher: matcher + store composition.
//!
//! Reads try the derived keys most-specific-first and return the first
//! non-empty response; writes fan out to every derived key so a later read
//! under any scheme finds the same entry. A request whose method derives no
//! keys is simply not cached — both operations are silent no-ops.

use std::sync::Arc;

use tracing::warn;

use crate::matcher::Matcher;
use crate::types::{RpcRequest, RpcResponse};

use super::{CacheError, CacheStore};

pub struct ResponseCacher {
    store: Arc<dyn CacheStore>,
    matcher: Arc<Matcher>,
}

impl ResponseCacher {
    pub fn new(store: Arc<dyn CacheStore>, matcher: Arc<Matcher>) -> Self {
        Self { store, matcher }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// The cached response for `request`, or the empty sentinel.
    ///
    /// Store failures on individual keys are accumulated; the first
    /// non-empty response short-circuits. The combined error is returned
    /// only when no key produced data.
    pub async fn get(&self, request: &RpcRequest) -> Result<RpcResponse, CacheError> {
        let keys = self.matcher.keys(&request.method, &request.params);
        if keys.is_empty() {
            return Ok(RpcResponse::default());
        }
        let mut failures = Vec::new();
        for key in &keys {
            match self.store.get(&key.key).await {
                Ok(response) if !response.is_empty() => return Ok(response),
                Ok(_) => {}
                Err(err) => {
                    warn!(key = %key.key, error = %err, "cache read failed");
                    failures.push(err);
                }
            }
        }
        CacheError::combine(failures).map(|()| RpcResponse::default())
    }

    /// Writes `response` under every key derived from `request`.
    pub async fn set(
        &self,
        request: &RpcRequest,
        response: &RpcResponse,
    ) -> Result<(), CacheError> {
        let keys = self.matcher.keys(&request.method, &request.params);
        if keys.is_empty() {
            return Ok(());
        }
        let mut failures = Vec::new();
        for key in &keys {
            if let Err(err) = self.store.set(&key.key, request, response).await {
                failures.push(err);
            }
        }
        CacheError::combine(failures)
    }
}
