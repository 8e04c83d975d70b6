//! Cache storage.
//!
//! Two interchangeable backends sit behind [`CacheStore`]: an in-process
//! TTL map ([`memory::MemoryStore`]) and a Redis hash ([`redis::RedisStore`]).
//! Both store full [`CacheEntry`] pairs — the request is retained alongside
//! the response so the refresh worker can re-issue the exact call that
//! produced an entry.
//!
//! A miss is never an error: `get` returns the empty-response sentinel and
//! reserves errors for backend I/O failures.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, CacheStorage};
use crate::types::{RpcRequest, RpcResponse};

pub mod cacher;
pub mod memory;
pub mod redis;

pub use cacher::ResponseCacher;
pub use memory::MemoryStore;
pub use redis::RedisStore;

/// A stored `(request, response)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub request: RpcRequest,
    pub response: RpcResponse,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache store is closed")]
    Closed,

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("cannot encode cache entry: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("cannot decode cache entry: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multi(Vec<CacheError>),
}

impl CacheError {
    /// Collapses accumulated failures: none is `Ok`, one is itself,
    /// several become [`CacheError::Multi`].
    pub fn combine(mut errors: Vec<CacheError>) -> Result<(), CacheError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CacheError::Multi(errors)),
        }
    }
}

/// Key-addressed storage for cache entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Unconditionally overwrites the entry under `key`.
    async fn set(
        &self,
        key: &str,
        request: &RpcRequest,
        response: &RpcResponse,
    ) -> Result<(), CacheError>;

    /// Returns the stored response, or the empty sentinel on a miss.
    async fn get(&self, key: &str) -> Result<RpcResponse, CacheError>;

    /// The request side of every live entry.
    async fn requests(&self) -> Result<Vec<RpcRequest>, CacheError>;

    /// Drops all entries.
    async fn clean(&self) -> Result<(), CacheError>;

    /// Releases underlying resources; later operations fail.
    async fn close(&self) -> Result<(), CacheError>;
}

/// Builds the configured backend. The Redis variant verifies connectivity
/// and fails here if the server is unreachable.
pub async fn from_config(config: &AppConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
    match config.cache_settings.storage {
        CacheStorage::Memory => Ok(Arc::new(MemoryStore::from_config(
            &config.cache_settings.memory,
        ))),
        CacheStorage::Redis => Ok(Arc::new(
            RedisStore::connect(&config.cache_settings.redis).await?,
        )),
    }
}
