//! Redis cache store.
//!
//! Every entry lives in a single hash (`cache_settings.redis.hash_name`,
//! default `filecoin`) keyed by the derived cache key. Entries are encoded
//! as MessagePack, which round-trips arbitrary JSON scalars and nesting.
//!
//! TLS engages when the URI scheme is `rediss`. Certificate verification is
//! on unless `tls_insecure` is set, which appends the `#insecure` fragment
//! understood by the redis driver.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use crate::config::RedisCacheConfig;
use crate::types::{RpcRequest, RpcResponse};

use super::{CacheEntry, CacheError, CacheStore};

pub struct RedisStore {
    conn: ConnectionManager,
    hash_name: String,
    closed: AtomicBool,
}

impl RedisStore {
    /// Connects and verifies reachability with a `PING`; construction fails
    /// when the server cannot be reached.
    pub async fn connect(config: &RedisCacheConfig) -> Result<Self, CacheError> {
        let uri = effective_uri(config);
        let client = redis::Client::open(uri.as_str())?;
        let mut conn = ConnectionManager::new(client).await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;
        info!(hash = %config.hash_name, "redis cache store connected");
        Ok(Self {
            conn,
            hash_name: config.hash_name.clone(),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<ConnectionManager, CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(self.conn.clone())
    }
}

fn effective_uri(config: &RedisCacheConfig) -> String {
    if config.tls_insecure && config.uri.starts_with("rediss") && !config.uri.contains('#') {
        format!("{}#insecure", config.uri)
    } else {
        config.uri.clone()
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn set(
        &self,
        key: &str,
        request: &RpcRequest,
        response: &RpcResponse,
    ) -> Result<(), CacheError> {
        let mut conn = self.ensure_open()?;
        let entry = CacheEntry {
            request: request.clone(),
            response: response.clone(),
        };
        let encoded = rmp_serde::to_vec_named(&entry)?;
        let _: () = conn.hset(&self.hash_name, key, encoded).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<RpcResponse, CacheError> {
        let mut conn = self.ensure_open()?;
        let data: Option<Vec<u8>> = conn.hget(&self.hash_name, key).await?;
        match data {
            Some(bytes) => {
                let entry: CacheEntry = rmp_serde::from_slice(&bytes)?;
                Ok(entry.response)
            }
            None => Ok(RpcResponse::default()),
        }
    }

    async fn requests(&self) -> Result<Vec<RpcRequest>, CacheError> {
        let mut conn = self.ensure_open()?;
        let values: Vec<Vec<u8>> = conn.hvals(&self.hash_name).await?;
        let mut requests = Vec::with_capacity(values.len());
        for bytes in values {
            let entry: CacheEntry = rmp_serde::from_slice(&bytes)?;
            requests.push(entry.request);
        }
        Ok(requests)
    }

    async fn clean(&self) -> Result<(), CacheError> {
        let mut conn = self.ensure_open()?;
        let _: () = conn.del(&self.hash_name).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
