//! In-process cache store.
//!
//! A `DashMap` with per-entry deadlines and an optional janitor task.
//! Expired entries are dropped lazily on read and swept periodically by the
//! janitor; `cleanup_interval < 0` disables the sweep entirely and
//! `expiration == 0` makes entries immortal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::config::MemoryCacheConfig;
use crate::metrics;
use crate::types::{RpcRequest, RpcResponse};

use super::{CacheEntry, CacheError, CacheStore};

struct StoredEntry {
    entry: CacheEntry,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|deadline| deadline <= now).unwrap_or(false)
    }
}

pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredEntry>>,
    default_ttl: Option<Duration>,
    closed: AtomicBool,
    janitor: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStore {
    /// Creates a store with the given entry lifetime and janitor period,
    /// both in seconds. Must be called from within a tokio runtime when the
    /// janitor is enabled.
    pub fn new(default_expiration: u64, cleanup_interval: i64) -> Self {
        let entries: Arc<DashMap<String, StoredEntry>> = Arc::new(DashMap::new());
        let janitor = if cleanup_interval > 0 {
            let entries = Arc::clone(&entries);
            let period = Duration::from_secs(cleanup_interval as u64);
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let now = Instant::now();
                    entries.retain(|_, stored| !stored.is_expired(now));
                    metrics::set_cache_size(entries.len());
                    debug!(size = entries.len(), "cache janitor sweep finished");
                }
            }))
        } else {
            None
        };
        Self {
            entries,
            default_ttl: (default_expiration > 0).then(|| Duration::from_secs(default_expiration)),
            closed: AtomicBool::new(false),
            janitor: Mutex::new(janitor),
        }
    }

    pub fn from_config(config: &MemoryCacheConfig) -> Self {
        Self::new(config.expiration, config.cleanup_interval)
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn set(
        &self,
        key: &str,
        request: &RpcRequest,
        response: &RpcResponse,
    ) -> Result<(), CacheError> {
        self.ensure_open()?;
        let expires_at = self.default_ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                entry: CacheEntry {
                    request: request.clone(),
                    response: response.clone(),
                },
                expires_at,
            },
        );
        metrics::set_cache_size(self.entries.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<RpcResponse, CacheError> {
        self.ensure_open()?;
        let now = Instant::now();
        match self.entries.get(key) {
            Some(stored) if stored.is_expired(now) => {
                drop(stored);
                self.entries.remove(key);
                metrics::set_cache_size(self.entries.len());
                Ok(RpcResponse::default())
            }
            Some(stored) => Ok(stored.entry.response.clone()),
            None => Ok(RpcResponse::default()),
        }
    }

    async fn requests(&self) -> Result<Vec<RpcRequest>, CacheError> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|stored| !stored.is_expired(now))
            .map(|stored| stored.entry.request.clone())
            .collect())
    }

    async fn clean(&self) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.entries.clear();
        metrics::set_cache_size(0);
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.closed.store(true, Ordering::Release);
        if let Some(janitor) = self.janitor.lock().take() {
            janitor.abort();
        }
        Ok(())
    }
}
