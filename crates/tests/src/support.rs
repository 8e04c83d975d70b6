//! Shared builders for proxy tests.

use std::sync::Arc;

use fulcrum_core::cache::{MemoryStore, ResponseCacher};
use fulcrum_core::config::{AppConfig, CacheMethodConfig, MethodKind};
use fulcrum_core::matcher::Matcher;
use fulcrum_core::proxy::ProxyEngine;

pub const TEST_SECRET: &str = "token";

/// A validated config pointing at `upstream_url` with the given methods
/// cached by their full params.
pub fn test_config(upstream_url: &str, methods: &[&str]) -> AppConfig {
    let mut config = AppConfig::default();
    config.proxy_url = upstream_url.to_string();
    config.jwt_secret = TEST_SECRET.to_string();
    for method in methods {
        config.cache_methods.push(CacheMethodConfig {
            name: (*method).to_string(),
            enabled: true,
            cache_by_params: true,
            no_store_cache: false,
            no_update_cache: false,
            params_in_cache_by_id: Vec::new(),
            params_in_cache_by_name: Vec::new(),
            kind: Some(MethodKind::Regular),
            params_for_request: None,
        });
    }
    config.validate().expect("test config validates");
    config
}

/// An engine over a fresh in-memory store, wired per `config`.
pub fn build_engine(config: &AppConfig) -> (Arc<ProxyEngine>, Arc<ResponseCacher>) {
    let store = Arc::new(MemoryStore::new(
        config.cache_settings.memory.expiration,
        config.cache_settings.memory.cleanup_interval,
    ));
    let matcher = Arc::new(Matcher::from_config(&config.cache_methods));
    let cacher = Arc::new(ResponseCacher::new(store, matcher));
    let engine = Arc::new(ProxyEngine::new(
        Arc::clone(&cacher),
        config.proxy_url.parse().expect("upstream url parses"),
        false,
        false,
    ));
    (engine, cacher)
}
