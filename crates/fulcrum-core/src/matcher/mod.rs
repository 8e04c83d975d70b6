//! Request fingerprinting.
//!
//! The matcher indexes the configured [`CacheMethodConfig`] entries by
//! method name (several key schemes may share a name) and turns an inbound
//! `(method, params)` pair into zero or more cache keys.
//!
//! Key material is a SHA-256 accumulator over the canonical JSON encoding
//! of each projected parameter; the key is `method_<hex digest>`, or the
//! bare method name when no parameters participate. Keys carry a
//! *cardinality* — the number of parameters that contributed — used only to
//! order multiple key schemes for one method, most specific first.

use std::collections::HashMap;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::error;

use crate::config::{CacheMethodConfig, MethodKind};

/// A derived cache key and the number of parameters behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheKey {
    pub key: String,
    pub cardinality: usize,
}

impl CacheKey {
    fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

/// A custom method the refresh worker issues with fixed parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomMethod {
    pub name: String,
    pub params: Value,
}

#[derive(Debug, thiserror::Error)]
enum ProjectionError {
    #[error("invalid index {0} in slice params")]
    MissingIndex(usize),

    #[error("invalid parameter key {0:?} in map params")]
    MissingName(String),

    #[error("cannot match parameters against the configured scheme")]
    Unmatchable,
}

#[derive(Debug, Clone)]
struct MethodSpec {
    name: String,
    kind: MethodKind,
    cache_by_params: bool,
    no_store_cache: bool,
    no_update_cache: bool,
    params_by_index: Vec<usize>,
    params_by_name: Vec<String>,
    request_params: Value,
}

impl MethodSpec {
    /// Selects the parameters that participate in the cache key.
    ///
    /// Index schemes read positions `0..len(indices)` off the front of an
    /// array params value; the configured index values contribute only
    /// their count. Name schemes look up each (pre-sorted) name in an
    /// object params value. A scheme that cannot be applied to the given
    /// shape is a derivation failure.
    fn project(&self, params: &Value) -> Result<Vec<Value>, ProjectionError> {
        if !self.cache_by_params {
            return Ok(Vec::new());
        }
        if self.params_by_index.is_empty() && self.params_by_name.is_empty() {
            // cache by the whole params value
            return Ok(vec![params.clone()]);
        }
        if !self.params_by_index.is_empty() {
            if let Some(items) = params.as_array() {
                let mut projected = Vec::with_capacity(self.params_by_index.len());
                for position in 0..self.params_by_index.len() {
                    match items.get(position) {
                        Some(value) => projected.push(value.clone()),
                        None => return Err(ProjectionError::MissingIndex(position)),
                    }
                }
                return Ok(projected);
            }
        }
        if !self.params_by_name.is_empty() {
            if let Some(map) = params.as_object() {
                let mut projected = Vec::with_capacity(self.params_by_name.len());
                for name in &self.params_by_name {
                    match map.get(name) {
                        Some(value) => projected.push(value.clone()),
                        None => return Err(ProjectionError::MissingName(name.clone())),
                    }
                }
                return Ok(projected);
            }
        }
        Err(ProjectionError::Unmatchable)
    }

    fn to_key(&self, method: &str, params: &Value) -> CacheKey {
        let projected = match self.project(params) {
            Ok(projected) => projected,
            Err(err) => {
                error!(method, error = %err, "cache key derivation failed");
                return CacheKey::default();
            }
        };
        let cardinality = projected.len();
        let key = if projected.is_empty() {
            method.to_string()
        } else {
            format!("{method}_{}", digest(&projected))
        };
        CacheKey { key, cardinality }
    }
}

fn digest(params: &[Value]) -> String {
    let mut hasher = Sha256::new();
    for value in params {
        if let Ok(encoded) = serde_json::to_vec(value) {
            hasher.update(&encoded);
        }
    }
    hex::encode(hasher.finalize())
}

/// Immutable method-to-key-scheme index built from configuration.
pub struct Matcher {
    methods: HashMap<String, Vec<MethodSpec>>,
}

impl Matcher {
    pub fn from_config(methods: &[CacheMethodConfig]) -> Self {
        let mut matcher = Matcher {
            methods: HashMap::new(),
        };
        for method in methods {
            matcher.add_method(method);
        }
        matcher
    }

    fn add_method(&mut self, method: &CacheMethodConfig) {
        if !method.enabled {
            return;
        }
        let mut params_by_name = method.params_in_cache_by_name.clone();
        params_by_name.sort();
        self.methods
            .entry(method.name.clone())
            .or_default()
            .push(MethodSpec {
                name: method.name.clone(),
                kind: method.kind.unwrap_or(MethodKind::Regular),
                cache_by_params: method.cache_by_params,
                no_store_cache: method.no_store_cache,
                no_update_cache: method.no_update_cache,
                params_by_index: method.params_in_cache_by_id.clone(),
                params_by_name,
                request_params: method.params_for_request.clone().unwrap_or(Value::Null),
            });
    }

    /// Cache keys for a request, sorted by decreasing cardinality.
    /// Empty when the method is not configured or every scheme failed.
    pub fn keys(&self, method: &str, params: &Value) -> Vec<CacheKey> {
        let Some(specs) = self.methods.get(method) else {
            return Vec::new();
        };
        let mut keys: Vec<CacheKey> = specs
            .iter()
            .map(|spec| spec.to_key(method, params))
            .filter(|key| !key.is_empty())
            .collect();
        keys.sort_by(|a, b| b.cardinality.cmp(&a.cardinality));
        keys
    }

    /// True when the method is configured and no scheme opts out of storing.
    pub fn is_cacheable(&self, method: &str) -> bool {
        match self.methods.get(method) {
            Some(specs) => specs.iter().all(|spec| !spec.no_store_cache),
            None => false,
        }
    }

    /// True when the method is configured and no scheme opts out of refresh.
    pub fn is_updatable(&self, method: &str) -> bool {
        match self.methods.get(method) {
            Some(specs) => specs.iter().all(|spec| !spec.no_update_cache),
            None => false,
        }
    }

    /// Every configured custom method with its fixed request parameters.
    pub fn custom_methods(&self) -> Vec<CustomMethod> {
        self.methods
            .values()
            .flatten()
            .filter(|spec| spec.kind.is_custom())
            .map(|spec| CustomMethod {
                name: spec.name.clone(),
                params: spec.request_params.clone(),
            })
            .collect()
    }
}
