//! # Fulcrum Core
//!
//! Core library for fulcrum, a caching JSON-RPC reverse proxy for
//! Filecoin-style RPC endpoints.
//!
//! The request path is built from a small set of components:
//!
//! - **[`types`]**: JSON-RPC 2.0 request/response model, the empty-response
//!   sentinel, and the coercing ID equality used when merging batches.
//!
//! - **[`matcher`]**: derives cache keys from a method name and its
//!   parameters under the configured per-method key schemes.
//!
//! - **[`cache`]**: the storage layer — an in-memory TTL store and a Redis
//!   hash store behind one trait, composed with the matcher by
//!   [`cache::ResponseCacher`].
//!
//! - **[`proxy`]**: the batch-aware transport: split a batch into cached and
//!   forwarded subsets, rewrite the upstream body, merge responses back in
//!   client order, and populate the cache.
//!
//! - **[`refresh`]**: two periodic workers that re-issue configured custom
//!   methods and cached updatable requests against the upstream.
//!
//! - **[`auth`]**: HMAC JWT minting and verification for the proxy's own
//!   outbound calls and for inbound request authentication.
//!
//! - **[`metrics`]**: Prometheus recorder and typed recording helpers.
//!
//! ## Request Flow
//!
//! ```text
//! Client Request (single or batch)
//!       │
//!       ▼
//! ┌─────────────┐
//! │  JWT check  │ ─── Invalid ──► 401 Unauthorized
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐
//! │ ProxyEngine │ parse → cache lookup per request
//! └──────┬──────┘
//!        │ misses only
//!        ▼
//! ┌─────────────┐
//! │  Upstream   │ single object or JSON array
//! └──────┬──────┘
//!        ▼
//!   merge by ID → populate cache → respond in client order
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod matcher;
pub mod metrics;
pub mod proxy;
pub mod refresh;
pub mod types;
