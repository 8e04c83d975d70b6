//! HTTP surface for the fulcrum proxy: routing and the JWT middleware.
//!
//! Exposed as a library so the integration-test crate can drive the full
//! router without spawning the binary.

pub mod middleware;
pub mod router;
