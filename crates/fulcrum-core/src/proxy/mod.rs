//! The request path: parsing, the cache-and-forward engine, and the
//! JSON-RPC error shapes it produces.

pub mod engine;
pub mod requests;

pub use engine::{EngineOutput, ProxyEngine};
