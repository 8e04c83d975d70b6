//! Reusable mock types for testing.

pub mod rpc_mock;

pub use rpc_mock::RpcMockBuilder;
