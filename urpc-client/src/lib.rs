//! # urpc-client
//!
//! Client side of uRPC: a connect-once client with a correlation table for
//! in-flight calls, ping-based liveness, and a bounded client pool with
//! round-robin leases.

pub mod client;
pub mod config;
pub mod error;
pub mod pool;

pub use client::RpcClient;
pub use config::{RpcClientConfig, RpcClientPoolConfig};
pub use error::ClientError;
pub use pool::{RpcClientLease, RpcClientPool};
