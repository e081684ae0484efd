//! # urpc-server
//!
//! Server side of uRPC: the method registry, the per-connection reader and
//! dispatcher with cooperative cancellation, and the accept loop.

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod registry;
pub mod server;

pub use config::Config;
pub use connection::{ConnectionOptions, RpcConnection};
pub use context::{HandlerResult, RpcContext, RpcError};
pub use error::ServerError;
pub use registry::MethodRegistry;
pub use server::{RpcServer, RpcServerConfig, ServerStats};
