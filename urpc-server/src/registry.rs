//! Method registry: method id → handler.

use crate::context::{HandlerResult, RpcContext, RpcError};
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use urpc_protocol::fnv1a64;

/// Boxed handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// A registered method handler.
pub type RpcHandler = Arc<dyn Fn(RpcContext, Bytes) -> HandlerFuture + Send + Sync>;

/// Mapping from 64-bit method id to handler.
///
/// Registration happens before the server starts accepting; every
/// connection then shares the registry read-only. Registering under an
/// existing id replaces the previous handler.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: HashMap<u64, RpcHandler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under an explicit method id.
    pub fn register<F, Fut>(&mut self, method_id: u64, handler: F)
    where
        F: Fn(RpcContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: RpcHandler = Arc::new(move |ctx, body| Box::pin(handler(ctx, body)));
        self.handlers.insert(method_id, handler);
    }

    /// Registers a handler under a method name, hashing it at insertion.
    pub fn register_name<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(RpcContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(fnv1a64(name.as_bytes()), handler);
    }

    /// Registers a handler returning UTF-8 text, wrapped to the canonical
    /// byte-vector return.
    pub fn register_utf8<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(RpcContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, RpcError>> + Send + 'static,
    {
        self.register_name(name, move |ctx, body| {
            let fut = handler(ctx, body);
            async move { fut.await.map(String::into_bytes) }
        });
    }

    /// Looks up the handler for a method id.
    pub fn find(&self, method_id: u64) -> Option<RpcHandler> {
        self.handlers.get(&method_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
