//! Accept loop.

use crate::connection::{ConnectionOptions, RpcConnection};
use crate::error::ServerError;
use crate::registry::MethodRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use urpc_transport::StreamFactory;

/// Backoff after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Server configuration record.
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    /// Address to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Runtime worker threads; 0 means the runtime default. Applied by the
    /// binary that builds the runtime.
    pub workers: usize,
    /// Transport factory; plain TCP when absent.
    pub factory: Option<StreamFactory>,
    /// Per-socket inactivity timeout in milliseconds (0 = none).
    pub socket_timeout_ms: u64,
    /// Policy limit on frame payload size.
    pub max_payload: u32,
}

impl RpcServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            workers: 0,
            factory: None,
            socket_timeout_ms: 0,
            max_payload: urpc_protocol::DEFAULT_MAX_PAYLOAD,
        }
    }

    pub fn with_factory(mut self, factory: StreamFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_socket_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.socket_timeout_ms = timeout_ms;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub handshake_failures: AtomicU64,
}

/// uRPC server: registry plus accept loop.
pub struct RpcServer {
    config: RpcServerConfig,
    registry: MethodRegistry,
    stats: Arc<ServerStats>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig) -> Self {
        Self {
            config,
            registry: MethodRegistry::new(),
            stats: Arc::new(ServerStats::default()),
        }
    }

    /// The registry, for method registration before `run`.
    pub fn registry(&mut self) -> &mut MethodRegistry {
        &mut self.registry
    }

    /// Server statistics handle; clone before `run` to observe afterwards.
    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Binds and accepts until the task is dropped.
    ///
    /// Consumes the server: the registry becomes shared and read-only once
    /// accepting starts.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        self.run_on(listener).await
    }

    /// Accept loop over an already-bound listener (used by tests to bind
    /// port 0 and learn the port first).
    pub async fn run_on(self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        let factory = self
            .config
            .factory
            .clone()
            .unwrap_or_else(StreamFactory::tcp);
        let registry = Arc::new(self.registry);
        let options = ConnectionOptions {
            max_payload: self.config.max_payload,
            idle_timeout: match self.config.socket_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        };

        let tls_mode = match &factory {
            StreamFactory::Tls(_) => "TLS",
            StreamFactory::Tcp(_) => "plain",
        };
        tracing::info!(
            "server listening on {} ({}), {} methods",
            local_addr,
            tls_mode,
            registry.len()
        );

        loop {
            let (socket, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("accept error: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
            self.stats
                .connections_active
                .fetch_add(1, Ordering::Relaxed);

            let factory = factory.clone();
            let registry = registry.clone();
            let options = options.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                let stream = match factory.create_server(socket).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!("[{}] transport setup failed: {}", addr, e);
                        stats.handshake_failures.fetch_add(1, Ordering::Relaxed);
                        stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                        return;
                    }
                };

                tracing::info!("client connected: {}", addr);
                let (conn, reader) = RpcConnection::new(stream, registry, options);
                conn.run(reader).await;

                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                tracing::info!("client disconnected: {}", addr);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RpcServerConfig::new("127.0.0.1", 45900);
        assert_eq!(config.workers, 0);
        assert!(config.factory.is_none());
        assert_eq!(config.socket_timeout_ms, 0);
        assert_eq!(config.max_payload, urpc_protocol::DEFAULT_MAX_PAYLOAD);
    }

    #[tokio::test]
    async fn test_server_accepts_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut server = RpcServer::new(RpcServerConfig::new("127.0.0.1", 0));
        server
            .registry()
            .register_name("Example.Echo", |_ctx, body: bytes::Bytes| async move {
                Ok(body.to_vec())
            });
        let stats = server.stats();

        let task = tokio::spawn(server.run_on(listener));

        let socket = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.connections_total.load(Ordering::Relaxed), 1);

        drop(socket);
        task.abort();
    }
}
