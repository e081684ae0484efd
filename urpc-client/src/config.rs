//! Client and pool configuration records.

use urpc_transport::StreamFactory;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Transport factory; plain TCP when absent.
    pub factory: Option<StreamFactory>,
    /// Liveness ping interval in milliseconds (0 = no liveness task).
    pub ping_interval_ms: u64,
    /// Per-socket connect/inactivity timeout in milliseconds (0 = none).
    pub socket_timeout_ms: u64,
}

impl RpcClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            factory: None,
            ping_interval_ms: 0,
            socket_timeout_ms: 0,
        }
    }

    pub fn with_factory(mut self, factory: StreamFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_ping_interval_ms(mut self, interval_ms: u64) -> Self {
        self.ping_interval_ms = interval_ms;
        self
    }

    pub fn with_socket_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.socket_timeout_ms = timeout_ms;
        self
    }
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct RpcClientPoolConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Transport factory shared by all pooled clients.
    pub factory: Option<StreamFactory>,
    /// Per-socket connect/inactivity timeout in milliseconds (0 = none).
    pub socket_timeout_ms: u64,
    /// Liveness ping interval in milliseconds (0 = no liveness task).
    pub ping_interval_ms: u64,
    /// Maximum number of pooled clients; 0 is clamped to 1.
    pub max_clients: usize,
}

impl RpcClientPoolConfig {
    pub fn new(host: impl Into<String>, port: u16, max_clients: usize) -> Self {
        Self {
            host: host.into(),
            port,
            factory: None,
            socket_timeout_ms: 0,
            ping_interval_ms: 0,
            max_clients,
        }
    }

    pub fn with_factory(mut self, factory: StreamFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_ping_interval_ms(mut self, interval_ms: u64) -> Self {
        self.ping_interval_ms = interval_ms;
        self
    }

    pub fn with_socket_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.socket_timeout_ms = timeout_ms;
        self
    }

    /// Configuration for one pooled client.
    pub fn client_config(&self) -> RpcClientConfig {
        RpcClientConfig {
            host: self.host.clone(),
            port: self.port,
            factory: self.factory.clone(),
            ping_interval_ms: self.ping_interval_ms,
            socket_timeout_ms: self.socket_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builders() {
        let config = RpcClientConfig::new("127.0.0.1", 45900)
            .with_ping_interval_ms(5000)
            .with_socket_timeout_ms(2000);
        assert_eq!(config.ping_interval_ms, 5000);
        assert_eq!(config.socket_timeout_ms, 2000);
        assert!(config.factory.is_none());
    }

    #[test]
    fn test_pool_config_propagates_to_clients() {
        let config = RpcClientPoolConfig::new("db.internal", 7000, 8)
            .with_ping_interval_ms(1000)
            .with_socket_timeout_ms(500);
        let client = config.client_config();
        assert_eq!(client.host, "db.internal");
        assert_eq!(client.port, 7000);
        assert_eq!(client.ping_interval_ms, 1000);
        assert_eq!(client.socket_timeout_ms, 500);
    }
}
