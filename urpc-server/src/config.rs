//! Daemon configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via URPC_CONFIG)
//! 3. Environment variables

use crate::error::ServerError;
use crate::server::RpcServerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use urpc_transport::{StreamFactory, TlsServerConfig};

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// TLS configuration.
    pub tls: TlsSection,
}

impl Config {
    /// Loads configuration from file, then applies environment overrides.
    pub fn load() -> Result<Self, ServerError> {
        let mut config = if let Ok(path) = std::env::var("URPC_CONFIG") {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("cannot read {:?}: {}", path, e)))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ServerError::Config(format!("cannot parse {:?}: {}", path, e)))
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.tls.apply_env_overrides();
    }

    /// Validates cross-field coherence.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.tls.enabled {
            if self.tls.cert_file.is_none() {
                return Err(ServerError::Config("tls.cert_file not set".into()));
            }
            if self.tls.key_file.is_none() {
                return Err(ServerError::Config("tls.key_file not set".into()));
            }
            if self.tls.require_client_cert && self.tls.ca_file.is_none() {
                return Err(ServerError::Config(
                    "tls.ca_file required when tls.require_client_cert".into(),
                ));
            }
        }
        Ok(())
    }

    /// Builds the stream factory for accepted connections.
    pub fn stream_factory(&self) -> Result<StreamFactory, ServerError> {
        if !self.tls.enabled {
            return Ok(StreamFactory::tcp());
        }

        let mut tls = TlsServerConfig::new(
            self.tls.cert_file.clone().unwrap_or_default(),
            self.tls.key_file.clone().unwrap_or_default(),
        )
        .with_app_encryption(self.tls.app_encryption);
        if let Some(ref ca) = self.tls.ca_file {
            tls = tls.with_client_ca(ca);
        }
        if self.tls.require_client_cert {
            tls = tls.with_require_client_cert();
        }

        Ok(StreamFactory::tls_server(tls)?)
    }

    /// Builds the server configuration record.
    pub fn server_config(&self) -> Result<RpcServerConfig, ServerError> {
        let mut config = RpcServerConfig::new(self.network.host.clone(), self.network.port)
            .with_workers(self.network.workers)
            .with_socket_timeout_ms(self.network.socket_timeout_ms);
        config.factory = Some(self.stream_factory()?);
        Ok(config)
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Runtime worker threads (0 = runtime default).
    pub workers: usize,
    /// Per-socket inactivity timeout in milliseconds (0 = none).
    pub socket_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: urpc_protocol::DEFAULT_PORT,
            workers: 0,
            socket_timeout_ms: 0,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("URPC_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("URPC_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }
        if let Ok(workers) = std::env::var("URPC_WORKERS") {
            if let Ok(parsed) = workers.parse() {
                self.workers = parsed;
            }
        }
        if let Ok(timeout) = std::env::var("URPC_SOCKET_TIMEOUT_MS") {
            if let Ok(parsed) = timeout.parse() {
                self.socket_timeout_ms = parsed;
            }
        }
    }
}

/// TLS section of the daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSection {
    /// Enable TLS for accepted connections.
    pub enabled: bool,
    /// PEM-encoded server certificate chain.
    pub cert_file: Option<PathBuf>,
    /// PEM-encoded server private key.
    pub key_file: Option<PathBuf>,
    /// PEM-encoded CA bundle for client-cert validation.
    pub ca_file: Option<PathBuf>,
    /// Require and verify a client certificate (mTLS).
    pub require_client_cert: bool,
    /// Derive an application key and encrypt payloads.
    pub app_encryption: bool,
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_file: None,
            key_file: None,
            ca_file: None,
            require_client_cert: false,
            app_encryption: true,
        }
    }
}

impl TlsSection {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("URPC_TLS") {
            self.enabled = enabled == "1" || enabled.eq_ignore_ascii_case("true");
        }
        if let Ok(path) = std::env::var("URPC_TLS_CERT") {
            self.cert_file = Some(path.into());
        }
        if let Ok(path) = std::env::var("URPC_TLS_KEY") {
            self.key_file = Some(path.into());
        }
        if let Ok(path) = std::env::var("URPC_TLS_CA") {
            self.ca_file = Some(path.into());
        }
        if let Ok(required) = std::env::var("URPC_TLS_REQUIRE_CLIENT_CERT") {
            self.require_client_cert = required == "1" || required.eq_ignore_ascii_case("true");
        }
        if let Ok(aes) = std::env::var("URPC_APP_ENCRYPTION") {
            self.app_encryption = aes == "1" || aes.eq_ignore_ascii_case("true");
        }
    }
}
