//! TLS configuration records for the two sides of a connection.

use std::path::PathBuf;

/// TLS configuration for client connections.
#[derive(Debug, Clone)]
pub struct TlsClientConfig {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Verify the server certificate (disable for development only).
    pub verify_peer: bool,
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If `None`, system roots are used.
    pub ca_cert_file: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_file: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_file: Option<PathBuf>,
    /// Server name for SNI and verification (defaults to the target host).
    pub server_name: Option<String>,
    /// Derive an application key from the session and encrypt payloads.
    pub app_encryption: bool,
}

impl Default for TlsClientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verify_peer: true,
            ca_cert_file: None,
            client_cert_file: None,
            client_key_file: None,
            server_name: None,
            app_encryption: true,
        }
    }
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_file = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_file = Some(cert_path.into());
        self.client_key_file = Some(key_path.into());
        self.enabled = true;
        self
    }

    pub fn with_no_verify(mut self) -> Self {
        self.verify_peer = false;
        self.enabled = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn with_app_encryption(mut self, enabled: bool) -> Self {
        self.app_encryption = enabled;
        self
    }
}

/// TLS configuration for the server side.
#[derive(Debug, Clone)]
pub struct TlsServerConfig {
    /// Enable TLS for accepted connections.
    pub enabled: bool,
    /// Require and verify a client certificate (mTLS).
    pub require_client_cert: bool,
    /// Path to PEM-encoded CA certificate(s) for client-cert validation.
    pub ca_cert_file: Option<PathBuf>,
    /// Path to the PEM-encoded server certificate chain.
    pub server_cert_file: Option<PathBuf>,
    /// Path to the PEM-encoded server private key.
    pub server_key_file: Option<PathBuf>,
    /// Derive an application key from the session and encrypt payloads.
    pub app_encryption: bool,
}

impl Default for TlsServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            require_client_cert: false,
            ca_cert_file: None,
            server_cert_file: None,
            server_key_file: None,
            app_encryption: true,
        }
    }
}

impl TlsServerConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            server_cert_file: Some(cert_path.into()),
            server_key_file: Some(key_path.into()),
            ..Self::default()
        }
    }

    pub fn with_client_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_file = Some(path.into());
        self
    }

    pub fn with_require_client_cert(mut self) -> Self {
        self.require_client_cert = true;
        self
    }

    pub fn with_app_encryption(mut self, enabled: bool) -> Self {
        self.app_encryption = enabled;
        self
    }
}
