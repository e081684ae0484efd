//! urpc-cli - one-shot uRPC call tool.
//!
//! Pings the target server, issues a single call, and prints the response
//! as UTF-8 and as a hex dump.
//!
//! Exit codes: 0 success, 1 usage, 2 bad arguments, 3 ping failed,
//! 4 empty response, 110 connect/ping timeout, 111 call timeout.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use urpc_client::{RpcClient, RpcClientConfig};
use urpc_transport::{StreamFactory, TlsClientConfig};

const EXIT_USAGE: u8 = 1;
const EXIT_BAD_ARGS: u8 = 2;
const EXIT_PING_FAILED: u8 = 3;
const EXIT_EMPTY_RESPONSE: u8 = 4;
const EXIT_PING_TIMEOUT: u8 = 110;
const EXIT_CALL_TIMEOUT: u8 = 111;

#[derive(Parser)]
#[command(name = "urpc-cli")]
#[command(about = "One-shot uRPC call tool")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(long)]
    host: String,

    /// Server port
    #[arg(long)]
    port: u16,

    /// Dotted method name, e.g. Example.Echo
    #[arg(long)]
    method: String,

    /// UTF-8 request payload
    #[arg(long, default_value = "")]
    data: String,

    // ===== TLS options =====
    /// Enable TLS
    #[arg(long)]
    tls: bool,

    /// Disable server certificate verification (INSECURE)
    #[arg(long)]
    tls_no_verify: bool,

    /// CA certificate file
    #[arg(long)]
    tls_ca: Option<PathBuf>,

    /// Client certificate (for mTLS)
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// Client private key (for mTLS)
    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// SNI / hostname for verification
    #[arg(long)]
    tls_server_name: Option<String>,

    // ===== Timeout options =====
    /// Socket inactivity/IO timeout in milliseconds
    #[arg(long, default_value_t = 0)]
    timeout_ms: u64,

    // ===== App-level AES options (over TLS) =====
    /// Enable AES-256-GCM app-level encryption (default)
    #[arg(long)]
    aes: bool,

    /// Disable AES-256-GCM app-level encryption
    #[arg(long, conflicts_with = "aes")]
    no_aes: bool,
}

impl Cli {
    fn tls_enabled(&self) -> bool {
        self.tls
            || self.tls_no_verify
            || self.tls_ca.is_some()
            || self.tls_cert.is_some()
            || self.tls_key.is_some()
            || self.tls_server_name.is_some()
    }

    fn tls_config(&self) -> TlsClientConfig {
        let mut config = TlsClientConfig::new().with_app_encryption(!self.no_aes);
        if self.tls_no_verify {
            config = config.with_no_verify();
        }
        if let Some(ref ca) = self.tls_ca {
            config = config.with_ca_cert(ca);
        }
        if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            config = config.with_client_cert(cert, key);
        }
        if let Some(ref name) = self.tls_server_name {
            config = config.with_server_name(name);
        }
        config
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Bare invocation prints usage; anything else is bad arguments.
            return if std::env::args().len() <= 1 {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::from(EXIT_BAD_ARGS)
            };
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to start runtime: {}", e);
            return ExitCode::from(EXIT_BAD_ARGS);
        }
    };

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    let timeout_ms = cli.timeout_ms;

    let mut config = RpcClientConfig::new(cli.host.clone(), cli.port)
        .with_socket_timeout_ms(timeout_ms);
    if cli.tls_enabled() {
        config = config.with_factory(StreamFactory::tls_client(cli.tls_config()));
    }

    tracing::info!(
        "connecting to {}:{} (tls={}, timeout_ms={})",
        cli.host,
        cli.port,
        cli.tls_enabled(),
        timeout_ms
    );

    let client = RpcClient::new(config);

    if !client.ping().await {
        if timeout_ms > 0 {
            tracing::error!("ping failed - connection timeout ({} ms)", timeout_ms);
            return ExitCode::from(EXIT_PING_TIMEOUT);
        }
        tracing::error!("ping failed (connection error)");
        return ExitCode::from(EXIT_PING_FAILED);
    }

    tracing::info!(
        "calling method={} payload_size={}",
        cli.method,
        cli.data.len()
    );

    let response = match client.call_named(&cli.method, cli.data.as_bytes()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("call failed: {}", e);
            Default::default()
        }
    };

    if response.is_empty() {
        if timeout_ms > 0 {
            tracing::error!(
                "request timed out after {} ms (no response from server)",
                timeout_ms
            );
            return ExitCode::from(EXIT_CALL_TIMEOUT);
        }
        tracing::error!("empty response (no data from server)");
        return ExitCode::from(EXIT_EMPTY_RESPONSE);
    }

    tracing::info!("raw response size={}", response.len());
    println!("\n---- RESPONSE (utf8) ----");
    println!("{}", String::from_utf8_lossy(&response));

    println!("\n---- RESPONSE (hex) ----");
    println!("{}", hex_dump(&response));

    client.close().await;
    ExitCode::SUCCESS
}

fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
