//! uRPC server daemon.
//!
//! Loads configuration (YAML file via URPC_CONFIG plus URPC_* environment
//! overrides), registers the demo methods, and runs the accept loop.

use bytes::Bytes;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use urpc_server::{Config, RpcContext, RpcError, RpcServer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load() {
        Ok(config) => {
            if let Ok(path) = std::env::var("URPC_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            config
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Configuration error: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting uRPC server");
    tracing::info!(
        "  Bind address: {}:{}",
        config.network.host,
        config.network.port
    );
    if config.tls.enabled {
        tracing::info!("  TLS: enabled");
        if config.tls.require_client_cert {
            tracing::info!("  mTLS: enabled (client certificate required)");
        }
        if config.tls.app_encryption {
            tracing::info!("  App encryption: enabled (AES-256-GCM)");
        }
    } else {
        tracing::info!("  TLS: disabled");
    }

    let server_config = config.server_config()?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if server_config.workers > 0 {
        builder.worker_threads(server_config.workers);
    }
    let runtime = builder.build()?;

    runtime.block_on(async move {
        let mut server = RpcServer::new(server_config);
        register_demo_methods(&mut server);
        server.run().await
    })?;

    Ok(())
}

/// Demo methods exercised by urpc-cli.
fn register_demo_methods(server: &mut RpcServer) {
    let registry = server.registry();

    registry.register_name("Example.Echo", |_ctx, body: Bytes| async move {
        Ok(body.to_vec())
    });

    registry.register_name("Example.Reverse", |_ctx, body: Bytes| async move {
        let mut out = body.to_vec();
        out.reverse();
        Ok(out)
    });

    // Sleeps for the requested number of milliseconds (decimal UTF-8 body,
    // default 1000) unless cancelled first.
    registry.register_name("Example.Sleep", |ctx: RpcContext, body: Bytes| async move {
        let millis = std::str::from_utf8(&body)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(1000);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(millis)) => {
                Ok(format!("slept {} ms", millis).into_bytes())
            }
            _ = ctx.cancel.cancelled() => {
                Err(RpcError::new(499, "cancelled"))
            }
        }
    });

    registry.register_utf8("Example.Peer", |ctx: RpcContext, _body| async move {
        match ctx.peer {
            Some(peer) => Ok(format!("cn={} subject={}", peer.common_name, peer.subject)),
            None => Ok(String::from("anonymous")),
        }
    });
}
