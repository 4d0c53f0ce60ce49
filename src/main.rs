//! tntgate - HTTP gateway translating REST and JSON-RPC requests into store
//! operations.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tntgate::config::{find_config_file, load_and_validate};
use tntgate::transport::{GatewayState, UpstreamClient, build_router};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "TNTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides `listen` from the config file
    #[arg(short, long, env = "TNTGATE_BIND")]
    bind: Option<SocketAddr>,

    /// Upstream bridge URL, overrides `upstream.url` from the config file
    #[arg(long, env = "TNTGATE_UPSTREAM_URL")]
    upstream_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let path = find_config_file(cli.config.as_deref())?;
    let (mut config, validation) = load_and_validate(&path)?;
    for warning in &validation.warnings {
        warn!(%warning, "Configuration warning");
    }
    if let Some(url) = cli.upstream_url {
        config.upstream.url = url;
    }
    let listen = cli.bind.unwrap_or(config.listen);

    info!(
        config = %path.display(),
        routes = config.routes.len(),
        upstream = %config.upstream.url,
        max_body_size = config.limits.max_body_size,
        request_timeout_ms = config.limits.request_timeout.as_millis(),
        "Configuration loaded"
    );

    let upstream = UpstreamClient::new(config.upstream.clone())?;
    let state = Arc::new(GatewayState::new(&config, Arc::new(upstream))?);
    let app = build_router(state);

    let listener = TcpListener::bind(listen).await?;
    info!(addr = %listen, "tntgate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
