//! hank-status: serve the HTTP/JSON status API over a coordinator

use anyhow::Context;
use clap::Parser;
use hank::common::CoordinatorConfig;
use hank::coordinator::{http::create_router, Coordinator};
use hank::namespace::MemoryNamespace;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hank-status", version = hank::VERSION)]
#[command(about = "Read-only status API over the hank metadata graph")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the bind address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override the namespace root
    #[arg(long)]
    root: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CoordinatorConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CoordinatorConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(root) = args.root {
        config.root = root;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    tracing::info!("Starting hank-status {}", hank::BUILD_INFO);
    tracing::info!("  HTTP API: {}", config.bind_addr);
    tracing::info!("  Namespace root: {}", config.root);

    let namespace = MemoryNamespace::new();
    let client = namespace.connect();
    let coordinator = Coordinator::open(client.clone(), &config.root)?;

    let router = create_router(coordinator.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    tracing::info!("✓ hank-status ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    coordinator.close();
    client.close();
    Ok(())
}
