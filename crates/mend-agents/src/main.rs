use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use lifecycle::{MemoryStore, Orchestrator, PipelineConfig};
use mend_agents::api::{api_router, AppState};
use mend_agents::default_stages;

#[derive(Parser, Debug)]
#[command(name = "mend-agents", about = "Incident auto-remediation service")]
struct Cli {
    /// Address to bind the HTTP API on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the HTTP API on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Stop pipelines after verification instead of opening pull requests.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::default();
    config.dry_run = config.dry_run || cli.dry_run;

    info!(
        confidence_threshold = config.confidence_threshold,
        max_attempts = config.max_attempts,
        dry_run = config.dry_run,
        "remediation service starting"
    );

    let orchestrator = Orchestrator::new(
        Arc::new(MemoryStore::new()),
        default_stages(&config),
        config,
    )?;
    let state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
    });
    let app = api_router().with_state(state);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");
}
