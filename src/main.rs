//! Pipeline Info API server
//!
//! Serves pipeline run metadata from the configured storage backend.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline_info::api::{create_router, AppState};
use pipeline_info::config::Config;
use pipeline_info::storage::Repository;

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = Config::parse();
    info!(
        backend = ?config.backend,
        bind_addr = %config.bind_addr,
        max_limit = config.max_limit,
        "Starting pipeline info service"
    );

    let storage = config.storage()?;
    let repo = Repository::open(storage, config.max_limit)
        .context("Failed to initialize storage backend")?;

    let state = AppState {
        repo,
        artifacts: config.artifacts(),
    };
    let app = create_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("🎯 API server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline_info=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // A missing .env is fine; real deployments set the environment directly.
    let _ = dotenv();
}
