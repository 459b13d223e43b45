//! Tandem Coordinator - Main Entry Point
//!
//! Loads configuration, probes the worker once and serves the client-facing API
//! until interrupted.

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tandem_common::{MetricsRegistry, TandemConfig};
use tandem_coordinator::{build_router, AppState, ResilientClient};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("TANDEM_CONFIG")
        .unwrap_or_else(|_| "configs/coordinator.yaml".to_string());

    let config_found = Path::new(&config_path).exists();
    let config = if config_found {
        TandemConfig::from_file(&config_path)?
    } else {
        TandemConfig::from_env("coordinator")?
    };

    init_tracing(&config);

    info!("Starting Tandem Coordinator");
    if !config_found {
        warn!("Config file {} not found, using defaults and environment", config_path);
    }

    let coordinator = config.coordinator()?;
    info!(
        "Coordinator configuration loaded: bind={}, backend={}, max_inflight={}, compression={}",
        config.listen_address(),
        coordinator.backend_endpoint,
        coordinator.max_inflight,
        config.compression.enabled
    );

    let metrics = MetricsRegistry::new()?;
    let client = ResilientClient::from_config(coordinator)?.with_metrics(metrics.coordinator.clone());
    let client = Arc::new(client);

    // Startup probe; the coordinator serves even when the worker is down
    let health = client.check_health().await;
    if health.available {
        info!("Worker reachable: status={}", health.status);
    } else {
        warn!(
            "Worker not available at startup: {}",
            health.error.as_deref().unwrap_or(&health.status)
        );
    }

    let state = AppState::new(&config, client, metrics)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_address()))?;

    info!("Tandem Coordinator listening on {}", config.listen_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Coordinator server failed")?;

    info!("Tandem Coordinator shutdown complete");
    Ok(())
}

fn init_tracing(config: &TandemConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "tandem_coordinator={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if config.observability.structured_logging {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
