//! Tandem Worker - Main Entry Point
//!
//! Loads configuration, builds the model cache and serves the inference API
//! until interrupted.

use anyhow::Context;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tandem_common::{MetricsRegistry, TandemConfig};
use tandem_worker::{build_router, engine_for, AppState, ModelCache, SysinfoMonitor};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("TANDEM_CONFIG").unwrap_or_else(|_| "configs/worker.yaml".to_string());

    let config_found = Path::new(&config_path).exists();
    let config = if config_found {
        TandemConfig::from_file(&config_path)?
    } else {
        TandemConfig::from_env("worker")?
    };

    init_tracing(&config);

    info!("Starting Tandem Worker");
    if !config_found {
        warn!("Config file {} not found, using defaults and environment", config_path);
    }

    let worker = config.worker()?;
    info!(
        "Worker configuration loaded: bind={}, max_cpu={}%, min_memory={}MB, models={}, allowed_clients={:?}",
        config.listen_address(),
        worker.max_cpu_percent,
        worker.min_available_memory_bytes / (1024 * 1024),
        worker.models.len(),
        worker.allowed_client_ips
    );
    for entry in &worker.models {
        if !entry.path.exists() {
            warn!("Model {} is registered but {} does not exist", entry.id, entry.path.display());
        }
    }

    let metrics = MetricsRegistry::new()?;
    let cache = ModelCache::new(engine_for(worker.engine), worker.model_registry())
        .with_metrics(metrics.worker.clone());
    let cache = Arc::new(cache);

    let sweeper = worker.sweep_interval_secs.map(|secs| {
        info!(
            "Idle sweep every {}s (threshold {} min)",
            secs, worker.idle_eviction_minutes
        );
        cache.spawn_sweeper(Duration::from_secs(secs.max(1)), worker.idle_eviction())
    });

    let state = AppState::new(&config, cache, Arc::new(SysinfoMonitor::new()), metrics)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_address()))?;

    info!("Tandem Worker listening on {}", config.listen_address());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Worker server failed")?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    info!("Tandem Worker shutdown complete");
    Ok(())
}

fn init_tracing(config: &TandemConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "tandem_worker={},tower_http=info",
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
