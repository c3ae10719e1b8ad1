//! Convene Coordinator
//!
//! Runs the invitation fan-out and response aggregation loops against the
//! configured message log and serves health and metrics over HTTP.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CONVENE_CONFIG` | | Path to a TOML config file |
//! | `CONVENE_LOG_BACKEND` | `redis` | `redis` or `memory` |
//! | `CONVENE_REDIS_URL` | `redis://localhost:6379/0` | Redis connection URL |
//! | `CONVENE_HTTP_PORT` | `9090` | Metrics/health port |
//! | `CONVENE_RECIPIENTS` | five demo guests | `id=name,id=name` guest list |
//! | `RUST_LOG` | `info` | Log level |
//! | `LOG_FORMAT` | text | `json` for structured output |
//!
//! `cv-coordinator --example-config` prints a documented config file.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use cv_config::{AppConfig, ConfigLoader};
use cv_coordinator::{Coordinator, CoordinatorSettings, StaticDirectory};
use cv_log::{MemoryLog, MessageLog, RedisStreamLog};

#[derive(Clone)]
struct AppState {
    coordinator: Arc<Coordinator>,
    log: Arc<dyn MessageLog>,
    prometheus: PrometheusHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().any(|arg| arg == "--example-config") {
        print!("{}", AppConfig::example_toml());
        return Ok(());
    }

    cv_common::logging::init_logging("cv-coordinator");
    info!("Starting Convene Coordinator");

    let config = ConfigLoader::new().load().context("loading configuration")?;
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;

    let log = connect_log(&config).await?;
    log.ping()
        .await
        .with_context(|| format!("message log ({}) unreachable", log.backend()))?;

    let directory = StaticDirectory::from_config(&config.directory);
    if directory.is_empty() {
        warn!("Recipient directory is empty; invitations will never complete");
    }
    info!(recipients = directory.len(), "Recipient directory loaded");

    let coordinator = Arc::new(Coordinator::new(
        log.clone(),
        Arc::new(directory),
        CoordinatorSettings::from_config(&config),
    ));
    coordinator
        .initialize()
        .await
        .context("creating consumer groups")?;
    coordinator.start()?;

    // Metrics and health server
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port)
        .parse()
        .context("invalid http listen address")?;
    let state = AppState {
        coordinator: coordinator.clone(),
        log: log.clone(),
        prometheus,
    };
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Metrics server listening on http://{}/metrics", addr);

    let server_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
            {
                error!(error = %e, "Metrics server failed");
            }
        })
    };

    info!("Convene Coordinator started");

    shutdown_signal().await;
    info!("Shutdown signal received...");

    coordinator.stop();
    let _ = shutdown_tx.send(());

    let drained = tokio::time::timeout(Duration::from_secs(30), async {
        coordinator.join().await;
        let _ = server_handle.await;
    })
    .await;
    if drained.is_err() {
        warn!("Timed out waiting for consumption loops to stop");
    }

    info!("Convene Coordinator shutdown complete");
    Ok(())
}

async fn connect_log(config: &AppConfig) -> Result<Arc<dyn MessageLog>> {
    let claim_idle = Duration::from_millis(config.log.claim_idle_ms);
    match config.log.backend.as_str() {
        "memory" => {
            warn!("Using in-memory message log; nothing outside this process can publish to it");
            Ok(Arc::new(MemoryLog::new(claim_idle)))
        }
        "redis" => {
            info!(url = %config.redis.url, "Connecting to Redis");
            let log = RedisStreamLog::connect(&config.redis.url, claim_idle)
                .await
                .context("connecting to Redis")?;
            Ok(Arc::new(log))
        }
        other => anyhow::bail!("unknown log backend '{}'", other),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let active_workflows = state.coordinator.store().active_count().await;
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.log.backend(),
        "active_workflows": active_workflows,
    }))
}

async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let running = state.coordinator.is_running();
    let broker = state.log.ping().await;

    if running && broker.is_ok() {
        (StatusCode::OK, Json(serde_json::json!({ "status": "READY" })))
    } else {
        let reason = match broker {
            Err(e) => e.to_string(),
            Ok(()) => "consumption loops not running".to_string(),
        };
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "NOT_READY", "reason": reason })),
        )
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
