use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::AppState;
use crate::bridge::MutationBridge;
use crate::config::{AppConfig, RegistryBackend};
use crate::rooms::redis_bus::RedisRoomBus;
use crate::rooms::{RegistryLimits, RoomBus, RoomRegistry, room_name};
use crate::session::claims_socket;
use crate::snapshot::SnapshotBuilder;
use crate::store::{self, ClaimStore};

/// Wire up the registry, room bus and mutation bridge around `store`.
///
/// Background tasks and open sockets stop when `shutdown` is cancelled.
pub async fn build_state(
    config: Arc<AppConfig>,
    store: Arc<dyn ClaimStore>,
    metrics: Option<PrometheusHandle>,
    shutdown: &CancellationToken,
) -> anyhow::Result<AppState> {
    let registry = Arc::new(RoomRegistry::new(RegistryLimits::from_config(&config)));
    registry.spawn_sweeper(config.delivery.sweep_interval(), shutdown.clone());

    let bus: Arc<dyn RoomBus> = match config.registry.backend {
        RegistryBackend::Memory => Arc::clone(&registry) as Arc<dyn RoomBus>,
        RegistryBackend::Redis => {
            let url = config
                .registry
                .redis_url
                .as_deref()
                .context("registry.redis_url is required for the redis backend")?;
            let bus = RedisRoomBus::connect(url, config.registry.channel.clone())
                .await
                .context("failed to connect room bus to Redis")?;
            bus.spawn_relay(Arc::clone(&registry), shutdown.clone());
            Arc::new(bus)
        }
    };
    info!(name: "rooms.bus.ready", backend = bus.backend(), "Room bus ready");

    let snapshots = SnapshotBuilder::new(store);
    let (bridge, _dispatcher) = MutationBridge::spawn(
        config.bridge.queue_capacity,
        snapshots.clone(),
        Arc::clone(&bus),
        shutdown.clone(),
    );

    Ok(AppState {
        registry,
        bus,
        snapshots,
        bridge,
        config,
        metrics,
        shutdown: shutdown.clone(),
    })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/api/rooms/{customer_id}", get(room_status))
        .route("/internal/claims/{customer_id}/notify", post(notify_claims))
        .route("/ws/claims/{customer_id}", get(claims_socket))
        .route("/ws/claims/{customer_id}/", get(claims_socket))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let store = store::connect(&config.store)
        .await
        .context("failed to open claims store")?;

    let shutdown = CancellationToken::new();
    let state = build_state(Arc::clone(&config), store, Some(metrics), &shutdown).await?;
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        registry = ?config.registry.backend,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Resolves on ctrl-c and cancels `shutdown`, so upgraded sockets, which
/// graceful shutdown does not track, close alongside the listener.
async fn shutdown_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received ctrl-c, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
    shutdown.cancel();
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "registry": state.bus.backend(),
        "rooms": state.registry.room_count().await,
        "sessions": state.registry.session_count().await,
    }))
}

/// GET /metrics - Prometheus text exposition.
async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

/// Membership of one room on this instance.
#[derive(Debug, Serialize)]
struct RoomStatus {
    room: String,
    connected: bool,
    connection_count: usize,
}

/// GET /api/rooms/{customer_id} - Local sessions in a customer's room.
async fn room_status(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> Json<RoomStatus> {
    let room = room_name(&customer_id);
    let connection_count = state.registry.member_count(&room).await;
    Json(RoomStatus {
        room,
        connected: connection_count > 0,
        connection_count,
    })
}

/// POST /internal/claims/{customer_id}/notify - Push a fresh snapshot after
/// a write made outside this process.
async fn notify_claims(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> impl IntoResponse {
    let queued = state.bridge.notify(customer_id);
    (StatusCode::ACCEPTED, Json(json!({ "queued": queued })))
}
