//! Read-only metrics HTTP surface.
//!
//! Serves point-in-time JSON snapshots of consumer, producer and indicator
//! hit statistics, plus Prometheus text exposition. Runs on its own task and
//! only reads shared state; a failure here is logged and never reaches the
//! consume loop.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use varsel_core::stats::{MatchStat, StatsTracker};
use varsel_stream::{ConsumerStats, ConsumerStatsHandle, ProducerStats, ProducerStatsHandle};

use crate::metrics::MetricsRecorder;

/// Handles onto the live worker state the surface exposes.
#[derive(Clone)]
pub struct SurfaceState {
    pub consumer: ConsumerStatsHandle,
    pub producer: ProducerStatsHandle,
    pub stats: StatsTracker,
    pub recorder: MetricsRecorder,
}

pub fn router(state: SurfaceState) -> Router {
    Router::new()
        .route("/metrics/consumer", get(consumer_stats))
        .route("/metrics/producer", get(producer_stats))
        .route("/metrics/ioc", get(ioc_stats))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

async fn consumer_stats(State(state): State<SurfaceState>) -> Json<ConsumerStats> {
    Json(state.consumer.snapshot())
}

async fn producer_stats(State(state): State<SurfaceState>) -> Json<ProducerStats> {
    Json(state.producer.snapshot())
}

async fn ioc_stats(State(state): State<SurfaceState>) -> Json<Vec<MatchStat>> {
    Json(state.stats.snapshot())
}

async fn prometheus_metrics(State(state): State<SurfaceState>) -> Result<String, StatusCode> {
    state
        .recorder
        .gather_metrics()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serves the surface on an already-bound listener.
pub async fn serve_on(listener: TcpListener, state: SurfaceState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

/// Binds and serves the surface on the configured port.
pub async fn serve(state: SurfaceState, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "metrics surface listening");
    serve_on(listener, state).await
}

/// Runs the surface on its own task; errors are logged, never propagated
/// into the worker loop.
pub fn spawn_surface(state: SurfaceState, port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = serve(state, port).await {
            error!(error = %e, "metrics surface failed");
        }
    })
}
