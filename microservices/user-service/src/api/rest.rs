//! User Service REST API
//!
//! Only the operational surface: liveness, readiness and metrics.

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use warden_broker::ConsumerSnapshot;
use warden_core::{HealthReport, HealthStatus, ReadinessStatus};
use warden_store::PoolStats;

/// What the HTTP layer needs to know about the running service.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn health_report(&self) -> HealthReport;

    fn metrics(&self) -> ServiceMetrics;
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetrics {
    pub store: Option<PoolStats>,
    pub active_consumers: u64,
    pub consumers: Vec<ConsumerSnapshot>,
    pub user_events_processed: u64,
    pub user_events_invalid: u64,
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    uptime_seconds: u64,
    #[serde(flatten)]
    metrics: ServiceMetrics,
}

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn StatusSource>,
    pub service_id: &'static str,
    pub version: &'static str,
    pub start_time: Instant,
    pub readiness_timeout: Duration,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/live", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Readiness bounded by `timeout`. A probe round that overruns is reported
/// as not ready with no per-backend detail.
pub async fn readiness_within(source: &dyn StatusSource, timeout: Duration) -> ReadinessStatus {
    match tokio::time::timeout(timeout, source.health_report()).await {
        Ok(report) => report.to_readiness(),
        Err(_) => ReadinessStatus {
            ready: false,
            dependencies: vec![],
        },
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        healthy: true,
        service_id: state.service_id.to_string(),
        version: state.version.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessStatus>) {
    let readiness = readiness_within(state.source.as_ref(), state.readiness_timeout).await;
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        metrics: state.source.metrics(),
    })
}
