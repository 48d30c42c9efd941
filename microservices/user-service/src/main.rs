//! User Service
//!
//! Owns the store and broker connections, consumes user events and serves
//! the liveness, readiness and metrics endpoints.

use std::sync::Arc;
use tracing::info;
use warden_core::{MicroserviceRuntime, Result, ServiceConfig, WardenError};
use warden_telemetry::TelemetryConfig;

mod api;
mod events;
mod service;

use service::UserService;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::from_env()?;

    warden_telemetry::init_tracing(&TelemetryConfig::new(
        config.service_name.clone(),
        config.log_level.clone(),
        config.json_logs,
    ))
    .map_err(|e| WardenError::Config(e.to_string()))?;

    info!("Starting User Service");

    let runtime = MicroserviceRuntime::new(config.shutdown_timeout);
    let service = Arc::new(UserService::new(config).await?);
    runtime.run(service).await
}
