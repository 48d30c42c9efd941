//! Service infrastructure for all microservices

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Result, WardenError};

/// Health status for liveness probes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub service_id: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Readiness status for readiness probes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    pub dependencies: Vec<DependencyStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub available: bool,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Standard trait all microservices must implement
#[async_trait]
pub trait WardenService: Send + Sync + 'static {
    /// Service identifier (e.g., "user-service")
    fn service_id(&self) -> &'static str;

    /// Service version
    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Health check - is the process alive? Independent of backends.
    async fn health(&self) -> HealthStatus;

    /// Readiness check - are all dependencies available?
    async fn ready(&self) -> ReadinessStatus;

    /// Run until `shutdown` is cancelled. A service may cancel `shutdown`
    /// itself to request process termination after a fatal runtime error.
    async fn start(&self, shutdown: CancellationToken) -> Result<()>;

    /// Graceful shutdown: stop consumers, then close backends.
    async fn shutdown(&self) -> Result<()>;
}

/// Standard microservice runtime bootstrap
pub struct MicroserviceRuntime {
    shutdown_timeout: Duration,
    start_time: Instant,
}

impl MicroserviceRuntime {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            shutdown_timeout,
            start_time: Instant::now(),
        }
    }

    /// Run a microservice with standard lifecycle management
    pub async fn run<S: WardenService>(self, service: Arc<S>) -> Result<()> {
        self.run_until(service, Self::wait_for_shutdown()).await
    }

    /// Like [`run`](Self::run) but with an explicit shutdown trigger instead
    /// of process signals.
    pub async fn run_until<S, F>(self, service: Arc<S>, signal: F) -> Result<()>
    where
        S: WardenService,
        F: std::future::Future<Output = ()>,
    {
        info!(
            service_id = service.service_id(),
            version = service.version(),
            "Starting microservice"
        );

        let shutdown = CancellationToken::new();

        let service_clone = service.clone();
        let token = shutdown.clone();
        let mut service_handle = tokio::spawn(async move { service_clone.start(token).await });

        let mut exit = None;
        tokio::select! {
            _ = signal => {
                info!("Shutdown signal received, gracefully stopping...");
            }
            _ = shutdown.cancelled() => {
                warn!("Service requested shutdown");
            }
            result = &mut service_handle => {
                exit = Some(result);
            }
        }

        shutdown.cancel();

        match tokio::time::timeout(self.shutdown_timeout, service.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Error during shutdown: {}", e),
            Err(_) => error!(
                timeout_secs = self.shutdown_timeout.as_secs_f64(),
                "Graceful shutdown timed out, forcing hard shutdown"
            ),
        }

        service_handle.abort();

        info!(
            uptime_seconds = self.start_time.elapsed().as_secs(),
            "Microservice stopped"
        );

        match exit {
            Some(Ok(Err(e))) => Err(e),
            Some(Err(join)) => Err(WardenError::Internal(format!("service task failed: {}", join))),
            _ => Ok(()),
        }
    }

    async fn wait_for_shutdown() {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeService {
        fail_on_start: bool,
        hang_on_shutdown: bool,
        shut_down: AtomicBool,
    }

    impl FakeService {
        fn new(fail_on_start: bool, hang_on_shutdown: bool) -> Arc<Self> {
            Arc::new(Self {
                fail_on_start,
                hang_on_shutdown,
                shut_down: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl WardenService for FakeService {
        fn service_id(&self) -> &'static str {
            "fake"
        }

        async fn health(&self) -> HealthStatus {
            HealthStatus {
                healthy: true,
                service_id: self.service_id().to_string(),
                version: self.version().to_string(),
                uptime_seconds: 0,
            }
        }

        async fn ready(&self) -> ReadinessStatus {
            ReadinessStatus {
                ready: true,
                dependencies: vec![],
            }
        }

        async fn start(&self, shutdown: CancellationToken) -> Result<()> {
            if self.fail_on_start {
                return Err(WardenError::Messaging("consumer stopped".into()));
            }
            shutdown.cancelled().await;
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            if self.hang_on_shutdown {
                std::future::pending::<()>().await;
            }
            self.shut_down.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_signal_triggers_shutdown() {
        let service = FakeService::new(false, false);
        let runtime = MicroserviceRuntime::new(Duration::from_secs(1));
        runtime
            .run_until(service.clone(), tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(service.shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_start_error_is_propagated_after_shutdown() {
        let service = FakeService::new(true, false);
        let runtime = MicroserviceRuntime::new(Duration::from_secs(1));
        let err = runtime
            .run_until(service.clone(), std::future::pending())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "MESSAGING_ERROR");
        assert!(service.shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_hung_shutdown_is_bounded() {
        let service = FakeService::new(false, true);
        let runtime = MicroserviceRuntime::new(Duration::from_millis(50));
        let started = Instant::now();
        runtime
            .run_until(service.clone(), std::future::ready(()))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!service.shut_down.load(Ordering::SeqCst));
    }
}
