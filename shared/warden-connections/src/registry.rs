//! Connection registry
//!
//! Backends are opened one at a time in registration order and closed in
//! the reverse order. Health probes take the read side of a lock and close
//! takes the write side, so a close waits for in-flight probes and a probe
//! never runs against a backend that is mid-close.

use futures_util::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn, Span};
use warden_core::{Backend, HealthReport, ProbeResult, WardenError};

use crate::error::{BackendFailure, RegistryError, Result};

/// Opens backends in order and rolls back the ones already open if a later
/// one fails.
pub struct RegistryBuilder {
    opened: Vec<Arc<dyn Backend>>,
    probe_timeout: Duration,
    span: Span,
}

impl RegistryBuilder {
    /// Await `opening` and register the backend it yields under `name`,
    /// which must match the backend's own name and be unique in this
    /// registry. On failure every backend opened through this builder is
    /// closed, newest first, before the error is returned.
    pub async fn open<B, E, F>(&mut self, name: &str, opening: F) -> Result<Arc<B>>
    where
        B: Backend + 'static,
        E: Into<WardenError>,
        F: Future<Output = std::result::Result<B, E>>,
    {
        info!(parent: &self.span, backend = name, "Opening backend");
        if self.opened.iter().any(|b| b.name() == name) {
            return self
                .fail(name, WardenError::Conflict(format!("backend {} already registered", name)))
                .await;
        }

        let backend = match opening.await {
            Ok(backend) => Arc::new(backend),
            Err(e) => return self.fail(name, e.into()).await,
        };

        if backend.name() != name {
            let source = WardenError::Conflict(format!(
                "backend opened as {} reports name {}",
                name,
                backend.name()
            ));
            if let Err(e) = backend.close().await {
                warn!(parent: &self.span, backend = name, error = %e, "Failed to close misnamed backend");
            }
            return self.fail(name, source).await;
        }

        self.opened.push(backend.clone());
        Ok(backend)
    }

    async fn fail<T>(&mut self, name: &str, source: WardenError) -> Result<T> {
        error!(parent: &self.span, backend = name, error = %source, "Backend failed to open");
        self.rollback().await;
        Err(RegistryError::Open {
            name: name.to_string(),
            source,
        })
    }

    pub fn finish(self) -> ConnectionRegistry {
        info!(parent: &self.span, backends = self.opened.len(), "Connection registry ready");
        ConnectionRegistry {
            backends: RwLock::new(self.opened),
            closed: AtomicBool::new(false),
            probe_timeout: self.probe_timeout,
            span: self.span,
        }
    }

    async fn rollback(&mut self) {
        while let Some(backend) = self.opened.pop() {
            match backend.close().await {
                Ok(()) => info!(parent: &self.span, backend = backend.name(), "Rolled back backend"),
                Err(e) => warn!(
                    parent: &self.span,
                    backend = backend.name(),
                    error = %e,
                    "Failed to close backend during rollback"
                ),
            }
        }
    }
}

pub struct ConnectionRegistry {
    backends: RwLock<Vec<Arc<dyn Backend>>>,
    closed: AtomicBool,
    probe_timeout: Duration,
    span: Span,
}

impl ConnectionRegistry {
    /// Start an ordered open. `probe_timeout` bounds each health probe.
    pub fn builder(probe_timeout: Duration) -> RegistryBuilder {
        RegistryBuilder {
            opened: Vec::new(),
            probe_timeout,
            span: tracing::info_span!("registry", component = "registry"),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn names(&self) -> Vec<String> {
        self.backends
            .read()
            .await
            .iter()
            .map(|b| b.name().to_string())
            .collect()
    }

    /// Probe every backend concurrently, each bounded by the probe timeout.
    /// Always returns a complete report; after close every backend is
    /// reported as failed.
    pub async fn health_check(&self) -> HealthReport {
        let backends = self.backends.read().await;

        if self.is_closed() {
            return backends
                .iter()
                .map(|b| {
                    (
                        b.name().to_string(),
                        ProbeResult::failed("backend closed", Duration::ZERO),
                    )
                })
                .collect();
        }

        let probes = backends.iter().map(|backend| async move {
            let started = Instant::now();
            let outcome = tokio::time::timeout(self.probe_timeout, backend.health_check()).await;
            let probe = match outcome {
                Ok(Ok(())) => ProbeResult::healthy(started.elapsed()),
                Ok(Err(e)) => ProbeResult::failed(e.to_string(), started.elapsed()),
                Err(_) => ProbeResult::failed(
                    format!("health check timed out after {}ms", self.probe_timeout.as_millis()),
                    started.elapsed(),
                ),
            };
            if let Some(error) = &probe.error {
                warn!(parent: &self.span, backend = backend.name(), error = %error, "Backend unhealthy");
            }
            (backend.name().to_string(), probe)
        });

        join_all(probes).await.into_iter().collect()
    }

    /// Close every backend in reverse open order, continuing past failures.
    /// Repeated calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        let backends = self.backends.write().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(parent: &self.span, backends = backends.len(), "Closing backends");

        let mut failures = Vec::new();
        for backend in backends.iter().rev() {
            if let Err(e) = backend.close().await {
                error!(parent: &self.span, backend = backend.name(), error = %e, "Failed to close backend");
                failures.push(BackendFailure {
                    name: backend.name().to_string(),
                    kind: backend.kind(),
                    error: e.to_string(),
                });
            }
        }

        if failures.is_empty() {
            info!(parent: &self.span, "All backends closed");
            Ok(())
        } else {
            Err(RegistryError::Close(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use warden_core::{BackendKind, HealthCheck};

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, event: impl Into<String>) {
            self.0.lock().push(event.into());
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    struct FakeBackend {
        name: &'static str,
        kind: BackendKind,
        hang: bool,
        fail_probe: bool,
        fail_close: bool,
        log: Log,
    }

    impl FakeBackend {
        fn new(name: &'static str, kind: BackendKind, log: &Log) -> Self {
            Self {
                name,
                kind,
                hang: false,
                fail_probe: false,
                fail_close: false,
                log: log.clone(),
            }
        }
    }

    #[async_trait]
    impl HealthCheck for FakeBackend {
        async fn health_check(&self) -> warden_core::Result<()> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail_probe {
                return Err(WardenError::Unavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn close(&self) -> warden_core::Result<()> {
            self.log.push(format!("close {}", self.name));
            if self.fail_close {
                return Err(WardenError::Database("pool already released".into()));
            }
            Ok(())
        }
    }

    async fn unreachable() -> std::result::Result<FakeBackend, WardenError> {
        Err(WardenError::Network("connection refused".into()))
    }

    async fn registry(backends: Vec<FakeBackend>, probe_timeout: Duration) -> ConnectionRegistry {
        let mut builder = ConnectionRegistry::builder(probe_timeout);
        for backend in backends {
            let name = backend.name;
            builder
                .open(name, async move { Ok::<_, WardenError>(backend) })
                .await
                .unwrap();
        }
        builder.finish()
    }

    #[tokio::test]
    async fn test_failed_open_closes_earlier_backends() {
        let log = Log::default();
        let mut builder = ConnectionRegistry::builder(Duration::from_secs(1));
        let store = FakeBackend::new("postgres", BackendKind::Store, &log);

        builder
            .open("postgres", async { Ok::<_, WardenError>(store) })
            .await
            .unwrap();
        let err = builder.open("rabbitmq", unreachable()).await.err().unwrap();

        assert!(matches!(err, RegistryError::Open { ref name, .. } if name == "rabbitmq"));
        assert_eq!(log.events(), vec!["close postgres"]);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_and_rolled_back() {
        let log = Log::default();
        let mut builder = ConnectionRegistry::builder(Duration::from_secs(1));
        let mut down = FakeBackend::new("postgres", BackendKind::Store, &log);
        down.fail_probe = true;

        builder
            .open("postgres", async { Ok::<_, WardenError>(down) })
            .await
            .unwrap();
        let twin = FakeBackend::new("postgres", BackendKind::Store, &log);
        let err = builder
            .open("postgres", async { Ok::<_, WardenError>(twin) })
            .await
            .err()
            .unwrap();

        assert!(matches!(
            err,
            RegistryError::Open { source: WardenError::Conflict(_), .. }
        ));
        assert_eq!(log.events(), vec!["close postgres"]);
        assert!(builder.finish().health_check().await.is_empty());
    }

    #[tokio::test]
    async fn test_name_must_match_backend() {
        let log = Log::default();
        let mut builder = ConnectionRegistry::builder(Duration::from_secs(1));
        builder
            .open("postgres", async {
                Ok::<_, WardenError>(FakeBackend::new("postgres", BackendKind::Store, &log))
            })
            .await
            .unwrap();

        let misnamed = FakeBackend::new("cache", BackendKind::Store, &log);
        let err = builder
            .open("rabbitmq", async { Ok::<_, WardenError>(misnamed) })
            .await
            .err()
            .unwrap();

        assert!(matches!(err, RegistryError::Open { ref name, .. } if name == "rabbitmq"));
        assert_eq!(log.events(), vec!["close cache", "close postgres"]);
    }

    #[tokio::test]
    async fn test_all_backends_healthy() {
        let log = Log::default();
        let registry = registry(
            vec![
                FakeBackend::new("postgres", BackendKind::Store, &log),
                FakeBackend::new("rabbitmq", BackendKind::Broker, &log),
            ],
            Duration::from_secs(1),
        )
        .await;

        let report = registry.health_check().await;
        assert!(report.is_healthy());
        assert_eq!(report.len(), 2);
        assert_eq!(registry.names().await, vec!["postgres", "rabbitmq"]);
    }

    #[tokio::test]
    async fn test_hung_probe_does_not_block_report() {
        let log = Log::default();
        let mut hung = FakeBackend::new("rabbitmq", BackendKind::Broker, &log);
        hung.hang = true;
        let registry = registry(
            vec![FakeBackend::new("postgres", BackendKind::Store, &log), hung],
            Duration::from_millis(50),
        )
        .await;

        let started = Instant::now();
        let report = registry.health_check().await;
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(report.get("postgres").unwrap().is_healthy());
        let broker = report.get("rabbitmq").unwrap();
        assert!(broker.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_failed_probe_reported_per_backend() {
        let log = Log::default();
        let mut down = FakeBackend::new("postgres", BackendKind::Store, &log);
        down.fail_probe = true;
        let registry = registry(
            vec![down, FakeBackend::new("rabbitmq", BackendKind::Broker, &log)],
            Duration::from_secs(1),
        )
        .await;

        let report = registry.health_check().await;
        assert!(!report.is_healthy());
        assert!(report.get("rabbitmq").unwrap().is_healthy());
        let failures: Vec<_> = report.failures().map(|(name, _)| name).collect();
        assert_eq!(failures, vec!["postgres"]);
    }

    #[tokio::test]
    async fn test_close_is_reverse_order_and_aggregates_failures() {
        let log = Log::default();
        let mut store = FakeBackend::new("postgres", BackendKind::Store, &log);
        store.fail_close = true;
        let mut cache = FakeBackend::new("cache", BackendKind::Store, &log);
        cache.fail_close = true;
        let registry = registry(
            vec![store, cache, FakeBackend::new("rabbitmq", BackendKind::Broker, &log)],
            Duration::from_secs(1),
        )
        .await;

        let err = registry.close().await.unwrap_err();
        assert_eq!(log.events(), vec!["close rabbitmq", "close cache", "close postgres"]);

        let failed: Vec<_> = err.failures().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, vec!["cache", "postgres"]);
        assert!(err.to_string().contains("2 backend(s)"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_health_fails_after() {
        let log = Log::default();
        let registry = registry(
            vec![FakeBackend::new("postgres", BackendKind::Store, &log)],
            Duration::from_secs(1),
        )
        .await;

        registry.close().await.unwrap();
        registry.close().await.unwrap();
        assert_eq!(log.events(), vec!["close postgres"]);
        assert!(registry.is_closed());

        let report = registry.health_check().await;
        assert_eq!(report.get("postgres").unwrap().error.as_deref(), Some("backend closed"));
    }
}
