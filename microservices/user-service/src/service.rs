//! User Service lifecycle

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_broker::{publish_json, ConsumerContract, ConsumerSet, MessageConsumer};
use warden_connections::ServiceConnections;
use warden_core::{
    HealthReport, HealthStatus, ReadinessStatus, Result, ServiceConfig, WardenError, WardenService,
};

use crate::api::rest::{self, AppState, ServiceMetrics, StatusSource};
use crate::events::{
    LifecycleEvent, UserEventHandler, SERVICE_STARTED, SERVICE_STOPPING, USER_EVENTS_BINDING,
    USER_EVENTS_EXCHANGE, USER_EVENTS_QUEUE,
};

/// Backends, consumers and the event handler, shared with the HTTP layer.
struct ServiceStatus {
    connections: Arc<ServiceConnections>,
    consumers: Arc<ConsumerSet>,
    events: Arc<UserEventHandler>,
}

#[async_trait]
impl StatusSource for ServiceStatus {
    async fn health_report(&self) -> HealthReport {
        self.connections.health_check().await
    }

    fn metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            store: Some(self.connections.store().stats()),
            active_consumers: self.consumers.active(),
            consumers: self.consumers.snapshot(),
            user_events_processed: self.events.processed(),
            user_events_invalid: self.events.invalid(),
        }
    }
}

pub struct UserService {
    config: ServiceConfig,
    status: Arc<ServiceStatus>,
    start_time: Instant,
}

impl UserService {
    /// Open every backend. Fails without leaking anything if one of them
    /// cannot be reached.
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        let connections = ServiceConnections::open(&config).await?;

        Ok(Self {
            config,
            status: Arc::new(ServiceStatus {
                connections: Arc::new(connections),
                consumers: Arc::new(ConsumerSet::new()),
                events: Arc::new(UserEventHandler::new()),
            }),
            start_time: Instant::now(),
        })
    }

    async fn announce(&self, event: &'static str) {
        let message = LifecycleEvent::new(self.service_id(), self.version(), event);
        let broker = self.status.connections.broker();
        if let Err(e) = publish_json(broker.as_ref(), USER_EVENTS_EXCHANGE, event, &message).await {
            warn!(event, error = %e, "Failed to publish lifecycle event");
        }
    }
}

#[async_trait]
impl WardenService for UserService {
    fn service_id(&self) -> &'static str {
        "user-service"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        rest::readiness_within(self.status.as_ref(), self.config.readiness_timeout).await
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let broker = self.status.connections.broker().clone();

        broker
            .declare_binding(USER_EVENTS_EXCHANGE, USER_EVENTS_QUEUE, USER_EVENTS_BINDING)
            .await?;

        let consumer: Arc<dyn MessageConsumer> = broker;
        self.status.consumers.spawn(
            consumer,
            ConsumerContract::new(USER_EVENTS_QUEUE, self.status.events.clone()),
        );

        self.announce(SERVICE_STARTED).await;

        let router = rest::create_router(AppState {
            source: self.status.clone(),
            service_id: self.service_id(),
            version: self.version(),
            start_time: self.start_time,
            readiness_timeout: self.config.readiness_timeout,
        });

        info!(http = %self.config.http_bind, "Starting User Service HTTP server");
        let listener = tokio::net::TcpListener::bind(&self.config.http_bind).await?;
        let server = async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        };

        tokio::select! {
            served = server => {
                served?;
                Ok(())
            }
            reason = self.status.consumers.failed() => {
                error!(reason = %reason, "Consumer failed, shutting down");
                Err(WardenError::Messaging(reason))
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down User Service");
        self.announce(SERVICE_STOPPING).await;

        let drain_timeout = self.config.shutdown_timeout / 2;
        self.status
            .connections
            .shutdown(&self.status.consumers, drain_timeout)
            .await?;
        Ok(())
    }
}
