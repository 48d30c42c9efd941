//! Typed store and broker handles wired from the service config

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use warden_broker::{BrokerLink, BrokerLinkConfig, ConsumerSet, DrainOutcome};
use warden_core::{HealthReport, ServiceConfig};
use warden_store::{PoolConfig, StoreLink};

use crate::registry::ConnectionRegistry;
use crate::Result;

pub const STORE_BACKEND: &str = "postgres";
pub const BROKER_BACKEND: &str = "rabbitmq";

/// Everything a service talks to. The store is opened before the broker,
/// since consumers persist what they receive.
pub struct ServiceConnections {
    registry: ConnectionRegistry,
    store: Arc<StoreLink>,
    broker: Arc<BrokerLink>,
}

impl ServiceConnections {
    pub async fn open(config: &ServiceConfig) -> Result<Self> {
        let mut builder = ConnectionRegistry::builder(config.health_probe_timeout);

        let store = builder
            .open(
                STORE_BACKEND,
                StoreLink::open(
                    STORE_BACKEND,
                    PoolConfig::from_service(&config.store, config.health_probe_timeout),
                ),
            )
            .await?;

        let broker = builder
            .open(
                BROKER_BACKEND,
                BrokerLink::open(BROKER_BACKEND, BrokerLinkConfig::from_service(&config.broker)),
            )
            .await?;

        Ok(Self {
            registry: builder.finish(),
            store,
            broker,
        })
    }

    pub fn store(&self) -> &Arc<StoreLink> {
        &self.store
    }

    pub fn broker(&self) -> &Arc<BrokerLink> {
        &self.broker
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn health_check(&self) -> HealthReport {
        self.registry.health_check().await
    }

    pub async fn close(&self) -> Result<()> {
        self.registry.close().await
    }

    /// Stop `consumers`, then close every backend.
    pub async fn shutdown(&self, consumers: &ConsumerSet, drain_timeout: Duration) -> Result<DrainOutcome> {
        drain_then_close(consumers, &self.registry, drain_timeout).await
    }
}

/// Drain every consumer before closing the backends they read from. The
/// backends are closed even when stuck consumers had to be aborted.
pub async fn drain_then_close(
    consumers: &ConsumerSet,
    registry: &ConnectionRegistry,
    drain_timeout: Duration,
) -> Result<DrainOutcome> {
    let outcome = consumers.drain(drain_timeout).await;
    if let DrainOutcome::Forced { aborted } = outcome {
        warn!(aborted, "Closing backends with aborted consumers");
    }
    registry.close().await?;
    Ok(outcome)
}
