//! Narrow broker capabilities
//!
//! A caller that only publishes takes a [`MessagePublisher`]; the consumer
//! supervisor only needs a [`MessageConsumer`]. [`BrokerLink`](crate::BrokerLink)
//! implements both, test doubles implement whichever one they stand in for.

use async_trait::async_trait;
use serde::Serialize;

use crate::consumer::ConsumptionLoop;
use crate::message::PublishRequest;
use crate::{BrokerError, Result};

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// One delivery attempt. No retry is performed here.
    async fn publish(&self, request: PublishRequest) -> Result<()>;
}

#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Subscribe to the loop's queue and drive it to completion, returning
    /// why it stopped. [`BrokerError::Cancelled`] is the graceful case.
    async fn consume(&self, consumption: ConsumptionLoop) -> BrokerError;
}

/// JSON-encode and publish through any [`MessagePublisher`].
pub async fn publish_json<P, T>(publisher: &P, exchange: &str, routing_key: &str, message: &T) -> Result<()>
where
    P: MessagePublisher + ?Sized,
    T: Serialize + ?Sized,
{
    let request = PublishRequest::json(exchange, routing_key, message)?;
    publisher.publish(request).await
}
