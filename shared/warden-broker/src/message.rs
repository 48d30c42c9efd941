//! Outbound publish requests, inbound deliveries and handler outcomes

use async_trait::async_trait;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use lapin::BasicProperties;
use serde::Serialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::{BrokerError, Result};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode for messages that survive a broker restart.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// One outbound message. Built per call and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub persistent: bool,
}

impl PublishRequest {
    /// JSON-encode `message` into a persistent publish request.
    pub fn json<T>(exchange: &str, routing_key: &str, message: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: serde_json::to_vec(message)?,
            persistent: true,
        })
    }

    pub(crate) fn properties(&self) -> BasicProperties {
        let properties = BasicProperties::default()
            .with_content_type(JSON_CONTENT_TYPE.into())
            .with_timestamp(chrono::Utc::now().timestamp().max(0) as u64);
        if self.persistent {
            properties.with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        } else {
            properties
        }
    }
}

/// A delivery that must be settled exactly once. Settling consumes the
/// delivery, so a second ack or nack does not type-check.
#[async_trait]
pub trait InboundDelivery: Send + 'static {
    fn payload(&self) -> &[u8];

    fn delivery_tag(&self) -> u64;

    fn redelivered(&self) -> bool;

    async fn ack(self) -> Result<()>;

    async fn nack(self, requeue: bool) -> Result<()>;
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn payload(&self) -> &[u8] {
        &self.data
    }

    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(self) -> Result<()> {
        let delivery_tag = self.delivery_tag;
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Acknowledge {
                delivery_tag,
                reason: e.to_string(),
            })
    }

    async fn nack(self, requeue: bool) -> Result<()> {
        let delivery_tag = self.delivery_tag;
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Acknowledge {
                delivery_tag,
                reason: e.to_string(),
            })
    }
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success,
    Failure { retryable: bool, reason: String },
}

impl HandlerOutcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Failure {
            retryable: true,
            reason: reason.into(),
        }
    }

    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::Failure {
            retryable: false,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Caller-supplied message handler. Runs inside the consumption loop's task;
/// the loop does not pull the next message until this returns.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, cancel: &CancellationToken, payload: &[u8]) -> HandlerOutcome;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(CancellationToken, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(CancellationToken, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    async fn handle(&self, cancel: &CancellationToken, payload: &[u8]) -> HandlerOutcome {
        (self.0)(cancel.clone(), payload.to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Created<'a> {
        id: u32,
        email: &'a str,
    }

    #[test]
    fn test_json_request_is_persistent() {
        let request = PublishRequest::json("evt", "created", &Created { id: 7, email: "a@b.c" }).unwrap();
        assert_eq!(request.exchange, "evt");
        assert_eq!(request.routing_key, "created");
        assert!(request.persistent);
        assert_eq!(request.payload, br#"{"id":7,"email":"a@b.c"}"#.to_vec());
    }

    #[test]
    fn test_properties() {
        let request = PublishRequest::json("evt", "created", &1).unwrap();
        let properties = request.properties();
        assert_eq!(properties.delivery_mode(), &Some(PERSISTENT_DELIVERY_MODE));
        assert_eq!(
            properties.content_type().as_ref().map(|s| s.as_str()),
            Some(JSON_CONTENT_TYPE)
        );
        assert!(properties.timestamp().is_some());

        let transient = PublishRequest {
            persistent: false,
            ..request
        };
        assert_eq!(transient.properties().delivery_mode(), &None);
    }

    #[tokio::test]
    async fn test_fn_handler() {
        let handler = handler_fn(|_cancel, payload: Vec<u8>| async move {
            if payload.is_empty() {
                HandlerOutcome::terminal("empty payload")
            } else {
                HandlerOutcome::Success
            }
        });
        let cancel = CancellationToken::new();
        assert!(handler.handle(&cancel, b"x").await.is_success());
        assert_eq!(
            handler.handle(&cancel, b"").await,
            HandlerOutcome::terminal("empty payload")
        );
    }
}
