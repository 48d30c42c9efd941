//! Broker error types

use std::time::Duration;
use thiserror::Error;
use warden_core::WardenError;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(lapin::Error),

    #[error("Channel error: {0}")]
    Channel(lapin::Error),

    #[error("Failed to publish message: {0}")]
    Publish(lapin::Error),

    #[error("Broker rejected message for {exchange}/{routing_key}")]
    Rejected {
        exchange: String,
        routing_key: String,
    },

    #[error("Failed to marshal message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Topology declaration failed: {0}")]
    Topology(lapin::Error),

    #[error("Failed to register consumer on {queue}: {source}")]
    Subscribe { queue: String, source: lapin::Error },

    #[error("Delivery error on {queue}: {reason}")]
    Delivery { queue: String, reason: String },

    #[error("Failed to settle delivery {delivery_tag}: {reason}")]
    Acknowledge { delivery_tag: u64, reason: String },

    #[error("Message channel closed for queue {0}")]
    ChannelClosed(String),

    #[error("Broker did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Consumer on {0} cancelled")]
    Cancelled(String),

    #[error("Broker link used after close")]
    Closed,
}

impl BrokerError {
    /// Errors that mean the connection or channel is gone and the owner has
    /// to decide between reconnecting and exiting.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Channel(_)
                | Self::ChannelClosed(_)
                | Self::Delivery { .. }
                | Self::Acknowledge { .. }
                | Self::Closed
        )
    }

    /// The owner asked the consumer to stop. This is the normal way a
    /// consumption loop ends.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

impl From<BrokerError> for WardenError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Timeout(_) => WardenError::Timeout(err.to_string()),
            BrokerError::Closed | BrokerError::Cancelled(_) => WardenError::Closed(err.to_string()),
            other => WardenError::Messaging(other.to_string()),
        }
    }
}
