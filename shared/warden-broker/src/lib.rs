//! Warden Broker - AMQP link and reliable consumption
//!
//! [`BrokerLink`] owns one lapin connection and one channel. Each subscribed
//! queue is driven by a [`ConsumptionLoop`] that settles every delivery
//! exactly once; [`ConsumerSet`] runs the loops and drains them on shutdown.

pub mod consumer;
pub mod error;
pub mod link;
pub mod message;
pub mod supervisor;
pub mod traits;

pub use consumer::{
    ConsumerContract, ConsumerSnapshot, ConsumerState, ConsumerStats, ConsumptionLoop, RequeuePolicy,
};
pub use error::{BrokerError, Result};
pub use link::{BrokerLink, BrokerLinkConfig};
pub use message::{
    handler_fn, FnHandler, HandlerOutcome, InboundDelivery, MessageHandler, PublishRequest,
    JSON_CONTENT_TYPE, PERSISTENT_DELIVERY_MODE,
};
pub use supervisor::{ConsumerSet, DrainOutcome};
pub use traits::{publish_json, MessageConsumer, MessagePublisher};
