//! Per-queue consumption loop
//!
//! One loop owns one subscription. It waits on exactly two events, the next
//! delivery and cancellation, and settles every delivery it takes before it
//! looks at the stream again. Per queue that gives strictly serial, in-order
//! handling: handler N+1 never starts before delivery N is acked or nacked.
//!
//! ```text
//! Subscribing -> Running -> Draining -> Stopped
//!                   \____________________/
//!                    channel closed / broker error
//! ```

use futures_util::{FutureExt, Stream, StreamExt};
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Span};
use warden_telemetry::{Counter, Histogram};

use crate::message::{HandlerOutcome, InboundDelivery, MessageHandler};
use crate::{BrokerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    Subscribing,
    Running,
    Draining,
    Stopped,
}

/// How handler failures are settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequeuePolicy {
    /// Every failure is nacked with requeue, retryable or not.
    #[default]
    Always,
    /// Non-retryable failures are nacked without requeue.
    RespectRetryable,
}

/// Queue name, handler and failure policy for one subscription.
#[derive(Clone)]
pub struct ConsumerContract {
    pub queue: String,
    pub handler: Arc<dyn MessageHandler>,
    pub policy: RequeuePolicy,
}

impl ConsumerContract {
    pub fn new(queue: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            queue: queue.into(),
            handler,
            policy: RequeuePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RequeuePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl fmt::Debug for ConsumerContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerContract")
            .field("queue", &self.queue)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Settlement counters for one subscription. Clones share the counters.
#[derive(Clone)]
pub struct ConsumerStats {
    pub handled: Counter,
    pub acked: Counter,
    pub requeued: Counter,
    pub rejected: Counter,
    pub handler_ms: Histogram,
}

impl ConsumerStats {
    pub fn new(queue: &str) -> Self {
        Self {
            handled: Counter::new(&format!("{queue}.handled")),
            acked: Counter::new(&format!("{queue}.acked")),
            requeued: Counter::new(&format!("{queue}.requeued")),
            rejected: Counter::new(&format!("{queue}.rejected")),
            handler_ms: Histogram::new(&format!("{queue}.handler_ms")),
        }
    }

    pub fn snapshot(&self, queue: &str, state: ConsumerState) -> ConsumerSnapshot {
        ConsumerSnapshot {
            queue: queue.to_string(),
            state,
            handled: self.handled.get(),
            acked: self.acked.get(),
            requeued: self.requeued.get(),
            rejected: self.rejected.get(),
            handler_p99_ms: self.handler_ms.percentile(99.0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerSnapshot {
    pub queue: String,
    pub state: ConsumerState,
    pub handled: u64,
    pub acked: u64,
    pub requeued: u64,
    pub rejected: u64,
    pub handler_p99_ms: f64,
}

enum Settlement {
    Ack,
    Nack { requeue: bool },
}

enum Next<T> {
    Cancelled,
    Delivery(Option<T>),
}

pub struct ConsumptionLoop {
    contract: ConsumerContract,
    cancel: CancellationToken,
    state: watch::Sender<ConsumerState>,
    stats: ConsumerStats,
    span: Span,
}

impl ConsumptionLoop {
    pub fn new(contract: ConsumerContract, cancel: CancellationToken) -> Self {
        let span = tracing::info_span!("consumer", component = "consumer", queue = %contract.queue);
        let stats = ConsumerStats::new(&contract.queue);
        let (state, _) = watch::channel(ConsumerState::Subscribing);
        Self {
            contract,
            cancel,
            state,
            stats,
            span,
        }
    }

    pub fn queue(&self) -> &str {
        &self.contract.queue
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.clone()
    }

    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the subscription until cancellation or until the delivery
    /// stream fails, and return why it stopped. Cancellation yields
    /// [`BrokerError::Cancelled`]; a closed stream or a failed settlement
    /// yields the matching connection-fatal error. Counters stay readable
    /// through [`stats`](Self::stats) taken before the call.
    pub async fn run<S, D, E>(self, deliveries: S) -> BrokerError
    where
        S: Stream<Item = std::result::Result<D, E>> + Send,
        D: InboundDelivery,
        E: fmt::Display + Send,
    {
        tokio::pin!(deliveries);
        self.transition(ConsumerState::Running);
        info!(parent: &self.span, "Starting to consume messages");

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Next::Cancelled,
                delivery = deliveries.next() => Next::Delivery(delivery),
            };

            match next {
                Next::Cancelled => {
                    self.transition(ConsumerState::Draining);
                    info!(parent: &self.span, "Context cancelled, stopping consumer");
                    break BrokerError::Cancelled(self.contract.queue.clone());
                }
                Next::Delivery(Some(Ok(delivery))) => {
                    if let Err(e) = self.process(delivery).await {
                        error!(parent: &self.span, error = %e, "Failed to settle delivery");
                        break e;
                    }
                }
                Next::Delivery(Some(Err(e))) => {
                    error!(parent: &self.span, error = %e, "Delivery stream failed");
                    break BrokerError::Delivery {
                        queue: self.contract.queue.clone(),
                        reason: e.to_string(),
                    };
                }
                Next::Delivery(None) => {
                    warn!(parent: &self.span, "Message channel closed");
                    break BrokerError::ChannelClosed(self.contract.queue.clone());
                }
            }
        };

        self.transition(ConsumerState::Stopped);
        reason
    }

    /// End a loop that never got its delivery stream.
    pub fn fail(self, err: BrokerError) -> BrokerError {
        error!(parent: &self.span, error = %err, "Failed to start consumer");
        self.transition(ConsumerState::Stopped);
        err
    }

    async fn process<D: InboundDelivery>(&self, delivery: D) -> Result<()> {
        let delivery_tag = delivery.delivery_tag();
        let started = Instant::now();

        let handled = AssertUnwindSafe(self.contract.handler.handle(&self.cancel, delivery.payload()))
            .catch_unwind()
            .await;
        let outcome = handled.unwrap_or_else(|_| HandlerOutcome::retryable("handler panicked"));

        self.stats.handled.inc();
        self.stats
            .handler_ms
            .record(started.elapsed().as_secs_f64() * 1000.0);

        if self.cancel.is_cancelled() {
            // The in-flight message still gets settled below.
            self.transition(ConsumerState::Draining);
        }

        match self.settlement(&outcome) {
            Settlement::Ack => {
                delivery.ack().await?;
                self.stats.acked.inc();
                debug!(parent: &self.span, delivery_tag, "Message processed successfully");
            }
            Settlement::Nack { requeue } => {
                let reason = match &outcome {
                    HandlerOutcome::Failure { reason, .. } => reason.as_str(),
                    HandlerOutcome::Success => "",
                };
                error!(
                    parent: &self.span,
                    delivery_tag,
                    requeue,
                    redelivered = delivery.redelivered(),
                    reason,
                    "Failed to handle message"
                );
                delivery.nack(requeue).await?;
                if requeue {
                    self.stats.requeued.inc();
                } else {
                    self.stats.rejected.inc();
                }
            }
        }

        Ok(())
    }

    fn settlement(&self, outcome: &HandlerOutcome) -> Settlement {
        match (outcome, self.contract.policy) {
            (HandlerOutcome::Success, _) => Settlement::Ack,
            (HandlerOutcome::Failure { retryable: false, .. }, RequeuePolicy::RespectRetryable) => {
                Settlement::Nack { requeue: false }
            }
            (HandlerOutcome::Failure { .. }, _) => Settlement::Nack { requeue: true },
        }
    }

    fn transition(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(parent: &self.span, from = ?previous, to = ?next, "Consumer state changed");
        }
    }
}
