//! Consumer supervision
//!
//! Every consumption loop runs as its own task under a child of one root
//! token. Shutdown cancels the root and waits, bounded, for every loop to
//! reach `Stopped` so no loop outlives the channel it reads from.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument, Span};
use warden_telemetry::Gauge;

use crate::consumer::{ConsumerContract, ConsumerSnapshot, ConsumerState, ConsumerStats, ConsumptionLoop};
use crate::traits::MessageConsumer;

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Graceful,
    Forced { aborted: usize },
}

struct ConsumerHandle {
    queue: String,
    stats: ConsumerStats,
    state: watch::Receiver<ConsumerState>,
}

pub struct ConsumerSet {
    root: CancellationToken,
    failed: CancellationToken,
    first_failure: Arc<Mutex<Option<String>>>,
    tasks: Mutex<JoinSet<()>>,
    handles: Mutex<Vec<ConsumerHandle>>,
    active: Gauge,
    span: Span,
}

impl ConsumerSet {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            failed: CancellationToken::new(),
            first_failure: Arc::new(Mutex::new(None)),
            tasks: Mutex::new(JoinSet::new()),
            handles: Mutex::new(Vec::new()),
            active: Gauge::new("consumers.active"),
            span: tracing::info_span!("consumers", component = "consumer"),
        }
    }

    /// Start a consumption loop for `contract` on its own task.
    pub fn spawn(&self, consumer: Arc<dyn MessageConsumer>, contract: ConsumerContract) {
        let consumption = ConsumptionLoop::new(contract, self.root.child_token());
        let queue = consumption.queue().to_string();

        self.handles.lock().push(ConsumerHandle {
            queue: queue.clone(),
            stats: consumption.stats(),
            state: consumption.state(),
        });

        let root = self.root.clone();
        let failed = self.failed.clone();
        let first_failure = self.first_failure.clone();
        let active = self.active.clone();
        let stats = consumption.stats();
        active.inc();

        let task = async move {
            let reason = consumer.consume(consumption).await;
            if reason.is_cancelled() {
                info!(
                    queue = %queue,
                    acked = stats.acked.get(),
                    requeued = stats.requeued.get(),
                    "Consumer stopped"
                );
            } else if root.is_cancelled() {
                warn!(queue = %queue, error = %reason, "Consumer exited with error during shutdown");
            } else {
                error!(
                    queue = %queue,
                    error = %reason,
                    connection_fatal = reason.is_connection_fatal(),
                    "Consumer stopped unexpectedly"
                );
                first_failure
                    .lock()
                    .get_or_insert_with(|| format!("consumer on {} stopped: {}", queue, reason));
                failed.cancel();
            }
            active.dec();
        };

        self.tasks.lock().spawn(task.instrument(self.span.clone()));
    }

    /// Resolves once any consumer has stopped without being asked to, with
    /// the first such failure.
    pub async fn failed(&self) -> String {
        self.failed.cancelled().await;
        self.first_failure
            .lock()
            .clone()
            .unwrap_or_else(|| "consumer stopped".to_string())
    }

    pub fn active(&self) -> u64 {
        self.active.get()
    }

    /// Cancel every loop and wait up to `timeout` for all of them to
    /// settle their in-flight message and stop. Loops still running after
    /// the timeout are aborted.
    pub async fn drain(&self, timeout: Duration) -> DrainOutcome {
        self.root.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return DrainOutcome::Graceful;
        }

        info!(parent: &self.span, consumers = tasks.len(), "Draining consumers");

        let joined = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(parent: &self.span, error = %e, "Consumer task panicked");
                }
            }
        })
        .await;

        match joined {
            Ok(()) => {
                info!(parent: &self.span, "All consumers stopped");
                DrainOutcome::Graceful
            }
            Err(_) => {
                let aborted = tasks.len();
                tasks.abort_all();
                error!(
                    parent: &self.span,
                    aborted,
                    timeout_ms = timeout.as_millis() as u64,
                    "Consumer drain timed out, forcing hard shutdown"
                );
                DrainOutcome::Forced { aborted }
            }
        }
    }

    pub fn snapshot(&self) -> Vec<ConsumerSnapshot> {
        self.handles
            .lock()
            .iter()
            .map(|h| h.stats.snapshot(&h.queue, *h.state.borrow()))
            .collect()
    }
}

impl Default for ConsumerSet {
    fn default() -> Self {
        Self::new()
    }
}
