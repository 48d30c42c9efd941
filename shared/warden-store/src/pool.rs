//! Connection pool link to the relational store

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};
use warden_core::{Backend, BackendKind, HealthCheck, StoreConfig};

use crate::{Result, StoreError};

/// Per-probe budget assumed when no caller budget is known.
pub const DEFAULT_PROBE_BUDGET: Duration = Duration::from_secs(3);

const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// Bound for a probe that must finish inside `budget`: the configured
/// timeout, capped at 90% of the budget.
pub fn probe_timeout_for(configured: Duration, budget: Duration) -> Duration {
    configured.min(budget.mul_f64(0.9))
}

/// Pool configuration. Limits are decided by the caller and passed through.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub dsn: String,
    pub max_open: usize,
    pub max_idle: usize,
    pub max_lifetime: Duration,
    /// Bound on the validating ping performed by [`StoreLink::open`].
    pub connect_timeout: Duration,
    /// Bound on a single health probe.
    pub probe_timeout: Duration,
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dsn: "host=localhost port=5432 user=user-service password=admin dbname=user-service sslmode=disable"
                .to_string(),
            max_open: 25,
            max_idle: 25,
            max_lifetime: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
            probe_timeout: probe_timeout_for(DEFAULT_PROBE_BUDGET, DEFAULT_PROBE_BUDGET),
            reap_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Derive pool settings from the service config. The probe timeout is
    /// kept below the caller's per-probe budget so the store reports its own
    /// timeout before the caller gives up on it.
    pub fn from_service(store: &StoreConfig, probe_budget: Duration) -> Self {
        Self {
            dsn: store.dsn(),
            max_open: store.max_open_conns,
            max_idle: store.max_idle_conns,
            max_lifetime: store.max_lifetime,
            connect_timeout: store.connect_timeout,
            probe_timeout: probe_timeout_for(probe_budget, probe_budget),
            reap_interval: Duration::from_secs(30).min(store.max_lifetime.max(Duration::from_secs(1))),
        }
    }
}

/// Store link backed by a deadpool-postgres pool.
pub struct StoreLink {
    name: String,
    pool: Pool,
    probe_timeout: Duration,
    closed: AtomicBool,
    reaper: CancellationToken,
    span: Span,
}

impl StoreLink {
    /// Build the pool and validate it with a bounded ping. The pool is closed
    /// again if the ping fails, so a failed open leaks nothing.
    pub async fn open(name: impl Into<String>, config: PoolConfig) -> Result<Self> {
        let name = name.into();
        let span = tracing::info_span!("store_link", component = "store", backend = %name);

        info!(
            parent: &span,
            max_open = config.max_open,
            max_idle = config.max_idle,
            max_lifetime_secs = config.max_lifetime.as_secs(),
            "Creating store connection pool"
        );

        let pg_config: tokio_postgres::Config = config
            .dsn
            .parse()
            .map_err(|e| StoreError::Configuration(format!("Invalid DSN: {}", e)))?;

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let manager = Manager::from_config(pg_config, NoTls, manager_config);

        let pool = Pool::builder(manager)
            .max_size(config.max_open)
            .build()
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        if let Err(e) = ping(&pool, config.connect_timeout).await {
            error!(parent: &span, error = %e, "Store ping failed, releasing pool");
            pool.close();
            return Err(e);
        }

        let reaper = CancellationToken::new();
        spawn_reaper(
            pool.clone(),
            config.max_idle,
            config.max_lifetime,
            config.reap_interval,
            reaper.clone(),
            span.clone(),
        );

        info!(parent: &span, "Store connection established");

        Ok(Self {
            name,
            pool,
            probe_timeout: config.probe_timeout,
            closed: AtomicBool::new(false),
            reaper,
            span,
        })
    }

    /// Get a connection from the pool
    pub async fn get(&self) -> Result<Object> {
        self.ensure_open()?;
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }

    /// Probe the store with a budget. The probe gives up before `budget`
    /// runs out, so the caller sees the store's own timeout error.
    pub async fn check_within(&self, budget: Duration) -> Result<()> {
        self.ensure_open()?;
        let timeout = probe_timeout_for(self.probe_timeout, budget);
        ping(&self.pool, timeout).await.map_err(|e| {
            warn!(parent: &self.span, error = %e, "Store health check failed");
            e
        })
    }

    /// Release the pool. A second call returns [`StoreError::Closed`].
    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        info!(parent: &self.span, "Closing store connection pool");
        self.reaper.cancel();
        self.pool.close();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            size: status.size,
            available: status.available as usize,
            waiting: status.waiting,
            max_size: status.max_size,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            error!(parent: &self.span, "Store link used after close");
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl HealthCheck for StoreLink {
    async fn health_check(&self) -> warden_core::Result<()> {
        self.check_within(self.probe_timeout).await.map_err(Into::into)
    }
}

#[async_trait]
impl Backend for StoreLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Store
    }

    async fn close(&self) -> warden_core::Result<()> {
        self.shutdown().map_err(Into::into)
    }
}

/// Pool statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
    pub max_size: usize,
}

async fn ping(pool: &Pool, timeout: Duration) -> Result<()> {
    let probe = async {
        let conn = pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(StoreError::Query)?;
        Ok::<(), StoreError>(())
    };

    tokio::time::timeout(timeout, probe)
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}

fn keep_idle(age: Duration, kept: &AtomicUsize, max_idle: usize, max_lifetime: Duration) -> bool {
    age < max_lifetime && kept.fetch_add(1, Ordering::Relaxed) < max_idle
}

/// Periodically drop idle connections that outlived `max_lifetime` and trim
/// the idle set down to `max_idle`. Intervals below 1ms are raised to 1ms.
fn spawn_reaper(
    pool: Pool,
    max_idle: usize,
    max_lifetime: Duration,
    interval: Duration,
    stop: CancellationToken,
    span: Span,
) -> JoinHandle<()> {
    let reaper = async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_REAP_INTERVAL));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let kept = AtomicUsize::new(0);
                    pool.retain(|_, metrics| keep_idle(metrics.age(), &kept, max_idle, max_lifetime));
                    let status = pool.status();
                    debug!(size = status.size, available = status.available, "Store pool reaped");
                }
            }
        }
        debug!("Store pool reaper stopped");
    };
    tokio::spawn(reaper.instrument(span))
}
