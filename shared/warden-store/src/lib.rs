//! Warden Store
//!
//! Relational store link: a deadpool-postgres pool over tokio-postgres with a
//! validated open, a single round-trip liveness probe and pool limit
//! enforcement.

mod error;
mod pool;

pub use error::{Result, StoreError};
pub use pool::{probe_timeout_for, PoolConfig, PoolStats, StoreLink, DEFAULT_PROBE_BUDGET};

/// Re-export tokio-postgres types for convenience
pub use tokio_postgres::{types::ToSql, Row, Statement};
