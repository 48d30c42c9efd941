//! Backend capabilities and health reporting
//!
//! Capabilities are split so a test double can implement only what a caller
//! needs: a readiness probe only needs [`HealthCheck`], the registry needs the
//! full [`Backend`].

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::service::{DependencyStatus, ReadinessStatus};

/// What a backend connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Store,
    Broker,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => f.write_str("store"),
            Self::Broker => f.write_str("broker"),
        }
    }
}

/// A single round-trip liveness probe.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<()>;
}

/// A connection owned by the registry: created once at startup, closed once
/// at shutdown. Using a backend after `close` returns
/// [`WardenError::Closed`](crate::WardenError::Closed).
#[async_trait]
pub trait Backend: HealthCheck {
    /// Health-report key, e.g. `postgres` or `rabbitmq`.
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    async fn close(&self) -> Result<()>;
}

/// Outcome of probing one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl ProbeResult {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            error: None,
            latency_ms: latency.as_millis() as u64,
        }
    }

    pub fn failed(error: impl Into<String>, latency: Duration) -> Self {
        Self {
            error: Some(error.into()),
            latency_ms: latency.as_millis() as u64,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

/// Backend name -> probe outcome. Built fresh for every probe round and
/// immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    checks: BTreeMap<String, ProbeResult>,
}

impl HealthReport {
    pub fn get(&self, name: &str) -> Option<&ProbeResult> {
        self.checks.get(name)
    }

    pub fn is_healthy(&self) -> bool {
        self.checks.values().all(ProbeResult::is_healthy)
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProbeResult)> {
        self.checks.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names and messages of every failed probe.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.checks
            .iter()
            .filter_map(|(name, probe)| probe.error.as_deref().map(|e| (name.as_str(), e)))
    }

    pub fn to_readiness(&self) -> ReadinessStatus {
        ReadinessStatus {
            ready: self.is_healthy(),
            dependencies: self
                .checks
                .iter()
                .map(|(name, probe)| DependencyStatus {
                    name: name.clone(),
                    available: probe.is_healthy(),
                    latency_ms: Some(probe.latency_ms),
                    error: probe.error.clone(),
                })
                .collect(),
        }
    }
}

impl FromIterator<(String, ProbeResult)> for HealthReport {
    fn from_iter<I: IntoIterator<Item = (String, ProbeResult)>>(iter: I) -> Self {
        Self {
            checks: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> HealthReport {
        vec![
            ("postgres".to_string(), ProbeResult::healthy(Duration::from_millis(4))),
            (
                "rabbitmq".to_string(),
                ProbeResult::failed("connection is closed", Duration::from_millis(1)),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_partial_outage() {
        let report = report();
        assert!(!report.is_healthy());
        assert_eq!(report.len(), 2);
        assert!(report.get("postgres").unwrap().is_healthy());

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures, vec![("rabbitmq", "connection is closed")]);
    }

    #[test]
    fn test_readiness_view() {
        let readiness = report().to_readiness();
        assert!(!readiness.ready);
        assert_eq!(readiness.dependencies.len(), 2);
        let broker = readiness
            .dependencies
            .iter()
            .find(|d| d.name == "rabbitmq")
            .unwrap();
        assert!(!broker.available);
        assert_eq!(broker.error.as_deref(), Some("connection is closed"));
    }

    #[test]
    fn test_empty_report_is_healthy() {
        assert!(HealthReport::default().is_healthy());
    }
}
