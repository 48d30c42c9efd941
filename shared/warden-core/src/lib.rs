//! Warden Core - Shared service infrastructure
//!
//! This crate provides:
//! - Standard service trait and runtime every microservice runs under
//! - Backend capability traits and health reports
//! - Error handling utilities
//! - Configuration management

pub mod backend;
pub mod config;
pub mod error;
pub mod service;

pub use backend::{Backend, BackendKind, HealthCheck, HealthReport, ProbeResult};
pub use config::{BrokerConfig, ServiceConfig, StoreConfig};
pub use error::{status_for_code, Result, WardenError};
pub use service::{DependencyStatus, HealthStatus, MicroserviceRuntime, ReadinessStatus, WardenService};
