//! Warden Connections
//!
//! Owns every backend a service depends on: opens them in a fixed order with
//! rollback, probes them concurrently for readiness and closes them in
//! reverse order at shutdown.

pub mod error;
pub mod registry;
pub mod service;

pub use error::{BackendFailure, RegistryError, Result};
pub use registry::{ConnectionRegistry, RegistryBuilder};
pub use service::{drain_then_close, ServiceConnections, BROKER_BACKEND, STORE_BACKEND};
