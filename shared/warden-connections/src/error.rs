//! Registry error types

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use warden_core::{BackendKind, WardenError};

pub type Result<T> = std::result::Result<T, RegistryError>;

/// One backend that failed to close.
#[derive(Debug, Clone, Serialize)]
pub struct BackendFailure {
    pub name: String,
    pub kind: BackendKind,
    pub error: String,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.kind, self.error)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to open backend {name}: {source}")]
    Open { name: String, source: WardenError },

    #[error("Failed to close {} backend(s): {}", .0.len(), join(.0))]
    Close(Vec<BackendFailure>),
}

impl RegistryError {
    pub fn failures(&self) -> &[BackendFailure] {
        match self {
            Self::Close(failures) => failures,
            Self::Open { .. } => &[],
        }
    }
}

fn join(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<RegistryError> for WardenError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Open { source, .. } => WardenError::Unavailable(source.to_string()),
            close => WardenError::Internal(close.to_string()),
        }
    }
}
