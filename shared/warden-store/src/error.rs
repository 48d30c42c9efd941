//! Store error types

use std::time::Duration;
use thiserror::Error;
use warden_core::WardenError;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_postgres::Error),

    #[error("Query error: {0}")]
    Query(tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Store link used after close")]
    Closed,
}

impl From<StoreError> for WardenError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Configuration(msg) => WardenError::Config(msg),
            StoreError::Timeout(_) => WardenError::Timeout(err.to_string()),
            StoreError::Closed => WardenError::Closed(err.to_string()),
            other => WardenError::Database(other.to_string()),
        }
    }
}
