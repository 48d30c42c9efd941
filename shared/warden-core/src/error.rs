//! Error types for Warden services

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WardenError>;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Backend closed: {0}")]
    Closed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Flat code -> HTTP status table. Every variant has exactly one row.
const STATUS_TABLE: &[(&str, u16)] = &[
    ("CONFIG_ERROR", 500),
    ("DATABASE_ERROR", 500),
    ("MESSAGING_ERROR", 502),
    ("NETWORK_ERROR", 502),
    ("NOT_FOUND", 404),
    ("VALIDATION_ERROR", 400),
    ("CONFLICT", 409),
    ("UNAVAILABLE", 503),
    ("BACKEND_CLOSED", 503),
    ("TIMEOUT", 504),
    ("INTERNAL_ERROR", 500),
];

impl WardenError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Messaging(_) => "MESSAGING_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Closed(_) => "BACKEND_CLOSED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> u16 {
        status_for_code(self.error_code())
    }
}

/// Look up the HTTP status for a stable error code. Unknown codes are 500.
pub fn status_for_code(code: &str) -> u16 {
    STATUS_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, status)| *status)
        .unwrap_or(500)
}

impl From<std::io::Error> for WardenError {
    fn from(err: std::io::Error) -> Self {
        WardenError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(WardenError::Validation("bad".into()).status_code(), 400);
        assert_eq!(WardenError::NotFound("user".into()).status_code(), 404);
        assert_eq!(WardenError::Conflict("email".into()).status_code(), 409);
        assert_eq!(WardenError::Unavailable("store".into()).status_code(), 503);
        assert_eq!(WardenError::Timeout("probe".into()).status_code(), 504);
        assert_eq!(WardenError::Internal("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_every_code_has_a_row() {
        let all = [
            WardenError::Config(String::new()),
            WardenError::Database(String::new()),
            WardenError::Messaging(String::new()),
            WardenError::Network(String::new()),
            WardenError::NotFound(String::new()),
            WardenError::Validation(String::new()),
            WardenError::Conflict(String::new()),
            WardenError::Unavailable(String::new()),
            WardenError::Closed(String::new()),
            WardenError::Timeout(String::new()),
            WardenError::Internal(String::new()),
        ];
        for err in all {
            assert!(
                STATUS_TABLE.iter().any(|(code, _)| *code == err.error_code()),
                "missing status row for {}",
                err.error_code()
            );
        }
    }

    #[test]
    fn test_unknown_code_is_internal() {
        assert_eq!(status_for_code("NOPE"), 500);
    }
}
