//! User events consumed from and published to the broker

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Span};
use warden_broker::{HandlerOutcome, MessageHandler};
use warden_telemetry::Counter;

pub const USER_EVENTS_EXCHANGE: &str = "user.events";
pub const USER_EVENTS_QUEUE: &str = "user-service.user-events";
pub const USER_EVENTS_BINDING: &str = "user.#";

pub const SERVICE_STARTED: &str = "service.started";
pub const SERVICE_STOPPING: &str = "service.stopping";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    pub status: UserStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserEvent {
    #[serde(rename = "user.created")]
    Created { user: UserRecord },
    #[serde(rename = "user.updated")]
    Updated { user: UserRecord },
    #[serde(rename = "user.deleted")]
    Deleted { id: u64 },
}

impl UserEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "user.created",
            Self::Updated { .. } => "user.updated",
            Self::Deleted { .. } => "user.deleted",
        }
    }

    pub fn user_id(&self) -> u64 {
        match self {
            Self::Created { user } | Self::Updated { user } => user.id,
            Self::Deleted { id } => *id,
        }
    }
}

/// Published on the events exchange when the service starts or stops.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub service: String,
    pub version: String,
    pub event: &'static str,
    pub at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(service: &str, version: &str, event: &'static str) -> Self {
        Self {
            service: service.to_string(),
            version: version.to_string(),
            event,
            at: Utc::now(),
        }
    }
}

/// Decodes user events. A payload that does not decode will never decode,
/// so it is reported as a terminal failure.
pub struct UserEventHandler {
    processed: Counter,
    invalid: Counter,
    span: Span,
}

impl UserEventHandler {
    pub fn new() -> Self {
        Self {
            processed: Counter::new("user_events.processed"),
            invalid: Counter::new("user_events.invalid"),
            span: tracing::info_span!("user_events", component = "handler"),
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.get()
    }

    pub fn invalid(&self) -> u64 {
        self.invalid.get()
    }
}

impl Default for UserEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageHandler for UserEventHandler {
    async fn handle(&self, _cancel: &CancellationToken, payload: &[u8]) -> HandlerOutcome {
        let event: UserEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                self.invalid.inc();
                warn!(parent: &self.span, error = %e, bytes = payload.len(), "Undecodable user event");
                return HandlerOutcome::terminal(format!("invalid user event: {}", e));
            }
        };

        info!(
            parent: &self.span,
            event = event.kind(),
            user_id = event.user_id(),
            "User event received"
        );
        self.processed.inc();
        HandlerOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserRecord {
        UserRecord {
            id: 42,
            email: "ada@example.com".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone: String::new(),
            status: UserStatus::Active,
        }
    }

    #[test]
    fn test_event_wire_format() {
        let event = UserEvent::Created { user: user() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "user.created");
        assert_eq!(json["user"]["status"], "active");

        let deleted: UserEvent = serde_json::from_str(r#"{"type":"user.deleted","id":7}"#).unwrap();
        assert_eq!(deleted, UserEvent::Deleted { id: 7 });
        assert_eq!(deleted.user_id(), 7);
    }

    #[tokio::test]
    async fn test_valid_event_succeeds() {
        let handler = UserEventHandler::new();
        let payload = serde_json::to_vec(&UserEvent::Updated { user: user() }).unwrap();

        let outcome = handler.handle(&CancellationToken::new(), &payload).await;
        assert!(outcome.is_success());
        assert_eq!(handler.processed(), 1);
    }

    #[tokio::test]
    async fn test_garbage_is_terminal() {
        let handler = UserEventHandler::new();
        let outcome = handler.handle(&CancellationToken::new(), b"{not json").await;

        assert!(matches!(outcome, HandlerOutcome::Failure { retryable: false, .. }));
        assert_eq!(handler.invalid(), 1);
        assert_eq!(handler.processed(), 0);
    }

    #[test]
    fn test_lifecycle_event() {
        let event = LifecycleEvent::new("user-service", "1.0.0", SERVICE_STARTED);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "service.started");
        assert_eq!(json["service"], "user-service");
    }
}
