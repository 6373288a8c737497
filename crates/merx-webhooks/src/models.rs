//! Core value types for synchronous webhook delivery.
//!
//! A `Webhook` describes one subscriber endpoint. An `EventDelivery` is one
//! logical intent to send an event to one subscriber; each physical network
//! try is a `DeliveryAttempt`. The payload is immutable and may be shared by
//! several deliveries when multiple subscribers receive the identical body.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery / attempt outcome. `Pending` is the initial state; a delivery
/// transitions exactly once to `Success` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventDeliveryStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl EventDeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for EventDeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable serialized event body.
#[derive(Debug, Clone)]
pub struct EventPayload {
    pub id: Uuid,
    body: String,
}

impl EventPayload {
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.body.as_bytes()
    }
}

/// Subscriber endpoint descriptor. Read-only from this crate's perspective;
/// ownership and lifecycle live with the registration layer.
#[derive(Debug, Clone)]
pub struct Webhook {
    pub id: Uuid,
    /// Owning app. Breaker state and cache keys are scoped by this.
    pub app_id: Uuid,
    pub name: String,
    pub target_url: String,
    /// HMAC key for payload signing. `None` delivers unsigned.
    pub secret_key: Option<String>,
    /// Declarative query producing a per-subscriber payload. `None` means
    /// the caller supplies a static payload string.
    pub subscription_query: Option<String>,
    pub custom_headers: HashMap<String, String>,
}

impl Webhook {
    /// Minimal constructor for a static-payload webhook.
    #[must_use]
    pub fn new(app_id: Uuid, name: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            app_id,
            name: name.into(),
            target_url: target_url.into(),
            secret_key: None,
            subscription_query: None,
            custom_headers: HashMap::new(),
        }
    }
}

/// One logical delivery intent: this event, to this subscriber, with this
/// payload. Status transitions `Pending -> {Success, Failed}` exactly once;
/// a retry supersedes the delivery with a fresh one rather than reopening it.
#[derive(Debug, Clone)]
pub struct EventDelivery {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub event_type: String,
    pub status: EventDeliveryStatus,
    pub webhook: Arc<Webhook>,
    pub payload: Arc<EventPayload>,
}

impl EventDelivery {
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        webhook: Arc<Webhook>,
        payload: Arc<EventPayload>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            event_type: event_type.into(),
            status: EventDeliveryStatus::Pending,
            webhook,
            payload,
        }
    }
}

/// Append-only record of one physical network try for a delivery.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub delivery_id: Uuid,
    /// Background task identifier when the attempt ran inside the retryable
    /// transaction-action task; `None` for inline sends.
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: EventDeliveryStatus,
    pub response_body: Option<String>,
    pub response_headers: Option<serde_json::Value>,
    pub response_status_code: Option<u16>,
    pub response_size: Option<usize>,
    pub duration: Option<Duration>,
}

impl DeliveryAttempt {
    #[must_use]
    pub fn new(delivery_id: Uuid, task_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            delivery_id,
            task_id,
            created_at: Utc::now(),
            status: EventDeliveryStatus::Pending,
            response_body: None,
            response_headers: None,
            response_status_code: None,
            response_size: None,
            duration: None,
        }
    }
}

/// Ephemeral transport result. Never persisted directly; always folded into
/// the current `DeliveryAttempt`.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub content: String,
    pub status: EventDeliveryStatus,
    pub response_status_code: Option<u16>,
    pub headers: HashMap<String, String>,
    pub duration: Duration,
}

impl WebhookResponse {
    /// Failure-shaped response used before any network activity happened
    /// (scheme gate, breaker short-circuit).
    #[must_use]
    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: EventDeliveryStatus::Failed,
            response_status_code: None,
            headers: HashMap::new(),
            duration: Duration::ZERO,
        }
    }

    /// True when the HTTP layer itself reported a server error.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self.response_status_code, Some(code) if code >= 500)
    }
}

/// Who initiated the triggering operation. Carried into subscription payload
/// generation for payload metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requestor {
    App(Uuid),
    User(Uuid),
}

/// Shared context for subscription payload generation, built once per
/// trigger (or once per fallback loop) and reused across subscribers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub requestor: Option<Requestor>,
    pub event_type: String,
    pub sync_event: bool,
    pub allow_replica: bool,
}

/// Domain event describing a requested transaction action (charge, refund,
/// cancel). Consumed by the escape hatch, never owned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub id: Uuid,
    pub transaction_id: Uuid,
}

/// Input of the transaction-action escape hatch: the triggering event plus
/// the optional app that owns the transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionActionData {
    pub event: TransactionEvent,
    pub transaction_id: Uuid,
    pub transaction_app_owner: Option<Uuid>,
    /// Action parameters (kind, amount, currency) as the payment layer
    /// shaped them.
    pub action: serde_json::Value,
}
