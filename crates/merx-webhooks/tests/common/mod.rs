//! Common test utilities for merx-webhooks integration tests.
//!
//! Provides wiremock responders, an in-memory engine harness, and stub
//! collaborators for the payload generator and payment-layer seams.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

use merx_webhooks::config::WebhookConfig;
use merx_webhooks::error::PayloadError;
use merx_webhooks::factory::SubscriptionPayloadGenerator;
use merx_webhooks::models::{RequestContext, TransactionEvent, Webhook};
use merx_webhooks::store::{InMemoryDeliveryStore, InMemoryWebhookRegistry};
use merx_webhooks::transaction::{TransactionEventRecorder, TransactionRequestWorker};
use merx_webhooks::WebhookEngine;

pub const SECRET: &str = "whsec_test_secret_key_12345";

// ---------------------------------------------------------------------------
// CaptureResponder - inspects webhook requests
// ---------------------------------------------------------------------------

/// A captured HTTP request with body and headers.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CapturedRequest {
    pub fn body_json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("captured body is not JSON")
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

/// A wiremock responder that captures incoming requests and answers with a
/// fixed status and JSON body.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
    response_body: Value,
}

impl CaptureResponder {
    /// 200 OK with an empty JSON object body.
    pub fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: 200,
            response_body: json!({}),
        }
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            response_code: status,
            ..Self::new()
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.response_body = body;
        self
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.response_code).set_body_json(self.response_body.clone())
    }
}

// ---------------------------------------------------------------------------
// Stub collaborators
// ---------------------------------------------------------------------------

/// Generator producing a fixed payload embedding the subscribable object.
pub struct EchoGenerator;

#[async_trait]
impl SubscriptionPayloadGenerator for EchoGenerator {
    async fn generate(
        &self,
        event_type: &str,
        subscribable_object: Option<&Value>,
        _subscription_query: &str,
        _context: &RequestContext,
        _webhook: &Webhook,
    ) -> Result<Option<Value>, PayloadError> {
        Ok(Some(json!({
            "event": event_type,
            "object": subscribable_object.cloned().unwrap_or(Value::Null),
        })))
    }
}

/// Generator whose query never produces data.
pub struct NullGenerator;

#[async_trait]
impl SubscriptionPayloadGenerator for NullGenerator {
    async fn generate(
        &self,
        _event_type: &str,
        _subscribable_object: Option<&Value>,
        _subscription_query: &str,
        _context: &RequestContext,
        _webhook: &Webhook,
    ) -> Result<Option<Value>, PayloadError> {
        Ok(None)
    }
}

/// Generator failing with a payment-domain error.
pub struct FailingGenerator;

#[async_trait]
impl SubscriptionPayloadGenerator for FailingGenerator {
    async fn generate(
        &self,
        _event_type: &str,
        _subscribable_object: Option<&Value>,
        _subscription_query: &str,
        _context: &RequestContext,
        _webhook: &Webhook,
    ) -> Result<Option<Value>, PayloadError> {
        Err(PayloadError::Payment("gateway unavailable".to_string()))
    }
}

/// Payment-layer recorder keeping every callback in memory.
#[derive(Default)]
pub struct RecordingRecorder {
    events: Mutex<HashMap<Uuid, TransactionEvent>>,
    failed: Mutex<Vec<String>>,
    finalized: Mutex<Vec<Option<Value>>>,
    refundable: Mutex<u32>,
}

impl RecordingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a request event resolvable by the worker.
    pub fn add_event(&self, event: TransactionEvent) {
        self.events.lock().unwrap().insert(event.id, event);
    }

    pub fn remove_event(&self, event_id: Uuid) {
        self.events.lock().unwrap().remove(&event_id);
    }

    pub fn failed_causes(&self) -> Vec<String> {
        self.failed.lock().unwrap().clone()
    }

    pub fn finalized_responses(&self) -> Vec<Option<Value>> {
        self.finalized.lock().unwrap().clone()
    }

    pub fn refundable_recalculations(&self) -> u32 {
        *self.refundable.lock().unwrap()
    }
}

#[async_trait]
impl TransactionEventRecorder for RecordingRecorder {
    async fn request_event(&self, event_id: Uuid) -> Option<TransactionEvent> {
        self.events.lock().unwrap().get(&event_id).cloned()
    }

    async fn create_failed_event(&self, _event: &TransactionEvent, cause: &str) {
        self.failed.lock().unwrap().push(cause.to_string());
    }

    async fn create_event_from_response(
        &self,
        _request_event: &TransactionEvent,
        _app_id: Uuid,
        response: Option<Value>,
    ) {
        self.finalized.lock().unwrap().push(response);
    }

    async fn recalculate_refundable(&self, _transaction_id: Uuid, _event: &TransactionEvent) {
        *self.refundable.lock().unwrap() += 1;
    }
}

// ---------------------------------------------------------------------------
// Engine harness
// ---------------------------------------------------------------------------

/// A fully wired engine over in-memory storage, with the seams exposed for
/// assertions.
pub struct TestHarness {
    pub engine: WebhookEngine,
    pub store: Arc<InMemoryDeliveryStore>,
    pub registry: Arc<InMemoryWebhookRegistry>,
    pub recorder: Arc<RecordingRecorder>,
}

/// Build a harness around the given generator and config. The returned
/// worker must be spawned by tests exercising the transaction path.
pub fn build_harness(
    generator: Arc<dyn SubscriptionPayloadGenerator>,
    config: WebhookConfig,
) -> (TestHarness, TransactionRequestWorker) {
    let store = Arc::new(InMemoryDeliveryStore::new());
    let registry = Arc::new(InMemoryWebhookRegistry::new());
    let recorder = Arc::new(RecordingRecorder::new());

    let store_dyn: Arc<dyn merx_webhooks::store::DeliveryStore> = store.clone();
    let registry_dyn: Arc<dyn merx_webhooks::store::WebhookRegistry> = registry.clone();
    let recorder_dyn: Arc<dyn TransactionEventRecorder> = recorder.clone();
    let (engine, worker) = WebhookEngine::builder(store_dyn, registry_dyn, generator, recorder_dyn)
    .with_config(config)
    .build()
    .expect("engine construction failed");

    (
        TestHarness {
            engine,
            store,
            registry,
            recorder,
        },
        worker,
    )
}

/// Harness with the echoing generator and default config.
pub fn default_harness() -> (TestHarness, TransactionRequestWorker) {
    build_harness(Arc::new(EchoGenerator), WebhookConfig::default())
}

// ---------------------------------------------------------------------------
// Model helpers
// ---------------------------------------------------------------------------

/// Signed static-payload webhook pointing at `url`.
pub fn static_webhook(url: &str) -> Webhook {
    let mut webhook = Webhook::new(Uuid::new_v4(), "test-app", url);
    webhook.secret_key = Some(SECRET.to_string());
    webhook
}

/// Signed subscription-query webhook pointing at `url`.
pub fn subscription_webhook(url: &str) -> Webhook {
    let mut webhook = static_webhook(url);
    webhook.subscription_query = Some("subscription { event { id } }".to_string());
    webhook
}

pub fn transaction_event() -> TransactionEvent {
    TransactionEvent {
        id: Uuid::new_v4(),
        transaction_id: Uuid::new_v4(),
    }
}
