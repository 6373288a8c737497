//! The synchronous dispatcher: one delivery in, one classified, persisted,
//! observable attempt out.
//!
//! The calling workflow blocks on the result, so everything here is a
//! failure point with a defined downgrade: transport and response-format
//! failures become a `Failed` attempt and a `None` body; only an invalid
//! target scheme surfaces as an error to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::crypto::signature_for_payload;
use crate::error::{Result, WebhookError};
use crate::factory::{DeliveryFactory, SubscriptionDelivery};
use crate::ledger::DeliveryLedger;
use crate::models::{
    DeliveryAttempt, EventDelivery, EventDeliveryStatus, EventPayload, RequestContext, Requestor,
    Webhook, WebhookResponse,
};
use crate::observe::{
    record_external_request, sanitize_url_for_logging, scheme_rejected_response, AttemptObserver,
};
use crate::transport::{validate_scheme, HttpTransport};

/// One single-subscriber trigger: build the delivery, send, classify.
pub struct SyncTrigger {
    pub event_type: String,
    /// Static payload for webhooks without a subscription query.
    pub payload: Option<String>,
    pub webhook: Arc<Webhook>,
    pub subscribable_object: Option<Value>,
    pub requestor: Option<Requestor>,
    /// Shared context reused across subscribers of one trigger event.
    pub request_context: Option<Arc<RequestContext>>,
    pub timeout: Option<Duration>,
    pub pregenerated_payload: Option<Value>,
    pub allow_replica: bool,
}

impl SyncTrigger {
    #[must_use]
    pub fn new(event_type: impl Into<String>, webhook: Arc<Webhook>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: None,
            webhook,
            subscribable_object: None,
            requestor: None,
            request_context: None,
            timeout: None,
            pregenerated_payload: None,
            allow_replica: true,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    #[must_use]
    pub fn with_subscribable_object(mut self, object: Value) -> Self {
        self.subscribable_object = Some(object);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The dispatch entry point the breaker guard may decorate. Chosen once at
/// engine construction; orchestrators only see this trait.
#[async_trait]
pub trait SyncDispatch: Send + Sync {
    /// Send one synchronous webhook request, returning the parsed body only
    /// when the subscriber answered 2xx with valid JSON. Transport and
    /// payload failures fold into `Ok(None)`; an invalid target scheme is
    /// the one loud error.
    async fn trigger_webhook_sync(&self, trigger: SyncTrigger) -> Result<Option<Value>>;
}

/// Core dispatcher orchestrating transport, ledger, factory and observer.
#[derive(Clone)]
pub struct SyncWebhookDispatcher {
    transport: HttpTransport,
    ledger: DeliveryLedger,
    factory: DeliveryFactory,
    observer: Arc<dyn AttemptObserver>,
    config: WebhookConfig,
}

impl SyncWebhookDispatcher {
    #[must_use]
    pub fn new(
        transport: HttpTransport,
        ledger: DeliveryLedger,
        factory: DeliveryFactory,
        observer: Arc<dyn AttemptObserver>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            transport,
            ledger,
            factory,
            observer,
            config,
        }
    }

    #[must_use]
    pub fn factory(&self) -> &DeliveryFactory {
        &self.factory
    }

    #[must_use]
    pub fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }

    /// Run the full dispatch pipeline for one delivery.
    ///
    /// Returns the raw response and the parsed body (`None` unless the
    /// attempt succeeded). The attempt is updated before the delivery so
    /// the audit trail stays consistent.
    ///
    /// # Errors
    ///
    /// `UnsupportedScheme`/`InvalidUrl` when the target URL fails the
    /// scheme gate; the delivery is marked `Failed` first and a
    /// zero-success metric is recorded. No network call happens.
    pub async fn dispatch(
        &self,
        delivery: &mut EventDelivery,
        timeout: Option<Duration>,
        attempt: Option<DeliveryAttempt>,
    ) -> Result<(WebhookResponse, Option<Value>)> {
        let webhook = Arc::clone(&delivery.webhook);
        let payload_size = delivery.payload.as_bytes().len();

        if let Err(e) = validate_scheme(&webhook.target_url) {
            self.ledger
                .delivery_update(delivery, EventDeliveryStatus::Failed)
                .await?;
            let scheme = match &e {
                WebhookError::UnsupportedScheme(s) => s.clone(),
                _ => String::new(),
            };
            record_external_request(
                &webhook.target_url,
                &scheme_rejected_response(&scheme),
                payload_size,
            );
            return Err(e);
        }

        tracing::debug!(
            target: "webhook_delivery",
            url = %sanitize_url_for_logging(&webhook.target_url),
            event_type = %delivery.event_type,
            "Sending synchronous webhook payload"
        );

        let mut attempt = match attempt {
            Some(attempt) => attempt,
            None => self.ledger.create_attempt(delivery, None, false).await?,
        };

        let signature = webhook
            .secret_key
            .as_deref()
            .map(|secret| signature_for_payload(delivery.payload.as_bytes(), secret));
        let timeout = timeout.unwrap_or(self.config.sync_timeout);

        let span = tracing::info_span!(
            target: "webhook_delivery",
            "sync_webhook_request",
            event_type = %delivery.event_type,
            app_id = %webhook.app_id,
            payload_size,
            error = tracing::field::Empty,
        );
        let mut response = self
            .transport
            .send_webhook_using_http(
                &webhook.target_url,
                delivery.payload.as_bytes(),
                signature.as_deref(),
                &delivery.event_type,
                timeout,
                &webhook.custom_headers,
            )
            .instrument(span.clone())
            .await;

        let mut response_data = None;
        if response.status == EventDeliveryStatus::Success {
            match serde_json::from_str::<Value>(&response.content) {
                Ok(parsed) => {
                    tracing::debug!(
                        target: "webhook_delivery",
                        url = %sanitize_url_for_logging(&webhook.target_url),
                        attempt_id = %attempt.id,
                        "Success response from webhook"
                    );
                    response_data = Some(parsed);
                }
                Err(e) => {
                    tracing::info!(
                        target: "webhook_delivery",
                        url = %sanitize_url_for_logging(&webhook.target_url),
                        attempt_id = %attempt.id,
                        error = %e,
                        "Failed parsing JSON webhook response"
                    );
                    response.status = EventDeliveryStatus::Failed;
                }
            }
        } else {
            tracing::info!(
                target: "webhook_delivery",
                url = %sanitize_url_for_logging(&webhook.target_url),
                attempt_id = %attempt.id,
                response = %response.content,
                "Failed webhook request"
            );
        }

        if response.status == EventDeliveryStatus::Failed {
            span.record("error", true);
        }
        record_external_request(&webhook.target_url, &response, payload_size);

        // Attempt before delivery, always.
        self.ledger.attempt_update(&mut attempt, &response).await?;
        self.ledger.delivery_update(delivery, response.status).await?;
        self.observer
            .report_event_delivery_attempt(&attempt, &webhook)
            .await;
        self.ledger.clear_successful_delivery(delivery).await?;

        Ok((response, response_data))
    }

    /// Thin wrapper giving the business layer its contract: the parsed body
    /// on success, `None` on any classified failure. Scheme errors still
    /// surface.
    pub async fn send_webhook_request_sync(
        &self,
        delivery: &mut EventDelivery,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>> {
        let (response, response_data) = self.dispatch(delivery, timeout, None).await?;
        Ok(if response.status == EventDeliveryStatus::Success {
            response_data
        } else {
            None
        })
    }

    /// Build the delivery for one subscriber (subscription or static path)
    /// and send it. Payload-generation failures fold into `Ok(None)`; the
    /// scheme gate's error propagates.
    async fn trigger(&self, trigger: SyncTrigger) -> Result<Option<Value>> {
        let mut delivery = if trigger.webhook.subscription_query.is_some() {
            let created = self
                .factory
                .create_delivery_for_subscription_sync_event(SubscriptionDelivery {
                    event_type: &trigger.event_type,
                    subscribable_object: trigger.subscribable_object.as_ref(),
                    webhook: Arc::clone(&trigger.webhook),
                    requestor: trigger.requestor,
                    request_context: trigger.request_context.clone(),
                    allow_replica: trigger.allow_replica,
                    pregenerated_payload: trigger.pregenerated_payload,
                    with_save: false,
                })
                .await;
            match created {
                Ok(Some(delivery)) => delivery,
                Ok(None) => return Ok(None),
                Err(e) => {
                    tracing::warn!(
                        target: "webhook_delivery",
                        event_type = %trigger.event_type,
                        webhook_id = %trigger.webhook.id,
                        error = %e,
                        "Failed to create delivery for subscription webhook"
                    );
                    return Ok(None);
                }
            }
        } else {
            let payload = Arc::new(EventPayload::new(trigger.payload.unwrap_or_default()));
            self.factory.delivery_from_static_payload(
                &trigger.event_type,
                Arc::clone(&trigger.webhook),
                payload,
            )
        };

        let (response, response_data) = self
            .dispatch(&mut delivery, trigger.timeout, None)
            .await?;
        Ok(if response.status == EventDeliveryStatus::Success {
            response_data
        } else {
            None
        })
    }

    /// Fetch a persisted delivery by id (task path re-entry).
    pub async fn get_delivery_for_webhook(&self, delivery_id: Uuid) -> Option<EventDelivery> {
        match self.ledger.store().get_delivery(delivery_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery_id,
                    error = %e,
                    "Failed to load delivery"
                );
                None
            }
        }
    }
}

#[async_trait]
impl SyncDispatch for SyncWebhookDispatcher {
    async fn trigger_webhook_sync(&self, trigger: SyncTrigger) -> Result<Option<Value>> {
        self.trigger(trigger).await
    }
}
