//! Payload and delivery pair construction.
//!
//! Subscription-query webhooks get a payload from the injected generator,
//! driven by a request context that is built once and shared across
//! subscribers of one trigger. Webhooks without a query take a caller
//! supplied static payload string. The payload/delivery pair is created
//! together or not at all.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PayloadError, Result};
use crate::models::{EventDelivery, EventPayload, RequestContext, Requestor, Webhook};
use crate::store::DeliveryStore;

/// Synchronous event types subscribers may register for.
pub const SYNC_EVENT_TYPES: &[&str] = &[
    "checkout_calculate_taxes",
    "order_calculate_taxes",
    "shipping_list_methods_for_checkout",
    "payment_list_gateways",
    "transaction_charge_requested",
    "transaction_refund_requested",
    "transaction_cancelation_requested",
];

/// External generator resolving a subscription query into a payload for one
/// subscriber. Returning `Ok(None)` means the query produced no data.
#[async_trait]
pub trait SubscriptionPayloadGenerator: Send + Sync {
    async fn generate(
        &self,
        event_type: &str,
        subscribable_object: Option<&Value>,
        subscription_query: &str,
        context: &RequestContext,
        webhook: &Webhook,
    ) -> std::result::Result<Option<Value>, PayloadError>;
}

/// Arguments for subscription-based delivery creation.
pub struct SubscriptionDelivery<'a> {
    pub event_type: &'a str,
    pub subscribable_object: Option<&'a Value>,
    pub webhook: Arc<Webhook>,
    pub requestor: Option<Requestor>,
    /// Shared context; built fresh when absent.
    pub request_context: Option<Arc<RequestContext>>,
    pub allow_replica: bool,
    /// Payload computed ahead of time, skipping the generator.
    pub pregenerated_payload: Option<Value>,
    /// Persist the pair atomically; unsaved pairs are used by the fallback
    /// loop, which only records failures.
    pub with_save: bool,
}

/// Builds `EventPayload` + `EventDelivery` pairs.
#[derive(Clone)]
pub struct DeliveryFactory {
    generator: Arc<dyn SubscriptionPayloadGenerator>,
    store: Arc<dyn DeliveryStore>,
    subscribable_events: Arc<HashSet<String>>,
}

impl DeliveryFactory {
    #[must_use]
    pub fn new(
        generator: Arc<dyn SubscriptionPayloadGenerator>,
        store: Arc<dyn DeliveryStore>,
    ) -> Self {
        Self {
            generator,
            store,
            subscribable_events: Arc::new(
                SYNC_EVENT_TYPES.iter().map(|s| (*s).to_string()).collect(),
            ),
        }
    }

    /// Replace the subscribable event-type set.
    #[must_use]
    pub fn with_subscribable_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribable_events = Arc::new(events.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn is_subscribable(&self, event_type: &str) -> bool {
        self.subscribable_events.contains(event_type)
    }

    /// Build the shared request context for one trigger.
    #[must_use]
    pub fn initialize_request(
        &self,
        requestor: Option<Requestor>,
        event_type: &str,
        allow_replica: bool,
    ) -> Arc<RequestContext> {
        Arc::new(RequestContext {
            requestor,
            event_type: event_type.to_string(),
            sync_event: self.is_subscribable(event_type),
            allow_replica,
        })
    }

    /// Create a delivery for a subscription-query webhook.
    ///
    /// Returns `Ok(None)` (logged, not failed) when the event type is not
    /// subscribable or the query produced no data; the caller treats `None`
    /// as "nothing to send".
    ///
    /// # Errors
    ///
    /// Generator failures (including payment-domain errors) and storage
    /// failures.
    pub async fn create_delivery_for_subscription_sync_event(
        &self,
        args: SubscriptionDelivery<'_>,
    ) -> Result<Option<EventDelivery>> {
        if !self.is_subscribable(args.event_type) {
            tracing::info!(
                target: "webhook_delivery",
                event_type = args.event_type,
                "Skipping subscription webhook, event is not subscribable"
            );
            return Ok(None);
        }

        let webhook = args.webhook;
        let query = webhook.subscription_query.as_deref().unwrap_or_default();

        let context = match args.request_context {
            Some(ctx) => ctx,
            None => self.initialize_request(args.requestor, args.event_type, args.allow_replica),
        };

        let data = match args.pregenerated_payload {
            Some(payload) => Some(payload),
            None => {
                self.generator
                    .generate(
                        args.event_type,
                        args.subscribable_object,
                        query,
                        &context,
                        &webhook,
                    )
                    .await?
            }
        };

        let Some(data) = data else {
            tracing::info!(
                target: "webhook_delivery",
                event_type = args.event_type,
                webhook_id = %webhook.id,
                "No payload was generated from subscription query"
            );
            return Ok(None);
        };

        let payload = Arc::new(EventPayload::new(data.to_string()));
        let delivery = EventDelivery::new(args.event_type, webhook, payload);
        if args.with_save {
            // Single store call = single transaction boundary for the pair.
            self.store.create_delivery_with_payload(&delivery).await?;
        }
        Ok(Some(delivery))
    }

    /// Create a delivery from a caller-supplied static payload, no generator
    /// involved. Unsaved; callers persist through the store when needed.
    #[must_use]
    pub fn delivery_from_static_payload(
        &self,
        event_type: &str,
        webhook: Arc<Webhook>,
        payload: Arc<EventPayload>,
    ) -> EventDelivery {
        EventDelivery::new(event_type, webhook, payload)
    }

    /// Persist a delivery/payload pair atomically.
    pub async fn persist(&self, delivery: &EventDelivery) -> Result<()> {
        self.store.create_delivery_with_payload(delivery).await
    }
}
