//! Injected persistence capabilities: the delivery/attempt store and the
//! webhook registry.
//!
//! The engine never talks to a database directly; it drives these traits and
//! leaves the storage engine to the host application. In-memory
//! implementations are provided for tests and embedded use.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DeliveryAttempt, EventDelivery, EventDeliveryStatus, Webhook};

/// Persistence for deliveries, payloads and attempts.
///
/// `create_delivery_with_payload` must write the delivery and its payload
/// under one transaction boundary: a crash between the two writes must never
/// leave a delivery without a backing payload.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn create_delivery_with_payload(&self, delivery: &EventDelivery) -> Result<()>;

    async fn update_delivery_status(
        &self,
        delivery_id: Uuid,
        status: EventDeliveryStatus,
    ) -> Result<()>;

    async fn get_delivery(&self, delivery_id: Uuid) -> Result<Option<EventDelivery>>;

    /// Remove a delivery record (successful-delivery pruning). Unknown ids
    /// are a no-op.
    async fn delete_delivery(&self, delivery_id: Uuid) -> Result<()>;

    /// Insert or replace an attempt record.
    async fn upsert_attempt(&self, attempt: &DeliveryAttempt) -> Result<()>;

    /// Remove every attempt record belonging to a delivery. Unknown ids
    /// are a no-op.
    async fn delete_attempts_for_delivery(&self, delivery_id: Uuid) -> Result<()>;

    async fn attempts_for_delivery(&self, delivery_id: Uuid) -> Result<Vec<DeliveryAttempt>>;
}

/// Ordered lookup of active subscriber endpoints per event type. Order is
/// registry-defined and the engine preserves it.
#[async_trait]
pub trait WebhookRegistry: Send + Sync {
    async fn webhooks_for_event(&self, event_type: &str) -> Vec<Arc<Webhook>>;

    /// First active webhook for the given event type owned by `app_id`.
    async fn webhook_for_app_event(&self, event_type: &str, app_id: Uuid) -> Option<Arc<Webhook>>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Single-process store keeping deliveries and attempts in maps.
#[derive(Default)]
pub struct InMemoryDeliveryStore {
    deliveries: RwLock<HashMap<Uuid, EventDelivery>>,
    attempts: RwLock<HashMap<Uuid, DeliveryAttempt>>,
}

impl InMemoryDeliveryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of attempt records held. Test observability.
    pub async fn attempt_count(&self) -> usize {
        self.attempts.read().await.len()
    }

    pub async fn delivery_count(&self) -> usize {
        self.deliveries.read().await.len()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn create_delivery_with_payload(&self, delivery: &EventDelivery) -> Result<()> {
        // Payload travels inside the delivery value, so the single map write
        // is the atomic pair creation.
        self.deliveries
            .write()
            .await
            .insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn update_delivery_status(
        &self,
        delivery_id: Uuid,
        status: EventDeliveryStatus,
    ) -> Result<()> {
        if let Some(delivery) = self.deliveries.write().await.get_mut(&delivery_id) {
            delivery.status = status;
        }
        Ok(())
    }

    async fn get_delivery(&self, delivery_id: Uuid) -> Result<Option<EventDelivery>> {
        Ok(self.deliveries.read().await.get(&delivery_id).cloned())
    }

    async fn delete_delivery(&self, delivery_id: Uuid) -> Result<()> {
        self.deliveries.write().await.remove(&delivery_id);
        Ok(())
    }

    async fn upsert_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        self.attempts
            .write()
            .await
            .insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn delete_attempts_for_delivery(&self, delivery_id: Uuid) -> Result<()> {
        self.attempts
            .write()
            .await
            .retain(|_, a| a.delivery_id != delivery_id);
        Ok(())
    }

    async fn attempts_for_delivery(&self, delivery_id: Uuid) -> Result<Vec<DeliveryAttempt>> {
        let mut found: Vec<DeliveryAttempt> = self
            .attempts
            .read()
            .await
            .values()
            .filter(|a| a.delivery_id == delivery_id)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.created_at);
        Ok(found)
    }
}

struct Registration {
    webhook: Arc<Webhook>,
    event_types: Vec<String>,
    active: bool,
}

/// Registry preserving registration order.
#[derive(Default)]
pub struct InMemoryWebhookRegistry {
    registrations: RwLock<Vec<Registration>>,
}

impl InMemoryWebhookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, webhook: Arc<Webhook>, event_types: &[&str]) {
        self.registrations.write().await.push(Registration {
            webhook,
            event_types: event_types.iter().map(|s| (*s).to_string()).collect(),
            active: true,
        });
    }

    pub async fn deactivate(&self, webhook_id: Uuid) {
        for reg in self.registrations.write().await.iter_mut() {
            if reg.webhook.id == webhook_id {
                reg.active = false;
            }
        }
    }
}

#[async_trait]
impl WebhookRegistry for InMemoryWebhookRegistry {
    async fn webhooks_for_event(&self, event_type: &str) -> Vec<Arc<Webhook>> {
        self.registrations
            .read()
            .await
            .iter()
            .filter(|r| r.active && r.event_types.iter().any(|t| t == event_type))
            .map(|r| Arc::clone(&r.webhook))
            .collect()
    }

    async fn webhook_for_app_event(&self, event_type: &str, app_id: Uuid) -> Option<Arc<Webhook>> {
        self.registrations
            .read()
            .await
            .iter()
            .find(|r| {
                r.active
                    && r.webhook.app_id == app_id
                    && r.event_types.iter().any(|t| t == event_type)
            })
            .map(|r| Arc::clone(&r.webhook))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventPayload;

    fn delivery() -> EventDelivery {
        let webhook = Arc::new(Webhook::new(Uuid::new_v4(), "w", "https://x.example/hook"));
        EventDelivery::new(
            "checkout_calculate_taxes",
            webhook,
            Arc::new(EventPayload::new("{}")),
        )
    }

    #[tokio::test]
    async fn test_store_round_trip() {
        let store = InMemoryDeliveryStore::new();
        let d = delivery();
        store.create_delivery_with_payload(&d).await.unwrap();

        let loaded = store.get_delivery(d.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EventDeliveryStatus::Pending);

        store
            .update_delivery_status(d.id, EventDeliveryStatus::Success)
            .await
            .unwrap();
        let loaded = store.get_delivery(d.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EventDeliveryStatus::Success);

        store.delete_delivery(d.id).await.unwrap();
        assert!(store.get_delivery(d.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attempts_sorted_per_delivery() {
        let store = InMemoryDeliveryStore::new();
        let d = delivery();
        let a1 = DeliveryAttempt::new(d.id, None);
        let a2 = DeliveryAttempt::new(d.id, Some("task-1".into()));
        let other = DeliveryAttempt::new(Uuid::new_v4(), None);
        store.upsert_attempt(&a1).await.unwrap();
        store.upsert_attempt(&a2).await.unwrap();
        store.upsert_attempt(&other).await.unwrap();

        let attempts = store.attempts_for_delivery(d.id).await.unwrap();
        assert_eq!(attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_registry_preserves_order() {
        let registry = InMemoryWebhookRegistry::new();
        let app = Uuid::new_v4();
        let w1 = Arc::new(Webhook::new(app, "first", "https://1.example/hook"));
        let w2 = Arc::new(Webhook::new(app, "second", "https://2.example/hook"));
        registry
            .register(Arc::clone(&w1), &["checkout_calculate_taxes"])
            .await;
        registry
            .register(Arc::clone(&w2), &["checkout_calculate_taxes"])
            .await;

        let hooks = registry.webhooks_for_event("checkout_calculate_taxes").await;
        assert_eq!(hooks.len(), 2);
        assert_eq!(hooks[0].id, w1.id);
        assert_eq!(hooks[1].id, w2.id);
    }

    #[tokio::test]
    async fn test_registry_filters_event_type_and_app() {
        let registry = InMemoryWebhookRegistry::new();
        let app_a = Uuid::new_v4();
        let app_b = Uuid::new_v4();
        let w1 = Arc::new(Webhook::new(app_a, "a", "https://a.example/hook"));
        let w2 = Arc::new(Webhook::new(app_b, "b", "https://b.example/hook"));
        registry
            .register(Arc::clone(&w1), &["transaction_charge_requested"])
            .await;
        registry
            .register(Arc::clone(&w2), &["order_calculate_taxes"])
            .await;

        assert!(registry
            .webhook_for_app_event("transaction_charge_requested", app_b)
            .await
            .is_none());
        let found = registry
            .webhook_for_app_event("transaction_charge_requested", app_a)
            .await
            .unwrap();
        assert_eq!(found.id, w1.id);
    }

    #[tokio::test]
    async fn test_registry_deactivation_hides_webhook() {
        let registry = InMemoryWebhookRegistry::new();
        let w = Arc::new(Webhook::new(Uuid::new_v4(), "w", "https://x.example/hook"));
        registry
            .register(Arc::clone(&w), &["order_calculate_taxes"])
            .await;
        registry.deactivate(w.id).await;
        assert!(registry
            .webhooks_for_event("order_calculate_taxes")
            .await
            .is_empty());
    }
}
