//! Delivery/attempt bookkeeping over the injected store.
//!
//! One delivery owns many attempts. For a given send the attempt is always
//! updated before the delivery so the audit trail never shows a terminal
//! delivery without its deciding attempt.

use std::sync::Arc;

use crate::config::AttemptRetention;
use crate::error::Result;
use crate::models::{DeliveryAttempt, EventDelivery, EventDeliveryStatus, WebhookResponse};
use crate::store::DeliveryStore;

/// Attempt/delivery lifecycle operations.
#[derive(Clone)]
pub struct DeliveryLedger {
    store: Arc<dyn DeliveryStore>,
    retention: AttemptRetention,
}

impl DeliveryLedger {
    #[must_use]
    pub fn new(store: Arc<dyn DeliveryStore>, retention: AttemptRetention) -> Self {
        Self { store, retention }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn DeliveryStore> {
        &self.store
    }

    /// Create an attempt bound to a delivery. Persisted immediately only
    /// when `with_save` is set (the task path wants the record visible
    /// before the network call; inline sends defer to `attempt_update`).
    pub async fn create_attempt(
        &self,
        delivery: &EventDelivery,
        task_id: Option<String>,
        with_save: bool,
    ) -> Result<DeliveryAttempt> {
        let attempt = DeliveryAttempt::new(delivery.id, task_id);
        if with_save {
            self.store.upsert_attempt(&attempt).await?;
        }
        Ok(attempt)
    }

    /// Fold a transport response into the attempt and persist it according
    /// to the retention policy.
    pub async fn attempt_update(
        &self,
        attempt: &mut DeliveryAttempt,
        response: &WebhookResponse,
    ) -> Result<()> {
        attempt.status = response.status;
        attempt.response_body = Some(response.content.clone());
        attempt.response_status_code = response.response_status_code;
        attempt.response_size = Some(response.content.len());
        attempt.duration = Some(response.duration);
        attempt.response_headers = serde_json::to_value(&response.headers).ok();

        let keep = match self.retention {
            AttemptRetention::All => true,
            AttemptRetention::FailedOnly => attempt.status == EventDeliveryStatus::Failed,
        };
        if keep {
            self.store.upsert_attempt(attempt).await?;
        }
        Ok(())
    }

    /// Move a delivery to its terminal status, in memory and in the store.
    pub async fn delivery_update(
        &self,
        delivery: &mut EventDelivery,
        status: EventDeliveryStatus,
    ) -> Result<()> {
        delivery.status = status;
        self.store.update_delivery_status(delivery.id, status).await
    }

    /// Prune the delivery record once it succeeded, under the selective
    /// retention policy. Attempts saved before the send (the task path
    /// persists them eagerly) are removed with the delivery, so no orphaned
    /// `Pending` attempt survives. The payload shared by other deliveries
    /// survives.
    pub async fn clear_successful_delivery(&self, delivery: &EventDelivery) -> Result<()> {
        if self.retention == AttemptRetention::FailedOnly
            && delivery.status == EventDeliveryStatus::Success
        {
            self.store.delete_attempts_for_delivery(delivery.id).await?;
            self.store.delete_delivery(delivery.id).await?;
        }
        Ok(())
    }
}
