//! Transaction-action escape hatch.
//!
//! Transaction confirmations (charge, refund, cancel) are requested
//! fire-and-continue: the caller persists a delivery and hands it to a
//! background worker instead of blocking on the subscriber. The worker
//! funnels through the same dispatch pipeline as every synchronous send,
//! resubmitting itself with exponential backoff when the subscriber
//! answers with a server error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::dispatch::SyncWebhookDispatcher;
use crate::factory::{DeliveryFactory, SubscriptionDelivery};
use crate::models::{
    EventPayload, Requestor, TransactionActionData, TransactionEvent,
};
use crate::store::WebhookRegistry;

/// Payment-layer bookkeeping the escape hatch depends on. The engine never
/// owns transaction state; it reports outcomes through this seam.
#[async_trait]
pub trait TransactionEventRecorder: Send + Sync {
    /// Load a request event by id; `None` when it no longer exists.
    async fn request_event(&self, event_id: Uuid) -> Option<TransactionEvent>;

    /// Record that the action could not be processed, with a cause.
    async fn create_failed_event(&self, event: &TransactionEvent, cause: &str);

    /// Convert a subscriber response (or its absence) into a finalized
    /// transaction event.
    async fn create_event_from_response(
        &self,
        request_event: &TransactionEvent,
        app_id: Uuid,
        response: Option<Value>,
    );

    /// Recompute the refundable amount for the checkout behind a
    /// transaction.
    async fn recalculate_refundable(&self, transaction_id: Uuid, event: &TransactionEvent);
}

/// Static request payload for apps without a subscription query.
#[must_use]
pub fn transaction_action_request_payload(
    data: &TransactionActionData,
    requestor: Option<Requestor>,
) -> String {
    let requested_by = match requestor {
        Some(Requestor::App(id)) => json!({"type": "app", "id": id}),
        Some(Requestor::User(id)) => json!({"type": "user", "id": id}),
        None => Value::Null,
    };
    json!({
        "transaction_id": data.transaction_id,
        "event_id": data.event.id,
        "action": data.action,
        "requested_by": requested_by,
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Task queue
// ---------------------------------------------------------------------------

/// One unit of background work: drive a persisted delivery to a terminal
/// transaction event.
#[derive(Debug, Clone)]
pub struct TransactionRequestJob {
    pub delivery_id: Uuid,
    pub request_event_id: Uuid,
    /// 1-based attempt counter; resubmissions increment it.
    pub attempt_number: u32,
    pub task_id: Option<String>,
}

impl TransactionRequestJob {
    #[must_use]
    pub fn new(delivery_id: Uuid, request_event_id: Uuid) -> Self {
        Self {
            delivery_id,
            request_event_id,
            attempt_number: 1,
            task_id: None,
        }
    }
}

/// Bounded handoff to the background worker.
#[derive(Clone)]
pub struct TransactionTaskQueue {
    tx: mpsc::Sender<TransactionRequestJob>,
}

impl TransactionTaskQueue {
    /// Create a queue and the receiver the worker consumes.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TransactionRequestJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Hand a job to the worker without blocking. A full queue drops the
    /// job with an error log; the delivery stays pending in the store.
    pub fn enqueue(&self, job: TransactionRequestJob) {
        if let Err(e) = self.tx.try_send(job) {
            tracing::error!(
                target: "webhook_transaction",
                error = %e,
                "Failed to enqueue transaction request job"
            );
        }
    }

    /// Resubmit a job after a delay, from a detached timer task.
    pub fn enqueue_after(&self, job: TransactionRequestJob, delay: std::time::Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tx.send(job).await {
                tracing::error!(
                    target: "webhook_transaction",
                    error = %e,
                    "Failed to resubmit transaction request job"
                );
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Builds and enqueues transaction-action deliveries.
pub struct TransactionRequester {
    registry: Arc<dyn WebhookRegistry>,
    factory: DeliveryFactory,
    recorder: Arc<dyn TransactionEventRecorder>,
    queue: TransactionTaskQueue,
}

impl TransactionRequester {
    #[must_use]
    pub fn new(
        registry: Arc<dyn WebhookRegistry>,
        factory: DeliveryFactory,
        recorder: Arc<dyn TransactionEventRecorder>,
        queue: TransactionTaskQueue,
    ) -> Self {
        Self {
            registry,
            factory,
            recorder,
            queue,
        }
    }

    /// Request a transaction action from the owning app's webhook.
    ///
    /// Missing app, missing webhook, or a payload that cannot be generated
    /// each synthesize a failed transaction event, recompute the refundable
    /// amount, and return without any network activity. Otherwise the
    /// delivery/payload pair is persisted atomically and handed to the
    /// background worker; the outcome is observed asynchronously.
    pub async fn trigger_transaction_request(
        &self,
        data: TransactionActionData,
        event_type: &str,
        requestor: Option<Requestor>,
    ) {
        let Some(app_id) = data.transaction_app_owner else {
            self.fail(
                &data,
                "Cannot process the action as the given transaction is not attached to any app.",
            )
            .await;
            return;
        };

        let Some(webhook) = self.registry.webhook_for_app_event(event_type, app_id).await else {
            self.fail(&data, "Cannot find a webhook that can process the action.")
                .await;
            return;
        };

        let delivery = if webhook.subscription_query.is_some() {
            let subscribable = match serde_json::to_value(&data) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        target: "webhook_transaction",
                        error = %e,
                        "Failed to serialize transaction action data"
                    );
                    self.fail(&data, "Cannot generate a payload for the action.")
                        .await;
                    return;
                }
            };
            let created = self
                .factory
                .create_delivery_for_subscription_sync_event(SubscriptionDelivery {
                    event_type,
                    subscribable_object: Some(&subscribable),
                    webhook,
                    requestor,
                    request_context: None,
                    allow_replica: false,
                    pregenerated_payload: None,
                    with_save: true,
                })
                .await;
            match created {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    self.fail(&data, "Cannot generate a payload for the action.")
                        .await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        target: "webhook_transaction",
                        error = %e,
                        "Failed to create delivery for subscription webhook"
                    );
                    self.fail(&data, "Cannot generate a payload for the action.")
                        .await;
                    return;
                }
            }
        } else {
            let payload = transaction_action_request_payload(&data, requestor);
            let delivery = self.factory.delivery_from_static_payload(
                event_type,
                webhook,
                Arc::new(EventPayload::new(payload)),
            );
            if let Err(e) = self.factory.persist(&delivery).await {
                tracing::error!(
                    target: "webhook_transaction",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to persist transaction request delivery"
                );
                return;
            }
            delivery
        };

        self.queue
            .enqueue(TransactionRequestJob::new(delivery.id, data.event.id));
    }

    async fn fail(&self, data: &TransactionActionData, cause: &str) {
        self.recorder.create_failed_event(&data.event, cause).await;
        self.recorder
            .recalculate_refundable(data.transaction_id, &data.event)
            .await;
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Consumes [`TransactionRequestJob`]s, one at a time.
pub struct TransactionRequestWorker {
    dispatcher: Arc<SyncWebhookDispatcher>,
    recorder: Arc<dyn TransactionEventRecorder>,
    queue: TransactionTaskQueue,
    rx: mpsc::Receiver<TransactionRequestJob>,
    retry: RetryPolicy,
}

impl TransactionRequestWorker {
    #[must_use]
    pub fn new(
        dispatcher: Arc<SyncWebhookDispatcher>,
        recorder: Arc<dyn TransactionEventRecorder>,
        queue: TransactionTaskQueue,
        rx: mpsc::Receiver<TransactionRequestJob>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dispatcher,
            recorder,
            queue,
            rx,
            retry,
        }
    }

    /// Drain the queue until every sender is dropped. Jobs run strictly
    /// sequentially, so a delivery is never driven by two attempts at once.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            self.handle(job).await;
        }
    }

    async fn handle(&self, job: TransactionRequestJob) {
        let Some(request_event) = self.recorder.request_event(job.request_event_id).await else {
            tracing::error!(
                target: "webhook_transaction",
                request_event_id = %job.request_event_id,
                "Cannot find the request event for transaction-request webhook"
            );
            return;
        };

        let Some(mut delivery) = self
            .dispatcher
            .get_delivery_for_webhook(job.delivery_id)
            .await
        else {
            self.recorder
                .recalculate_refundable(request_event.transaction_id, &request_event)
                .await;
            tracing::error!(
                target: "webhook_transaction",
                delivery_id = %job.delivery_id,
                "Cannot find the delivery for transaction-request webhook"
            );
            return;
        };
        let app_id = delivery.webhook.app_id;

        let task_id = job
            .task_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let attempt = match self
            .dispatcher
            .ledger()
            .create_attempt(&delivery, Some(task_id), true)
            .await
        {
            Ok(attempt) => attempt,
            Err(e) => {
                tracing::error!(
                    target: "webhook_transaction",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to create attempt for transaction request"
                );
                return;
            }
        };

        let outcome = self
            .dispatcher
            .dispatch(&mut delivery, None, Some(attempt))
            .await;
        let response_data = match outcome {
            Ok((response, data)) => {
                if response.is_server_error() {
                    if let Some(delay) = self.retry.backoff_for(job.attempt_number) {
                        tracing::info!(
                            target: "webhook_transaction",
                            delivery_id = %delivery.id,
                            attempt_number = job.attempt_number,
                            delay_secs = delay.as_secs(),
                            "Server error from subscriber, scheduling retry"
                        );
                        let mut retry_job = job;
                        retry_job.attempt_number += 1;
                        self.queue.enqueue_after(retry_job, delay);
                        return;
                    }
                    tracing::warn!(
                        target: "webhook_transaction",
                        delivery_id = %delivery.id,
                        attempt_number = job.attempt_number,
                        "Retries exhausted for transaction request"
                    );
                    None
                } else {
                    data
                }
            }
            Err(e) => {
                tracing::error!(
                    target: "webhook_transaction",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Transaction request dispatch failed"
                );
                None
            }
        };

        self.recorder
            .create_event_from_response(&request_event, app_id, response_data)
            .await;
    }
}
