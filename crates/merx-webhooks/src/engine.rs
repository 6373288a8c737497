//! Engine assembly: wires transport, ledger, factory, cache, breaker,
//! fallback and the transaction worker into one call surface.
//!
//! The breaker decision is made exactly once, here: with a breaker
//! configured the single-subscriber trigger goes through [`BreakerGuard`],
//! otherwise dispatch runs undecorated. Orchestrators built on top only
//! ever see the chosen [`SyncDispatch`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::breaker::{BreakerBoard, BreakerGuard, FailureRateBoard};
use crate::cache::{CachedWebhookTrigger, ResponseCache};
use crate::config::WebhookConfig;
use crate::dispatch::{SyncDispatch, SyncTrigger, SyncWebhookDispatcher};
use crate::error::Result;
use crate::factory::{DeliveryFactory, SubscriptionPayloadGenerator};
use crate::fallback::{TaxData, TaxFallbackOrchestrator};
use crate::ledger::DeliveryLedger;
use crate::models::{EventDelivery, Requestor, TransactionActionData};
use crate::observe::{AttemptObserver, TracingObserver};
use crate::store::{DeliveryStore, WebhookRegistry};
use crate::transaction::{
    TransactionEventRecorder, TransactionRequestWorker, TransactionRequester,
    TransactionTaskQueue,
};
use crate::transport::HttpTransport;

const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Builder collecting the engine's external collaborators.
pub struct WebhookEngineBuilder {
    config: WebhookConfig,
    store: Arc<dyn DeliveryStore>,
    registry: Arc<dyn WebhookRegistry>,
    generator: Arc<dyn SubscriptionPayloadGenerator>,
    recorder: Arc<dyn TransactionEventRecorder>,
    observer: Arc<dyn AttemptObserver>,
    board: Option<Arc<dyn BreakerBoard>>,
    queue_capacity: usize,
}

impl WebhookEngineBuilder {
    #[must_use]
    pub fn with_config(mut self, config: WebhookConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Override the breaker decision engine. Only takes effect when the
    /// config enables the breaker.
    #[must_use]
    pub fn with_board(mut self, board: Arc<dyn BreakerBoard>) -> Self {
        self.board = Some(board);
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Assemble the engine and its background worker. The caller spawns the
    /// worker; without it, transaction requests queue up unprocessed.
    ///
    /// # Errors
    ///
    /// `Internal` when the HTTP client cannot be constructed.
    pub fn build(self) -> Result<(WebhookEngine, TransactionRequestWorker)> {
        let transport = HttpTransport::new(self.config.domain.clone())?;
        let ledger = DeliveryLedger::new(
            Arc::clone(&self.store),
            self.config.attempt_retention,
        );
        let factory = DeliveryFactory::new(self.generator, Arc::clone(&self.store));
        let dispatcher = Arc::new(SyncWebhookDispatcher::new(
            transport,
            ledger,
            factory.clone(),
            self.observer,
            self.config.clone(),
        ));

        let trigger: Arc<dyn SyncDispatch> = match self.config.breaker {
            Some(breaker_config) => {
                let board = self
                    .board
                    .unwrap_or_else(|| Arc::new(FailureRateBoard::new(breaker_config)));
                let inner: Arc<dyn SyncDispatch> = dispatcher.clone();
                Arc::new(BreakerGuard::new(board, inner))
            }
            None => dispatcher.clone(),
        };

        let cache = ResponseCache::new(self.config.cache_max_entries);
        let cached = CachedWebhookTrigger::new(cache, Arc::clone(&trigger))
            .with_default_timeout(self.config.cache_default_timeout);

        let fallback =
            TaxFallbackOrchestrator::new(Arc::clone(&self.registry), Arc::clone(&dispatcher));

        let (queue, rx) = TransactionTaskQueue::channel(self.queue_capacity);
        let requester = TransactionRequester::new(
            self.registry,
            factory,
            Arc::clone(&self.recorder),
            queue.clone(),
        );
        let worker = TransactionRequestWorker::new(
            Arc::clone(&dispatcher),
            self.recorder,
            queue,
            rx,
            self.config.retry,
        );

        let engine = WebhookEngine {
            dispatcher,
            trigger,
            cached,
            fallback,
            requester,
        };
        Ok((engine, worker))
    }
}

/// The synchronous webhook delivery engine.
pub struct WebhookEngine {
    dispatcher: Arc<SyncWebhookDispatcher>,
    trigger: Arc<dyn SyncDispatch>,
    cached: CachedWebhookTrigger,
    fallback: TaxFallbackOrchestrator,
    requester: TransactionRequester,
}

impl WebhookEngine {
    /// Start assembling an engine from its storage and collaborator seams.
    #[must_use]
    pub fn builder(
        store: Arc<dyn DeliveryStore>,
        registry: Arc<dyn WebhookRegistry>,
        generator: Arc<dyn SubscriptionPayloadGenerator>,
        recorder: Arc<dyn TransactionEventRecorder>,
    ) -> WebhookEngineBuilder {
        WebhookEngineBuilder {
            config: WebhookConfig::default(),
            store,
            registry,
            generator,
            recorder,
            observer: Arc::new(TracingObserver),
            board: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Send one already-built delivery, blocking the caller until the
    /// subscriber answers or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Only the scheme-gate error; every transport failure folds into
    /// `Ok(None)`.
    pub async fn send_webhook_request_sync(
        &self,
        delivery: &mut EventDelivery,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>> {
        self.dispatcher
            .send_webhook_request_sync(delivery, timeout)
            .await
    }

    /// Trigger one subscriber, through the breaker guard when configured.
    ///
    /// # Errors
    ///
    /// Only the scheme-gate error.
    pub async fn trigger_webhook_sync(&self, trigger: SyncTrigger) -> Result<Option<Value>> {
        self.trigger.trigger_webhook_sync(trigger).await
    }

    /// Trigger one subscriber unless a cached response for the same
    /// `(cache_data, url, event, app)` tuple is still valid.
    ///
    /// # Errors
    ///
    /// Only the scheme-gate error.
    pub async fn trigger_webhook_sync_if_not_cached(
        &self,
        trigger: SyncTrigger,
        cache_data: &Value,
        cache_timeout: Option<Duration>,
    ) -> Result<Option<Value>> {
        self.cached
            .trigger_webhook_sync_if_not_cached(trigger, cache_data, cache_timeout)
            .await
    }

    /// Try every subscriber of a tax event in registry order and return the
    /// first structurally valid response.
    pub async fn trigger_taxes_all_webhooks_sync<F>(
        &self,
        event_type: &str,
        generate_payload: F,
        expected_lines_count: usize,
        subscribable_object: Option<&Value>,
        requestor: Option<Requestor>,
        pregenerated_payloads: &HashMap<Uuid, Value>,
    ) -> Option<TaxData>
    where
        F: Fn() -> String,
    {
        self.fallback
            .trigger_all_webhooks_sync(
                event_type,
                generate_payload,
                expected_lines_count,
                subscribable_object,
                requestor,
                pregenerated_payloads,
            )
            .await
    }

    /// Request a transaction action; the outcome lands asynchronously via
    /// the background worker.
    pub async fn trigger_transaction_request(
        &self,
        data: TransactionActionData,
        event_type: &str,
        requestor: Option<Requestor>,
    ) {
        self.requester
            .trigger_transaction_request(data, event_type, requestor)
            .await;
    }
}
