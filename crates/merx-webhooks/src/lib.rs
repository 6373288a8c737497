//! Synchronous webhook delivery engine for caller-blocking integrations.
//!
//! Business workflows block on a subscriber's answer: tax calculation,
//! shipping and payment listings, transaction-action confirmation. Each
//! dispatch signs the payload with HMAC-SHA256, POSTs it, classifies the
//! outcome and persists an attempt/delivery audit trail before the parsed
//! body is handed back. On top of the single-subscriber path sit a
//! time-expiring response cache, a sequential first-valid-wins fallback
//! loop for tax providers, an optional circuit breaker, and a background
//! retry worker for transaction actions.

pub mod breaker;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod factory;
pub mod fallback;
pub mod ledger;
pub mod models;
pub mod observe;
pub mod store;
pub mod transaction;
pub mod transport;

pub use config::WebhookConfig;
pub use dispatch::{SyncDispatch, SyncTrigger, SyncWebhookDispatcher};
pub use engine::{WebhookEngine, WebhookEngineBuilder};
pub use error::{PayloadError, WebhookError};
pub use fallback::{parse_tax_data, TaxData, TaxDataError, TaxLineData};
pub use models::{
    EventDelivery, EventDeliveryStatus, EventPayload, Requestor, TransactionActionData,
    TransactionEvent, Webhook, WebhookResponse,
};
pub use transaction::{TransactionEventRecorder, TransactionRequestWorker};
