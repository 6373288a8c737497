//! Error types for the delivery engine.
//!
//! Public entry points swallow transport and response-format failures into a
//! `None` result plus a durable attempt record; the only error a caller sees
//! from the dispatch path is `UnsupportedScheme`, which is a caller
//! configuration bug surfaced loudly.

use uuid::Uuid;

/// Failure during subscription payload generation by the external domain
/// generator.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// Payment-domain failure raised while resolving a transaction payload.
    /// Converted to a failed transaction event by the escape hatch, never
    /// propagated past it.
    #[error("payment error: {0}")]
    Payment(String),

    #[error("payload generation failed: {0}")]
    Generation(String),
}

/// Delivery engine error variants.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Target URL scheme outside http/https. Fatal to the single call.
    #[error("unsupported webhook scheme: {0:?}")]
    UnsupportedScheme(String),

    #[error("invalid target url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("delivery not found: {0}")]
    DeliveryNotFound(Uuid),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
