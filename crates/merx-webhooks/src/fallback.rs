//! Sequential multi-subscriber fallback for first-valid-response-wins
//! events (tax calculation).
//!
//! Subscribers are tried one at a time in registry order. The first
//! response that parses into a structurally valid [`TaxData`] wins;
//! invalid responses are logged at warning level and skipped. No
//! parallel fan-out, so the total number of external calls stays bounded
//! by the first valid answer.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::dispatch::SyncWebhookDispatcher;
use crate::factory::SubscriptionDelivery;
use crate::models::{EventPayload, RequestContext, Requestor};
use crate::store::WebhookRegistry;

// ---------------------------------------------------------------------------
// Tax response schema
// ---------------------------------------------------------------------------

/// One taxed line item as reported by a tax provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaxLineData {
    pub total_gross_amount: Decimal,
    pub total_net_amount: Decimal,
    pub tax_rate: Decimal,
}

/// Full tax response for a checkout or order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaxData {
    pub shipping_price_gross_amount: Decimal,
    pub shipping_price_net_amount: Decimal,
    pub shipping_tax_rate: Decimal,
    pub lines: Vec<TaxLineData>,
}

/// Validation failures for a tax provider response.
#[derive(Debug, Error)]
pub enum TaxDataError {
    #[error("subscriber returned no response body")]
    Missing,
    #[error("response does not match the tax data schema: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected {expected} tax lines, got {actual}")]
    LineCountMismatch { expected: usize, actual: usize },
    #[error("negative value in field `{0}`")]
    NegativeValue(&'static str),
}

/// Parse and validate a subscriber response body against the tax schema.
///
/// Structural validity requires the line count to match the taxed object's
/// line count and all monetary values and rates to be non-negative.
///
/// # Errors
///
/// [`TaxDataError`] describing the first violated constraint.
pub fn parse_tax_data(
    response: Option<&Value>,
    expected_lines_count: usize,
) -> Result<TaxData, TaxDataError> {
    let body = response.ok_or(TaxDataError::Missing)?;
    let data: TaxData = serde_json::from_value(body.clone())?;

    if data.lines.len() != expected_lines_count {
        return Err(TaxDataError::LineCountMismatch {
            expected: expected_lines_count,
            actual: data.lines.len(),
        });
    }

    let zero = Decimal::ZERO;
    if data.shipping_price_gross_amount < zero {
        return Err(TaxDataError::NegativeValue("shipping_price_gross_amount"));
    }
    if data.shipping_price_net_amount < zero {
        return Err(TaxDataError::NegativeValue("shipping_price_net_amount"));
    }
    if data.shipping_tax_rate < zero {
        return Err(TaxDataError::NegativeValue("shipping_tax_rate"));
    }
    for line in &data.lines {
        if line.total_gross_amount < zero {
            return Err(TaxDataError::NegativeValue("total_gross_amount"));
        }
        if line.total_net_amount < zero {
            return Err(TaxDataError::NegativeValue("total_net_amount"));
        }
        if line.tax_rate < zero {
            return Err(TaxDataError::NegativeValue("tax_rate"));
        }
    }

    Ok(data)
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs the fallback loop over all subscribers of one event type.
pub struct TaxFallbackOrchestrator {
    registry: Arc<dyn WebhookRegistry>,
    dispatcher: Arc<SyncWebhookDispatcher>,
}

impl TaxFallbackOrchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<dyn WebhookRegistry>,
        dispatcher: Arc<SyncWebhookDispatcher>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    /// Try each subscriber for `event_type` in registry order until one
    /// returns a structurally valid tax response.
    ///
    /// The request context (for subscription-query webhooks) and the static
    /// payload (for the rest) are each built at most once per loop and
    /// reused across subscribers. A subscription webhook whose delivery
    /// cannot be built aborts the whole loop with `None`; an invalid
    /// response only skips that subscriber.
    pub async fn trigger_all_webhooks_sync<F>(
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
        let webhooks = self.registry.webhooks_for_event(event_type).await;
        let factory = self.dispatcher.factory();

        let mut request_context: Option<Arc<RequestContext>> = None;
        let mut event_payload: Option<Arc<EventPayload>> = None;

        for webhook in webhooks {
            let mut delivery = if webhook.subscription_query.is_some() {
                let context = match &request_context {
                    Some(ctx) => Arc::clone(ctx),
                    None => {
                        let ctx = factory.initialize_request(requestor, event_type, true);
                        request_context = Some(Arc::clone(&ctx));
                        ctx
                    }
                };

                let pregenerated = pregenerated_payloads.get(&webhook.id).cloned();
                let created = factory
                    .create_delivery_for_subscription_sync_event(SubscriptionDelivery {
                        event_type,
                        subscribable_object,
                        webhook: Arc::clone(&webhook),
                        requestor,
                        request_context: Some(context),
                        allow_replica: true,
                        pregenerated_payload: pregenerated,
                        with_save: false,
                    })
                    .await;
                match created {
                    Ok(Some(delivery)) => delivery,
                    Ok(None) => return None,
                    Err(e) => {
                        tracing::warn!(
                            target: "webhook_fallback",
                            event_type,
                            webhook_id = %webhook.id,
                            error = %e,
                            "Aborting fallback loop, delivery creation failed"
                        );
                        return None;
                    }
                }
            } else {
                let payload = match &event_payload {
                    Some(payload) => Arc::clone(payload),
                    None => {
                        let payload = Arc::new(EventPayload::new(generate_payload()));
                        event_payload = Some(Arc::clone(&payload));
                        payload
                    }
                };
                factory.delivery_from_static_payload(event_type, Arc::clone(&webhook), payload)
            };

            let response_data = match self
                .dispatcher
                .send_webhook_request_sync(&mut delivery, None)
                .await
            {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(
                        target: "webhook_fallback",
                        event_type,
                        webhook_id = %webhook.id,
                        error = %e,
                        "Skipping subscriber, dispatch failed"
                    );
                    continue;
                }
            };

            match parse_tax_data(response_data.as_ref(), expected_lines_count) {
                Ok(parsed) => return Some(parsed),
                Err(e) => {
                    tracing::warn!(
                        target: "webhook_fallback",
                        event_type,
                        webhook_id = %webhook.id,
                        error = %e,
                        "Webhook response is invalid, trying next subscriber"
                    );
                    continue;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn valid_body(lines: usize) -> Value {
        json!({
            "shipping_price_gross_amount": "12.30",
            "shipping_price_net_amount": "10.00",
            "shipping_tax_rate": "23",
            "lines": (0..lines)
                .map(|_| json!({
                    "total_gross_amount": "6.15",
                    "total_net_amount": "5.00",
                    "tax_rate": "23",
                }))
                .collect::<Vec<_>>(),
        })
    }

    #[test]
    fn test_parse_valid_tax_data() {
        let body = valid_body(2);
        let parsed = parse_tax_data(Some(&body), 2).unwrap();
        assert_eq!(parsed.shipping_price_gross_amount, dec!(12.30));
        assert_eq!(parsed.lines.len(), 2);
        assert_eq!(parsed.lines[0].tax_rate, dec!(23));
    }

    #[test]
    fn test_parse_rejects_missing_response() {
        assert!(matches!(
            parse_tax_data(None, 1),
            Err(TaxDataError::Missing)
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_body() {
        let body = json!({"unexpected": true});
        assert!(matches!(
            parse_tax_data(Some(&body), 1),
            Err(TaxDataError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_rejects_line_count_mismatch() {
        let body = valid_body(1);
        assert!(matches!(
            parse_tax_data(Some(&body), 3),
            Err(TaxDataError::LineCountMismatch {
                expected: 3,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_parse_rejects_negative_values() {
        let mut body = valid_body(1);
        body["lines"][0]["total_net_amount"] = json!("-5.00");
        assert!(matches!(
            parse_tax_data(Some(&body), 1),
            Err(TaxDataError::NegativeValue("total_net_amount"))
        ));

        let mut body = valid_body(1);
        body["shipping_tax_rate"] = json!("-1");
        assert!(matches!(
            parse_tax_data(Some(&body), 1),
            Err(TaxDataError::NegativeValue("shipping_tax_rate"))
        ));
    }

    #[test]
    fn test_parse_accepts_zero_lines() {
        let body = json!({
            "shipping_price_gross_amount": "0",
            "shipping_price_net_amount": "0",
            "shipping_tax_rate": "0",
            "lines": [],
        });
        let parsed = parse_tax_data(Some(&body), 0).unwrap();
        assert!(parsed.lines.is_empty());
    }
}
