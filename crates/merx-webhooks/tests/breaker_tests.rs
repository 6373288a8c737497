//! Integration tests for the breaker guard around the single-subscriber
//! trigger entry point.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer};

use common::{build_harness, static_webhook, CaptureResponder, EchoGenerator};
use merx_webhooks::breaker::BreakerConfig;
use merx_webhooks::models::Webhook;
use merx_webhooks::{SyncTrigger, WebhookConfig};

const EVENT: &str = "shipping_list_methods_for_checkout";

async fn failing_server() -> (MockServer, CaptureResponder) {
    let server = MockServer::start().await;
    let responder = CaptureResponder::with_status(500);
    Mock::given(method("POST"))
        .respond_with(responder.clone())
        .mount(&server)
        .await;
    (server, responder)
}

fn webhook_for_app(app_id: Uuid, url: &str) -> Arc<Webhook> {
    let mut webhook = static_webhook(url);
    webhook.app_id = app_id;
    Arc::new(webhook)
}

fn trigger(webhook: &Arc<Webhook>) -> SyncTrigger {
    SyncTrigger::new(EVENT, Arc::clone(webhook)).with_payload("{}")
}

#[tokio::test]
async fn circuit_opens_after_threshold_and_short_circuits() {
    let (server, responder) = failing_server().await;
    let config = WebhookConfig::default()
        .with_breaker(BreakerConfig::default().with_failure_threshold(2));
    let (harness, _worker) = build_harness(Arc::new(EchoGenerator), config);

    let app_id = Uuid::new_v4();
    let webhook = webhook_for_app(app_id, &server.uri());

    for _ in 0..2 {
        let body = harness
            .engine
            .trigger_webhook_sync(trigger(&webhook))
            .await
            .unwrap();
        assert_eq!(body, None);
    }
    assert_eq!(responder.request_count(), 2);

    // Third call is rejected without reaching the subscriber.
    let body = harness
        .engine
        .trigger_webhook_sync(trigger(&webhook))
        .await
        .unwrap();
    assert_eq!(body, None);
    assert_eq!(responder.request_count(), 2);
}

#[tokio::test]
async fn breaker_scopes_by_app() {
    let (failing, failing_responder) = failing_server().await;
    let healthy = MockServer::start().await;
    let healthy_responder = CaptureResponder::new().with_body(json!({"methods": []}));
    Mock::given(method("POST"))
        .respond_with(healthy_responder.clone())
        .mount(&healthy)
        .await;

    let config = WebhookConfig::default()
        .with_breaker(BreakerConfig::default().with_failure_threshold(1));
    let (harness, _worker) = build_harness(Arc::new(EchoGenerator), config);

    let tripped_app = Uuid::new_v4();
    let other_app = Uuid::new_v4();
    let failing_webhook = webhook_for_app(tripped_app, &failing.uri());
    let healthy_webhook = webhook_for_app(other_app, &healthy.uri());

    harness
        .engine
        .trigger_webhook_sync(trigger(&failing_webhook))
        .await
        .unwrap();
    assert_eq!(failing_responder.request_count(), 1);

    // The other app's circuit is untouched.
    let body = harness
        .engine
        .trigger_webhook_sync(trigger(&healthy_webhook))
        .await
        .unwrap();
    assert_eq!(body, Some(json!({"methods": []})));
    assert_eq!(healthy_responder.request_count(), 1);
}

#[tokio::test]
async fn circuit_recovers_after_timeout() {
    let (failing, _failing_responder) = failing_server().await;
    let healthy = MockServer::start().await;
    let healthy_responder = CaptureResponder::new().with_body(json!({"methods": ["dhl"]}));
    Mock::given(method("POST"))
        .respond_with(healthy_responder.clone())
        .mount(&healthy)
        .await;

    let config = WebhookConfig::default().with_breaker(
        BreakerConfig::default()
            .with_failure_threshold(1)
            .with_recovery_timeout(Duration::from_millis(50)),
    );
    let (harness, _worker) = build_harness(Arc::new(EchoGenerator), config);

    let app_id = Uuid::new_v4();
    let failing_webhook = webhook_for_app(app_id, &failing.uri());
    let healthy_webhook = webhook_for_app(app_id, &healthy.uri());

    // Trip the circuit for this app.
    harness
        .engine
        .trigger_webhook_sync(trigger(&failing_webhook))
        .await
        .unwrap();

    // Still open: rejected without a network call.
    harness
        .engine
        .trigger_webhook_sync(trigger(&healthy_webhook))
        .await
        .unwrap();
    assert_eq!(healthy_responder.request_count(), 0);

    tokio::time::sleep(Duration::from_millis(80)).await;

    // Probe goes through and closes the circuit.
    let body = harness
        .engine
        .trigger_webhook_sync(trigger(&healthy_webhook))
        .await
        .unwrap();
    assert_eq!(body, Some(json!({"methods": ["dhl"]})));

    let body = harness
        .engine
        .trigger_webhook_sync(trigger(&healthy_webhook))
        .await
        .unwrap();
    assert_eq!(body, Some(json!({"methods": ["dhl"]})));
    assert_eq!(healthy_responder.request_count(), 2);
}

#[tokio::test]
async fn without_breaker_config_dispatch_is_undecorated() {
    let (server, responder) = failing_server().await;
    let (harness, _worker) = build_harness(Arc::new(EchoGenerator), WebhookConfig::default());

    let webhook = webhook_for_app(Uuid::new_v4(), &server.uri());
    for _ in 0..6 {
        harness
            .engine
            .trigger_webhook_sync(trigger(&webhook))
            .await
            .unwrap();
    }
    assert_eq!(responder.request_count(), 6);
}
