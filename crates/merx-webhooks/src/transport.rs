//! HTTP transport adapter and response classifier.
//!
//! Wraps exactly one POST per attempt and normalizes every outcome into a
//! tri-state `WebhookResponse`: 2xx is success, anything else (non-2xx,
//! connect error, timeout) is failure. Timeouts end the call early and are
//! classified as failures, not as a distinct cancelled state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use url::Url;

use crate::error::WebhookError;
use crate::models::{EventDeliveryStatus, WebhookResponse};

/// Stored response bodies are cut at this many characters.
const RESPONSE_BODY_LIMIT: usize = 4096;

/// Allowed target URL schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookScheme {
    Http,
    Https,
}

/// Validate that a target URL parses and uses http/https.
///
/// # Errors
///
/// `InvalidUrl` when the URL does not parse, `UnsupportedScheme` for any
/// scheme outside http/https.
pub fn validate_scheme(target_url: &str) -> Result<WebhookScheme, WebhookError> {
    let parsed =
        Url::parse(target_url).map_err(|e| WebhookError::InvalidUrl(format!("{target_url}: {e}")))?;
    match parsed.scheme() {
        "http" => Ok(WebhookScheme::Http),
        "https" => Ok(WebhookScheme::Https),
        other => Err(WebhookError::UnsupportedScheme(other.to_string())),
    }
}

/// Shared HTTP client for outbound webhook calls.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    domain: String,
}

impl HttpTransport {
    /// Build the shared client. Redirects are refused so a subscriber cannot
    /// bounce signed payloads to another host.
    ///
    /// # Errors
    ///
    /// `Internal` when the client cannot be constructed.
    pub fn new(domain: impl Into<String>) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .user_agent("merx-webhooks/0.1")
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            domain: domain.into(),
        })
    }

    /// Issue one POST with the JSON payload, signature and event metadata
    /// headers, classifying the outcome. Never returns an error: transport
    /// failures are folded into the response status.
    pub async fn send_webhook_using_http(
        &self,
        target_url: &str,
        body: &[u8],
        signature: Option<&str>,
        event_type: &str,
        timeout: Duration,
        custom_headers: &HashMap<String, String>,
    ) -> WebhookResponse {
        let headers = self.build_headers(signature, event_type, custom_headers);

        let start = Instant::now();
        let result = self
            .client
            .post(target_url)
            .headers(headers)
            .timeout(timeout)
            .body(body.to_vec())
            .send()
            .await;
        let duration = start.elapsed();

        match result {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let headers = headers_to_map(response.headers());
                let content = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(RESPONSE_BODY_LIMIT)
                    .collect::<String>();

                let status = if (200..300).contains(&status_code) {
                    EventDeliveryStatus::Success
                } else {
                    EventDeliveryStatus::Failed
                };
                WebhookResponse {
                    content,
                    status,
                    response_status_code: Some(status_code),
                    headers,
                    duration,
                }
            }
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("request timed out after {}ms", timeout.as_millis())
                } else if e.is_connect() {
                    format!("connection failed: {e}")
                } else {
                    format!("request error: {e}")
                };
                WebhookResponse {
                    content: message,
                    status: EventDeliveryStatus::Failed,
                    response_status_code: None,
                    headers: HashMap::new(),
                    duration,
                }
            }
        }
    }

    fn build_headers(
        &self,
        signature: Option<&str>,
        event_type: &str,
        custom_headers: &HashMap<String, String>,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        if let Ok(v) = HeaderValue::from_str(&self.domain) {
            headers.insert("X-Merx-Domain", v);
        }
        if let Ok(v) = HeaderValue::from_str(event_type) {
            headers.insert("X-Merx-Event", v);
        }
        if let Some(signature) = signature {
            if let Ok(v) = HeaderValue::from_str(signature) {
                headers.insert("X-Merx-Signature", v);
            }
        }
        for (name, value) in custom_headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                tracing::warn!(target: "webhook_delivery", header = %name, "Skipping invalid custom header name");
                continue;
            };
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    headers.insert(name, v);
                }
                Err(_) => {
                    tracing::warn!(target: "webhook_delivery", header = %name, "Skipping invalid custom header value");
                }
            }
        }
        headers
    }
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}
