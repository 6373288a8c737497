//! Response cache for repeated synchronous webhook calls.
//!
//! Keys are derived from (caller-supplied cache data, target URL, event
//! type, owning app) so identical requests within a short window hit the
//! cache instead of the subscriber — never from the event type alone, which
//! would collide across tenants and payloads. Failed (null) results are
//! never cached; entries expire by time only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::Expiry;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{CACHE_MAX_ENTRIES, WEBHOOK_CACHE_DEFAULT_TIMEOUT};
use crate::dispatch::{SyncDispatch, SyncTrigger};
use crate::error::Result;

/// Cached parsed body with its own time-to-live.
#[derive(Clone)]
struct CachedResponse {
    body: Value,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedResponse> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedResponse,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Derive the cache key for one webhook call.
#[must_use]
pub fn generate_cache_key_for_webhook(
    cache_data: &Value,
    target_url: &str,
    event_type: &str,
    app_id: Uuid,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cache_data.to_string().as_bytes());
    hasher.update(b"\x00");
    hasher.update(target_url.as_bytes());
    hasher.update(b"\x00");
    hasher.update(event_type.as_bytes());
    hasher.update(b"\x00");
    hasher.update(app_id.as_bytes());
    format!("webhook-response:{}", hex::encode(hasher.finalize()))
}

/// Shared in-process cache of parsed webhook responses.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Cache<String, CachedResponse>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CACHE_MAX_ENTRIES)
    }
}

impl ResponseCache {
    #[must_use]
    pub fn new(max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { inner }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key).await.map(|entry| entry.body)
    }

    pub async fn insert(&self, key: String, body: Value, ttl: Duration) {
        self.inner.insert(key, CachedResponse { body, ttl }).await;
    }
}

/// Cache-fronted trigger: hit returns the stored body with no network call
/// and no new delivery record; miss delegates to the (possibly
/// breaker-guarded) dispatch entry point.
pub struct CachedWebhookTrigger {
    cache: ResponseCache,
    dispatch: Arc<dyn SyncDispatch>,
    default_timeout: Duration,
}

impl CachedWebhookTrigger {
    #[must_use]
    pub fn new(cache: ResponseCache, dispatch: Arc<dyn SyncDispatch>) -> Self {
        Self {
            cache,
            dispatch,
            default_timeout: WEBHOOK_CACHE_DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, ttl: Duration) -> Self {
        self.default_timeout = ttl;
        self
    }

    /// Fetch the response from cache when still valid, otherwise send the
    /// webhook and cache a non-null body under the resolved TTL.
    ///
    /// # Errors
    ///
    /// Only the dispatch path's scheme-gate error.
    pub async fn trigger_webhook_sync_if_not_cached(
        &self,
        trigger: SyncTrigger,
        cache_data: &Value,
        cache_timeout: Option<Duration>,
    ) -> Result<Option<Value>> {
        let cache_key = generate_cache_key_for_webhook(
            cache_data,
            &trigger.webhook.target_url,
            &trigger.event_type,
            trigger.webhook.app_id,
        );

        if let Some(cached) = self.cache.get(&cache_key).await {
            tracing::debug!(
                target: "webhook_cache",
                event_type = %trigger.event_type,
                app_id = %trigger.webhook.app_id,
                "Returning cached webhook response"
            );
            return Ok(Some(cached));
        }

        let response_data = self.dispatch.trigger_webhook_sync(trigger).await?;
        if let Some(body) = &response_data {
            self.cache
                .insert(
                    cache_key,
                    body.clone(),
                    cache_timeout.unwrap_or(self.default_timeout),
                )
                .await;
        }
        Ok(response_data)
    }
}
