//! Engine configuration.

use std::time::Duration;

use crate::breaker::BreakerConfig;

/// Default timeout for one synchronous webhook call.
pub const WEBHOOK_SYNC_TIMEOUT: Duration = Duration::from_secs(20);

/// Default time-to-live for cached webhook responses.
pub const WEBHOOK_CACHE_DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Maximum entries held by the response cache.
pub const CACHE_MAX_ENTRIES: u64 = 10_000;

/// How long attempt records are kept by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttemptRetention {
    /// Keep every attempt and every delivery record.
    All,
    /// Persist failed attempts only; successful deliveries and their
    /// attempts are pruned to bound storage.
    #[default]
    FailedOnly,
}

/// Bounded retry with exponential backoff for the transaction-action task.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first resubmission; doubles per attempt.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff before resubmitting after `attempt_number` (1-based) failed.
    /// `None` when the attempt budget is spent.
    #[must_use]
    pub fn backoff_for(&self, attempt_number: u32) -> Option<Duration> {
        if attempt_number >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt_number.saturating_sub(1));
        Some(self.backoff_base.saturating_mul(factor))
    }
}

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Domain identifier sent in the `X-Merx-Domain` header.
    pub domain: String,
    /// Timeout applied when a call does not specify one.
    pub sync_timeout: Duration,
    /// TTL applied when a cached call does not specify one.
    pub cache_default_timeout: Duration,
    pub cache_max_entries: u64,
    pub attempt_retention: AttemptRetention,
    pub retry: RetryPolicy,
    /// `Some` enables the circuit-breaker guard around the single-subscriber
    /// trigger entry point; `None` leaves dispatch undecorated.
    pub breaker: Option<BreakerConfig>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            domain: "merx.local".to_string(),
            sync_timeout: WEBHOOK_SYNC_TIMEOUT,
            cache_default_timeout: WEBHOOK_CACHE_DEFAULT_TIMEOUT,
            cache_max_entries: CACHE_MAX_ENTRIES,
            attempt_retention: AttemptRetention::default(),
            retry: RetryPolicy::default(),
            breaker: None,
        }
    }
}

impl WebhookConfig {
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cache_default_timeout(mut self, ttl: Duration) -> Self {
        self.cache_default_timeout = ttl;
        self
    }

    #[must_use]
    pub fn with_attempt_retention(mut self, retention: AttemptRetention) -> Self {
        self.attempt_retention = retention;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = Some(breaker);
        self
    }
}
