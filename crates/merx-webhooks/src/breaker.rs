//! Circuit-breaker integration for the single-subscriber trigger entry
//! point.
//!
//! The engine does not own breaker state machinery; it guarantees the
//! wrapped function is total dispatch-and-persist so the board's pass/fail
//! bookkeeping sees one accurate success signal per call. The guard is
//! chosen once at engine construction — explicit dependency injection, not
//! a global rebind. An in-memory board with a closed/open/half-open machine
//! is provided for hosts without an external decision engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dispatch::{SyncDispatch, SyncTrigger};
use crate::error::Result;

/// External breaker decision engine, keyed by the subscriber's owning app
/// (the endpoint class).
#[async_trait]
pub trait BreakerBoard: Send + Sync {
    /// May this call proceed?
    async fn can_execute(&self, app_id: Uuid) -> bool;

    /// Report the outcome of one completed dispatch.
    async fn register_result(&self, app_id: Uuid, success: bool);
}

/// Decorator short-circuiting triggers to apps the board refuses.
pub struct BreakerGuard {
    board: Arc<dyn BreakerBoard>,
    inner: Arc<dyn SyncDispatch>,
}

impl BreakerGuard {
    #[must_use]
    pub fn new(board: Arc<dyn BreakerBoard>, inner: Arc<dyn SyncDispatch>) -> Self {
        Self { board, inner }
    }
}

#[async_trait]
impl SyncDispatch for BreakerGuard {
    async fn trigger_webhook_sync(&self, trigger: SyncTrigger) -> Result<Option<Value>> {
        let app_id = trigger.webhook.app_id;
        if !self.board.can_execute(app_id).await {
            tracing::warn!(
                target: "circuit_breaker",
                app_id = %app_id,
                event_type = %trigger.event_type,
                "Trigger rejected, circuit is open"
            );
            return Ok(None);
        }
        let result = self.inner.trigger_webhook_sync(trigger).await;
        let success = matches!(&result, Ok(Some(_)));
        self.board.register_result(app_id, success).await;
        result
    }
}

// ---------------------------------------------------------------------------
// In-memory board
// ---------------------------------------------------------------------------

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    /// Normal operation, triggers proceed.
    #[default]
    Closed,
    /// Circuit tripped, triggers rejected immediately.
    Open,
    /// Testing recovery, one probe allowed through.
    HalfOpen,
}

/// Configuration for the in-memory board.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time in the open state before a probe is allowed.
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl BreakerConfig {
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

#[derive(Debug, Default)]
struct AppCircuit {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

impl AppCircuit {
    fn can_execute(&mut self, config: &BreakerConfig, app_id: Uuid) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= config.recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    tracing::info!(
                        target: "circuit_breaker",
                        app_id = %app_id,
                        "Circuit transitioning to half-open for probe"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    fn record(&mut self, config: &BreakerConfig, app_id: Uuid, success: bool) {
        if success {
            match self.state {
                CircuitState::HalfOpen => {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.opened_at = None;
                    tracing::info!(
                        target: "circuit_breaker",
                        app_id = %app_id,
                        "Circuit closed after successful probe"
                    );
                }
                CircuitState::Closed => self.failure_count = 0,
                CircuitState::Open => {}
            }
            return;
        }

        self.failure_count += 1;
        match self.state {
            CircuitState::Closed if self.failure_count >= config.failure_threshold => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
                tracing::warn!(
                    target: "circuit_breaker",
                    app_id = %app_id,
                    failure_count = self.failure_count,
                    threshold = config.failure_threshold,
                    "Circuit opened after consecutive failures"
                );
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
                tracing::warn!(
                    target: "circuit_breaker",
                    app_id = %app_id,
                    "Circuit reopened after failed probe"
                );
            }
            _ => {}
        }
    }
}

/// Per-app failure-rate board tracking consecutive failures in memory.
pub struct FailureRateBoard {
    circuits: RwLock<HashMap<Uuid, AppCircuit>>,
    config: BreakerConfig,
}

impl FailureRateBoard {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Current state for an app; `Closed` when never seen.
    pub async fn state(&self, app_id: Uuid) -> CircuitState {
        self.circuits
            .read()
            .await
            .get(&app_id)
            .map(|c| c.state)
            .unwrap_or_default()
    }
}

#[async_trait]
impl BreakerBoard for FailureRateBoard {
    async fn can_execute(&self, app_id: Uuid) -> bool {
        let mut circuits = self.circuits.write().await;
        circuits
            .entry(app_id)
            .or_default()
            .can_execute(&self.config, app_id)
    }

    async fn register_result(&self, app_id: Uuid, success: bool) {
        let mut circuits = self.circuits.write().await;
        circuits
            .entry(app_id)
            .or_default()
            .record(&self.config, app_id, success);
    }
}
