//! Circuit breaker for the remote clinical-data service.
//!
//! Protects the portal from cascading failures when the remote service is
//! degraded, and automatically probes for recovery:
//!
//! - **closed** (initial): calls pass through. Each failure increments a
//!   shared counter; reaching the failure threshold opens the circuit.
//! - **open**: calls are short-circuited until the recovery timeout has
//!   elapsed since the last recorded failure, after which the next call is
//!   allowed through as a half-open probe.
//! - **half_open**: probes pass through. Enough consecutive successes close
//!   the circuit; a single failure reopens it immediately.
//!
//! State lives in a shared [`StateStore`] under keys namespaced by service
//! name, so concurrent processes observe the same breaker. Counter updates
//! use atomic increments; the read-state/decide/write-state sequence in
//! [`CircuitBreaker::call`] is not globally atomic, so concurrent callers may
//! race on a transition. The worst case is a brief burst of redundant
//! half-open probes, never unbounded call leakage.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::store::StateStore;

/// TTL for the persisted state value.
const STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// TTL for the failure counter.
const FAILURE_TTL: Duration = Duration::from_secs(60 * 60);
/// TTL for the half-open success counter.
const SUCCESS_TTL: Duration = Duration::from_secs(10 * 60);
/// TTL for the last-failure timestamp.
const LAST_FAILURE_TTL: Duration = Duration::from_secs(60 * 60);

/// The three fault-tolerance states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// Recovery probes are in flight.
    HalfOpen,
}

impl CircuitState {
    /// Returns the stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("unknown circuit state: {}", s)),
        }
    }
}

/// Tuning knobs for a breaker instance.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures (within the counter TTL window) before the circuit opens.
    pub failure_threshold: u32,
    /// Half-open successes required to close the circuit.
    pub success_threshold: u32,
    /// How long an open circuit waits before allowing a recovery probe.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Read-only snapshot of a breaker, for observability endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    /// Service name this breaker guards.
    pub service: String,
    /// Current circuit state.
    pub state: CircuitState,
    /// Failures recorded in the current window.
    pub failure_count: u64,
    /// Successes recorded while half-open.
    pub success_count: u64,
    /// Configured failure threshold.
    pub failure_threshold: u32,
    /// Configured success threshold.
    pub success_threshold: u32,
    /// Configured recovery timeout in seconds.
    pub recovery_timeout_secs: u64,
    /// Unix timestamp of the last recorded failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<i64>,
}

/// Circuit breaker scoped to one named remote service.
///
/// Cheap to clone; clones share the same store and therefore the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    service: String,
    store: Arc<dyn StateStore>,
    config: CircuitBreakerConfig,
}

enum Preflight {
    /// The call may proceed (normal traffic or a recovery probe).
    Proceed,
    /// The circuit is open and not yet eligible for a probe.
    Reject { retry_after_secs: Option<u64> },
}

impl CircuitBreaker {
    /// Creates a breaker with default thresholds for the given service name.
    pub fn new(service: impl Into<String>, store: Arc<dyn StateStore>) -> Self {
        Self::with_config(service, store, CircuitBreakerConfig::default())
    }

    /// Creates a breaker with explicit configuration.
    pub fn with_config(
        service: impl Into<String>,
        store: Arc<dyn StateStore>,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            service: service.into(),
            store,
            config,
        }
    }

    /// The service name this breaker guards.
    pub fn service(&self) -> &str {
        &self.service
    }

    fn key(&self, suffix: &str) -> String {
        format!("circuit:{}:{}", self.service, suffix)
    }

    /// Current state as persisted in the shared store.
    ///
    /// An absent or expired state value means the breaker is closed.
    pub async fn state(&self) -> CircuitState {
        self.store
            .get(&self.key("state"))
            .await
            .and_then(|s| s.parse().ok())
            .unwrap_or(CircuitState::Closed)
    }

    /// Executes `operation` under breaker protection.
    ///
    /// On success the result is returned after recording the success. On
    /// failure the original error is re-raised after recording the failure
    /// (including any half-open → open transition). If the circuit is open
    /// and not yet eligible for a probe, the operation is never invoked and
    /// [`GatewayError::CircuitOpen`] is returned.
    pub async fn call<T, F, Fut>(&self, operation: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        match self.preflight().await {
            Preflight::Proceed => self.execute(operation).await,
            Preflight::Reject { retry_after_secs } => Err(GatewayError::CircuitOpen {
                service: self.service.clone(),
                retry_after_secs,
            }),
        }
    }

    /// Like [`CircuitBreaker::call`], but an open circuit degrades to
    /// `fallback` instead of failing.
    pub async fn call_or<T, F, Fut, FB>(&self, operation: F, fallback: FB) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
        FB: FnOnce() -> T,
    {
        match self.preflight().await {
            Preflight::Proceed => self.execute(operation).await,
            Preflight::Reject { .. } => {
                info!(service = %self.service, "circuit open, serving fallback");
                Ok(fallback())
            }
        }
    }

    async fn execute<T, F, Fut>(&self, operation: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(err)
            }
        }
    }

    async fn preflight(&self) -> Preflight {
        match self.state().await {
            CircuitState::Closed | CircuitState::HalfOpen => Preflight::Proceed,
            CircuitState::Open => {
                let elapsed = self.seconds_since_last_failure().await;
                let timeout = self.config.recovery_timeout.as_secs();
                match elapsed {
                    // Missing timestamp (TTL expired) counts as eligible.
                    None => {
                        self.enter_half_open().await;
                        Preflight::Proceed
                    }
                    Some(elapsed) if elapsed >= timeout => {
                        self.enter_half_open().await;
                        Preflight::Proceed
                    }
                    Some(elapsed) => Preflight::Reject {
                        retry_after_secs: Some(timeout - elapsed),
                    },
                }
            }
        }
    }

    async fn enter_half_open(&self) {
        self.store.forget(&self.key("successes")).await;
        self.store
            .put(&self.key("state"), CircuitState::HalfOpen.as_str(), STATE_TTL)
            .await;
        info!(service = %self.service, "circuit half-open, probing for recovery");
    }

    /// Records a successful call.
    ///
    /// Exposed for callers that manage their own call lifecycle. While
    /// half-open, reaching the success threshold resets the breaker to
    /// closed; in any other state a success is a no-op.
    pub async fn record_success(&self) {
        if self.state().await != CircuitState::HalfOpen {
            return;
        }
        let successes = self
            .store
            .increment(&self.key("successes"), SUCCESS_TTL)
            .await;
        if successes >= u64::from(self.config.success_threshold) {
            self.reset().await;
            info!(service = %self.service, "circuit closed after recovery");
        }
    }

    /// Records a failed call.
    ///
    /// Increments the shared failure counter and refreshes the last-failure
    /// timestamp. A half-open failure reopens the circuit immediately,
    /// discarding probe progress; in the closed state, reaching the failure
    /// threshold opens the circuit.
    pub async fn record_failure(&self) {
        let state = self.state().await;
        let failures = self
            .store
            .increment(&self.key("failures"), FAILURE_TTL)
            .await;
        self.store
            .put(
                &self.key("last_failure"),
                &chrono::Utc::now().timestamp().to_string(),
                LAST_FAILURE_TTL,
            )
            .await;

        match state {
            CircuitState::HalfOpen => {
                self.store.forget(&self.key("successes")).await;
                self.store
                    .put(&self.key("state"), CircuitState::Open.as_str(), STATE_TTL)
                    .await;
                warn!(service = %self.service, "probe failed, circuit reopened");
            }
            CircuitState::Closed if failures >= u64::from(self.config.failure_threshold) => {
                self.store
                    .put(&self.key("state"), CircuitState::Open.as_str(), STATE_TTL)
                    .await;
                warn!(
                    service = %self.service,
                    failures,
                    threshold = self.config.failure_threshold,
                    "failure threshold reached, circuit opened"
                );
            }
            _ => {}
        }
    }

    /// Forces the breaker back to closed, clearing all counters.
    ///
    /// Administrative operation; also used internally when recovery succeeds.
    pub async fn reset(&self) {
        self.store.forget(&self.key("failures")).await;
        self.store.forget(&self.key("successes")).await;
        self.store.forget(&self.key("last_failure")).await;
        self.store
            .put(&self.key("state"), CircuitState::Closed.as_str(), STATE_TTL)
            .await;
    }

    /// Read-only snapshot of state, counters, and thresholds. No side
    /// effects.
    pub async fn status(&self) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            service: self.service.clone(),
            state: self.state().await,
            failure_count: self.counter("failures").await,
            success_count: self.counter("successes").await,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
            last_failure_at: self.last_failure_timestamp().await,
        }
    }

    async fn counter(&self, suffix: &str) -> u64 {
        self.store
            .get(&self.key(suffix))
            .await
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    async fn last_failure_timestamp(&self) -> Option<i64> {
        self.store
            .get(&self.key("last_failure"))
            .await
            .and_then(|v| v.parse().ok())
    }

    async fn seconds_since_last_failure(&self) -> Option<u64> {
        let recorded = self.last_failure_timestamp().await?;
        let now = chrono::Utc::now().timestamp();
        Some((now - recorded).max(0) as u64)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn breaker(store: Arc<InMemoryStore>) -> CircuitBreaker {
        CircuitBreaker::with_config(
            "fhir",
            store,
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                recovery_timeout: Duration::from_secs(60),
            },
        )
    }

    async fn backdate_last_failure(store: &InMemoryStore, secs_ago: i64) {
        let stale = chrono::Utc::now().timestamp() - secs_ago;
        store
            .put("circuit:fhir:last_failure", &stale.to_string(), LAST_FAILURE_TTL)
            .await;
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let breaker = breaker(Arc::new(InMemoryStore::new()));
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_stays_closed_below_threshold() {
        let breaker = breaker(Arc::new(InMemoryStore::new()));
        breaker.record_failure().await;
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.status().await.failure_count, 2);
    }

    #[tokio::test]
    async fn test_opens_at_threshold_with_timestamp() {
        let breaker = breaker(Arc::new(InMemoryStore::new()));
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        let status = breaker.status().await;
        assert_eq!(status.state, CircuitState::Open);
        assert!(status.last_failure_at.is_some());
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking_operation() {
        let breaker = breaker(Arc::new(InMemoryStore::new()));
        for _ in 0..3 {
            breaker.record_failure().await;
        }

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result: GatewayResult<u32> = breaker
            .call(|| {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(1) }
            })
            .await;

        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
        match result {
            Err(GatewayError::CircuitOpen {
                service,
                retry_after_secs,
            }) => {
                assert_eq!(service, "fhir");
                assert!(retry_after_secs.is_some_and(|s| s <= 60));
            }
            other => panic!("expected CircuitOpen, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_open_serves_fallback() {
        let breaker = breaker(Arc::new(InMemoryStore::new()));
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        let result = breaker
            .call_or(|| async { Ok(1) }, || 99)
            .await
            .unwrap();
        assert_eq!(result, 99);
    }

    #[tokio::test]
    async fn test_probe_after_recovery_timeout() {
        let store = Arc::new(InMemoryStore::new());
        let breaker = breaker(store.clone());
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        backdate_last_failure(&store, 120).await;

        let result = breaker.call(|| async { Ok("probe") }).await.unwrap();
        assert_eq!(result, "probe");
        // One success is below the threshold of two, so still half-open.
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_success_threshold() {
        let store = Arc::new(InMemoryStore::new());
        let breaker = breaker(store.clone());
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        backdate_last_failure(&store, 120).await;

        breaker.call(|| async { Ok(()) }).await.unwrap();
        breaker.call(|| async { Ok(()) }).await.unwrap();

        let status = breaker.status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
        assert_eq!(status.success_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_and_discards_progress() {
        let store = Arc::new(InMemoryStore::new());
        let breaker = breaker(store.clone());
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        backdate_last_failure(&store, 120).await;

        breaker.call(|| async { Ok(()) }).await.unwrap();
        let err = breaker
            .call(|| async { Err::<(), _>(GatewayError::transport("timeout")) })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport { .. }));

        let status = breaker.status().await;
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.success_count, 0);
        // The failure timestamp was refreshed, so the circuit is not yet
        // eligible for another probe.
        let rejected: GatewayResult<()> = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(rejected, Err(GatewayError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let breaker = breaker(Arc::new(InMemoryStore::new()));
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        breaker.reset().await;
        let status = breaker.status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
        assert!(status.last_failure_at.is_none());
    }

    #[tokio::test]
    async fn test_breakers_are_namespaced_per_service() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let fhir = CircuitBreaker::new("fhir", store.clone());
        let docs = CircuitBreaker::new("documents", store.clone());
        for _ in 0..5 {
            fhir.record_failure().await;
        }
        assert_eq!(fhir.state().await, CircuitState::Open);
        assert_eq!(docs.state().await, CircuitState::Closed);
    }

    #[test]
    fn test_state_round_trip() {
        for state in [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen] {
            assert_eq!(state.as_str().parse::<CircuitState>().unwrap(), state);
        }
        assert!("bogus".parse::<CircuitState>().is_err());
    }
}
