//! Per-domain circuit breaker.
//!
//! Isolates a failing upstream so that workers stop spending rate-limit
//! tokens and connections on it.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED --[failure ratio >= threshold over window]--> OPEN --[open_duration]--> HALF_OPEN
//!   ^                                                   ^                           |
//!   |                                                   +------[probe failure]------+
//!   +-----------------------[N consecutive probe successes]-------------------------+
//! ```
//!
//! Transient fetch errors (timeouts, connection errors, 5xx, 429) count as
//! failures. Any other response, including a 404, counts as a success because
//! the host answered.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::FetchError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Circuit is half-open - limited probe requests test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure ratio (0.0-1.0) over the window that opens the circuit.
    pub failure_threshold: f64,

    /// Number of most recent attempts kept in the sliding window.
    pub window_size: usize,

    /// Outcomes required in the window before the ratio is evaluated.
    pub minimum_requests: usize,

    /// Time to wait before transitioning from Open to Half-Open.
    pub open_duration: Duration,

    /// Concurrent probes admitted while half-open, and consecutive probe
    /// successes needed to close.
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            window_size: 20,
            minimum_requests: 5,
            open_duration: Duration::from_secs(30),
            half_open_probes: 3,
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    /// `true` marks a failure.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    probe_successes: u32,
    last_error_message: Option<String>,
    /// Bumped on every state change so late results from an earlier state are dropped.
    generation: u64,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            probes_in_flight: 0,
            probe_successes: 0,
            last_error_message: None,
            generation: 0,
        }
    }

    fn window_failures(&self) -> usize {
        self.window.iter().filter(|failed| **failed).count()
    }

    fn enter(&mut self, state: CircuitState) {
        self.state = state;
        self.generation += 1;
        self.probes_in_flight = 0;
        self.probe_successes = 0;
        match state {
            CircuitState::Open => self.opened_at = Some(Instant::now()),
            CircuitState::Closed => {
                self.window.clear();
                self.opened_at = None;
                self.last_error_message = None;
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn retry_after(&self, open_duration: Duration) -> Duration {
        self.opened_at
            .map(|t| open_duration.saturating_sub(t.elapsed()))
            .unwrap_or(open_duration)
    }
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub window_total: usize,
    pub window_failures: usize,
    pub probe_successes: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Error type for circuit breaker operations.
#[derive(Debug)]
pub enum CircuitBreakerError {
    /// Circuit is open - request was rejected without calling the service.
    Open { name: String, retry_after: Duration },
    /// The inner operation failed.
    Inner(FetchError),
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::Open { name, retry_after } => {
                write!(
                    f,
                    "Circuit breaker '{}' is open. Retry after {} seconds.",
                    name,
                    retry_after.as_secs()
                )
            }
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

/// Admission ticket for one attempt.
///
/// Dropping a permit without settling it records a failure, which is what
/// happens when an attempt is abandoned at the job deadline.
#[must_use = "an unsettled permit is recorded as a failure"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, self.probe, None);
    }

    pub fn failure(mut self, error: &FetchError) {
        self.settled = true;
        self.breaker
            .settle(self.generation, self.probe, Some(error.to_string()));
    }

    /// Settles the permit from a fetch result using the failure accounting rules.
    pub fn record<T>(self, result: &Result<T, FetchError>) {
        match result {
            Err(e) if e.should_trip_circuit() => self.failure(e),
            _ => self.success(),
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(
                self.generation,
                self.probe,
                Some("attempt abandoned at deadline".to_string()),
            );
        }
    }
}

/// Thread-safe circuit breaker guarding one domain.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let time_until_half_open = (inner.state == CircuitState::Open)
            .then(|| inner.retry_after(self.config.open_duration));

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            window_total: inner.window.len(),
            window_failures: inner.window_failures(),
            probe_successes: inner.probe_successes,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Checks admission without taking a probe slot.
    pub fn check(&self) -> Result<(), CircuitBreakerError> {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if inner.probes_in_flight < self.config.half_open_probes => {
                Ok(())
            }
            _ => Err(self.open_error(&inner)),
        }
    }

    /// Admits one attempt, taking a probe slot when half-open.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitBreakerError> {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if inner.probes_in_flight < self.config.half_open_probes => {
                inner.probes_in_flight += 1;
                true
            }
            _ => return Err(self.open_error(&inner)),
        };

        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            probe,
            settled: false,
        })
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - Closed: executes operation, tracks success/failure
    /// - Open: returns `CircuitBreakerError::Open` immediately
    /// - HalfOpen: executes operation as a probe if a slot is free
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let permit = self.try_acquire()?;
        let result = operation().await;
        permit.record(&result);
        result.map_err(CircuitBreakerError::Inner)
    }

    pub fn record_success(&self) {
        let generation = self.lock_inner().generation;
        self.settle(generation, false, None);
    }

    pub fn record_failure(&self, error: &FetchError) {
        let generation = self.lock_inner().generation;
        self.settle(generation, false, Some(error.to_string()));
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        inner.enter(CircuitState::Closed);
    }

    fn open_error(&self, inner: &CircuitBreakerInner) -> CircuitBreakerError {
        let retry_after = match inner.state {
            CircuitState::Open => inner.retry_after(self.config.open_duration),
            _ => Duration::ZERO,
        };
        CircuitBreakerError::Open {
            name: self.name.clone(),
            retry_after,
        }
    }

    fn settle(&self, generation: u64, probe: bool, failure: Option<String>) {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        if inner.generation != generation {
            return;
        }
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }

        match inner.state {
            CircuitState::Closed => {
                inner.window.push_back(failure.is_some());
                while inner.window.len() > self.config.window_size {
                    inner.window.pop_front();
                }
                if let Some(message) = failure {
                    inner.last_error_message = Some(message);
                }

                let total = inner.window.len();
                let failures = inner.window_failures();
                if total >= self.config.minimum_requests
                    && failures as f64 / total as f64 >= self.config.failure_threshold
                {
                    tracing::warn!(
                        circuit = %self.name,
                        failures,
                        total,
                        error = ?inner.last_error_message,
                        "Circuit breaker opening after {} failures in {} attempts",
                        failures,
                        total
                    );
                    inner.enter(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => match failure {
                Some(message) => {
                    tracing::warn!(
                        circuit = %self.name,
                        error = %message,
                        "Circuit breaker probe failed, returning to open state"
                    );
                    inner.last_error_message = Some(message);
                    inner.enter(CircuitState::Open);
                }
                None => {
                    inner.probe_successes += 1;
                    if inner.probe_successes >= self.config.half_open_probes {
                        tracing::info!(
                            circuit = %self.name,
                            "Circuit breaker closing after {} successful probes",
                            inner.probe_successes
                        );
                        inner.enter(CircuitState::Closed);
                    }
                }
            },
            // Results that land while open come from attempts admitted earlier.
            CircuitState::Open => {}
        }
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.config.open_duration
        {
            tracing::info!(
                circuit = %self.name,
                "Circuit breaker transitioning to half-open state"
            );
            inner.enter(CircuitState::HalfOpen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> FetchError {
        FetchError::Timeout(Duration::from_secs(1))
    }

    fn eager_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 0.5,
            window_size: 10,
            minimum_requests: 4,
            open_duration: Duration::from_secs(30),
            half_open_probes: 2,
        }
    }

    fn open_breaker() -> CircuitBreaker {
        let cb = CircuitBreaker::new("test", eager_config());
        for _ in 0..4 {
            cb.record_failure(&timeout());
        }
        assert_eq!(cb.state(), CircuitState::Open);
        cb
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_waits_for_minimum_requests() {
        let cb = CircuitBreaker::new("test", eager_config());
        for _ in 0..3 {
            cb.record_failure(&timeout());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(&timeout());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_circuit_opens_on_failure_ratio() {
        let cb = CircuitBreaker::new("test", eager_config());
        cb.record_success();
        cb.record_failure(&timeout());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(&timeout());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_circuit_stays_closed_below_ratio() {
        let cb = CircuitBreaker::new("test", eager_config());
        for _ in 0..8 {
            cb.record_success();
        }
        for _ in 0..4 {
            cb.record_failure(&timeout());
        }
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.window_total, 10);
        assert_eq!(stats.window_failures, 4);
    }

    #[test]
    fn test_window_slides() {
        let cb = CircuitBreaker::new("test", eager_config());
        for _ in 0..4 {
            cb.record_failure(&timeout());
            cb.record_success();
            cb.record_success();
            cb.record_success();
        }
        // Bounded at window_size.
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.window_total, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_transitions_to_half_open() {
        let cb = open_breaker();
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cb.state(), CircuitState::Open);
        let remaining = cb.stats().time_until_half_open.unwrap();
        assert!(remaining > Duration::ZERO && remaining <= Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_consecutive_probes() {
        let cb = open_breaker();
        tokio::time::advance(Duration::from_secs(30)).await;

        let probe = cb.try_acquire().unwrap();
        assert!(probe.is_probe());
        probe.success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.try_acquire().unwrap().success();
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.window_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_reopens_on_probe_failure() {
        let cb = open_breaker();
        tokio::time::advance(Duration::from_secs(30)).await;

        cb.try_acquire().unwrap().success();
        cb.try_acquire().unwrap().failure(&timeout());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().probe_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_concurrent_probes() {
        let cb = open_breaker();
        tokio::time::advance(Duration::from_secs(30)).await;

        let first = cb.try_acquire().unwrap();
        let second = cb.try_acquire().unwrap();
        assert!(matches!(
            cb.try_acquire(),
            Err(CircuitBreakerError::Open { .. })
        ));
        assert!(cb.check().is_err());

        first.success();
        assert!(cb.check().is_ok());
        second.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_permit_counts_as_failure() {
        let cb = open_breaker();
        tokio::time::advance(Duration::from_secs(30)).await;
        {
            let _probe = cb.try_acquire().unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_late_results_while_open_are_ignored() {
        let cb = CircuitBreaker::new("test", eager_config());
        let late = cb.try_acquire().unwrap();
        for _ in 0..4 {
            cb.record_failure(&timeout());
        }
        late.success();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().window_total, 4);
    }

    #[test]
    fn test_manual_reset() {
        let cb = open_breaker();
        cb.reset();
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert!(stats.last_error.is_none());
    }

    #[tokio::test]
    async fn test_call_returns_open_error_when_circuit_open() {
        let cb = open_breaker();
        let mut reached = false;
        let result = cb
            .call(|| {
                reached = true;
                async { Ok::<_, FetchError>("should not execute".to_string()) }
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert!(!reached);
    }

    #[tokio::test]
    async fn test_call_executes_when_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        let result = cb
            .call(|| async { Ok::<_, FetchError>("success".to_string()) })
            .await;
        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn test_call_counts_permanent_errors_as_success() {
        let cb = CircuitBreaker::new("test", eager_config());
        for _ in 0..5 {
            let _ = cb
                .call(|| async {
                    Err::<String, _>(FetchError::Status {
                        status: 404,
                        url: "https://example.com/missing".into(),
                    })
                })
                .await;
        }
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.window_failures, 0);
        assert_eq!(stats.window_total, 5);
    }

    #[tokio::test]
    async fn test_call_records_failure() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        let _ = cb
            .call(|| async { Err::<String, _>(FetchError::Connect("refused".into())) })
            .await;
        let stats = cb.stats();
        assert_eq!(stats.window_failures, 1);
        assert_eq!(stats.last_error.as_deref(), Some("connection failed: refused"));
    }
}
