//! Retry policy and the per-attempt fetch loop.
//!
//! Every attempt goes through the domain's rate limiter and circuit breaker,
//! and every attempt's outcome is fed back to both, whether or not it is
//! retried.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::circuit_breaker::CircuitBreakerError;
use crate::error::{AppError, FetchError};
use crate::models::FetchResponse;
use crate::rate_limiter::Feedback;
use crate::registry::DomainState;
use crate::traits::Fetcher;

/// Retry configuration with exponential backoff.
///
/// Delay before attempt `n + 1` is `min(base_backoff * 2^(n-1), max_backoff)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { backoff: Duration },
    GiveUp,
}

impl RetryPolicy {
    /// Backoff after the given failed attempt (1-indexed), before jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Decides whether to retry after `attempt` failed with `error`.
    pub fn decide(&self, attempt: u32, error: &FetchError) -> RetryDecision {
        if !error.is_transient() || attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                backoff: self.backoff_for(attempt),
            }
        }
    }

    fn jitter(&self) -> Duration {
        let max = self.base_backoff.as_micros() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::thread_rng().gen_range(0..=max))
    }
}

/// Progress of a fetch, reported to the caller as it happens.
#[derive(Debug)]
pub enum AttemptEvent<'a> {
    Started {
        attempt: u32,
    },
    Finished {
        attempt: u32,
        elapsed: Duration,
        error: Option<&'a FetchError>,
    },
    Backoff {
        attempt: u32,
        delay: Duration,
        error: &'a FetchError,
    },
}

/// Wraps a single-shot [`Fetcher`] with retries, rate limiting and circuit breaking.
#[derive(Clone)]
pub struct RetryingFetcher<F> {
    inner: F,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl<F: Fetcher> RetryingFetcher<F> {
    pub fn new(inner: F, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            attempt_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches `url`, retrying transient failures until the policy gives up
    /// or `deadline` passes.
    pub async fn fetch<E>(
        &self,
        url: &str,
        domain: &DomainState,
        deadline: Instant,
        mut on_event: E,
    ) -> Result<FetchResponse, AppError>
    where
        E: FnMut(AttemptEvent<'_>) + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            domain.limiter.acquire(deadline).await?;
            domain.limiter.jitter(deadline).await;

            let permit = domain
                .breaker
                .try_acquire()
                .map_err(|e| circuit_error(&domain.domain, e))?;

            let now = Instant::now();
            if now >= deadline {
                permit.failure(&FetchError::Timeout(Duration::ZERO));
                return Err(AppError::Timeout { stage: "fetch" });
            }
            let timeout = self.attempt_timeout.min(deadline - now);

            on_event(AttemptEvent::Started { attempt });
            let started = Instant::now();
            let result = tokio::time::timeout_at(deadline, self.inner.fetch(url, timeout)).await;
            let elapsed = started.elapsed();

            let error = match result {
                Err(_elapsed) => {
                    // Dropping the unsettled permit records the failure.
                    drop(permit);
                    domain.limiter.record_outcome(Feedback::Other);
                    let error = FetchError::Timeout(elapsed);
                    on_event(AttemptEvent::Finished {
                        attempt,
                        elapsed,
                        error: Some(&error),
                    });
                    return Err(AppError::Timeout { stage: "fetch" });
                }
                Ok(Ok(mut response)) => {
                    permit.success();
                    domain.limiter.record_outcome(Feedback::Success);
                    on_event(AttemptEvent::Finished {
                        attempt,
                        elapsed,
                        error: None,
                    });
                    response.attempts = attempt;
                    return Ok(response);
                }
                Ok(Err(error)) => error,
            };

            if error.should_trip_circuit() {
                permit.failure(&error);
            } else {
                permit.success();
            }
            domain.limiter.record_outcome(if error.is_throttle_signal() {
                Feedback::Throttled
            } else {
                Feedback::Other
            });
            on_event(AttemptEvent::Finished {
                attempt,
                elapsed,
                error: Some(&error),
            });

            match self.policy.decide(attempt, &error) {
                RetryDecision::GiveUp if error.is_transient() => {
                    return Err(AppError::FetchTransient {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                RetryDecision::GiveUp => {
                    return Err(AppError::FetchPermanent {
                        attempts: attempt,
                        error,
                    });
                }
                RetryDecision::Retry { backoff } => {
                    let delay = backoff + self.policy.jitter();
                    let wake = Instant::now() + delay;
                    if wake >= deadline {
                        return Err(AppError::Timeout { stage: "backoff" });
                    }
                    tracing::debug!(
                        domain = %domain.domain,
                        %url,
                        attempt,
                        delay_ms = %delay.as_millis(),
                        error = %error,
                        "Retrying fetch after backoff"
                    );
                    on_event(AttemptEvent::Backoff {
                        attempt,
                        delay,
                        error: &error,
                    });
                    tokio::time::sleep_until(wake).await;
                }
            }
        }
    }
}

pub(crate) fn circuit_error(domain: &str, error: CircuitBreakerError) -> AppError {
    match error {
        CircuitBreakerError::Open { retry_after, .. } => AppError::CircuitOpen {
            domain: domain.to_string(),
            retry_after,
        },
        CircuitBreakerError::Inner(e) => AppError::FetchTransient {
            attempts: 0,
            last_error: e,
        },
    }
}
