//! Per-domain token-bucket admission control.
//!
//! Each domain gets a bucket holding at most `burst` tokens, refilled at
//! `refill_rate` tokens per second. A worker takes one token per fetch and
//! suspends until one is available, but never past its job deadline.
//!
//! The bucket adapts to upstream pressure: a run of 429/503 responses halves
//! the refill rate, and a run of successes slowly restores it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use folio_core::rate_limiter::{LimiterTuning, RateLimitConfig, TokenBucket};
//!
//! # async fn run() -> Result<(), folio_core::error::AppError> {
//! let bucket = TokenBucket::new(
//!     "www.goodreads.com",
//!     RateLimitConfig::new(2.0, 3),
//!     LimiterTuning::default(),
//! );
//! let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
//! bucket.acquire(deadline).await?;
//! bucket.jitter(deadline).await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::AppError;

const EPSILON: f64 = 1e-9;

/// Refill rate and burst capacity for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimitConfig {
    /// Tokens per second.
    pub refill_rate: f64,
    pub burst: u32,
}

impl RateLimitConfig {
    pub const fn new(refill_rate: f64, burst: u32) -> Self {
        Self { refill_rate, burst }
    }
}

/// Adaptive behaviour and jitter bounds shared by every bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterTuning {
    /// Consecutive throttle responses that trigger a slowdown.
    pub throttle_trigger: u32,
    /// Multiplier applied to the rate on slowdown.
    pub decrease_factor: f64,
    /// Floor for the adapted rate, tokens per second.
    pub min_rate: f64,
    /// Consecutive successes that trigger a recovery step.
    pub recovery_successes: u32,
    /// Tokens per second restored per recovery step.
    pub increase_step: f64,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Default for LimiterTuning {
    fn default() -> Self {
        Self {
            throttle_trigger: 3,
            decrease_factor: 0.5,
            min_rate: 0.1,
            recovery_successes: 10,
            increase_step: 0.5,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::from_millis(250),
        }
    }
}

impl LimiterTuning {
    /// Disables jitter; mostly useful in tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_min = Duration::ZERO;
        self.jitter_max = Duration::ZERO;
        self
    }
}

/// What a fetch attempt told us about the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Success,
    /// 429 or 503.
    Throttled,
    Other,
}

/// Snapshot of one bucket for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct BucketStats {
    pub domain: String,
    pub available_tokens: f64,
    pub current_rate: f64,
    pub base_rate: f64,
    pub burst: u32,
    pub admitted: u64,
    pub timed_out: u64,
}

#[derive(Debug)]
struct BucketInner {
    tokens: f64,
    rate: f64,
    last_refill: Instant,
    throttle_run: u32,
    success_run: u32,
    admitted: u64,
    timed_out: u64,
}

impl BucketInner {
    fn refill(&mut self, now: Instant, burst: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(burst);
        self.last_refill = now;
    }
}

/// Token bucket for a single domain.
#[derive(Debug)]
pub struct TokenBucket {
    domain: String,
    base: RateLimitConfig,
    tuning: LimiterTuning,
    inner: Mutex<BucketInner>,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(domain: impl Into<String>, base: RateLimitConfig, tuning: LimiterTuning) -> Self {
        let base = RateLimitConfig {
            refill_rate: base.refill_rate.max(EPSILON),
            burst: base.burst.max(1),
        };
        Self {
            domain: domain.into(),
            inner: Mutex::new(BucketInner {
                tokens: f64::from(base.burst),
                rate: base.refill_rate,
                last_refill: Instant::now(),
                throttle_run: 0,
                success_run: 0,
                admitted: 0,
                timed_out: 0,
            }),
            base,
            tuning,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn lock_inner(&self) -> MutexGuard<'_, BucketInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(domain = %self.domain, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Takes a token if one is available, otherwise returns how long until one is.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.lock_inner();
        inner.refill(Instant::now(), f64::from(self.base.burst));

        if inner.tokens + EPSILON >= 1.0 {
            inner.tokens = (inner.tokens - 1.0).max(0.0);
            inner.admitted += 1;
            Ok(())
        } else {
            let missing = 1.0 - inner.tokens;
            Err(Duration::from_secs_f64(missing / inner.rate))
        }
    }

    /// Waits for a token, failing with [`AppError::RateLimited`] as soon as it
    /// is clear that none will arrive before `deadline`.
    pub async fn acquire(&self, deadline: Instant) -> Result<(), AppError> {
        let started = Instant::now();
        loop {
            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            let now = Instant::now();
            let ready_at = now + wait;
            if ready_at > deadline {
                self.lock_inner().timed_out += 1;
                return Err(AppError::RateLimited {
                    domain: self.domain.clone(),
                    waited: now.saturating_duration_since(started),
                });
            }

            tracing::debug!(
                domain = %self.domain,
                wait_ms = %wait.as_millis(),
                "Waiting for rate-limit token"
            );
            tokio::time::sleep_until(ready_at).await;
        }
    }

    /// Sleeps for a random delay within the jitter bounds, clipped to `deadline`.
    pub async fn jitter(&self, deadline: Instant) {
        let (min, max) = (self.tuning.jitter_min, self.tuning.jitter_max);
        if max.is_zero() || max < min {
            return;
        }
        let micros = rand::thread_rng().gen_range(min.as_micros() as u64..=max.as_micros() as u64);
        let wake = (Instant::now() + Duration::from_micros(micros)).min(deadline);
        tokio::time::sleep_until(wake).await;
    }

    /// Feeds an attempt outcome into the adaptive rate.
    pub fn record_outcome(&self, feedback: Feedback) {
        let mut inner = self.lock_inner();
        let burst = f64::from(self.base.burst);

        match feedback {
            Feedback::Throttled => {
                inner.success_run = 0;
                inner.throttle_run += 1;
                if inner.throttle_run >= self.tuning.throttle_trigger {
                    inner.throttle_run = 0;
                    let floor = self.tuning.min_rate.min(self.base.refill_rate).max(EPSILON);
                    let next = (inner.rate * self.tuning.decrease_factor).max(floor);
                    if next < inner.rate {
                        inner.refill(Instant::now(), burst);
                        tracing::info!(
                            domain = %self.domain,
                            from = inner.rate,
                            to = next,
                            "Upstream throttling, lowering request rate"
                        );
                        inner.rate = next;
                    }
                }
            }
            Feedback::Success => {
                inner.throttle_run = 0;
                inner.success_run += 1;
                if inner.success_run >= self.tuning.recovery_successes {
                    inner.success_run = 0;
                    if inner.rate < self.base.refill_rate {
                        let next = (inner.rate + self.tuning.increase_step).min(self.base.refill_rate);
                        inner.refill(Instant::now(), burst);
                        tracing::info!(
                            domain = %self.domain,
                            from = inner.rate,
                            to = next,
                            "Upstream healthy, raising request rate"
                        );
                        inner.rate = next;
                    }
                }
            }
            Feedback::Other => {
                inner.throttle_run = 0;
                inner.success_run = 0;
            }
        }
    }

    pub fn stats(&self) -> BucketStats {
        let mut inner = self.lock_inner();
        inner.refill(Instant::now(), f64::from(self.base.burst));
        BucketStats {
            domain: self.domain.clone(),
            available_tokens: inner.tokens,
            current_rate: inner.rate,
            base_rate: self.base.refill_rate,
            burst: self.base.burst,
            admitted: inner.admitted,
            timed_out: inner.timed_out,
        }
    }
}
