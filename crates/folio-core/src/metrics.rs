//! Engine counters, gauges and the fetch latency histogram.
//!
//! Everything is updated with relaxed atomics from the workers and read out
//! through [`EngineMetrics::snapshot`]. Exporting the snapshot to a metrics
//! backend is left to the embedding application.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::circuit_breaker::CircuitBreakerStats;
use crate::error::FailureKind;
use crate::rate_limiter::BucketStats;
use crate::registry::DomainRegistry;

/// Upper bounds of the latency buckets in milliseconds; a final +Inf bucket is implied.
pub const LATENCY_BUCKETS_MS: [u64; 8] = [50, 100, 250, 500, 1000, 2500, 5000, 10000];

/// Fixed-bucket latency histogram.
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
    count: AtomicU64,
    sum_ms: AtomicU64,
}

/// One cumulative histogram bucket. `le_ms` of `None` is +Inf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramBucket {
    pub le_ms: Option<u64>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramSnapshot {
    pub buckets: Vec<HistogramBucket>,
    pub count: u64,
    pub sum_ms: u64,
}

impl LatencyHistogram {
    pub fn observe(&self, latency: Duration) {
        let ms = latency.as_millis().min(u128::from(u64::MAX)) as u64;
        let index = LATENCY_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut cumulative = 0;
        let buckets = self
            .buckets
            .iter()
            .enumerate()
            .map(|(i, bucket)| {
                cumulative += bucket.load(Ordering::Relaxed);
                HistogramBucket {
                    le_ms: LATENCY_BUCKETS_MS.get(i).copied(),
                    count: cumulative,
                }
            })
            .collect();
        HistogramSnapshot {
            buckets,
            count: self.count.load(Ordering::Relaxed),
            sum_ms: self.sum_ms.load(Ordering::Relaxed),
        }
    }
}

/// Live engine metrics shared by the scheduler and its workers.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub requests_submitted: AtomicU64,
    pub jobs_submitted: AtomicU64,
    pub jobs_succeeded: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_dropped: AtomicU64,
    pub fetch_attempts: AtomicU64,
    pub retries: AtomicU64,
    in_flight: AtomicU64,
    failures: [AtomicU64; FailureKind::ALL.len()],
    pub fetch_latency: LatencyHistogram,
}

/// Limiter and breaker state of one domain.
#[derive(Debug, Clone, Serialize)]
pub struct DomainMetrics {
    pub domain: String,
    pub limiter: BucketStats,
    pub breaker: CircuitBreakerStats,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_submitted: u64,
    pub jobs_submitted: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dropped: u64,
    pub fetch_attempts: u64,
    pub retries: u64,
    pub in_flight: u64,
    pub pending: u64,
    pub failures_by_kind: BTreeMap<FailureKind, u64>,
    pub fetch_latency: HistogramSnapshot,
    pub domains: Vec<DomainMetrics>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn job_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn job_finished(&self) {
        // Never underflows: every finish pairs with a start.
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn attempt_started(&self) {
        self.fetch_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retry_scheduled(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, kind: FailureKind) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        if let Some(index) = FailureKind::ALL.iter().position(|k| *k == kind) {
            self.failures[index].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, pending: usize, registry: &DomainRegistry) -> MetricsSnapshot {
        let failures_by_kind = FailureKind::ALL
            .iter()
            .zip(&self.failures)
            .map(|(kind, count)| (*kind, count.load(Ordering::Relaxed)))
            .collect();

        let domains = registry
            .snapshot()
            .iter()
            .map(|state| DomainMetrics {
                domain: state.domain.clone(),
                limiter: state.limiter.stats(),
                breaker: state.breaker.stats(),
            })
            .collect();

        MetricsSnapshot {
            requests_submitted: self.requests_submitted.load(Ordering::Relaxed),
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            pending: pending as u64,
            failures_by_kind,
            fetch_latency: self.fetch_latency.snapshot(),
            domains,
        }
    }
}
