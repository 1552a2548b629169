use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parse::ParseFailure;

/// Classification of a terminal job failure, as reported to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No rate-limit token became available before the job deadline.
    RateLimited,
    /// The target domain is isolated by its circuit breaker.
    CircuitOpen,
    /// Network errors, 5xx or 429 that persisted through every retry.
    FetchTransient,
    /// 4xx other than 429, invalid URLs, redirect loops.
    FetchPermanent,
    /// No parsing strategy produced an acceptable record.
    ParseFailure,
    /// The job-level deadline elapsed.
    Timeout,
}

impl FailureKind {
    pub const ALL: [FailureKind; 6] = [
        FailureKind::RateLimited,
        FailureKind::CircuitOpen,
        FailureKind::FetchTransient,
        FailureKind::FetchPermanent,
        FailureKind::ParseFailure,
        FailureKind::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::FetchTransient => "fetch_transient",
            FailureKind::FetchPermanent => "fetch_permanent",
            FailureKind::ParseFailure => "parse_failure",
            FailureKind::Timeout => "timeout",
        }
    }

    /// Whether resubmitting the same request later may succeed.
    pub fn is_retryable_later(&self) -> bool {
        !matches!(self, FailureKind::FetchPermanent | FailureKind::ParseFailure)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single failed HTTP attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Resets, truncated bodies and other I/O failures mid-request.
    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Connect(_) | FetchError::Network(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::TooManyRedirects | FetchError::InvalidUrl(_) => false,
        }
    }

    /// Returns true if this error should count against the domain's circuit breaker.
    pub fn should_trip_circuit(&self) -> bool {
        self.is_transient()
    }

    /// 429 and 503 mean the upstream is asking us to slow down.
    pub fn is_throttle_signal(&self) -> bool {
        matches!(self, FetchError::Status { status: 429 | 503, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Application-wide error types for Folio.
#[derive(Error, Debug)]
pub enum AppError {
    /// Deadline exceeded while waiting for a rate-limit token.
    #[error("Rate limited: no token for {domain} after {}ms", waited.as_millis())]
    RateLimited { domain: String, waited: Duration },

    /// Domain currently isolated by its circuit breaker.
    #[error("Circuit breaker '{domain}' is open, retry after {}s", retry_after.as_secs())]
    CircuitOpen {
        domain: String,
        retry_after: Duration,
    },

    /// Transient fetch failure that survived every retry.
    #[error("Fetch failed after {attempts} attempt(s): {last_error}")]
    FetchTransient {
        attempts: u32,
        #[source]
        last_error: FetchError,
    },

    /// Non-retryable fetch failure.
    #[error("Fetch failed permanently: {error}")]
    FetchPermanent {
        attempts: u32,
        #[source]
        error: FetchError,
    },

    #[error("Parse failure: {0}")]
    ParseFailure(#[from] ParseFailure),

    /// The job-level deadline elapsed.
    #[error("Job deadline exceeded during {stage}")]
    Timeout { stage: &'static str },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Maps this error onto the failure taxonomy recorded for jobs.
    pub fn kind(&self) -> FailureKind {
        match self {
            AppError::RateLimited { .. } => FailureKind::RateLimited,
            AppError::CircuitOpen { .. } => FailureKind::CircuitOpen,
            AppError::FetchTransient { .. } => FailureKind::FetchTransient,
            AppError::ParseFailure(_) => FailureKind::ParseFailure,
            AppError::Timeout { .. } => FailureKind::Timeout,
            AppError::FetchPermanent { .. }
            | AppError::InvalidRequest(_)
            | AppError::ConfigError(_)
            | AppError::StoreError(_)
            | AppError::SerializationError(_)
            | AppError::Generic(_) => FailureKind::FetchPermanent,
        }
    }

    /// Returns true if resubmitting the work later is worthwhile.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::RateLimited { .. }
            | AppError::CircuitOpen { .. }
            | AppError::FetchTransient { .. }
            | AppError::Timeout { .. } => true,
            _ => false,
        }
    }
}
