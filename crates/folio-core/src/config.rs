use std::collections::BTreeMap;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::AppError;
use crate::models::Source;
use crate::rate_limiter::{LimiterTuning, RateLimitConfig};
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; FolioBot/0.1; +https://github.com/folio-rs/folio)";

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker tasks, and so the cap on jobs processed at once.
    pub concurrency: usize,
    /// Budget for one job from dispatch to terminal state.
    pub job_timeout: Duration,
    /// Budget for a single HTTP attempt.
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub limiter: LimiterTuning,
    /// Per-source overrides of the built-in rate table.
    pub source_rates: BTreeMap<Source, RateLimitConfig>,
    pub parse_confidence_threshold: f64,
    /// Cap on simultaneously open HTTP connections.
    pub max_connections: usize,
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            job_timeout: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            limiter: LimiterTuning::default(),
            source_rates: BTreeMap::new(),
            parse_confidence_threshold: 0.5,
            max_connections: 100,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl EngineConfig {
    /// Rate limits for a source: the configured override, else the built-in table.
    pub fn rate_for(&self, source: Source) -> RateLimitConfig {
        self.source_rates
            .get(&source)
            .copied()
            .unwrap_or(source.profile().rate)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn with_limiter(mut self, tuning: LimiterTuning) -> Self {
        self.limiter = tuning;
        self
    }

    pub fn with_source_rate(mut self, source: Source, rate: RateLimitConfig) -> Self {
        self.source_rates.insert(source, rate);
        self
    }

    pub fn with_parse_threshold(mut self, threshold: f64) -> Self {
        self.parse_confidence_threshold = threshold;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 {
            return Err(AppError::ConfigError("concurrency must be at least 1".into()));
        }
        if self.job_timeout.is_zero() || self.attempt_timeout.is_zero() {
            return Err(AppError::ConfigError("timeouts must be non-zero".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::ConfigError("max_attempts must be at least 1".into()));
        }
        if self.retry.base_backoff > self.retry.max_backoff {
            return Err(AppError::ConfigError(
                "base_backoff must not exceed max_backoff".into(),
            ));
        }
        let cb = &self.circuit_breaker;
        if !(cb.failure_threshold > 0.0 && cb.failure_threshold <= 1.0) {
            return Err(AppError::ConfigError(
                "circuit breaker failure_threshold must be in (0, 1]".into(),
            ));
        }
        if cb.window_size == 0 || cb.minimum_requests == 0 || cb.minimum_requests > cb.window_size
        {
            return Err(AppError::ConfigError(
                "circuit breaker needs 1 <= minimum_requests <= window_size".into(),
            ));
        }
        if cb.half_open_probes == 0 {
            return Err(AppError::ConfigError(
                "circuit breaker half_open_probes must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.parse_confidence_threshold) {
            return Err(AppError::ConfigError(
                "parse confidence threshold must be in [0, 1]".into(),
            ));
        }
        let limiter = &self.limiter;
        if !(limiter.decrease_factor > 0.0 && limiter.decrease_factor < 1.0) {
            return Err(AppError::ConfigError(
                "limiter decrease_factor must be in (0, 1)".into(),
            ));
        }
        if !(limiter.min_rate > 0.0 && limiter.increase_step > 0.0) {
            return Err(AppError::ConfigError(
                "limiter min_rate and increase_step must be positive".into(),
            ));
        }
        if limiter.throttle_trigger == 0 || limiter.recovery_successes == 0 {
            return Err(AppError::ConfigError(
                "limiter throttle_trigger and recovery_successes must be at least 1".into(),
            ));
        }
        if self.limiter.jitter_min > self.limiter.jitter_max {
            return Err(AppError::ConfigError(
                "jitter_min must not exceed jitter_max".into(),
            ));
        }
        for (source, rate) in &self.source_rates {
            if rate.refill_rate <= 0.0 || rate.burst == 0 {
                return Err(AppError::ConfigError(format!(
                    "rate for {source} must have a positive refill rate and burst"
                )));
            }
        }
        if self.max_connections == 0 {
            return Err(AppError::ConfigError(
                "max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Read configuration from environment variables.
    ///
    /// Every variable is optional; unset ones keep their defaults.
    ///
    /// - `FOLIO_CONCURRENCY`
    /// - `FOLIO_JOB_TIMEOUT_SECS`, `FOLIO_ATTEMPT_TIMEOUT_SECS`
    /// - `FOLIO_MAX_ATTEMPTS`, `FOLIO_BASE_BACKOFF_MS`, `FOLIO_MAX_BACKOFF_MS`
    /// - `FOLIO_CB_FAILURE_THRESHOLD`, `FOLIO_CB_WINDOW_SIZE`, `FOLIO_CB_MIN_REQUESTS`,
    ///   `FOLIO_CB_OPEN_SECS`, `FOLIO_CB_PROBES`
    /// - `FOLIO_PARSE_THRESHOLD`, `FOLIO_MAX_CONNECTIONS`, `FOLIO_USER_AGENT`
    /// - `FOLIO_RATE_<SOURCE>` as `<rate>:<burst>`, e.g. `FOLIO_RATE_GOODREADS=1.5:2`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads from an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "FOLIO_CONCURRENCY")? {
            config.concurrency = v;
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_JOB_TIMEOUT_SECS")? {
            config.job_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_ATTEMPT_TIMEOUT_SECS")? {
            config.attempt_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_BASE_BACKOFF_MS")? {
            config.retry.base_backoff = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_MAX_BACKOFF_MS")? {
            config.retry.max_backoff = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_CB_FAILURE_THRESHOLD")? {
            config.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_CB_WINDOW_SIZE")? {
            config.circuit_breaker.window_size = v;
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_CB_MIN_REQUESTS")? {
            config.circuit_breaker.minimum_requests = v;
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_CB_OPEN_SECS")? {
            config.circuit_breaker.open_duration = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_CB_PROBES")? {
            config.circuit_breaker.half_open_probes = v;
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_PARSE_THRESHOLD")? {
            config.parse_confidence_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "FOLIO_MAX_CONNECTIONS")? {
            config.max_connections = v;
        }
        if let Some(v) = lookup("FOLIO_USER_AGENT").filter(|v| !v.trim().is_empty()) {
            config.user_agent = v;
        }

        for source in Source::ALL {
            let key = format!("FOLIO_RATE_{}", source.as_str().to_uppercase());
            if let Some(raw) = lookup(&key) {
                config.source_rates.insert(source, parse_rate(&key, &raw)?);
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::ConfigError(format!("Invalid {key} '{raw}'"))),
    }
}

fn parse_rate(key: &str, raw: &str) -> Result<RateLimitConfig, AppError> {
    let invalid = || {
        AppError::ConfigError(format!(
            "Invalid {key} '{raw}': expected <rate>:<burst>, e.g. 2.0:3"
        ))
    };
    let (rate, burst) = raw.trim().split_once(':').ok_or_else(invalid)?;
    let rate: f64 = rate.trim().parse().map_err(|_| invalid())?;
    let burst: u32 = burst.trim().parse().map_err(|_| invalid())?;
    Ok(RateLimitConfig::new(rate, burst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.parse_confidence_threshold, 0.5);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_rate_for_uses_table_then_override() {
        let config = EngineConfig::default();
        assert_eq!(config.rate_for(Source::OpenLibrary), RateLimitConfig::new(8.0, 10));

        let config = config.with_source_rate(Source::OpenLibrary, RateLimitConfig::new(1.0, 1));
        assert_eq!(config.rate_for(Source::OpenLibrary), RateLimitConfig::new(1.0, 1));
        assert_eq!(config.rate_for(Source::Amazon), RateLimitConfig::new(1.0, 2));
    }

    #[test]
    fn test_from_lookup_reads_values() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("FOLIO_CONCURRENCY", "4"),
            ("FOLIO_MAX_ATTEMPTS", "5"),
            ("FOLIO_CB_FAILURE_THRESHOLD", "0.25"),
            ("FOLIO_RATE_GOODREADS", "1.5:2"),
            ("FOLIO_USER_AGENT", "test-agent"),
        ]))
        .unwrap();

        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.circuit_breaker.failure_threshold, 0.25);
        assert_eq!(config.rate_for(Source::Goodreads), RateLimitConfig::new(1.5, 2));
        assert_eq!(config.user_agent, "test-agent");
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = EngineConfig::from_lookup(lookup(&[("FOLIO_CONCURRENCY", "lots")])).unwrap_err();
        assert!(err.to_string().contains("FOLIO_CONCURRENCY"));

        let err =
            EngineConfig::from_lookup(lookup(&[("FOLIO_RATE_AMAZON", "fast")])).unwrap_err();
        assert!(err.to_string().contains("<rate>:<burst>"));

        assert!(EngineConfig::from_lookup(lookup(&[("FOLIO_CONCURRENCY", "0")])).is_err());
    }

    #[test]
    fn test_validate_catches_inconsistent_breaker() {
        let config = EngineConfig::default().with_circuit_breaker(CircuitBreakerConfig {
            minimum_requests: 50,
            window_size: 10,
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_limiter_that_can_stall() {
        let stalled = EngineConfig::default().with_limiter(LimiterTuning {
            decrease_factor: 0.0,
            min_rate: 0.0,
            ..LimiterTuning::default()
        });
        assert!(matches!(stalled.validate(), Err(AppError::ConfigError(_))));

        for tuning in [
            LimiterTuning {
                decrease_factor: 1.0,
                ..LimiterTuning::default()
            },
            LimiterTuning {
                min_rate: 0.0,
                ..LimiterTuning::default()
            },
            LimiterTuning {
                increase_step: 0.0,
                ..LimiterTuning::default()
            },
            LimiterTuning {
                throttle_trigger: 0,
                ..LimiterTuning::default()
            },
            LimiterTuning {
                recovery_successes: 0,
                ..LimiterTuning::default()
            },
        ] {
            assert!(EngineConfig::default().with_limiter(tuning).validate().is_err());
        }
    }
}
