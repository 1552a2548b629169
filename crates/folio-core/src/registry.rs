use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use url::Url;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::AppError;
use crate::models::Source;
use crate::rate_limiter::{LimiterTuning, RateLimitConfig, TokenBucket};

/// Mutable per-domain state shared by every worker.
///
/// The bucket and the breaker each sit behind their own lock, so two workers
/// hitting different domains never contend.
#[derive(Debug)]
pub struct DomainState {
    pub domain: String,
    pub source: Source,
    pub limiter: TokenBucket,
    pub breaker: CircuitBreaker,
}

impl DomainState {
    pub fn new(
        domain: impl Into<String>,
        source: Source,
        rate: RateLimitConfig,
        tuning: LimiterTuning,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let domain = domain.into();
        Self {
            limiter: TokenBucket::new(domain.clone(), rate, tuning),
            breaker: CircuitBreaker::new(domain.clone(), breaker),
            domain,
            source,
        }
    }
}

type RateFn = dyn Fn(Source) -> RateLimitConfig + Send + Sync;

/// Owns one [`DomainState`] per domain, created on first use and kept for the
/// life of the process.
pub struct DomainRegistry {
    domains: RwLock<HashMap<String, Arc<DomainState>>>,
    rate_for: Box<RateFn>,
    tuning: LimiterTuning,
    breaker: CircuitBreakerConfig,
}

impl DomainRegistry {
    pub fn new(
        rate_for: impl Fn(Source) -> RateLimitConfig + Send + Sync + 'static,
        tuning: LimiterTuning,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        Self {
            domains: RwLock::new(HashMap::new()),
            rate_for: Box::new(rate_for),
            tuning,
            breaker,
        }
    }

    /// Returns the state for `domain`, creating it with the source's rate on first use.
    ///
    /// A domain keeps the rate of the source that first touched it.
    pub fn get_or_create(&self, domain: &str, source: Source) -> Arc<DomainState> {
        if let Some(state) = self.get(domain) {
            return state;
        }

        let mut domains = self.domains.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned domain registry lock");
            poisoned.into_inner()
        });
        domains
            .entry(domain.to_string())
            .or_insert_with(|| {
                tracing::debug!(%domain, %source, "Registering domain");
                Arc::new(DomainState::new(
                    domain,
                    source,
                    (self.rate_for)(source),
                    self.tuning.clone(),
                    self.breaker.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, domain: &str) -> Option<Arc<DomainState>> {
        self.domains
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(domain)
            .cloned()
    }

    /// All registered domains, sorted by name.
    pub fn snapshot(&self) -> Vec<Arc<DomainState>> {
        let mut states: Vec<_> = self
            .domains
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        states.sort_by(|a, b| a.domain.cmp(&b.domain));
        states
    }

    pub fn len(&self) -> usize {
        self.domains
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extracts the lowercased host of an http(s) URL.
pub fn domain_of(url: &str) -> Result<String, AppError> {
    let parsed = Url::parse(url)
        .map_err(|e| AppError::InvalidRequest(format!("malformed URL '{url}': {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::InvalidRequest(format!(
            "unsupported scheme '{}' in '{url}'",
            parsed.scheme()
        )));
    }

    parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_lowercase())
        .ok_or_else(|| AppError::InvalidRequest(format!("URL '{url}' has no host")))
}
