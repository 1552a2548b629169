pub mod circuit_breaker;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod metrics;
pub mod models;
pub mod parse;
pub mod queue;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod scrape;
pub mod store;
pub mod traits;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::EngineConfig;
pub use engine::{Engine, Query, QueryResult, StatsSnapshot};
pub use error::{AppError, FailureKind, FetchError};
pub use job::{BatchStatus, Job, JobId, JobOutcome, JobRecord, JobStatus};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use models::{BookRecord, FetchResponse, ScrapeRequest, Source, compute_hash};
pub use parse::{DeclineReason, ParseContext, ParseFailure, StrategyKind};
pub use rate_limiter::{LimiterTuning, RateLimitConfig, TokenBucket};
pub use registry::{DomainRegistry, DomainState};
pub use retry::RetryPolicy;
pub use scheduler::JobScheduler;
pub use store::{MemoryResultStore, ResultFilter, StoreStats};
pub use traits::{Fetcher, NullStore, Parser, ResultStore};
pub use worker::{TracingWorkerReporter, WorkerEvent, WorkerReporter};
