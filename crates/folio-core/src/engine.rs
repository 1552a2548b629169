//! The collaborator-facing API: submit requests, query jobs and batches,
//! read statistics and clear stored results.
//!
//! ```rust,no_run
//! # async fn demo<F, P>(fetcher: F, parser: P) -> Result<(), folio_core::AppError>
//! # where F: folio_core::Fetcher + 'static, P: folio_core::Parser + 'static {
//! use folio_core::{Engine, EngineConfig, MemoryResultStore, Query, ScrapeRequest, Source};
//!
//! let engine = Engine::new(EngineConfig::default(), fetcher, parser, MemoryResultStore::new())?;
//! engine.start()?;
//! let ids = engine.submit(ScrapeRequest::single(
//!     "https://www.goodreads.com/book/show/3",
//!     Source::Goodreads,
//! ))?;
//! engine.wait_idle().await;
//! let result = engine.query(Query::Job(ids[0])).await?;
//! # let _ = result;
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::AppError;
use crate::job::{BatchStatus, Job, JobId, JobRecord};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::models::{ScrapeRequest, Source};
use crate::scheduler::JobScheduler;
use crate::store::{ResultFilter, SourceStats};
use crate::traits::{Fetcher, Parser, ResultStore};
use crate::worker::{TracingWorkerReporter, WorkerReporter};

/// What to look up.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Job(JobId),
    Batch(Uuid),
    Filter(ResultFilter),
}

/// Answer to a [`Query`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryResult {
    /// The job is still pending, in flight or retrying.
    Active(Job),
    /// The job reached a terminal state.
    Finished(JobRecord),
    Batch(BatchStatus),
    Records(Vec<JobRecord>),
    NotFound,
}

/// Engine-wide statistics, derived on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub requests_submitted: u64,
    pub jobs_submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dropped: u64,
    pub pending: u64,
    pub in_flight: u64,
    pub per_source: BTreeMap<Source, SourceStats>,
    /// Mean latency over the most recent completed jobs.
    pub avg_latency_ms: Option<f64>,
}

/// Scheduler plus result store behind a single handle.
pub struct Engine<F, P, S>
where
    F: Fetcher,
    P: Parser,
    S: ResultStore,
{
    scheduler: JobScheduler<F, P, S>,
}

impl<F, P, S> Engine<F, P, S>
where
    F: Fetcher + 'static,
    P: Parser + 'static,
    S: ResultStore + 'static,
{
    pub fn new(config: EngineConfig, fetcher: F, parser: P, store: S) -> Result<Self, AppError> {
        Ok(Self {
            scheduler: JobScheduler::new(config, fetcher, parser, store)?,
        })
    }

    /// Starts the workers, logging their lifecycle through `tracing`.
    pub fn start(&self) -> Result<(), AppError> {
        self.start_with_reporter(Arc::new(TracingWorkerReporter))
    }

    pub fn start_with_reporter<WR>(&self, reporter: Arc<WR>) -> Result<(), AppError>
    where
        WR: WorkerReporter + 'static,
    {
        self.scheduler.start(reporter)
    }

    pub fn submit(&self, request: ScrapeRequest) -> Result<Vec<JobId>, AppError> {
        self.scheduler.submit(request)
    }

    pub async fn query(&self, query: Query) -> Result<QueryResult, AppError> {
        match query {
            Query::Job(id) => {
                // Active table first: a job leaves it only after its record is stored.
                if let Some(job) = self.scheduler.job(id) {
                    return Ok(QueryResult::Active(job));
                }
                Ok(self
                    .scheduler
                    .store()
                    .get(id)
                    .await?
                    .map_or(QueryResult::NotFound, QueryResult::Finished))
            }
            Query::Batch(request_id) => {
                let mut statuses: BTreeMap<JobId, _> = self
                    .scheduler
                    .jobs_for_request(request_id)
                    .into_iter()
                    .map(|job| (job.id, job.status))
                    .collect();
                let stored = self
                    .scheduler
                    .store()
                    .list(&ResultFilter::all().with_request(request_id))
                    .await?;
                statuses.extend(stored.iter().map(|record| (record.id(), record.status())));

                if statuses.is_empty() {
                    return Ok(QueryResult::NotFound);
                }
                Ok(QueryResult::Batch(BatchStatus::from_statuses(
                    request_id,
                    statuses.into_values(),
                )))
            }
            Query::Filter(filter) => Ok(QueryResult::Records(
                self.scheduler.store().list(&filter).await?,
            )),
        }
    }

    pub async fn stats(&self) -> Result<StatsSnapshot, AppError> {
        let store = self.scheduler.store().stats().await?;
        let metrics = self.scheduler.metrics();
        Ok(StatsSnapshot {
            requests_submitted: metrics.requests_submitted.load(Ordering::Relaxed),
            jobs_submitted: metrics.jobs_submitted.load(Ordering::Relaxed),
            succeeded: store.succeeded,
            failed: store.failed,
            dropped: store.dropped,
            pending: self.scheduler.pending_count() as u64,
            in_flight: self.scheduler.in_flight_count(),
            per_source: store.by_source,
            avg_latency_ms: store.avg_latency_ms,
        })
    }

    /// Removes stored results matching `filter`; the default filter removes all.
    pub async fn clear(&self, filter: &ResultFilter) -> Result<usize, AppError> {
        let removed = self.scheduler.store().clear(filter).await?;
        tracing::info!(removed, "Cleared stored results");
        Ok(removed)
    }

    pub fn metrics(&self) -> &EngineMetrics {
        self.scheduler.metrics()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.scheduler
            .metrics()
            .snapshot(self.scheduler.pending_count(), self.scheduler.registry())
    }

    pub fn config(&self) -> &EngineConfig {
        self.scheduler.config()
    }

    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Stops the workers and drops queued jobs; returns how many were dropped.
    pub async fn shutdown(&self) -> Result<usize, AppError> {
        self.scheduler.shutdown().await
    }
}
