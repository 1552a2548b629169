use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::AppError;
use crate::job::{Job, JobId, JobOutcome, JobRecord, JobStatus};
use crate::metrics::EngineMetrics;
use crate::models::{ScrapeRequest, Source};
use crate::queue::{PendingQueue, QueuedJob};
use crate::registry::{DomainRegistry, domain_of};
use crate::retry::RetryingFetcher;
use crate::scrape::ScrapePipeline;
use crate::traits::{Fetcher, Parser, ResultStore};
use crate::worker::{Worker, WorkerReporter};

const DROPPED_AT_SHUTDOWN: &str = "engine shut down before the job was dispatched";

/// State shared between the scheduler handle and its workers.
///
/// `active` holds every job that has not reached a terminal state yet; once a
/// job is terminal it lives in the result store only.
pub(crate) struct Shared<F, P, S>
where
    F: Fetcher,
    P: Parser,
    S: ResultStore,
{
    pub(crate) config: EngineConfig,
    pub(crate) queue: PendingQueue,
    pub(crate) registry: DomainRegistry,
    pub(crate) pipeline: ScrapePipeline<F, P>,
    pub(crate) store: S,
    pub(crate) metrics: EngineMetrics,
    active: RwLock<HashMap<JobId, Job>>,
    sequence: AtomicU64,
    idle: Notify,
}

impl<F, P, S> Shared<F, P, S>
where
    F: Fetcher,
    P: Parser,
    S: ResultStore,
{
    fn read_active(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.active.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job table");
            poisoned.into_inner()
        })
    }

    fn write_active(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.active.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job table");
            poisoned.into_inner()
        })
    }

    /// Marks a dequeued job in flight and hands the worker its own copy.
    pub(crate) fn begin_job(&self, id: JobId) -> Option<Job> {
        let mut active = self.write_active();
        let job = active.get_mut(&id)?;
        if let Err(e) = job.transition(JobStatus::InFlight) {
            tracing::warn!(job_id = %id, error = %e, "Cannot dispatch job");
            return None;
        }
        Some(job.clone())
    }

    /// Publishes the worker's view of a job so queries see attempt progress.
    pub(crate) fn mirror_job(&self, job: &Job) {
        if let Some(entry) = self.write_active().get_mut(&job.id) {
            *entry = job.clone();
        }
    }

    /// Stores a terminal record, then retires the job from the active table.
    pub(crate) async fn finish_job(&self, record: JobRecord) {
        let id = record.id();
        match &record.outcome {
            JobOutcome::Succeeded { .. } => {
                self.metrics.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            JobOutcome::Failed { kind, .. } => self.metrics.record_failure(*kind),
            JobOutcome::Dropped { .. } => {
                self.metrics.jobs_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Err(e) = self.store.insert(record).await {
            tracing::error!(job_id = %id, error = %e, "Failed to store job result");
        }
        self.forget_job(id);
    }

    pub(crate) fn forget_job(&self, id: JobId) {
        let mut active = self.write_active();
        active.remove(&id);
        if active.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

/// Bounded pool of workers draining a priority queue of scrape jobs.
///
/// Each worker processes one job at a time, so `concurrency` workers is the
/// global cap on jobs in progress. Jobs for the same domain share that
/// domain's rate limiter and circuit breaker through the [`DomainRegistry`].
pub struct JobScheduler<F, P, S>
where
    F: Fetcher,
    P: Parser,
    S: ResultStore,
{
    shared: Arc<Shared<F, P, S>>,
    cancel: CancellationToken,
    workers: Mutex<JoinSet<()>>,
    started: AtomicBool,
}

impl<F, P, S> JobScheduler<F, P, S>
where
    F: Fetcher + 'static,
    P: Parser + 'static,
    S: ResultStore + 'static,
{
    pub fn new(config: EngineConfig, fetcher: F, parser: P, store: S) -> Result<Self, AppError> {
        config.validate()?;

        let rates = config.clone();
        let registry = DomainRegistry::new(
            move |source| rates.rate_for(source),
            config.limiter.clone(),
            config.circuit_breaker.clone(),
        );
        let pipeline = ScrapePipeline::new(
            RetryingFetcher::new(fetcher, config.retry.clone(), config.attempt_timeout),
            parser,
            config.parse_confidence_threshold,
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                queue: PendingQueue::new(),
                registry,
                pipeline,
                store,
                metrics: EngineMetrics::new(),
                active: RwLock::new(HashMap::new()),
                sequence: AtomicU64::new(0),
                idle: Notify::new(),
            }),
            cancel: CancellationToken::new(),
            workers: Mutex::new(JoinSet::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Spawns the worker pool. Jobs submitted before this wait in the queue.
    pub fn start<WR>(&self, reporter: Arc<WR>) -> Result<(), AppError>
    where
        WR: WorkerReporter + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(AppError::InvalidRequest(
                "scheduler has been shut down".into(),
            ));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::InvalidRequest("scheduler already started".into()));
        }

        let concurrency = self.shared.config.concurrency;
        let mut workers = self.lock_workers();
        for i in 0..concurrency {
            let worker = Worker::new(format!("worker-{i}"), Arc::clone(&self.shared));
            workers.spawn(worker.run(self.cancel.clone(), Arc::clone(&reporter)));
        }
        tracing::info!(concurrency, "Scheduler started");
        Ok(())
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.workers.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned worker set");
            poisoned.into_inner()
        })
    }

    /// Expands a request into one pending job per URL.
    ///
    /// Every URL is validated first; a single malformed URL rejects the whole
    /// request and no job is created.
    pub fn submit(&self, request: ScrapeRequest) -> Result<Vec<JobId>, AppError> {
        if request.urls.is_empty() {
            return Err(AppError::InvalidRequest(
                "request contains no URLs".into(),
            ));
        }

        let domains = request
            .urls
            .iter()
            .map(|url| domain_of(url))
            .collect::<Result<Vec<_>, _>>()?;

        let first = self
            .shared
            .sequence
            .fetch_add(request.urls.len() as u64, Ordering::Relaxed);

        let jobs: Vec<Job> = request
            .urls
            .iter()
            .zip(domains)
            .enumerate()
            .map(|(i, (url, domain))| {
                let source = match request.source {
                    Source::Unknown => Source::detect(&domain),
                    tagged => tagged,
                };
                Job::new(
                    request.id,
                    url.as_str(),
                    domain,
                    source,
                    request.priority,
                    first + i as u64,
                )
            })
            .collect();

        let ids: Vec<JobId> = jobs.iter().map(|job| job.id).collect();
        let entries: Vec<QueuedJob> = jobs
            .iter()
            .map(|job| QueuedJob {
                id: job.id,
                priority: job.priority,
                sequence: job.sequence,
            })
            .collect();

        {
            // Shutdown cancels under this lock, so a request is either fully
            // queued before the final drain or refused.
            let mut active = self.shared.write_active();
            if self.cancel.is_cancelled() {
                return Err(AppError::InvalidRequest(
                    "scheduler is shutting down".into(),
                ));
            }
            active.extend(jobs.into_iter().map(|job| (job.id, job)));
            self.shared.queue.extend(entries);
        }

        let metrics = &self.shared.metrics;
        metrics.requests_submitted.fetch_add(1, Ordering::Relaxed);
        metrics
            .jobs_submitted
            .fetch_add(ids.len() as u64, Ordering::Relaxed);

        tracing::info!(
            request_id = %request.id,
            source = %request.source,
            priority = request.priority,
            jobs = ids.len(),
            "Request accepted"
        );
        Ok(ids)
    }

    /// A job that has not reached a terminal state yet.
    pub fn job(&self, id: JobId) -> Option<Job> {
        self.shared.read_active().get(&id).cloned()
    }

    /// Non-terminal jobs of one request.
    pub fn jobs_for_request(&self, request_id: Uuid) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .shared
            .read_active()
            .values()
            .filter(|job| job.request_id == request_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.sequence);
        jobs
    }

    pub fn pending_count(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn in_flight_count(&self) -> u64 {
        self.shared.metrics.in_flight()
    }

    pub fn store(&self) -> &S {
        &self.shared.store
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.shared.metrics
    }

    pub fn registry(&self) -> &DomainRegistry {
        &self.shared.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Resolves once no job is pending or in flight.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.shared.read_active().is_empty() {
                return;
            }
            idle.await;
        }
    }

    /// Stops the workers after their current job and drops everything still queued.
    ///
    /// Returns the number of dropped jobs.
    pub async fn shutdown(&self) -> Result<usize, AppError> {
        tracing::info!("Scheduler shutting down");
        {
            let _active = self.shared.write_active();
            self.cancel.cancel();
        }

        let mut workers = std::mem::replace(&mut *self.lock_workers(), JoinSet::new());
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }

        let leftover = self.shared.queue.drain();
        let mut dropped = 0;
        for entry in leftover {
            let Some(job) = self.shared.read_active().get(&entry.id).cloned() else {
                continue;
            };
            match JobRecord::dropped(job, DROPPED_AT_SHUTDOWN) {
                Ok(record) => {
                    self.shared.finish_job(record).await;
                    dropped += 1;
                }
                Err(e) => {
                    tracing::error!(job_id = %entry.id, error = %e, "Cannot drop job");
                    self.shared.forget_job(entry.id);
                }
            }
        }

        tracing::info!(dropped, "Scheduler stopped");
        Ok(dropped)
    }
}
