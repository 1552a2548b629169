//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` or atomics for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{AppError, FetchError};
use crate::job::{Job, JobId, JobRecord, JobStatus};
use crate::models::{BookRecord, FetchResponse, Source};
use crate::parse::{ParseContext, ParseFailure, StrategyKind};
use crate::store::{MemoryResultStore, ResultFilter, StoreStats};
use crate::traits::{Fetcher, Parser, ResultStore};
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that replays scripted responses.
///
/// Each call pops the first scripted response; once the script runs out every
/// call returns the default page.
#[derive(Clone)]
pub struct MockFetcher {
    responses: Arc<Mutex<VecDeque<Result<FetchResponse, FetchError>>>>,
    default_body: Arc<String>,
    delay: Duration,
    calls: Arc<Mutex<Vec<(String, Instant)>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            default_body: Arc::new(html.to_string()),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_responses(responses: Vec<Result<FetchResponse, FetchError>>) -> Self {
        let fetcher = Self::new("<html><body>default</body></html>");
        fetcher.responses.lock().unwrap().extend(responses);
        fetcher
    }

    /// Every call takes `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// A 200 response carrying `html`.
    pub fn page(html: &str) -> FetchResponse {
        FetchResponse {
            status: 200,
            final_url: "https://example.com/".to_string(),
            body: html.as_bytes().to_vec(),
            elapsed: Duration::from_millis(5),
            attempts: 1,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// URL and start instant of every call, in call order.
    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchResponse, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.responses.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| {
            let mut page = Self::page(&self.default_body);
            page.final_url = url.to_string();
            Ok(page)
        });

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn status_error(status: u16) -> FetchError {
    FetchError::Status {
        status,
        url: "https://example.com/".to_string(),
    }
}

// ---------------------------------------------------------------------------
// MockParser
// ---------------------------------------------------------------------------

/// Mock parser returning a fixed record or a fixed failure.
#[derive(Clone)]
pub struct MockParser {
    result: Arc<Result<BookRecord, ParseFailure>>,
    contexts: Arc<Mutex<Vec<(Source, Vec<StrategyKind>)>>>,
}

impl MockParser {
    pub fn titled(title: &str) -> Self {
        Self {
            result: Arc::new(Ok(make_test_record(title))),
            contexts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(failure: ParseFailure) -> Self {
        Self {
            result: Arc::new(Err(failure)),
            contexts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Source and strategy order of every parse call.
    pub fn contexts(&self) -> Vec<(Source, Vec<StrategyKind>)> {
        self.contexts.lock().unwrap().clone()
    }
}

impl Parser for MockParser {
    fn parse(&self, _body: &str, ctx: &ParseContext<'_>) -> Result<BookRecord, ParseFailure> {
        self.contexts
            .lock()
            .unwrap()
            .push((ctx.source, ctx.strategies.to_vec()));
        match self.result.as_ref() {
            Ok(record) => Ok(BookRecord {
                source: ctx.source,
                source_url: ctx.url.to_string(),
                ..record.clone()
            }),
            Err(failure) => Err(failure.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records a short label per event.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match event {
            WorkerEvent::Started { .. } => "started",
            WorkerEvent::JobStarted { .. } => "job_started",
            WorkerEvent::JobRetrying { .. } => "job_retrying",
            WorkerEvent::JobSucceeded { .. } => "job_succeeded",
            WorkerEvent::JobFailed { .. } => "job_failed",
            WorkerEvent::ShuttingDown { .. } => "shutting_down",
            WorkerEvent::Stopped { .. } => "stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// SlowReadStore
// ---------------------------------------------------------------------------

/// In-memory store whose reads answer from the moment they were issued but
/// only return after `delay`, so a job can finish while a read is pending.
#[derive(Clone)]
pub struct SlowReadStore {
    inner: MemoryResultStore,
    delay: Duration,
}

impl SlowReadStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryResultStore::new(),
            delay,
        }
    }
}

impl ResultStore for SlowReadStore {
    async fn insert(&self, record: JobRecord) -> Result<(), AppError> {
        self.inner.insert(record).await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, AppError> {
        let found = self.inner.get(id).await;
        tokio::time::sleep(self.delay).await;
        found
    }

    async fn list(&self, filter: &ResultFilter) -> Result<Vec<JobRecord>, AppError> {
        let found = self.inner.list(filter).await;
        tokio::time::sleep(self.delay).await;
        found
    }

    async fn clear(&self, filter: &ResultFilter) -> Result<usize, AppError> {
        self.inner.clear(filter).await
    }

    async fn stats(&self) -> Result<StoreStats, AppError> {
        self.inner.stats().await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn make_test_job(url: &str) -> Job {
    let domain = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "example.com".to_string());
    Job::new(Uuid::new_v4(), url, domain.clone(), Source::detect(&domain), 5, 0)
}

pub fn make_test_record(title: &str) -> BookRecord {
    BookRecord {
        title: title.to_string(),
        authors: vec!["Frank Herbert".to_string()],
        isbn: Some("9780441172719".to_string()),
        rating: Some(4.25),
        page_count: Some(412),
        publication_date: None,
        source: Source::Unknown,
        source_url: "https://example.com/".to_string(),
        confidence: 0.9,
        strategy: StrategyKind::JsonLd,
        raw_fields: BTreeMap::new(),
    }
}

pub fn succeeded_record(url: &str, source: Source) -> JobRecord {
    let mut job = make_test_job(url);
    job.source = source;
    job.transition(JobStatus::InFlight).unwrap();
    let record = BookRecord {
        source,
        source_url: url.to_string(),
        ..make_test_record("Dune")
    };
    JobRecord::succeeded(job, record, 120, "0".repeat(64)).unwrap()
}

pub fn failed_record(url: &str, source: Source) -> JobRecord {
    let mut job = make_test_job(url);
    job.source = source;
    job.transition(JobStatus::InFlight).unwrap();
    JobRecord::failed(
        job,
        &AppError::FetchPermanent {
            attempts: 1,
            error: status_error(404),
        },
        80,
        None,
    )
    .unwrap()
}
