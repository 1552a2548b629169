//! In-memory result store and the filter/statistics types shared by all stores.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{JobId, JobRecord, JobStatus};
use crate::models::Source;
use crate::traits::ResultStore;

/// Completed jobs considered by the rolling latency average.
pub const LATENCY_WINDOW: usize = 100;

/// Selects records for listing or clearing. The default matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultFilter {
    pub source: Option<Source>,
    pub status: Option<JobStatus>,
    pub request_id: Option<Uuid>,
    pub completed_after: Option<DateTime<Utc>>,
    pub completed_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ResultFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_request(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn completed_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.completed_after = after;
        self.completed_before = before;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &JobRecord) -> bool {
        let job = &record.job;
        if self.source.is_some_and(|s| s != job.source)
            || self.status.is_some_and(|s| s != job.status)
            || self.request_id.is_some_and(|r| r != job.request_id)
        {
            return false;
        }
        match job.completed_at {
            Some(at) => {
                self.completed_after.is_none_or(|after| at >= after)
                    && self.completed_before.is_none_or(|before| at < before)
            }
            None => self.completed_after.is_none() && self.completed_before.is_none(),
        }
    }
}

/// Success counts for one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceStats {
    pub succeeded: u64,
    pub failed: u64,
    /// `succeeded / (succeeded + failed)`, or 0 when nothing completed.
    pub success_rate: f64,
}

/// Aggregates over the stored records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dropped: u64,
    pub by_source: BTreeMap<Source, SourceStats>,
    /// Mean latency of the most recent completed jobs.
    pub avg_latency_ms: Option<f64>,
}

impl StoreStats {
    /// Derives statistics from a set of records.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a JobRecord>) -> Self {
        let mut stats = StoreStats::default();
        let mut completed: Vec<(DateTime<Utc>, u64)> = Vec::new();

        for record in records {
            stats.total += 1;
            let source = stats.by_source.entry(record.job.source).or_default();
            match record.status() {
                JobStatus::Succeeded => {
                    stats.succeeded += 1;
                    source.succeeded += 1;
                }
                JobStatus::Failed => {
                    stats.failed += 1;
                    source.failed += 1;
                }
                JobStatus::Dropped => stats.dropped += 1,
                _ => {}
            }
            if record.status().is_completed()
                && let Some(at) = record.job.completed_at
            {
                completed.push((at, record.latency_ms));
            }
        }

        for source in stats.by_source.values_mut() {
            let done = source.succeeded + source.failed;
            if done > 0 {
                source.success_rate = source.succeeded as f64 / done as f64;
            }
        }

        completed.sort_by(|a, b| b.0.cmp(&a.0));
        let recent = &completed[..completed.len().min(LATENCY_WINDOW)];
        if !recent.is_empty() {
            let sum: u64 = recent.iter().map(|(_, ms)| ms).sum();
            stats.avg_latency_ms = Some(sum as f64 / recent.len() as f64);
        }

        stats
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<JobId, JobRecord>,
    by_request: HashMap<Uuid, Vec<JobId>>,
}

/// Process-local [`ResultStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryResultStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned result store lock");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned result store lock");
            poisoned.into_inner()
        })
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(inner: &StoreInner, filter: &ResultFilter) -> Vec<JobRecord> {
        let candidates: Box<dyn Iterator<Item = &JobRecord> + '_> = match filter.request_id {
            Some(request_id) => Box::new(
                inner
                    .by_request
                    .get(&request_id)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| inner.records.get(id)),
            ),
            None => Box::new(inner.records.values()),
        };

        let mut matched: Vec<JobRecord> = candidates
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.job
                .completed_at
                .cmp(&b.job.completed_at)
                .then(a.job.sequence.cmp(&b.job.sequence))
        });
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }
}

impl ResultStore for MemoryResultStore {
    async fn insert(&self, record: JobRecord) -> Result<(), AppError> {
        if !record.status().is_terminal() {
            return Err(AppError::StoreError(format!(
                "job {} is {}, only terminal jobs are stored",
                record.id(),
                record.status()
            )));
        }

        let mut inner = self.write();
        let id = record.id();
        if inner.records.contains_key(&id) {
            return Err(AppError::StoreError(format!("job {id} already stored")));
        }
        inner
            .by_request
            .entry(record.job.request_id)
            .or_default()
            .push(id);
        inner.records.insert(id, record);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, AppError> {
        Ok(self.read().records.get(&id).cloned())
    }

    async fn list(&self, filter: &ResultFilter) -> Result<Vec<JobRecord>, AppError> {
        Ok(Self::select(&self.read(), filter))
    }

    async fn clear(&self, filter: &ResultFilter) -> Result<usize, AppError> {
        let mut inner = self.write();

        if *filter == ResultFilter::default() {
            let removed = inner.records.len();
            inner.records.clear();
            inner.by_request.clear();
            return Ok(removed);
        }

        let doomed: Vec<JobRecord> = Self::select(&inner, filter);
        for record in &doomed {
            inner.records.remove(&record.id());
            if let Some(ids) = inner.by_request.get_mut(&record.job.request_id) {
                ids.retain(|id| *id != record.id());
                if ids.is_empty() {
                    inner.by_request.remove(&record.job.request_id);
                }
            }
        }
        tracing::debug!(removed = doomed.len(), "Cleared stored results");
        Ok(doomed.len())
    }

    async fn stats(&self) -> Result<StoreStats, AppError> {
        Ok(StoreStats::from_records(self.read().records.values()))
    }
}
