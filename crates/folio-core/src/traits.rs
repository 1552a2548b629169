use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, FetchError};
use crate::job::{JobId, JobRecord};
use crate::models::{BookRecord, FetchResponse};
use crate::parse::{ParseContext, ParseFailure};
use crate::store::{ResultFilter, StoreStats};

/// Performs exactly one HTTP GET. Retries live in
/// [`RetryingFetcher`](crate::retry::RetryingFetcher), not here.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}

/// Turns a fetched page into a book record.
///
/// Implementations must be deterministic: the same body and context always
/// produce the same result.
pub trait Parser: Send + Sync + Clone {
    fn parse(&self, body: &str, ctx: &ParseContext<'_>) -> Result<BookRecord, ParseFailure>;
}

/// Keyed store of terminal job records.
pub trait ResultStore: Send + Sync + Clone {
    /// Stores a terminal record. Writing the same job id twice is an error.
    fn insert(&self, record: JobRecord) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get(&self, id: JobId) -> impl Future<Output = Result<Option<JobRecord>, AppError>> + Send;

    /// Records matching the filter, oldest completion first.
    fn list(
        &self,
        filter: &ResultFilter,
    ) -> impl Future<Output = Result<Vec<JobRecord>, AppError>> + Send;

    /// Removes matching records and returns how many were removed.
    fn clear(&self, filter: &ResultFilter) -> impl Future<Output = Result<usize, AppError>> + Send;

    fn stats(&self) -> impl Future<Output = Result<StoreStats, AppError>> + Send;
}

/// A no-op ResultStore for use when results are consumed through events only.
#[derive(Debug, Clone)]
pub struct NullStore;

impl ResultStore for NullStore {
    async fn insert(&self, _record: JobRecord) -> Result<(), AppError> {
        Ok(())
    }

    async fn get(&self, _id: JobId) -> Result<Option<JobRecord>, AppError> {
        Ok(None)
    }

    async fn list(&self, _filter: &ResultFilter) -> Result<Vec<JobRecord>, AppError> {
        Ok(vec![])
    }

    async fn clear(&self, _filter: &ResultFilter) -> Result<usize, AppError> {
        Ok(0)
    }

    async fn stats(&self) -> Result<StoreStats, AppError> {
        Ok(StoreStats::default())
    }
}
