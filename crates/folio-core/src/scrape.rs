use tokio::time::Instant;

use crate::error::AppError;
use crate::job::{Job, JobStatus};
use crate::models::{BookRecord, compute_hash};
use crate::parse::ParseContext;
use crate::registry::DomainState;
use crate::retry::{AttemptEvent, RetryingFetcher, circuit_error};
use crate::traits::{Fetcher, Parser};

/// A job that produced a record.
#[derive(Debug, Clone)]
pub struct ScrapeSuccess {
    pub record: BookRecord,
    pub content_hash: String,
}

/// A job that failed, with the body hash when the fetch itself succeeded.
#[derive(Debug)]
pub struct ScrapeFailure {
    pub error: AppError,
    pub content_hash: Option<String>,
}

impl From<AppError> for ScrapeFailure {
    fn from(error: AppError) -> Self {
        Self {
            error,
            content_hash: None,
        }
    }
}

/// Runs one job end to end: breaker check → fetch with retries → parse → hash.
///
/// Generic over the transport and the parser so it can be driven by mocks in tests.
pub struct ScrapePipeline<F, P>
where
    F: Fetcher,
    P: Parser,
{
    fetcher: RetryingFetcher<F>,
    parser: P,
    confidence_threshold: f64,
}

impl<F, P> ScrapePipeline<F, P>
where
    F: Fetcher,
    P: Parser,
{
    pub fn new(fetcher: RetryingFetcher<F>, parser: P, confidence_threshold: f64) -> Self {
        Self {
            fetcher,
            parser,
            confidence_threshold,
        }
    }

    /// Processes an in-flight job against its domain until `deadline`.
    ///
    /// Attempt progress updates `job` (status, attempt counter) and is passed
    /// to `observe` together with the updated job.
    pub async fn run<O>(
        &self,
        job: &mut Job,
        domain: &DomainState,
        deadline: Instant,
        mut observe: O,
    ) -> Result<ScrapeSuccess, ScrapeFailure>
    where
        O: FnMut(&Job, AttemptEvent<'_>) + Send,
    {
        // Fail fast without spending a rate-limit token.
        if let Err(e) = domain.breaker.check() {
            tracing::debug!(job_id = %job.id, domain = %domain.domain, "Circuit open, skipping fetch");
            return Err(circuit_error(&domain.domain, e).into());
        }

        // 1. Fetch
        let url = job.url.clone();
        tracing::info!(job_id = %job.id, "Fetching {}", url);
        let response = self
            .fetcher
            .fetch(&url, domain, deadline, |event| {
                advance_status(job, &event);
                observe(job, event);
            })
            .await?;
        tracing::info!(
            job_id = %job.id,
            status = response.status,
            attempts = response.attempts,
            "Fetched {} bytes",
            response.body.len()
        );

        // 2. Hash
        let content_hash = compute_hash(&response.body);

        // 3. Parse
        let body = response.text();
        let ctx = ParseContext {
            source: job.source,
            url: &response.final_url,
            strategies: job.source.profile().strategies,
            confidence_threshold: self.confidence_threshold,
        };
        let parsed = self.parser.parse(&body, &ctx);

        if Instant::now() > deadline {
            return Err(ScrapeFailure {
                error: AppError::Timeout { stage: "parse" },
                content_hash: Some(content_hash),
            });
        }

        match parsed {
            Ok(record) => {
                tracing::info!(
                    job_id = %job.id,
                    strategy = %record.strategy,
                    confidence = record.confidence,
                    content_hash = %&content_hash[..8],
                    "Parsed \"{}\"",
                    record.title
                );
                Ok(ScrapeSuccess {
                    record,
                    content_hash,
                })
            }
            Err(failure) => Err(ScrapeFailure {
                error: AppError::ParseFailure(failure),
                content_hash: Some(content_hash),
            }),
        }
    }
}

fn advance_status(job: &mut Job, event: &AttemptEvent<'_>) {
    let result = match event {
        AttemptEvent::Started { .. } => {
            job.record_attempt();
            if job.status == JobStatus::Retrying {
                job.transition(JobStatus::InFlight)
            } else {
                Ok(())
            }
        }
        AttemptEvent::Backoff { .. } => job.transition(JobStatus::Retrying),
        AttemptEvent::Finished { .. } => Ok(()),
    };
    if let Err(e) = result {
        tracing::warn!(job_id = %job.id, error = %e, "Unexpected job status change");
    }
}
