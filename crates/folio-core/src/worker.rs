use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::FailureKind;
use crate::job::{JobId, JobRecord};
use crate::parse::StrategyKind;
use crate::queue::QueuedJob;
use crate::retry::AttemptEvent;
use crate::scheduler::Shared;
use crate::traits::{Fetcher, Parser, ResultStore};

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    JobStarted {
        job_id: JobId,
        url: &'a str,
    },
    JobRetrying {
        job_id: JobId,
        attempt: u32,
        delay: Duration,
        error: &'a str,
    },
    JobSucceeded {
        job_id: JobId,
        strategy: StrategyKind,
        confidence: f64,
    },
    JobFailed {
        job_id: JobId,
        kind: FailureKind,
        error: &'a str,
    },
    ShuttingDown {
        worker_id: &'a str,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::JobStarted { job_id, url } => {
                tracing::info!(%job_id, %url, "Processing job");
            }
            WorkerEvent::JobRetrying {
                job_id,
                attempt,
                delay,
                error,
            } => {
                tracing::info!(%job_id, attempt, delay_ms = %delay.as_millis(), %error, "Job retrying");
            }
            WorkerEvent::JobSucceeded {
                job_id,
                strategy,
                confidence,
            } => {
                tracing::info!(%job_id, %strategy, confidence, "Job succeeded");
            }
            WorkerEvent::JobFailed {
                job_id,
                kind,
                error,
            } => {
                tracing::warn!(%job_id, %kind, %error, "Job failed");
            }
            WorkerEvent::ShuttingDown { worker_id } => {
                tracing::info!(%worker_id, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// One worker task: pulls jobs from the shared queue until cancelled.
pub(crate) struct Worker<F, P, S>
where
    F: Fetcher,
    P: Parser,
    S: ResultStore,
{
    worker_id: String,
    shared: Arc<Shared<F, P, S>>,
}

impl<F, P, S> Worker<F, P, S>
where
    F: Fetcher,
    P: Parser,
    S: ResultStore,
{
    pub(crate) fn new(worker_id: String, shared: Arc<Shared<F, P, S>>) -> Self {
        Self { worker_id, shared }
    }

    /// Run the worker loop until cancellation. The job in hand is always
    /// finished before the worker stops.
    pub(crate) async fn run<WR: WorkerReporter>(
        self,
        cancel_token: CancellationToken,
        reporter: Arc<WR>,
    ) {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.worker_id,
        });

        while let Some(entry) = self.shared.queue.next(&cancel_token).await {
            self.process_job(entry, reporter.as_ref()).await;
        }

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.worker_id,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.worker_id,
        });
    }

    async fn process_job<WR: WorkerReporter>(&self, entry: QueuedJob, reporter: &WR) {
        let shared = &self.shared;
        let Some(mut job) = shared.begin_job(entry.id) else {
            tracing::warn!(job_id = %entry.id, "Dequeued job is no longer pending");
            return;
        };

        reporter.report(WorkerEvent::JobStarted {
            job_id: job.id,
            url: &job.url,
        });
        shared.metrics.job_started();

        let domain = shared.registry.get_or_create(&job.domain, job.source);
        let started = Instant::now();
        let deadline = started + shared.config.job_timeout;

        let result = shared
            .pipeline
            .run(&mut job, &domain, deadline, |job, event| {
                match &event {
                    AttemptEvent::Started { .. } => {
                        shared.metrics.attempt_started();
                    }
                    AttemptEvent::Finished { elapsed, .. } => {
                        shared.metrics.fetch_latency.observe(*elapsed);
                    }
                    AttemptEvent::Backoff {
                        attempt,
                        delay,
                        error,
                    } => {
                        shared.metrics.retry_scheduled();
                        reporter.report(WorkerEvent::JobRetrying {
                            job_id: job.id,
                            attempt: *attempt,
                            delay: *delay,
                            error: &error.to_string(),
                        });
                    }
                }
                shared.mirror_job(job);
            })
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        let record = match result {
            Ok(success) => {
                reporter.report(WorkerEvent::JobSucceeded {
                    job_id: job.id,
                    strategy: success.record.strategy,
                    confidence: success.record.confidence,
                });
                JobRecord::succeeded(job, success.record, latency_ms, success.content_hash)
            }
            Err(failure) => {
                let error_msg = failure.error.to_string();
                reporter.report(WorkerEvent::JobFailed {
                    job_id: job.id,
                    kind: failure.error.kind(),
                    error: &error_msg,
                });
                JobRecord::failed(job, &failure.error, latency_ms, failure.content_hash)
            }
        };

        match record {
            Ok(record) => shared.finish_job(record).await,
            Err(e) => {
                tracing::error!(job_id = %entry.id, error = %e, "Failed to finalize job");
                shared.forget_job(entry.id);
            }
        }
        shared.metrics.job_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reporter_ignores_events() {
        struct Silent;
        impl WorkerReporter for Silent {}
        Silent.report(WorkerEvent::Started { worker_id: "w" });
    }

    #[test]
    fn test_tracing_reporter_handles_every_event() {
        let id = uuid::Uuid::new_v4();
        let reporter = TracingWorkerReporter;
        reporter.report(WorkerEvent::Started { worker_id: "w" });
        reporter.report(WorkerEvent::JobStarted { job_id: id, url: "https://example.com" });
        reporter.report(WorkerEvent::JobRetrying {
            job_id: id,
            attempt: 1,
            delay: Duration::from_millis(500),
            error: "HTTP 503",
        });
        reporter.report(WorkerEvent::JobSucceeded {
            job_id: id,
            strategy: StrategyKind::JsonLd,
            confidence: 1.0,
        });
        reporter.report(WorkerEvent::JobFailed {
            job_id: id,
            kind: FailureKind::Timeout,
            error: "deadline",
        });
        reporter.report(WorkerEvent::ShuttingDown { worker_id: "w" });
        reporter.report(WorkerEvent::Stopped { worker_id: "w" });
    }
}
