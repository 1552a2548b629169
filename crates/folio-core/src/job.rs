use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, FailureKind};
use crate::models::{BookRecord, Source};

pub type JobId = Uuid;

/// Status of a scrape job.
///
/// ```text
/// pending --> in_flight --> succeeded | failed
///    |            ^   \
///    |            |    v
///    |            +-- retrying --> failed
///    v
/// dropped (shutdown)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InFlight,
    Retrying,
    Succeeded,
    Failed,
    Dropped,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::InFlight,
        JobStatus::Retrying,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Dropped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InFlight => "in_flight",
            JobStatus::Retrying => "retrying",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Dropped => "dropped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Dropped
        )
    }

    /// Succeeded or failed; dropped jobs were never processed.
    pub fn is_completed(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (Pending, Dropped)
                | (InFlight, Retrying)
                | (InFlight, Succeeded)
                | (InFlight, Failed)
                | (Retrying, InFlight)
                | (Retrying, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "in_flight" | "in-flight" => Ok(JobStatus::InFlight),
            "retrying" => Ok(JobStatus::Retrying),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "dropped" => Ok(JobStatus::Dropped),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// One URL's unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request_id: Uuid,
    pub url: String,
    pub domain: String,
    pub source: Source,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: u32,
    /// Submission order, used to break priority ties.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(
        request_id: Uuid,
        url: impl Into<String>,
        domain: impl Into<String>,
        source: Source,
        priority: i32,
        sequence: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            url: url.into(),
            domain: domain.into(),
            source,
            priority,
            status: JobStatus::Pending,
            attempts: 0,
            sequence,
            created_at: Utc::now(),
            last_attempt_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Moves the job along the status graph. Illegal moves leave it untouched.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidRequest(format!(
                "illegal job transition {} -> {} for {}",
                self.status, next, self.id
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Called as each fetch attempt starts.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
        self.last_attempt_at = Some(Utc::now());
    }
}

/// How a job ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded { record: BookRecord },
    Failed { kind: FailureKind, message: String },
    Dropped { reason: String },
}

impl JobOutcome {
    pub fn record(&self) -> Option<&BookRecord> {
        match self {
            JobOutcome::Succeeded { record } => Some(record),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            JobOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// A terminal job as held by the result store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: Job,
    pub outcome: JobOutcome,
    pub latency_ms: u64,
    /// SHA-256 of the fetched body, when a body was fetched.
    pub content_hash: Option<String>,
}

impl JobRecord {
    pub fn succeeded(
        mut job: Job,
        record: BookRecord,
        latency_ms: u64,
        content_hash: String,
    ) -> Result<Self, AppError> {
        job.transition(JobStatus::Succeeded)?;
        job.error_message = None;
        Ok(Self {
            job,
            outcome: JobOutcome::Succeeded { record },
            latency_ms,
            content_hash: Some(content_hash),
        })
    }

    pub fn failed(
        mut job: Job,
        error: &AppError,
        latency_ms: u64,
        content_hash: Option<String>,
    ) -> Result<Self, AppError> {
        job.transition(JobStatus::Failed)?;
        let message = error.to_string();
        job.error_message = Some(message.clone());
        Ok(Self {
            job,
            outcome: JobOutcome::Failed {
                kind: error.kind(),
                message,
            },
            latency_ms,
            content_hash,
        })
    }

    pub fn dropped(mut job: Job, reason: impl Into<String>) -> Result<Self, AppError> {
        job.transition(JobStatus::Dropped)?;
        Ok(Self {
            job,
            outcome: JobOutcome::Dropped {
                reason: reason.into(),
            },
            latency_ms: 0,
            content_hash: None,
        })
    }

    pub fn id(&self) -> JobId {
        self.job.id
    }

    pub fn status(&self) -> JobStatus {
        self.job.status
    }

    pub fn record(&self) -> Option<&BookRecord> {
        self.outcome.record()
    }
}

/// Aggregate view of one request's jobs, derived on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStatus {
    pub request_id: Uuid,
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dropped: usize,
    /// Every job has reached a terminal state.
    pub done: bool,
}

impl BatchStatus {
    pub fn from_statuses(request_id: Uuid, statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        let mut batch = BatchStatus {
            request_id,
            ..Default::default()
        };
        for status in statuses {
            batch.total += 1;
            match status {
                JobStatus::Pending => batch.pending += 1,
                JobStatus::InFlight => batch.in_flight += 1,
                JobStatus::Retrying => batch.retrying += 1,
                JobStatus::Succeeded => batch.succeeded += 1,
                JobStatus::Failed => batch.failed += 1,
                JobStatus::Dropped => batch.dropped += 1,
            }
        }
        batch.done = batch.total > 0 && batch.succeeded + batch.failed + batch.dropped == batch.total;
        batch
    }
}
