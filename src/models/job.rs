use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::models::image::ImageData;
use crate::models::receipt::PipelineResult;

/// Lifecycle of a receipt job. Moves strictly forward:
/// `queued → processing → completed | failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `next` is the immediate successor of `self`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

/// What the worker needs to run the pipeline for one job.
#[derive(Debug, Clone)]
pub struct JobInput {
    pub image: ImageData,
    /// Overrides the default question set when present.
    pub questions: Option<Vec<String>>,
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(PipelineResult),
    Failed(String),
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed(_) => JobStatus::Completed,
            JobOutcome::Failed(_) => JobStatus::Failed,
        }
    }
}

/// A receipt processing job as held by the job store.
#[derive(Debug, Clone)]
pub struct ReceiptJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub input: JobInput,
    pub callback_url: Option<String>,
    pub result: Option<JobOutcome>,
}
