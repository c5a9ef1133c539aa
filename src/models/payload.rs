use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::job::{JobOutcome, JobStatus, ReceiptJob};
use crate::models::receipt::{QaPair, Receipt, ReceiptMeta};

/// JSON body accepted by `POST /api/process`.
#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    pub image_path: Option<String>,
    pub image_base64: Option<String>,
    pub questions: Option<Vec<String>>,
    pub callback_url: Option<String>,
}

/// Per-request options checked before a job is created.
#[derive(Debug, Validate)]
pub struct SubmissionOptions {
    #[garde(length(max = 50), inner(length(min = 1, max = 500)))]
    pub questions: Vec<String>,

    #[garde(url, length(max = 2048))]
    pub callback_url: Option<String>,
}

impl SubmissionOptions {
    /// Trims every question and the callback URL, so whitespace-only
    /// values fail validation as blanks.
    pub fn new(questions: Vec<String>, callback_url: Option<String>) -> Self {
        Self {
            questions: questions.iter().map(|q| q.trim().to_string()).collect(),
            callback_url: callback_url.map(|u| u.trim().to_string()),
        }
    }
}

/// Response after queueing a receipt in async mode.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Response for `GET /api/jobs/{job_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<ResultPayload>,
}

impl JobStatusResponse {
    pub fn from_job(job: &ReceiptJob, include_raw: bool) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
            result: ResultPayload::from_job(job, include_raw),
        }
    }
}

/// Raw extractor outputs, emitted only when `INCLUDE_RAW` is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOutputs {
    pub extraction_a: Vec<QaPair>,
    pub extraction_b: Value,
}

/// Terminal job body, shared by callbacks and sync responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultPayload {
    Completed {
        job_id: Uuid,
        receipt: Receipt,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        raw: Option<RawOutputs>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        receipt_meta: Option<ReceiptMeta>,
    },
    Failed {
        job_id: Uuid,
        error: String,
    },
}

impl ResultPayload {
    /// `None` until the job reaches a terminal status.
    pub fn from_job(job: &ReceiptJob, include_raw: bool) -> Option<Self> {
        let payload = match job.result.as_ref()? {
            JobOutcome::Completed(result) => ResultPayload::Completed {
                job_id: job.id,
                receipt: result.receipt.clone(),
                raw: include_raw.then(|| RawOutputs {
                    extraction_a: result.raw_extraction_a.clone(),
                    extraction_b: result.raw_extraction_b.clone(),
                }),
                receipt_meta: result.receipt_meta.clone(),
            },
            JobOutcome::Failed(error) => ResultPayload::Failed {
                job_id: job.id,
                error: error.clone(),
            },
        };
        Some(payload)
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            ResultPayload::Completed { job_id, .. } | ResultPayload::Failed { job_id, .. } => {
                *job_id
            }
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            ResultPayload::Completed { .. } => JobStatus::Completed,
            ResultPayload::Failed { .. } => JobStatus::Failed,
        }
    }
}
