use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::job::ReceiptJob;
use crate::models::payload::ResultPayload;

/// Result of one delivery attempt, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No callback URL; nothing was sent.
    Skipped,
    Delivered { status: u16 },
    Failed { error: String },
}

/// Posts finished jobs to their callback URL. One attempt, no retries.
pub struct CallbackDispatcher {
    http: Client,
}

impl CallbackDispatcher {
    pub fn new(timeout: Duration) -> Result<Self, CallbackError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Deliver a terminal job. Failures are logged and returned, never raised.
    pub async fn deliver(&self, job: &ReceiptJob, include_raw: bool) -> DeliveryOutcome {
        let Some(url) = job.callback_url.as_deref() else {
            info!(job_id = %job.id, status = %job.status, "No callback URL, skipping delivery");
            return DeliveryOutcome::Skipped;
        };

        match self.post(job, url, include_raw).await {
            Ok(status) => {
                info!(job_id = %job.id, url = %url, http_status = status, "Callback delivered");
                DeliveryOutcome::Delivered { status }
            }
            Err(e) => {
                warn!(job_id = %job.id, url = %url, error = %e, "Callback delivery failed");
                metrics::counter!("receipt_callback_failures_total").increment(1);
                DeliveryOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn post(&self, job: &ReceiptJob, url: &str, include_raw: bool) -> Result<u16, CallbackError> {
        let payload =
            ResultPayload::from_job(job, include_raw).ok_or(CallbackError::NotTerminal)?;

        let response = self.http.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CallbackError::Status(status.as_u16()));
        }
        Ok(status.as_u16())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Callback endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Job has not finished yet")]
    NotTerminal,
}
