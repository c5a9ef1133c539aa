use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{JobInput, ReceiptJob};
use crate::services::queue::QueueError;

/// Create a job and put it on the queue. Returns without waiting.
///
/// The job's callback is `callback_url`, else the global `CALLBACK_URL`.
pub fn submit(
    state: &AppState,
    input: JobInput,
    callback_url: Option<String>,
) -> Result<Uuid, SubmitError> {
    let callback_url = callback_url.or_else(|| state.config.global_callback_url().map(str::to_string));
    enqueue_job(state, input, callback_url)
}

fn enqueue_job(
    state: &AppState,
    input: JobInput,
    callback_url: Option<String>,
) -> Result<Uuid, SubmitError> {
    let has_callback = callback_url.is_some();

    let job_id = state.store.create(input, callback_url);
    if let Err(e) = state.queue.enqueue(job_id) {
        state.store.discard(job_id);
        warn!(job_id = %job_id, error = %e, "Rejected submission");
        return Err(e.into());
    }

    metrics::counter!("receipt_jobs_submitted_total").increment(1);
    info!(
        job_id = %job_id,
        queue_depth = state.queue.depth(),
        has_callback,
        "Receipt job queued"
    );
    Ok(job_id)
}

/// Submit through the same queue and wait for the job to finish.
///
/// The result goes back to the caller only; no callback is attached. With
/// `PIPELINE_THROTTLE_TIMEOUT` set, gives up waiting after that many
/// seconds. The job itself keeps its place and still runs.
pub async fn submit_and_wait(state: &AppState, input: JobInput) -> Result<ReceiptJob, SubmitError> {
    let job_id = enqueue_job(state, input, None)?;
    let mut status = state
        .store
        .subscribe(job_id)
        .ok_or(SubmitError::Lost(job_id))?;

    let wait = status.wait_for(|s| s.is_terminal());
    let waited = match state.config.pipeline_throttle_timeout.filter(|secs| *secs > 0) {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), wait)
            .await
            .map_err(|_| SubmitError::WaitTimeout { job_id, secs })?,
        None => wait.await,
    };
    waited.map_err(|_| SubmitError::Lost(job_id))?;

    state.store.get(job_id).ok_or(SubmitError::Lost(job_id))
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Queue wait timeout after {secs}s (job {job_id} was not cancelled)")]
    WaitTimeout { job_id: Uuid, secs: u64 },

    #[error("Job {0} disappeared while waiting")]
    Lost(Uuid),
}
