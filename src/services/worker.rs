use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{JobOutcome, JobStatus};
use crate::services::store::StoreError;

/// Start the single worker task.
///
/// The task ends once the queue is closed and every queued job has run.
pub fn spawn(state: AppState) -> JoinHandle<()> {
    tokio::spawn(run(state))
}

/// Process jobs one at a time, in queue order, until the queue closes.
pub async fn run(state: AppState) {
    info!("Worker ready, starting job processing loop");

    while let Some(job_id) = state.queue.dequeue().await {
        match process_job(&state, job_id).await {
            Ok(status) => {
                tracing::debug!(job_id = %job_id, status = %status, "Job finished, checking for next job");
            }
            Err(e) => {
                // Confined to this job; keep serving the queue.
                error!(job_id = %job_id, error = %e, "Job could not be processed");
            }
        }
    }

    info!("Job queue closed and drained, worker stopping");
}

/// Run one job through the pipeline and deliver its result.
pub async fn process_job(state: &AppState, job_id: Uuid) -> Result<JobStatus, StoreError> {
    let job = state.store.transition(job_id, JobStatus::Processing, None)?;

    info!(
        job_id = %job_id,
        image_bytes = job.input.image.len(),
        custom_questions = job.input.questions.is_some(),
        "Processing receipt job"
    );

    let start = Instant::now();
    let pipeline = state.pipeline.clone();
    let image = job.input.image.clone();
    let questions = job.input.questions.clone();

    // A panic inside the pipeline only fails this job.
    let run = tokio::spawn(async move { pipeline.run(&image, questions.as_deref()).await }).await;

    let outcome = match run {
        Ok(Ok(result)) => JobOutcome::Completed(result),
        Ok(Err(e)) => JobOutcome::Failed(e.to_string()),
        Err(e) => JobOutcome::Failed(format!("Pipeline task aborted: {e}")),
    };
    let elapsed = start.elapsed();
    metrics::histogram!("receipt_pipeline_seconds").record(elapsed.as_secs_f64());

    let status = outcome.status();
    match &outcome {
        JobOutcome::Completed(result) => {
            metrics::counter!("receipt_jobs_completed_total").increment(1);
            info!(
                job_id = %job_id,
                duration_ms = elapsed.as_millis() as u64,
                normalized = result.receipt_meta.is_none(),
                "Job completed"
            );
        }
        JobOutcome::Failed(reason) => {
            metrics::counter!("receipt_jobs_failed_total").increment(1);
            warn!(
                job_id = %job_id,
                duration_ms = elapsed.as_millis() as u64,
                error = %reason,
                "Job failed"
            );
        }
    }

    let finished = state.store.transition(job_id, status, Some(outcome))?;

    // Fire and forget; the next job does not wait on delivery.
    let callbacks = state.callbacks.clone();
    let include_raw = state.config.include_raw;
    tokio::spawn(async move {
        callbacks.deliver(&finished, include_raw).await;
    });

    Ok(status)
}
