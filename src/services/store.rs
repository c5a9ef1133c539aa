use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::job::{JobInput, JobOutcome, JobStatus, ReceiptJob};

struct JobEntry {
    job: ReceiptJob,
    status_tx: watch::Sender<JobStatus>,
}

/// In-process store holding the authoritative state of every job.
///
/// Each mutation happens under the job's map-shard lock, so the status
/// check and the write in [`JobStore::transition`] are one atomic step.
/// Jobs are never evicted.
#[derive(Default)]
pub struct JobStore {
    jobs: DashMap<Uuid, JobEntry>,
}

/// Number of jobs per status, for the health endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new `queued` job and return its id.
    pub fn create(&self, input: JobInput, callback_url: Option<String>) -> Uuid {
        loop {
            let id = Uuid::new_v4();
            if let Entry::Vacant(slot) = self.jobs.entry(id) {
                let now = Utc::now();
                let (status_tx, _) = watch::channel(JobStatus::Queued);
                slot.insert(JobEntry {
                    job: ReceiptJob {
                        id,
                        status: JobStatus::Queued,
                        created_at: now,
                        updated_at: now,
                        input,
                        callback_url,
                        result: None,
                    },
                    status_tx,
                });
                return id;
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Option<ReceiptJob> {
        self.jobs.get(&id).map(|entry| entry.job.clone())
    }

    /// Move a job to `next`, attaching `outcome` when `next` is terminal.
    ///
    /// Returns a snapshot of the updated job.
    pub fn transition(
        &self,
        id: Uuid,
        next: JobStatus,
        outcome: Option<JobOutcome>,
    ) -> Result<ReceiptJob, StoreError> {
        let mut entry = self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let current = entry.job.status;
        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id,
                from: current,
                to: next,
            });
        }

        match (&outcome, next.is_terminal()) {
            (Some(o), true) if o.status() == next => {}
            (None, false) => {}
            _ => return Err(StoreError::OutcomeMismatch { id, status: next }),
        }

        entry.job.status = next;
        entry.job.updated_at = Utc::now();
        entry.job.result = outcome;
        entry.status_tx.send_replace(next);

        Ok(entry.job.clone())
    }

    /// Watch a job's status, e.g. to wait for it to finish.
    pub fn subscribe(&self, id: Uuid) -> Option<watch::Receiver<JobStatus>> {
        self.jobs.get(&id).map(|entry| entry.status_tx.subscribe())
    }

    /// Drop a job that never made it onto the queue.
    pub(crate) fn discard(&self, id: Uuid) -> bool {
        self.jobs
            .remove_if(&id, |_, entry| entry.job.status == JobStatus::Queued)
            .is_some()
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for entry in self.jobs.iter() {
            match entry.job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {id}: outcome does not match status {status}")]
    OutcomeMismatch { id: Uuid, status: JobStatus },
}
