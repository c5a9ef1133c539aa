use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

/// In-process FIFO of job ids waiting for the worker.
///
/// Any number of submitters may enqueue; exactly one worker dequeues.
/// Job state lives in the job store, the queue only carries ids.
pub struct JobQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Uuid>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Uuid>>,
    depth: AtomicUsize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            depth: AtomicUsize::new(0),
        }
    }

    /// Append a job id to the back of the queue.
    pub fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(QueueError::Closed)?;

        // Count first so a fast dequeue never underflows the gauge.
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if sender.send(job_id).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        metrics::gauge!("receipt_queue_depth").set(depth as f64);
        Ok(())
    }

    /// Wait for the next job id.
    ///
    /// Returns `None` once the queue has been closed and fully drained.
    pub async fn dequeue(&self) -> Option<Uuid> {
        let job_id = self.receiver.lock().await.recv().await?;
        let depth = self.depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::gauge!("receipt_queue_depth").set(depth as f64);
        Some(job_id)
    }

    /// Stop accepting new jobs. Already queued ids are still handed out.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Number of ids waiting to be dequeued.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue is closed")]
    Closed,
}
