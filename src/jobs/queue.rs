//! Bounded FIFO job queue between request handlers and the single worker.
//!
//! `enqueue` never waits: when the queue is full the job is dropped and the
//! caller gets `QueueError::Full`. `dequeue` suspends until a job arrives or
//! the worker's token is cancelled.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::viewings::model::FutureViewingInput;

/// A unit of deferred work tied to one viewing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Generate and store the image for a pending viewing.
    GenerateImage {
        viewing_id: Uuid,
        input: FutureViewingInput,
    },
}

impl Job {
    /// The viewing this job writes to.
    pub fn viewing_id(&self) -> Uuid {
        match self {
            Self::GenerateImage { viewing_id, .. } => *viewing_id,
        }
    }
}

/// Producer handle. Cheap to clone; safe for many concurrent producers.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

/// Consumer handle. Exactly one exists per queue.
pub struct JobReceiver {
    rx: mpsc::Receiver<Job>,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` jobs (minimum 1).
    pub fn bounded(capacity: usize) -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, JobReceiver { rx })
    }

    /// Hand a job to the worker without waiting.
    pub fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let viewing_id = job.viewing_id();
        match self.tx.try_send(job) {
            Ok(()) => {
                debug!(viewing_id = %viewing_id, queued = self.pending(), "Job enqueued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    viewing_id = %viewing_id,
                    capacity = self.capacity(),
                    "Job queue full, job dropped"
                );
                Err(QueueError::Full {
                    capacity: self.capacity(),
                })
            }
            Err(TrySendError::Closed(_)) => {
                warn!(viewing_id = %viewing_id, "Job queue closed, job dropped");
                Err(QueueError::Closed)
            }
        }
    }

    /// Configured bound.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of jobs currently buffered.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl JobReceiver {
    /// Wait for the next job in FIFO order.
    ///
    /// Returns `Cancelled` once `cancel` fires; jobs still buffered stay in
    /// the queue. Returns `Closed` when every producer handle is gone and the
    /// queue is drained.
    pub async fn dequeue(&mut self, cancel: &CancellationToken) -> Result<Job, QueueError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            job = self.rx.recv() => job.ok_or(QueueError::Closed),
        }
    }
}
