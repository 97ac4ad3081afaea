//! Delivery executors
//!
//! Every callback and notification reaches collaborator code through a
//! [`DeliveryExecutor`]. The public executors only enqueue, so collaborator
//! callbacks never run while the correlator or dispatcher holds a lock.
//! The crate-internal `Handoff` runs jobs inline and is reserved for
//! completions that only forward a result to a waiting task.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;

/// A unit of work posted to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serial queue on which results and notifications are delivered
pub trait DeliveryExecutor: Send + Sync {
    /// Enqueue a job. Jobs run in submission order.
    fn execute(&self, job: Job);
}

/// FIFO executor backed by an unbounded channel
pub struct SerialExecutor {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialExecutor {
    /// Run jobs on a dedicated tokio task
    pub fn spawn() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("Delivery job panicked");
                }
            }
            tracing::debug!("Delivery executor stopped");
        });

        Arc::new(Self { tx })
    }

    /// Leave draining to the caller (a UI loop, a test)
    pub fn manual() -> (Arc<Self>, JobQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), JobQueue { rx })
    }
}

impl DeliveryExecutor for SerialExecutor {
    fn execute(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::warn!("Delivery executor is gone, dropping job");
        }
    }
}

/// Receiving side of a manual [`SerialExecutor`]
pub struct JobQueue {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl JobQueue {
    /// Run every job queued so far and return how many ran
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            count += 1;
        }
        count
    }

    /// Wait for the next job and run it.
    ///
    /// Returns `false` once every executor handle has been dropped.
    pub async fn next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }
}

/// Runs jobs on the submitting thread.
///
/// Only for jobs that hand their result to another task, such as a oneshot
/// sender behind an `async` request.
pub(crate) struct Handoff;

impl DeliveryExecutor for Handoff {
    fn execute(&self, job: Job) {
        job();
    }
}
