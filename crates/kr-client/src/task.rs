//! Sequential multi-step flows with stage-tagged failures
//!
//! A [`TaskChain`] runs steps one after another, feeding each step the
//! previous result. The first failing step stops the chain and is reported
//! with its 1-based stage index and label. Nothing runs until the chain is
//! run or spawned.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kr_core::CallError;

use crate::executor::DeliveryExecutor;

/// Completion callback for callback-style steps
pub type Callback<T> = Box<dyn FnOnce(Result<T, CallError>) + Send + 'static>;

/// A chain stopped at a failing step
#[derive(Error, Debug, Clone, PartialEq)]
#[error("step {stage} ({label}) failed: {error}")]
pub struct StageFailure {
    /// 1-based index of the failing step
    pub stage: usize,
    pub label: String,
    pub error: CallError,
}

type Runner<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, StageFailure>> + Send>;

/// An ordered sequence of asynchronous steps
pub struct TaskChain<T> {
    stages: usize,
    runner: Runner<T>,
}

fn callback_step<T: Send + 'static>(
    start: impl FnOnce(Callback<T>) + Send + 'static,
) -> impl Future<Output = Result<T, CallError>> + Send {
    let (tx, rx) = oneshot::channel();
    start(Box::new(move |outcome| {
        let _ = tx.send(outcome);
    }));
    // A callback dropped without firing means the step was abandoned
    async move { rx.await.unwrap_or(Err(CallError::Cancelled)) }
}

impl<T: Send + 'static> TaskChain<T> {
    /// First step of a chain
    pub fn start<F, Fut>(label: impl Into<String>, step: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, CallError>> + Send + 'static,
    {
        let label = label.into();
        Self {
            stages: 1,
            runner: Box::new(move || {
                async move {
                    step()
                        .await
                        .map_err(|error| StageFailure {
                            stage: 1,
                            label,
                            error,
                        })
                }
                .boxed()
            }),
        }
    }

    /// First step written in callback style
    pub fn from_callback<F>(label: impl Into<String>, start: F) -> Self
    where
        F: FnOnce(Callback<T>) + Send + 'static,
    {
        Self::start(label, move || callback_step(start))
    }

    /// Append a step that consumes the previous result
    pub fn then<U, F, Fut>(self, label: impl Into<String>, step: F) -> TaskChain<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, CallError>> + Send + 'static,
    {
        let stage = self.stages + 1;
        let label = label.into();
        let previous = self.runner;

        TaskChain {
            stages: stage,
            runner: Box::new(move || {
                async move {
                    let value = previous().await?;
                    step(value)
                        .await
                        .map_err(|error| StageFailure { stage, label, error })
                }
                .boxed()
            }),
        }
    }

    /// Append a callback-style step
    pub fn then_callback<U, F>(self, label: impl Into<String>, step: F) -> TaskChain<U>
    where
        U: Send + 'static,
        F: FnOnce(T, Callback<U>) + Send + 'static,
    {
        self.then(label, move |value| callback_step(move |done| step(value, done)))
    }

    /// Number of steps
    pub fn stages(&self) -> usize {
        self.stages
    }

    /// Run every step in order
    pub async fn run(self) -> Result<T, StageFailure> {
        (self.runner)().await
    }

    /// Run on a background task and deliver the outcome once on `executor`
    pub fn spawn<F>(self, executor: Arc<dyn DeliveryExecutor>, on_done: F) -> ChainHandle
    where
        F: FnOnce(Result<T, StageFailure>) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("Task chain cancelled");
                }
                outcome = self.run() => {
                    executor.execute(Box::new(move || {
                        if !token.is_cancelled() {
                            on_done(outcome);
                        }
                    }));
                }
            }
        });

        ChainHandle { cancel, task }
    }
}

/// Handle to a spawned chain
pub struct ChainHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChainHandle {
    /// Discard the rest of the chain. Completed steps are not rolled back and
    /// the completion callback will not run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the background task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the background task to exit
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SerialExecutor;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_values_flow_between_steps() {
        let chain = TaskChain::start("fetch", || async { Ok(2) })
            .then("double", |n: i32| async move { Ok(n * 2) })
            .then("format", |n: i32| async move { Ok(format!("n={}", n)) });

        assert_eq!(chain.stages(), 3);
        assert_eq!(chain.run().await.unwrap(), "n=4");
    }

    #[tokio::test]
    async fn test_failure_reports_stage_and_skips_rest() {
        let third_ran = Arc::new(AtomicBool::new(false));
        let flag = third_ran.clone();

        let failure = TaskChain::start("open", || async { Ok(()) })
            .then("seek", |_| async {
                Err::<(), _>(CallError::Timeout {
                    method: "Player.Seek".to_string(),
                    after: Duration::from_secs(5),
                })
            })
            .then("notify", move |_| async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .run()
            .await
            .unwrap_err();

        assert_eq!(failure.stage, 2);
        assert_eq!(failure.label, "seek");
        assert!(matches!(failure.error, CallError::Timeout { .. }));
        assert!(!third_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_nothing_runs_before_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let chain = TaskChain::start("count", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        chain.run().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_steps() {
        let chain = TaskChain::from_callback("first", |done: Callback<u32>| done(Ok(20)))
            .then_callback("second", |n, done: Callback<u32>| done(Ok(n + 1)));
        assert_eq!(chain.run().await.unwrap(), 21);

        let dropped = TaskChain::from_callback("lost", |done: Callback<u32>| drop(done));
        let failure = dropped.run().await.unwrap_err();
        assert_eq!((failure.stage, failure.error), (1, CallError::Cancelled));
    }

    #[tokio::test]
    async fn test_spawn_delivers_on_executor() {
        let (executor, mut jobs) = SerialExecutor::manual();
        let result = Arc::new(Mutex::new(None));
        let slot = result.clone();

        let handle = TaskChain::start("one", || async { Ok(1) })
            .spawn(executor, move |outcome| *slot.lock().unwrap() = Some(outcome));

        assert!(jobs.next().await);
        assert_eq!(*result.lock().unwrap(), Some(Ok(1)));
        handle.join().await;
    }

    #[tokio::test]
    async fn test_cancelled_chain_never_completes() {
        let (executor, mut jobs) = SerialExecutor::manual();
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let handle = TaskChain::start("wait", move || async move {
            let _ = release_rx.await;
            Ok(())
        })
        .spawn(executor, move |_| flag.store(true, Ordering::SeqCst));

        handle.cancel();
        let _ = release_tx.send(());
        handle.join().await;

        jobs.run_pending();
        assert!(!completed.load(Ordering::SeqCst));
    }
}
