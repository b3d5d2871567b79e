use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default upper bound on concurrently running workers.
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Largest pool the semaphore can represent.
pub const MAX_WORKERS_LIMIT: usize = Semaphore::MAX_PERMITS;

/// How a single deadline-bound job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome<T> {
    Success(T),
    Failure { cause: String, trace: String },
    TimedOut,
}

impl<T> InvocationOutcome<T> {
    fn failure(cause: impl Into<String>, trace: impl Into<String>) -> Self {
        let cause = cause.into();
        Self::Failure {
            cause: if cause.is_empty() { String::from("unknown error") } else { cause },
            trace: trace.into(),
        }
    }
}

// The Runtime Engine
// Long-lived, shared by every request. It owns no job state, only the
// permits that cap how much blocking work runs at once.
#[derive(Debug, Clone)]
pub struct DeadlineExecutor {
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl Default for DeadlineExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

impl DeadlineExecutor {
    /// Sizes are clamped to `1..=MAX_WORKERS_LIMIT`.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.clamp(1, MAX_WORKERS_LIMIT);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Workers currently free to take a job.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `task` on a dedicated worker thread and waits at most `deadline`.
    ///
    /// Waiting for a free worker counts against the deadline. On timeout the
    /// task's cancellation token fires and `TimedOut` is returned straight
    /// away; a task that ignores the token keeps its worker slot until it
    /// returns, and its result is dropped.
    pub async fn run<T, F>(&self, deadline: Duration, task: F) -> InvocationOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> Result<T> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        // Fires on timeout and also if the caller's future is dropped.
        let _cancel_on_exit = cancel.clone().drop_guard();

        let job = self.dispatch(task, cancel.clone());
        match tokio::time::timeout(deadline, job).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("worker exceeded deadline of {:?}, cancelling", deadline);
                cancel.cancel();
                InvocationOutcome::TimedOut
            }
        }
    }

    async fn dispatch<T, F>(&self, task: F, cancel: CancellationToken) -> InvocationOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> Result<T> + Send + 'static,
    {
        // A. Wait for a free worker slot
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => return InvocationOutcome::failure("worker pool is shut down", err.to_string()),
        };

        // B. Hand the job to its own thread; the slot stays taken until the task returns
        let (tx, rx) = oneshot::channel();
        let spawned = thread::Builder::new()
            .name(String::from("levelone-worker"))
            .spawn(move || {
                let outcome = execute(task, &cancel);
                drop(permit);
                if tx.send(outcome).is_err() {
                    debug!("caller stopped waiting; discarding worker result");
                }
            });
        if let Err(err) = spawned {
            return InvocationOutcome::failure("failed to start worker thread", err.to_string());
        }

        // C. Single delivery point for the outcome
        rx.await.unwrap_or_else(|_| {
            InvocationOutcome::failure("worker exited without reporting", "result channel closed")
        })
    }
}

fn execute<T, F>(task: F, cancel: &CancellationToken) -> InvocationOutcome<T>
where
    F: FnOnce(&CancellationToken) -> Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| task(cancel))) {
        Ok(Ok(value)) => InvocationOutcome::Success(value),
        Ok(Err(err)) => InvocationOutcome::failure(err.to_string(), format!("{err:?}")),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            InvocationOutcome::failure(message.clone(), format!("worker panicked: {message}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("worker panicked")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    use anyhow::{anyhow, Context};

    use super::*;

    #[tokio::test]
    async fn returns_task_value() {
        let executor = DeadlineExecutor::new(2);
        let outcome = executor.run(Duration::from_secs(5), |_| Ok(21 * 2)).await;
        assert_eq!(outcome, InvocationOutcome::Success(42));
        assert_eq!(executor.idle_workers(), 2);
    }

    #[tokio::test]
    async fn pool_size_is_clamped() {
        assert_eq!(DeadlineExecutor::new(0).max_workers(), 1);

        let executor = DeadlineExecutor::new(usize::MAX);
        assert_eq!(executor.max_workers(), MAX_WORKERS_LIMIT);
        let outcome = executor.run(Duration::from_secs(5), |_| Ok("ran")).await;
        assert_eq!(outcome, InvocationOutcome::Success("ran"));
    }

    #[tokio::test]
    async fn slow_task_times_out_near_the_deadline() {
        let executor = DeadlineExecutor::new(2);
        let started = Instant::now();

        let outcome = executor
            .run(Duration::from_millis(100), |_| {
                thread::sleep(Duration::from_secs(3));
                Ok(())
            })
            .await;

        assert_eq!(outcome, InvocationOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn timeout_cancels_the_task_token() {
        let executor = DeadlineExecutor::new(1);
        let observed = Arc::new(AtomicBool::new(false));
        let flag = observed.clone();

        let outcome = executor
            .run(Duration::from_millis(50), move |cancel| {
                while !cancel.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_eq!(outcome, InvocationOutcome::TimedOut);

        // The worker notices the signal and frees its slot.
        let deadline = Instant::now() + Duration::from_secs(2);
        while executor.idle_workers() == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(observed.load(Ordering::SeqCst));
        assert_eq!(executor.idle_workers(), 1);
    }

    #[tokio::test]
    async fn error_becomes_failure_with_chain() {
        let executor = DeadlineExecutor::default();
        let outcome: InvocationOutcome<()> = executor
            .run(Duration::from_secs(5), |_| {
                Err(anyhow!("socket closed")).context("model call failed")
            })
            .await;

        let InvocationOutcome::Failure { cause, trace } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(cause, "model call failed");
        assert!(trace.contains("socket closed"));
    }

    #[tokio::test]
    async fn panic_becomes_failure() {
        let executor = DeadlineExecutor::new(1);
        let outcome: InvocationOutcome<()> = executor
            .run(Duration::from_secs(5), |_| panic!("tokenizer exploded"))
            .await;

        assert_eq!(
            outcome,
            InvocationOutcome::Failure {
                cause: "tokenizer exploded".into(),
                trace: "worker panicked: tokenizer exploded".into(),
            }
        );
        assert_eq!(executor.idle_workers(), 1);
    }

    #[tokio::test]
    async fn queued_job_waits_for_a_slot_within_its_deadline() {
        let executor = DeadlineExecutor::new(1);
        let busy = executor.clone();
        let hog = tokio::spawn(async move {
            busy.run(Duration::from_secs(5), |_| {
                thread::sleep(Duration::from_millis(400));
                Ok(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let starved = executor.run(Duration::from_millis(100), |_| Ok(())).await;
        assert_eq!(starved, InvocationOutcome::TimedOut);

        assert_eq!(hog.await.unwrap(), InvocationOutcome::Success(()));
        let served = executor.run(Duration::from_secs(1), |_| Ok(7)).await;
        assert_eq!(served, InvocationOutcome::Success(7));
    }
}
