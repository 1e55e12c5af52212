//! Bounded worker pool.
//!
//! [`BoundedPool`] runs a batch of futures on the tokio runtime with a hard
//! cap on how many execute at once. Each task acquires a permit before it
//! starts and holds it until it finishes; the permit is an owned guard, so it
//! is released when the task completes, fails, or unwinds from a panic.
//!
//! The pool never retries. Retry policy belongs to the task itself.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, instrument, warn};

/// Why a pool task produced no value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("task panicked")]
    Panicked,
    #[error("task was cancelled")]
    Cancelled,
    #[error("worker pool closed before the task could start")]
    Closed,
}

impl From<JoinError> for PoolError {
    fn from(e: JoinError) -> Self {
        if e.is_panic() {
            PoolError::Panicked
        } else {
            PoolError::Cancelled
        }
    }
}

/// A reusable concurrency limiter.
///
/// Cloning the pool shares its permits, so clones draw from the same budget.
#[derive(Debug, Clone)]
pub struct BoundedPool {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl BoundedPool {
    /// Create a pool that runs at most `max_concurrent` tasks at a time.
    ///
    /// A limit of zero is raised to one so the pool can always make progress.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run every task to completion and return one outcome per task, in
    /// submission order.
    ///
    /// Tasks are spawned immediately but each waits for a permit before its
    /// body runs. The call returns only after every task has finished.
    #[instrument(level = "debug", skip_all, fields(tasks = tasks.len(), max = self.max_concurrent))]
    pub async fn run<F, T>(&self, tasks: Vec<F>) -> Vec<Result<T, PoolError>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let permits = Arc::clone(&self.permits);
                tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| PoolError::Closed)?;
                    Ok::<T, PoolError>(task.await)
                })
            })
            .collect();

        let outcomes: Vec<Result<T, PoolError>> = futures::future::join_all(handles)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, joined)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let err = PoolError::from(e);
                    warn!(index, error = %err, "Pool task did not complete");
                    Err(err)
                }
            })
            .collect();

        debug!(
            completed = outcomes.iter().filter(|o| o.is_ok()).count(),
            "Pool batch finished"
        );
        outcomes
    }
}
