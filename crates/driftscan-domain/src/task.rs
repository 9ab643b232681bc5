use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Cancellation-aware task group with a bounded number of in-flight tasks.
///
/// The engine creates one per run, sized by the run's concurrency, and hands
/// it down to the comparers. Anything that fans out below the engine (the
/// per-key sequence diffing, for instance) spawns through the same group, so
/// total parallelism stays within the run's bound.
#[derive(Clone)]
pub struct TaskGroup {
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
}

impl TaskGroup {
    pub fn new(cancel: CancellationToken, limit: usize) -> Self {
        Self {
            cancel,
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// The run's cancellation token, for code that performs its own I/O.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn `task` once a slot is free. Waiting for the slot is itself
    /// cancellation-aware; the returned handle joins the task's output.
    pub async fn spawn<F, T>(&self, task: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::cancelled()),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| Error::cancelled())?
            }
        };
        Ok(tokio::spawn(async move {
            let _permit = permit;
            task.await
        }))
    }
}
