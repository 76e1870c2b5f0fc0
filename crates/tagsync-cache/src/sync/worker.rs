//! Bounded pool for asynchronous subscription tasks.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Runs background tasks with at most `workers` of them in flight.
///
/// Tasks are spawned immediately but wait for a permit before doing any
/// work, so callers are never blocked.
#[derive(Debug)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl WorkerPool {
    /// Creates a pool spawning on `handle`.
    pub fn new(handle: Handle, workers: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Queues a task.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let mut tasks = self.tasks.lock();

        // reap finished tasks so the set does not grow unbounded
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "Subscription task failed");
            }
        }

        tasks.spawn_on(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                task.await;
            },
            &self.handle,
        );
    }

    /// Number of tasks spawned and not yet reaped.
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Waits until every task spawned so far, and every task they spawned,
    /// has finished.
    pub async fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                return;
            }
            while let Some(result) = batch.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Subscription task failed");
                }
            }
        }
    }
}
