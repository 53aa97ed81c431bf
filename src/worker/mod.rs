//! Bounded worker pool for user-initiated background work.
//!
//! Every fetch batch and send request runs as a task submitted here instead
//! of a detached spawn, so the process has one place that caps concurrency
//! and one place that cancels outstanding work on shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, TryAcquireError, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::WorkerError;

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl WorkerPool {
    /// A pool running at most `size` tasks at once (minimum 1).
    pub fn new(size: usize) -> Self {
        let capacity = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Start `task` if a slot is free. The receiver yields the output, or a
    /// receive error if the task was aborted by `shutdown`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F, T>(&self, label: &str, task: F) -> Result<oneshot::Receiver<T>, WorkerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shut_down() {
            return Err(WorkerError::ShutDown);
        }
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::Closed => WorkerError::ShutDown,
                TryAcquireError::NoPermits => WorkerError::Saturated {
                    capacity: self.capacity,
                },
            })?;

        let (tx, rx) = oneshot::channel();
        let label = label.to_string();
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            debug!(task = %label, "Worker task started");
            let output = task.await;
            // Release the slot before the caller can observe completion.
            drop(permit);
            let _ = tx.send(output);
            debug!(task = %label, "Worker task finished");
        });
        Ok(rx)
    }

    /// Submit and wait for the result.
    pub async fn run<F, T>(&self, label: &str, task: F) -> Result<T, WorkerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let rx = self.submit(label, task)?;
        rx.await.map_err(|_| WorkerError::Cancelled {
            label: label.to_string(),
        })
    }

    /// Refuse new work and abort everything in flight.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let outstanding = tasks.len();
        tasks.abort_all();
        info!(outstanding, "Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    #[tokio::test]
    async fn runs_task_and_returns_output() {
        let pool = WorkerPool::new(2);
        let out = pool.run("add", async { 2 + 2 }).await.unwrap();
        assert_eq!(out, 4);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn zero_size_is_clamped() {
        assert_eq!(WorkerPool::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn rejects_when_saturated() {
        let pool = WorkerPool::new(1);
        let gate = Arc::new(Notify::new());
        let held = gate.clone();
        let first = pool
            .submit("blocker", async move { held.notified().await })
            .unwrap();

        let err = pool.submit("second", async {}).unwrap_err();
        assert!(matches!(err, WorkerError::Saturated { capacity: 1 }));

        gate.notify_one();
        first.await.unwrap();
        assert!(pool.submit("third", async {}).is_ok());
    }

    #[tokio::test]
    async fn shutdown_aborts_in_flight_and_refuses_new() {
        let pool = WorkerPool::new(2);
        let pending = pool
            .submit("sleeper", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .unwrap();

        pool.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap();
        assert!(result.is_err());
        assert!(pool.is_shut_down());
        assert!(matches!(
            pool.submit("late", async {}),
            Err(WorkerError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn run_reports_cancellation() {
        let pool = Arc::new(WorkerPool::new(1));
        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.run("long", tokio::time::sleep(Duration::from_secs(60)))
                    .await
            })
        };
        while pool.available() > 0 {
            tokio::task::yield_now().await;
        }
        pool.shutdown();
        let err = runner.await.unwrap().unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled { label } if label == "long"));
    }
}
