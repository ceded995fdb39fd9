//! Fixed-size worker pool for posted jobs.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

type Job = BoxFuture<'static, ()>;

struct Inner {
    sender: Mutex<Option<flume::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

/// A fixed number of worker tasks pulling jobs from one shared queue.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    /// Spawn `size` workers on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an argument error if `size` is zero or no runtime is running.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Argument(
                "worker pool needs at least one worker".to_string(),
            ));
        }
        let runtime = Handle::try_current()
            .map_err(|e| Error::Argument(format!("worker pool needs a tokio runtime: {e}")))?;

        let (sender, receiver) = flume::unbounded::<Job>();
        let workers = (0..size)
            .map(|index| {
                let receiver = receiver.clone();
                runtime.spawn(async move {
                    while let Ok(job) = receiver.recv_async().await {
                        job.await;
                    }
                    debug!("Worker {} stopped", index);
                })
            })
            .collect();

        Ok(Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(sender)),
                workers: Mutex::new(workers),
                size,
            }),
        })
    }

    /// Number of workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Queue `job` for execution on one of the workers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] once the pool has been stopped.
    pub fn post<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.inner.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(Error::Disconnected);
        };
        sender
            .send(Box::pin(job))
            .map_err(|_| Error::Disconnected)
    }

    /// Stop accepting jobs, finish the queued ones and wait for every worker.
    pub async fn stop(&self) {
        drop(self.inner.sender.lock().take());

        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
    }

    /// Whether [`WorkerPool::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.sender.lock().is_none()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.inner.size)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_runs_posted_jobs() {
        let pool = WorkerPool::new(3).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.post(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_post_after_stop_fails() {
        let pool = WorkerPool::new(1).unwrap();
        pool.stop().await;
        assert!(pool.is_stopped());
        assert!(matches!(pool.post(async {}), Err(Error::Disconnected)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(Error::Argument(_))));
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(WorkerPool::new(2), Err(Error::Argument(_))));
    }
}
