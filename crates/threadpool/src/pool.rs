//! Cooperative task pool (§4.3).
//!
//! Mirrors the Argobots-backed pool of the original core closely enough
//! to keep the same call shape (`push_work(task, priority)`,
//! `thread_count == 0` meaning "run on the ambient executor") while
//! dropping the ULT-specific API per §9's redesign flag: tasks are
//! ordinary futures, and a worker is a tokio task that awaits one job
//! at a time, which gives the same cooperative-suspension behavior an
//! Argobots ULT would.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::queue::AlternatingQueue;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Inner {
    queue: AlternatingQueue<Job>,
    notify: Notify,
    shutdown: AtomicBool,
}

/// A cooperative worker pool with `push_work(task, priority)` and
/// alternating priority/FIFO dispatch. When constructed with
/// `thread_count == 0` it owns no dedicated workers and instead spawns
/// submitted work directly onto the ambient tokio executor, mirroring
/// the engine's default worker set.
pub struct ThreadPool {
    inner: Option<Arc<Inner>>,
    workers: SyncMutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// `max_priority` is the value (and above) that degrades to plain FIFO.
    pub fn new(thread_count: usize, max_priority: u32) -> Self {
        if thread_count == 0 {
            return Self {
                inner: None,
                workers: SyncMutex::new(Vec::new()),
            };
        }

        let inner = Arc::new(Inner {
            queue: AlternatingQueue::new(max_priority),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(thread_count);
        for _ in 0..thread_count {
            let inner = inner.clone();
            workers.push(tokio::spawn(Self::run_worker(inner)));
        }

        Self {
            inner: Some(inner),
            workers: SyncMutex::new(workers),
        }
    }

    async fn run_worker(inner: Arc<Inner>) {
        loop {
            match inner.queue.try_pop() {
                Some(job) => job.await,
                None => {
                    if inner.shutdown.load(Ordering::Acquire) && inner.queue.is_empty() {
                        return;
                    }
                    inner.notify.notified().await;
                }
            }
        }
    }

    /// Submits `task` for execution at `priority`. Lower values run
    /// sooner among themselves; `priority >= max_priority` is plain
    /// FIFO. Never preempts running tasks.
    pub fn push_work<F>(&self, task: F, priority: u32)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.inner {
            None => {
                tokio::spawn(task);
            }
            Some(inner) => {
                inner.queue.push(Box::pin(task), priority);
                inner.notify.notify_one();
            }
        }
    }

    /// Signals workers to exit once the queue drains; does not block.
    pub fn shutdown(&self) {
        if let Some(inner) = &self.inner {
            inner.shutdown.store(true, Ordering::Release);
            inner.notify.notify_waiters();
        }
    }

    /// Waits for all owned workers to exit. A no-op for a shared
    /// (`thread_count == 0`) pool, since it owns no workers.
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Number of dedicated workers owned by this pool (0 for a shared pool).
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn shared_pool_runs_work_on_ambient_executor() {
        let pool = ThreadPool::new(0, 10);
        assert_eq!(pool.worker_count(), 0);
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        pool.push_work(async move { ran_clone.store(true, Ordering::SeqCst) }, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn owned_pool_runs_all_submitted_work() {
        let pool = ThreadPool::new(2, 10);
        let counter = Arc::new(AtomicU32::new(0));
        for i in 0..20 {
            let counter = counter.clone();
            pool.push_work(
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                i % 3,
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        pool.shutdown();
        pool.join().await;
    }
}
