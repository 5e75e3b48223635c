//! Fixed-size task executor with a bounded queue, panic recovery, graceful
//! drain, and lock-free metrics (§4.D), plus the separate counting semaphore
//! that globally bounds simultaneous image decodes (§4.E).

pub mod cancel;

use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::error;

pub use cancel::CancelToken;

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
}

pub struct Metrics {
    counters: Arc<Counters>,
    queue_capacity: usize,
    worker_count: usize,
    queue_len: Arc<AtomicUsize>,
}

impl Metrics {
    pub fn submitted(&self) -> u64 {
        self.counters.submitted.load(Ordering::Relaxed)
    }
    pub fn executed(&self) -> u64 {
        self.counters.executed.load(Ordering::Relaxed)
    }
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

/// Owned by the application root, passed by reference to upload, retrieval,
/// and scanner services. No process-wide singleton.
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Task>>,
    counters: Arc<Counters>,
    queue_len: Arc<AtomicUsize>,
    queue_capacity: usize,
    worker_count: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::channel::<Task>(queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let queue_len = Arc::new(AtomicUsize::new(0));
        let shared_rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let rx = shared_rx.clone();
            let counters = counters.clone();
            let queue_len = queue_len.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let task = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(task) = task else {
                        break;
                    };
                    queue_len.fetch_sub(1, Ordering::Relaxed);
                    // AssertUnwindSafe: a panicking task leaves no invariant
                    // for this pool to uphold beyond "don't kill the worker".
                    let result = std::panic::AssertUnwindSafe(task).catch_unwind().await;
                    match result {
                        Ok(()) => {
                            counters.executed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(panic) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            let message = panic
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "non-string panic payload".to_string());
                            error!(panic = %message, "worker pool task panicked");
                        }
                    }
                }
            }));
        }

        Self {
            sender: Some(tx),
            counters,
            queue_len,
            queue_capacity: queue_capacity.max(1),
            worker_count,
            workers: Mutex::new(workers),
        }
    }

    /// Non-blocking offer. Returns `false` iff the pool is closed or the
    /// queue is full; never blocks the caller.
    pub fn submit(&self, task: impl Future<Output = ()> + Send + 'static) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(Box::pin(task)) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                self.queue_len.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            counters: self.counters.clone(),
            queue_capacity: self.queue_capacity,
            worker_count: self.worker_count,
            queue_len: self.queue_len.clone(),
        }
    }

    /// Closes the intake and drains in-flight tasks. Idempotent.
    pub async fn stop(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Global bound on simultaneous image decoders (default 2). Distinct from
/// worker count because decoding dominates memory while the queue may
/// otherwise hold many cheap I/O-bound stages.
pub struct DecodeSemaphore {
    inner: tokio::sync::Semaphore,
}

impl DecodeSemaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            inner: tokio::sync::Semaphore::new(permits),
        }
    }

    /// Acquires a permit, honoring cancellation. Returns `None` if cancelled
    /// first.
    pub async fn acquire(&self, cancel: &CancelToken) -> Option<tokio::sync::SemaphorePermit<'_>> {
        tokio::select! {
            permit = self.inner.acquire() => permit.ok(),
            _ = cancel.cancelled() => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[tokio::test]
    async fn submit_runs_the_task_and_updates_metrics() {
        let pool = WorkerPool::new(2, 4);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        assert!(pool.submit(async move {
            ran2.store(true, Ordering::SeqCst);
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(pool.metrics().executed(), 1);
        assert_eq!(pool.metrics().submitted(), 1);
    }

    #[tokio::test]
    async fn submit_returns_false_once_queue_is_full() {
        let pool = WorkerPool::new(1, 1);
        let (blocker_tx, blocker_rx) = tokio::sync::oneshot::channel::<()>();
        let mut blocker_rx = Some(blocker_rx);
        assert!(pool.submit(async move {
            let _ = blocker_rx.take().unwrap().await;
        }));
        // give the only worker a moment to pick up the blocking task
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pool.submit(async {}));
        assert!(!pool.submit(async {}));
        let _ = blocker_tx.send(());
    }

    #[tokio::test]
    async fn a_panicking_task_increments_the_failed_counter_and_the_pool_keeps_running() {
        let pool = WorkerPool::new(1, 4);
        assert!(pool.submit(async {
            panic!("boom");
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.metrics().failed(), 1);

        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        assert!(pool.submit(async move {
            ran2.store(true, Ordering::SeqCst);
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_submit_fails_after_stop() {
        let mut pool = WorkerPool::new(1, 4);
        pool.stop().await;
        pool.stop().await;
        assert!(!pool.submit(async {}));
    }

    #[tokio::test]
    async fn decode_semaphore_honors_cancellation() {
        let sem = DecodeSemaphore::new(1);
        let cancel = CancelToken::new();
        let _first = sem.acquire(&cancel).await.unwrap();
        cancel.cancel();
        assert!(sem.acquire(&cancel).await.is_none());
    }
}
