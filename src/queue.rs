use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    stopping: bool,
}

/// FIFO hand-off between the accept loop and the workers.
///
/// Unbounded: `push` never waits, so a slow pool under sustained load lets
/// the queue grow without limit.
#[derive(Debug)]
pub struct DispatchQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> Default for DispatchQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DispatchQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                stopping: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // nothing panics while holding the lock, but don't wedge the pool if it did
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        self.lock().items.push_back(item);
        self.notify.notify_one();
    }

    /// Waits for the next item. Returns `None` once the queue has been closed
    /// and everything already queued has been handed out.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking so a close() in between is not missed
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.stopping {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Requests stop and wakes every waiting worker.
    pub fn close(&self) {
        self.lock().stopping = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().stopping
    }

    /// Removes everything still queued.
    pub fn drain(&self) -> Vec<T> {
        self.lock().items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters shared by every worker in a pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    active: AtomicUsize,
    peak: AtomicUsize,
    handled: AtomicUsize,
}

impl PoolStats {
    /// Workers currently holding a connection.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest `active` value observed so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Items fully processed (successfully or not).
    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    fn begin(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.handled.fetch_add(1, Ordering::SeqCst);
    }
}

struct Worker {
    id: usize,
    task: JoinHandle<()>,
}

/// A fixed set of long-lived workers draining a [`DispatchQueue`].
pub struct WorkerPool {
    workers: Vec<Worker>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Spawns `size` workers that feed queued items to `handler`.
    ///
    /// Each item runs in its own task so a panicking handler only loses that
    /// item; the worker keeps going.
    ///
    /// # Panics
    /// Panics if `size` is zero.
    pub fn spawn<T, F, Fut>(
        size: usize,
        queue: Arc<DispatchQueue<T>>,
        stats: Arc<PoolStats>,
        handler: F,
    ) -> Self
    where
        T: Send + 'static,
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        assert!(size > 0);

        let handler = Arc::new(handler);
        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let queue = Arc::clone(&queue);
            let stats = Arc::clone(&stats);
            let handler = Arc::clone(&handler);

            let task = tokio::spawn(async move {
                debug!(worker = id, "worker started");
                while let Some(item) = queue.pop().await {
                    stats.begin();
                    if let Err(e) = tokio::spawn(handler(id, item)).await {
                        error!(worker = id, error = %e, "handler aborted");
                    }
                    stats.finish();
                }
                debug!(worker = id, "worker exiting");
            });
            workers.push(Worker { id, task });
        }

        WorkerPool { workers, stats }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Waits for every worker to finish. Call after closing the queue.
    pub async fn join(mut self) {
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.task.await {
                error!(worker = worker.id, error = %e, "worker task failed");
            }
        }
        info!("all workers joined");
    }
}
