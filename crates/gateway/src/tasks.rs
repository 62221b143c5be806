//! Bounded pool for command handlers.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    dashmap::DashMap,
    tokio::sync::Semaphore,
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, info, warn},
    wabridge_config::TasksConfig,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: u64,
    pub label: &'static str,
    pub started: Instant,
}

/// Removes a task from the registry however it ends.
struct Registered {
    registry: Arc<DashMap<u64, TaskInfo>>,
    id: u64,
}

impl Drop for Registered {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Runs handler futures with at most `max_concurrent` in flight.
///
/// Tasks beyond the ceiling wait for a permit; none are dropped. Every
/// running task is listed in the registry until it finishes.
pub struct TaskPool {
    permits: Arc<Semaphore>,
    registry: Arc<DashMap<u64, TaskInfo>>,
    next_id: AtomicU64,
    tracker: TaskTracker,
    cancel: CancellationToken,
    grace: Duration,
}

impl TaskPool {
    pub fn new(max_concurrent: usize, grace: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            registry: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            grace,
        }
    }

    pub fn from_config(config: &TasksConfig) -> Self {
        Self::new(config.max_concurrent, config.shutdown_grace())
    }

    /// Queue `task`. Returns its id, or `None` once the pool is shutting down.
    pub fn spawn<F>(&self, label: &'static str, task: F) -> Option<u64>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() || self.tracker.is_closed() {
            warn!(label, "task pool is shutting down, dropping task");
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let permits = Arc::clone(&self.permits);
        let registry = Arc::clone(&self.registry);
        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            let _permit = tokio::select! {
                () = cancel.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            registry.insert(id, TaskInfo {
                id,
                label,
                started: Instant::now(),
            });
            let _registered = Registered { registry, id };

            tokio::select! {
                () = cancel.cancelled() => debug!(id, label, "task cancelled"),
                () = task => {},
            }
        });
        Some(id)
    }

    /// Snapshot of running tasks, oldest first.
    pub fn in_flight(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<_> = self.registry.iter().map(|e| e.value().clone()).collect();
        tasks.sort_by_key(|task| task.started);
        tasks
    }

    /// Tasks spawned and not yet finished, queued ones included.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting tasks, give running ones the grace period, then cancel
    /// whatever is left.
    pub async fn shutdown(&self) {
        self.tracker.close();
        if tokio::time::timeout(self.grace, self.tracker.wait())
            .await
            .is_err()
        {
            let running: Vec<_> = self.in_flight().iter().map(|t| t.label).collect();
            warn!(?running, queued = self.pending(), "cancelling unfinished tasks");
            self.cancel.cancel();
            self.tracker.wait().await;
        }
        info!("task pool stopped");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::atomic::AtomicUsize,
        tokio::sync::{Notify, oneshot},
    };

    #[tokio::test(start_paused = true)]
    async fn ceiling_limits_concurrency_without_dropping() {
        let pool = TaskPool::new(2, Duration::from_secs(5));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
            pool.spawn("download", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn registry_tracks_running_tasks() {
        let pool = TaskPool::new(4, Duration::from_secs(5));
        let release = Arc::new(Notify::new());
        let (started_tx, started_rx) = oneshot::channel();

        let gate = Arc::clone(&release);
        pool.spawn("chatbot", async move {
            let _ = started_tx.send(());
            gate.notified().await;
        });
        started_rx.await.unwrap();

        let running = pool.in_flight();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].label, "chatbot");

        release.notify_one();
        pool.shutdown().await;
        assert!(pool.in_flight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_after_grace() {
        let pool = TaskPool::new(1, Duration::from_secs(2));
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let finished = finished.clone();
            pool.spawn("enhance", async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        let started = tokio::time::Instant::now();
        pool.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(pool.pending(), 0);
        assert!(pool.in_flight().is_empty());
    }

    #[tokio::test]
    async fn rejects_tasks_after_shutdown() {
        let pool = TaskPool::new(1, Duration::from_secs(1));
        pool.shutdown().await;
        assert!(pool.spawn("send", async {}).is_none());
    }
}
