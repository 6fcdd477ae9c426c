//! Bounded worker pool for blocking and CPU-bound work.
//!
//! A dispatcher task assigns jobs to the least-loaded worker; each worker
//! executes one blocking job at a time, so at most `workers` blocking jobs
//! run concurrently regardless of how many callers submit.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for a worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub name: String,
    /// Number of workers, i.e. the blocking-concurrency bound.
    pub workers: usize,
    /// Queue capacity per worker.
    pub queue_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "blocking".to_string(),
            workers: 4,
            queue_size: 256,
        }
    }
}

#[derive(Debug)]
pub enum PoolError {
    /// The pool has been shut down.
    Closed,
    /// The job panicked or its result was dropped.
    JobFailed,
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::Closed => write!(f, "worker pool is shut down"),
            PoolError::JobFailed => write!(f, "worker pool job panicked"),
        }
    }
}

impl std::error::Error for PoolError {}

struct WorkerSlot {
    tx: mpsc::Sender<Job>,
    pending: Arc<AtomicUsize>,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub in_flight: usize,
}

pub struct WorkerPool {
    name: String,
    job_tx: mpsc::Sender<Job>,
    slots: Arc<Vec<WorkerSlot>>,
    handles: Vec<JoinHandle<()>>,
    submitted: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let workers = config.workers.max(1);
        let completed = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::with_capacity(workers + 1);
        let mut slots = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, mut rx) = mpsc::channel::<Job>(config.queue_size.max(1));
            let pending = Arc::new(AtomicUsize::new(0));
            let slot_pending = pending.clone();
            let worker_completed = completed.clone();
            let pool_name = config.name.clone();

            let handle = tokio::spawn(async move {
                debug!("Worker {}/{} started", pool_name, worker_id);
                while let Some(job) = rx.recv().await {
                    if let Err(e) = tokio::task::spawn_blocking(job).await {
                        error!("Worker {}/{} job panicked: {}", pool_name, worker_id, e);
                    }
                    slot_pending.fetch_sub(1, Ordering::Relaxed);
                    worker_completed.fetch_add(1, Ordering::Relaxed);
                }
                debug!("Worker {}/{} stopped", pool_name, worker_id);
            });
            handles.push(handle);
            slots.push(WorkerSlot { tx, pending });
        }

        let slots = Arc::new(slots);
        let (job_tx, mut job_rx) = mpsc::channel::<Job>(config.queue_size.max(1));
        let dispatcher_slots = slots.clone();
        let pool_name = config.name.clone();

        let dispatcher = tokio::spawn(async move {
            while let Some(job) = job_rx.recv().await {
                // Least-loaded assignment by pending count.
                let slot = dispatcher_slots
                    .iter()
                    .min_by_key(|s| s.pending.load(Ordering::Relaxed));
                if let Some(slot) = slot {
                    slot.pending.fetch_add(1, Ordering::Relaxed);
                    if slot.tx.send(job).await.is_err() {
                        slot.pending.fetch_sub(1, Ordering::Relaxed);
                        error!("Worker pool {}: worker queue closed", pool_name);
                    }
                }
            }
        });
        handles.push(dispatcher);

        Self {
            name: config.name,
            job_tx,
            slots,
            handles,
            submitted: Arc::new(AtomicU64::new(0)),
            completed,
        }
    }

    /// Runs `f` on the pool and waits for its result.
    pub async fn run<F, T>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = tx.send(f());
        });
        self.job_tx.send(job).await.map_err(|_| PoolError::Closed)?;
        self.submitted.fetch_add(1, Ordering::Relaxed);
        rx.await.map_err(|_| PoolError::JobFailed)
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            in_flight: self
                .slots
                .iter()
                .map(|s| s.pending.load(Ordering::Relaxed))
                .sum(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_result() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        let result = pool.run(|| 2 + 2).await.unwrap();
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn test_many_jobs_all_complete() {
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig {
            name: "test".into(),
            workers: 4,
            queue_size: 64,
        }));

        let mut tasks = Vec::new();
        for i in 0..50u64 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move { pool.run(move || i * 2).await }));
        }
        let mut total = 0;
        for task in tasks {
            total += task.await.unwrap().unwrap();
        }
        assert_eq!(total, (0..50u64).map(|i| i * 2).sum::<u64>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_stays_bounded() {
        let workers = 3;
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig {
            name: "bounded".into(),
            workers,
            queue_size: 64,
        }));

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let pool = pool.clone();
            let current = current.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    current.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let observed = peak.load(Ordering::SeqCst);
        assert!(
            observed <= workers,
            "expected at most {} concurrent jobs, saw {}",
            workers,
            observed
        );
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_pool() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        let failed = pool.run(|| panic!("boom")).await;
        assert!(matches!(failed, Err(PoolError::JobFailed)));

        // The pool keeps serving after a panic.
        let ok = pool.run(|| 7).await.unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test]
    async fn test_metrics_track_completion() {
        let pool = WorkerPool::new(WorkerPoolConfig::default());
        for _ in 0..5 {
            pool.run(|| ()).await.unwrap();
        }
        let metrics = pool.metrics();
        assert_eq!(metrics.submitted, 5);
        assert_eq!(metrics.completed, 5);
        assert_eq!(metrics.in_flight, 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_jobs() {
        let mut pool = WorkerPool::new(WorkerPoolConfig::default());
        pool.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = pool.run(|| 1).await;
        assert!(result.is_err(), "expected error after shutdown");
    }
}
