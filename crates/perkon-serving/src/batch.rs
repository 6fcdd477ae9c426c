//! Chunked batch execution with bounded concurrency and adaptive sizing.
//!
//! Items are split into chunks executed concurrently up to a configured
//! bound; results always come back aligned to the input order, and one
//! item's failure never fails the batch. Chunk size adapts to keep the
//! average chunk duration near a latency target.

use futures::stream::{self, StreamExt};
use perkon_core::config::BatchConfig;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::pool::WorkerPool;

/// Status of a tracked batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One item's failure, isolated from the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BatchItemFailure {
    pub index: usize,
    pub error: String,
}

/// Result of a batch run, aligned to the input order.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub job_id: String,
    pub results: Vec<Result<T, BatchItemFailure>>,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl<T> BatchOutcome<T> {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failures(&self) -> Vec<&BatchItemFailure> {
        self.results.iter().filter_map(|r| r.as_ref().err()).collect()
    }
}

/// Cumulative processor counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchStats {
    /// Chunks executed.
    pub batches: u64,
    pub items: u64,
    pub avg_batch_ms: f64,
    pub throughput_per_sec: f64,
    pub current_chunk_size: usize,
}

struct JobEntry {
    status: JobStatus,
    cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct JobTable {
    entries: FxHashMap<String, JobEntry>,
    order: VecDeque<String>,
}

const JOB_HISTORY: usize = 100;

impl JobTable {
    fn insert(&mut self, id: String, entry: JobEntry) {
        self.order.push_back(id.clone());
        self.entries.insert(id, entry);
        while self.order.len() > JOB_HISTORY {
            if let Some(old) = self.order.pop_front() {
                self.entries.remove(&old);
            }
        }
    }
}

struct ChunkOutcome<T> {
    len: usize,
    result: Result<Vec<T>, String>,
    elapsed: Option<Duration>,
}

pub struct BatchProcessor {
    config: BatchConfig,
    /// Current adaptive chunk cap, starts at `max_chunk_size`.
    chunk_size: AtomicUsize,
    durations: Mutex<VecDeque<Duration>>,
    pool: Option<Arc<WorkerPool>>,
    batches: AtomicU64,
    items: AtomicU64,
    total_batch_ms: AtomicU64,
    total_job_ms: AtomicU64,
    jobs: Mutex<JobTable>,
}

impl BatchProcessor {
    pub fn new(config: BatchConfig) -> Self {
        let initial = config.max_chunk_size.max(1);
        Self {
            config,
            chunk_size: AtomicUsize::new(initial),
            durations: Mutex::new(VecDeque::new()),
            pool: None,
            batches: AtomicU64::new(0),
            items: AtomicU64::new(0),
            total_batch_ms: AtomicU64::new(0),
            total_job_ms: AtomicU64::new(0),
            jobs: Mutex::new(JobTable::default()),
        }
    }

    /// Attaches a worker pool for [`BatchProcessor::process_blocking`].
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Registers a job up front so it can be cancelled independently of the
    /// `process_job` call.
    pub fn create_job(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert(
            id.clone(),
            JobEntry {
                status: JobStatus::Pending,
                cancel: Arc::new(AtomicBool::new(false)),
            },
        );
        id
    }

    pub fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.entries.get(job_id).map(|e| e.status)
    }

    /// Cooperatively cancels a job: marks it failed and stops scheduling
    /// further chunks. In-flight chunks finish on their own.
    pub fn cancel(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = jobs.entries.get_mut(job_id) {
            if entry.status == JobStatus::Pending || entry.status == JobStatus::InProgress {
                entry.cancel.store(true, Ordering::Relaxed);
                entry.status = JobStatus::Failed;
                return true;
            }
        }
        false
    }

    /// Runs `worker` over chunks of `items`, at most `chunk_concurrency`
    /// chunks in flight. A chunk-level error fails only that chunk's items.
    pub async fn process<I, T, F, Fut>(&self, items: Vec<I>, worker: F) -> BatchOutcome<T>
    where
        I: Send,
        T: Send,
        F: Fn(Vec<I>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, String>> + Send,
    {
        let job_id = self.create_job();
        self.process_job(&job_id, items, worker).await
    }

    /// Like [`BatchProcessor::process`], against a pre-created job id.
    pub async fn process_job<I, T, F, Fut>(
        &self,
        job_id: &str,
        items: Vec<I>,
        worker: F,
    ) -> BatchOutcome<T>
    where
        I: Send,
        T: Send,
        F: Fn(Vec<I>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, String>> + Send,
    {
        let started = Instant::now();
        let cancel = self.job_cancel_flag(job_id);
        let total = items.len();
        self.set_status(job_id, JobStatus::InProgress);

        let chunk_size = self.effective_chunk_size(total);
        let chunks = split_chunks(items, chunk_size);

        let worker_ref = &worker;
        let outcomes: Vec<ChunkOutcome<T>> = stream::iter(chunks)
            .map(|chunk| {
                let cancel = cancel.clone();
                async move {
                    let len = chunk.len();
                    if cancel.load(Ordering::Relaxed) {
                        return ChunkOutcome {
                            len,
                            result: Err("job cancelled".to_string()),
                            elapsed: None,
                        };
                    }
                    let chunk_started = Instant::now();
                    let result = worker_ref(chunk).await;
                    ChunkOutcome {
                        len,
                        result,
                        elapsed: Some(chunk_started.elapsed()),
                    }
                }
            })
            .buffered(self.config.chunk_concurrency.max(1))
            .collect()
            .await;

        let results = self.assemble(outcomes);
        self.finish_job(job_id, total, started.elapsed());
        self.adapt();

        let cancelled = cancel.load(Ordering::Relaxed);
        BatchOutcome {
            job_id: job_id.to_string(),
            results,
            elapsed: started.elapsed(),
            cancelled,
        }
    }

    /// Runs `worker` per item with bounded per-item concurrency. Used for
    /// workloads that cannot be chunked.
    pub async fn process_items<I, T, F, Fut>(&self, items: Vec<I>, worker: F) -> BatchOutcome<T>
    where
        I: Send,
        T: Send,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, String>> + Send,
    {
        let job_id = self.create_job();
        let started = Instant::now();
        let cancel = self.job_cancel_flag(&job_id);
        let total = items.len();
        self.set_status(&job_id, JobStatus::InProgress);

        let worker_ref = &worker;
        let mut indexed: Vec<(usize, Result<T, String>)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let cancel = cancel.clone();
                async move {
                    if cancel.load(Ordering::Relaxed) {
                        return (index, Err("job cancelled".to_string()));
                    }
                    (index, worker_ref(item).await)
                }
            })
            .buffer_unordered(self.config.item_concurrency.max(1))
            .collect()
            .await;
        indexed.sort_unstable_by_key(|(index, _)| *index);

        let results = indexed
            .into_iter()
            .map(|(index, result)| result.map_err(|error| BatchItemFailure { index, error }))
            .collect();

        self.finish_job(&job_id, total, started.elapsed());
        let cancelled = cancel.load(Ordering::Relaxed);
        BatchOutcome {
            job_id,
            results,
            elapsed: started.elapsed(),
            cancelled,
        }
    }

    /// Runs a blocking per-item function over chunks, each chunk dispatched
    /// to the attached worker pool so the scheduler is never blocked. Falls
    /// back to inline execution when no pool is attached.
    pub async fn process_blocking<I, T, F>(&self, items: Vec<I>, f: F) -> BatchOutcome<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Result<T, String> + Clone + Send + 'static,
    {
        let pool = self.pool.clone();
        let f_outer = f.clone();
        self.process(items, move |chunk: Vec<I>| {
            let pool = pool.clone();
            let f = f_outer.clone();
            async move {
                match pool {
                    Some(pool) => pool
                        .run(move || chunk.into_iter().map(f).collect::<Result<Vec<T>, String>>())
                        .await
                        .map_err(|e| e.to_string())?,
                    None => chunk.into_iter().map(f).collect::<Result<Vec<T>, String>>(),
                }
            }
        })
        .await
    }

    /// Recomputes the chunk cap from recent chunk durations: shrink when the
    /// recent mean exceeds the target, grow when it sits under half of it.
    pub fn adapt(&self) -> usize {
        let mean_ms = {
            let durations = self.durations.lock().unwrap_or_else(|e| e.into_inner());
            if durations.is_empty() {
                return self.chunk_size.load(Ordering::Relaxed);
            }
            let total: f64 = durations.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
            total / durations.len() as f64
        };

        let current = self.chunk_size.load(Ordering::Relaxed);
        let target = self.config.target_batch_ms as f64;
        let next = if mean_ms > target {
            (current as f64 * self.config.shrink_factor).round() as usize
        } else if mean_ms < target / 2.0 {
            (current as f64 * self.config.grow_factor).round() as usize
        } else {
            current
        };
        let next = next.clamp(self.config.min_chunk_size, self.config.max_chunk_size);
        if next != current {
            debug!(
                "Adaptive chunk size {} -> {} (mean batch {:.0}ms, target {}ms)",
                current, next, mean_ms, target
            );
            self.chunk_size.store(next, Ordering::Relaxed);
        }
        next
    }

    pub fn current_chunk_size(&self) -> usize {
        self.chunk_size.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Directly sets the chunk cap, clamped to the configured bounds.
    pub fn set_chunk_size(&self, size: usize) {
        let clamped = size.clamp(self.config.min_chunk_size, self.config.max_chunk_size);
        self.chunk_size.store(clamped, Ordering::Relaxed);
    }

    pub fn stats(&self) -> BatchStats {
        let batches = self.batches.load(Ordering::Relaxed);
        let items = self.items.load(Ordering::Relaxed);
        let total_batch_ms = self.total_batch_ms.load(Ordering::Relaxed);
        let total_job_ms = self.total_job_ms.load(Ordering::Relaxed);
        BatchStats {
            batches,
            items,
            avg_batch_ms: if batches == 0 {
                0.0
            } else {
                total_batch_ms as f64 / batches as f64
            },
            throughput_per_sec: if total_job_ms == 0 {
                0.0
            } else {
                items as f64 / (total_job_ms as f64 / 1000.0)
            },
            current_chunk_size: self.current_chunk_size(),
        }
    }

    /// Chunk size for this run: the adaptive cap, bounded by the item count.
    fn effective_chunk_size(&self, total: usize) -> usize {
        self.chunk_size.load(Ordering::Relaxed).min(total).max(1)
    }

    fn job_cancel_flag(&self, job_id: &str) -> Arc<AtomicBool> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.entries
            .get(job_id)
            .map(|e| e.cancel.clone())
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)))
    }

    fn set_status(&self, job_id: &str, status: JobStatus) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = jobs.entries.get_mut(job_id) {
            // A cancelled job stays failed.
            if entry.status != JobStatus::Failed {
                entry.status = status;
            }
        }
    }

    fn finish_job(&self, job_id: &str, item_count: usize, elapsed: Duration) {
        self.items.fetch_add(item_count as u64, Ordering::Relaxed);
        self.total_job_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.set_status(job_id, JobStatus::Completed);
    }

    fn assemble<T>(&self, outcomes: Vec<ChunkOutcome<T>>) -> Vec<Result<T, BatchItemFailure>> {
        let mut results = Vec::new();
        for outcome in outcomes {
            if let Some(elapsed) = outcome.elapsed {
                self.batches.fetch_add(1, Ordering::Relaxed);
                self.total_batch_ms
                    .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
                let mut durations = self.durations.lock().unwrap_or_else(|e| e.into_inner());
                durations.push_back(elapsed);
                while durations.len() > self.config.adapt_window {
                    durations.pop_front();
                }
            }

            let base = results.len();
            match outcome.result {
                Ok(values) if values.len() == outcome.len => {
                    results.extend(values.into_iter().map(Ok));
                }
                Ok(values) => {
                    let error = format!(
                        "worker returned {} results for {} items",
                        values.len(),
                        outcome.len
                    );
                    for offset in 0..outcome.len {
                        results.push(Err(BatchItemFailure {
                            index: base + offset,
                            error: error.clone(),
                        }));
                    }
                }
                Err(error) => {
                    for offset in 0..outcome.len {
                        results.push(Err(BatchItemFailure {
                            index: base + offset,
                            error: error.clone(),
                        }));
                    }
                }
            }
        }
        results
    }
}

fn split_chunks<I>(items: Vec<I>, chunk_size: usize) -> Vec<Vec<I>> {
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(chunk_size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
