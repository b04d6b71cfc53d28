//! Worker-pool scheduler.
//!
//! [`Scheduler`] owns an [`AgingPriorityQueue`] of jobs and drives it with one
//! or more worker loops. Each loop waits for the most urgent job, executes it,
//! reports the outcome to the completion hook and waits again, until its
//! cancellation token fires.
//!
//! ```rust,ignore
//! let scheduler = Scheduler::new();
//! scheduler.add_priority(Priority::new("Urgent", 0))?;
//! scheduler.add_priority(Priority::new("Background", 100))?;
//! scheduler.set_default_job_aging(Duration::from_secs(1))?;
//!
//! let job = Job::new(|_| async { JobResult::value(42_u64) });
//! scheduler.schedule(&Priority::new("Background", 100), job.clone())?;
//!
//! let token = CancelToken::with_timeout(Duration::from_secs(5));
//! tokio::spawn({
//!     let scheduler = scheduler.clone();
//!     let token = token.clone();
//!     async move { scheduler.run(&token, 4).await }
//! });
//! let result = job.wait_result(&token).await;
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::cancel::CancelToken;
use crate::error::{Result, SchedulerError};
use crate::job::{panic_message, Job};
use crate::priority::Priority;
use crate::queue::{AgingPriorityQueue, QueueStats};
use crate::result::JobResult;
use crate::telemetry::metrics::SchedulerMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Completion Reporting
// ═══════════════════════════════════════════════════════════════════════════════

/// What the completion hook sees after each execution.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    /// The executed job
    pub job: Arc<Job>,
    /// Priority the job was scheduled with
    pub original_priority: Priority,
    /// Priority the job held when a worker picked it up
    pub priority: Priority,
    /// The published result
    pub result: Arc<JobResult>,
    /// Time between scheduling and pickup
    pub waited: Duration,
    /// Number of aging promotions
    pub promotions: u32,
    /// Index of the worker that ran the job
    pub worker: usize,
}

impl CompletedJob {
    pub fn was_promoted(&self) -> bool {
        self.promotions > 0
    }
}

/// Callback invoked on the executing worker after every job.
pub type CompletionHook = Arc<dyn Fn(&CompletedJob) + Send + Sync>;

/// Scheduler statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    /// Queue statistics
    pub queue: QueueStats,
    /// Jobs executed
    pub executed: u64,
    /// Jobs whose result carried an error
    pub failed: u64,
    /// Worker loops currently running
    pub active_workers: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct SweeperSlot {
    leases: usize,
    token: Option<CancelToken>,
}

struct SchedulerInner {
    queue: Arc<AgingPriorityQueue<Arc<Job>>>,
    hook: RwLock<Option<CompletionHook>>,
    started: AtomicBool,
    sweeper: Mutex<SweeperSlot>,
    executed: AtomicU64,
    failed: AtomicU64,
    active_workers: AtomicUsize,
    next_worker: AtomicUsize,
}

/// Keeps the aging sweeper alive while at least one worker loop runs.
struct SweeperLease {
    inner: Arc<SchedulerInner>,
}

impl Drop for SweeperLease {
    fn drop(&mut self) {
        let mut slot = self.inner.sweeper.lock();
        slot.leases = slot.leases.saturating_sub(1);
        if slot.leases == 0 {
            if let Some(token) = slot.token.take() {
                token.cancel();
            }
        }
    }
}

/// Priority job scheduler with aging. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queue", &self.inner.queue)
            .field("started", &self.inner.started.load(Ordering::Relaxed))
            .field("has_hook", &self.inner.hook.read().is_some())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler with no priorities registered.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: Arc::new(AgingPriorityQueue::new()),
                hook: RwLock::new(None),
                started: AtomicBool::new(false),
                sweeper: Mutex::new(SweeperSlot::default()),
                executed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                active_workers: AtomicUsize::new(0),
                next_worker: AtomicUsize::new(0),
            }),
        }
    }

    // ─── Configuration ─────────────────────────────────────────────────────────

    /// Register a priority level.
    pub fn add_priority(&self, priority: Priority) -> Result<()> {
        self.inner.queue.set_priority(priority)
    }

    /// Override the aging timeslice of a registered priority. Zero disables
    /// aging for it.
    pub fn set_priority_aging(&self, priority: &Priority, timeslice: Duration) -> Result<()> {
        self.inner.queue.set_aging_timeslice(priority, timeslice)
    }

    /// Aging timeslice for priorities that do not set their own.
    pub fn set_default_job_aging(&self, timeslice: Duration) -> Result<()> {
        self.inner.queue.set_default_aging_timeslice(timeslice)
    }

    /// How often waiting jobs are checked for promotion.
    pub fn refresh_every(&self, interval: Duration) -> Result<()> {
        self.inner.queue.set_sweep_interval(interval)
    }

    /// Install the completion hook. Must happen before any worker starts.
    pub fn set_completion_hook<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(&CompletedJob) + Send + Sync + 'static,
    {
        let mut slot = self.inner.hook.write();
        if self.inner.started.load(Ordering::Acquire) {
            tracing::warn!("Completion hook rejected: scheduler already running");
            return Err(SchedulerError::hook_after_start());
        }
        *slot = Some(Arc::new(hook));
        Ok(())
    }

    /// Registered priorities, most urgent first.
    pub fn priorities(&self) -> Vec<Priority> {
        self.inner.queue.priorities()
    }

    // ─── Submission ────────────────────────────────────────────────────────────

    /// Queue a job at `priority`.
    pub fn schedule(&self, priority: &Priority, job: Arc<Job>) -> Result<()> {
        let job_id = job.id();
        self.inner.queue.enqueue(priority, job)?;
        SchedulerMetrics::record_scheduled(priority.rank());
        tracing::debug!(job_id = %job_id, priority = %priority, "Job scheduled");
        Ok(())
    }

    /// Number of jobs waiting.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue: self.inner.queue.stats(),
            executed: self.inner.executed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            active_workers: self.inner.active_workers.load(Ordering::Relaxed),
        }
    }

    // ─── Execution ─────────────────────────────────────────────────────────────

    /// Run a single worker loop on the current task until `token` fires.
    ///
    /// Always returns an error: `Timeout` or `Cancelled` when the token fires,
    /// `WorkerPanicked` when the completion hook panics.
    pub async fn run_one(&self, token: &CancelToken) -> Result<()> {
        self.mark_started();
        let worker = self.inner.next_worker.fetch_add(1, Ordering::Relaxed);
        Err(self.run_worker(worker, token.clone()).await)
    }

    /// Run `workers` parallel worker loops until `token` fires or one of them
    /// fails, and return the first error observed.
    pub async fn run(&self, token: &CancelToken, workers: usize) -> Result<()> {
        if workers == 0 {
            return Err(SchedulerError::invalid_parameter(
                "workers",
                "at least one worker is required",
            ));
        }
        self.mark_started();

        tracing::info!(workers, "Scheduler starting");

        let shared = token.child();
        let mut set = JoinSet::new();
        // Indices stay unique across concurrent `run` and `run_one` calls.
        let first = self.inner.next_worker.fetch_add(workers, Ordering::Relaxed);
        for worker in first..first + workers {
            let scheduler = self.clone();
            let token = shared.clone();
            set.spawn(async move { scheduler.run_worker(worker, token).await });
        }

        let mut first_error: Option<SchedulerError> = None;
        while let Some(joined) = set.join_next().await {
            let error = joined.unwrap_or_else(|e| {
                SchedulerError::internal(format!("Worker task failed: {}", e)).with_source(e)
            });
            if first_error.is_none() {
                // Unwind the remaining workers.
                shared.cancel();
                first_error = Some(error);
            }
        }

        let error = first_error
            .unwrap_or_else(|| SchedulerError::internal("Scheduler stopped without workers"));
        tracing::info!(reason = %error, "Scheduler stopped");
        Err(error)
    }

    fn mark_started(&self) {
        let _hook = self.inner.hook.write();
        self.inner.started.store(true, Ordering::Release);
    }

    fn acquire_sweeper(&self) -> SweeperLease {
        let mut slot = self.inner.sweeper.lock();
        if slot.leases == 0 {
            let token = CancelToken::new();
            // Detached; the lease cancels it.
            let _handle = self.inner.queue.spawn_sweeper(token.clone());
            slot.token = Some(token);
        }
        slot.leases += 1;
        SweeperLease {
            inner: Arc::clone(&self.inner),
        }
    }

    /// A worker loop with panics converted into its terminal error.
    async fn run_worker(&self, worker: usize, token: CancelToken) -> SchedulerError {
        let _lease = self.acquire_sweeper();
        self.inner.active_workers.fetch_add(1, Ordering::Relaxed);
        SchedulerMetrics::worker_started();
        tracing::info!(worker, "Worker started");

        let outcome = AssertUnwindSafe(self.worker_loop(worker, &token))
            .catch_unwind()
            .await;
        let error = outcome.unwrap_or_else(|panic| {
            SchedulerError::worker_panicked(worker, panic_message(panic.as_ref()))
        });

        self.inner.active_workers.fetch_sub(1, Ordering::Relaxed);
        SchedulerMetrics::worker_stopped();
        if error.is_interruption() {
            tracing::info!(worker, reason = %error, "Worker stopped");
        } else {
            error.log();
        }
        error
    }

    async fn worker_loop(&self, worker: usize, token: &CancelToken) -> SchedulerError {
        let hook = self.inner.hook.read().clone();

        loop {
            let entry = match self.inner.queue.wait_dequeue(token).await {
                Ok(entry) => entry,
                Err(error) => return error,
            };

            let waited = entry.waited();
            let promotions = entry.promotions();
            let original_priority = entry.original_priority().clone();
            let priority = entry.current_priority().clone();
            let job = entry.into_item();

            tracing::debug!(
                worker,
                job_id = %job.id(),
                original = %original_priority,
                priority = %priority,
                promotions,
                waited_ms = waited.as_millis() as u64,
                "Job dequeued"
            );

            let result = match job.execute(token).await {
                Ok(result) => result,
                Err(error) => {
                    // Scheduled more than once; the first run already reported.
                    error.log();
                    continue;
                }
            };

            self.inner.executed.fetch_add(1, Ordering::Relaxed);
            if !result.is_ok() {
                self.inner.failed.fetch_add(1, Ordering::Relaxed);
            }
            SchedulerMetrics::record_completed(original_priority.rank(), !result.is_ok(), waited);

            if let Some(hook) = &hook {
                hook(&CompletedJob {
                    job,
                    original_priority,
                    priority,
                    result,
                    waited,
                    promotions,
                    worker,
                });
            }
        }
    }
}
