//! Aging priority queue.
//!
//! Pending entries live in one FIFO bucket per registered rank. Consumers take
//! from the most urgent non-empty bucket and block on a [`Notify`] while the
//! queue is empty. A periodic sweep promotes entries that have waited longer
//! than their bucket's aging timeslice to the next more urgent registered rank,
//! so low-priority work cannot starve.
//!
//! Every bucket is appended at "now" (on enqueue and on promotion), so it stays
//! ordered by `last_promoted_at` and the entries due for promotion always form a
//! prefix. A sweep walks buckets from most to least urgent; an entry promoted
//! into a bucket that was already visited is not looked at again, which bounds
//! promotion to one level per sweep.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::error::{Result, SchedulerError};
use crate::priority::{Aging, Priority};
use crate::telemetry::metrics::SchedulerMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Queued Entry
// ═══════════════════════════════════════════════════════════════════════════════

/// An item waiting in the queue together with its aging bookkeeping.
#[derive(Debug)]
pub struct QueuedEntry<T> {
    item: T,
    original: Priority,
    current: Priority,
    enqueued_at: Instant,
    last_promoted_at: Instant,
    promotions: u32,
}

impl<T> QueuedEntry<T> {
    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn into_item(self) -> T {
        self.item
    }

    /// The priority the item was enqueued with.
    pub fn original_priority(&self) -> &Priority {
        &self.original
    }

    /// The priority the item holds now. Never less urgent than the original.
    pub fn current_priority(&self) -> &Priority {
        &self.current
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn last_promoted_at(&self) -> Instant {
        self.last_promoted_at
    }

    pub fn promotions(&self) -> u32 {
        self.promotions
    }

    /// Time spent in the queue so far.
    pub fn waited(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queue Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Queue statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    /// Pending entries per registered rank
    pub pending_by_rank: BTreeMap<i64, usize>,
    /// Total pending entries
    pub pending: usize,
    /// Promotions performed since the queue was created
    pub promoted_total: u64,
    /// Sweeps performed since the queue was created
    pub sweeps_total: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queue
// ═══════════════════════════════════════════════════════════════════════════════

struct Bucket<T> {
    priority: Priority,
    entries: VecDeque<QueuedEntry<T>>,
}

struct QueueState<T> {
    buckets: BTreeMap<i64, Bucket<T>>,
    default_aging: Option<Duration>,
    sweep_interval: Option<Duration>,
    promoted_total: u64,
    sweeps_total: u64,
}

impl<T> QueueState<T> {
    fn timeslice(&self, priority: &Priority) -> Option<Duration> {
        match priority.aging_policy() {
            Aging::Disabled => None,
            Aging::After(d) => Some(d),
            Aging::Inherit => self.default_aging,
        }
    }

    fn effective_sweep_interval(&self) -> Option<Duration> {
        if self.sweep_interval.is_some() {
            return self.sweep_interval;
        }
        self.buckets
            .values()
            .filter_map(|b| match b.priority.aging_policy() {
                Aging::After(d) => Some(d),
                _ => None,
            })
            .chain(self.default_aging)
            .min()
    }

    fn pop_front(&mut self) -> Option<QueuedEntry<T>> {
        let (rank, bucket) = self
            .buckets
            .iter_mut()
            .find(|(_, bucket)| !bucket.entries.is_empty())?;
        let entry = bucket.entries.pop_front()?;
        SchedulerMetrics::set_queue_depth(*rank, bucket.entries.len());
        Some(entry)
    }

    fn pending(&self) -> usize {
        self.buckets.values().map(|b| b.entries.len()).sum()
    }
}

/// Priority queue whose waiting entries grow more urgent over time.
pub struct AgingPriorityQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Notify,
    config_changed: Notify,
}

impl<T> Default for AgingPriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for AgingPriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AgingPriorityQueue")
            .field("ranks", &state.buckets.keys().collect::<Vec<_>>())
            .field("pending", &state.pending())
            .field("default_aging", &state.default_aging)
            .field("sweep_interval", &state.sweep_interval)
            .finish()
    }
}

impl<T> AgingPriorityQueue<T> {
    /// Create an empty queue with no registered priorities.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                buckets: BTreeMap::new(),
                default_aging: None,
                sweep_interval: None,
                promoted_total: 0,
                sweeps_total: 0,
            }),
            available: Notify::new(),
            config_changed: Notify::new(),
        }
    }

    // ─── Configuration ─────────────────────────────────────────────────────────

    /// Register a priority level. Its rank must not be registered yet.
    pub fn set_priority(&self, priority: Priority) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.buckets.contains_key(&priority.rank()) {
                return Err(SchedulerError::duplicate_priority(priority.rank()));
            }
            tracing::debug!(priority = %priority, aging = ?priority.aging(), "Priority registered");
            state.buckets.insert(
                priority.rank(),
                Bucket {
                    priority,
                    entries: VecDeque::new(),
                },
            );
        }
        self.config_changed.notify_waiters();
        Ok(())
    }

    /// Override the aging timeslice of a registered priority. Zero disables aging.
    pub fn set_aging_timeslice(&self, priority: &Priority, timeslice: Duration) -> Result<()> {
        {
            let mut state = self.state.lock();
            let bucket = state
                .buckets
                .get_mut(&priority.rank())
                .ok_or_else(|| SchedulerError::unregistered_priority(priority.rank()))?;
            bucket.priority = bucket.priority.with_aging(timeslice);
        }
        self.config_changed.notify_waiters();
        Ok(())
    }

    /// Set the timeslice used by priorities without their own.
    pub fn set_default_aging_timeslice(&self, timeslice: Duration) -> Result<()> {
        if timeslice.is_zero() {
            return Err(SchedulerError::zero_duration("default_aging"));
        }
        self.state.lock().default_aging = Some(timeslice);
        self.config_changed.notify_waiters();
        Ok(())
    }

    /// Fix how often the sweeper runs.
    pub fn set_sweep_interval(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(SchedulerError::zero_duration("sweep_interval"));
        }
        self.state.lock().sweep_interval = Some(interval);
        self.config_changed.notify_waiters();
        Ok(())
    }

    /// The registered priority for `rank`.
    pub fn priority(&self, rank: i64) -> Option<Priority> {
        self.state
            .lock()
            .buckets
            .get(&rank)
            .map(|b| b.priority.clone())
    }

    /// All registered priorities, most urgent first.
    pub fn priorities(&self) -> Vec<Priority> {
        self.state
            .lock()
            .buckets
            .values()
            .map(|b| b.priority.clone())
            .collect()
    }

    pub fn default_aging_timeslice(&self) -> Option<Duration> {
        self.state.lock().default_aging
    }

    /// The explicit sweep interval, or the smallest non-zero aging timeslice.
    /// `None` when nothing ages.
    pub fn effective_sweep_interval(&self) -> Option<Duration> {
        self.state.lock().effective_sweep_interval()
    }

    // ─── Queue Operations ──────────────────────────────────────────────────────

    /// Append an item to the bucket of `priority`.
    ///
    /// Fails with [`ErrorCode::UnknownPriority`](crate::error::ErrorCode::UnknownPriority)
    /// when the rank was never registered; the queue is left unchanged.
    pub fn enqueue(&self, priority: &Priority, item: T) -> Result<()> {
        {
            let mut state = self.state.lock();
            let bucket = state
                .buckets
                .get_mut(&priority.rank())
                .ok_or_else(|| SchedulerError::unknown_priority(priority.rank()))?;

            let now = Instant::now();
            bucket.entries.push_back(QueuedEntry {
                item,
                original: bucket.priority.clone(),
                current: bucket.priority.clone(),
                enqueued_at: now,
                last_promoted_at: now,
                promotions: 0,
            });
            SchedulerMetrics::set_queue_depth(priority.rank(), bucket.entries.len());
        }
        self.available.notify_one();
        Ok(())
    }

    /// Take the most urgent entry without waiting.
    pub fn try_dequeue(&self) -> Option<QueuedEntry<T>> {
        self.state.lock().pop_front()
    }

    /// Take the most urgent entry, waiting until one is available or `token`
    /// fires.
    pub async fn wait_dequeue(&self, token: &CancelToken) -> Result<QueuedEntry<T>> {
        loop {
            if let Some(reason) = token.stop_reason() {
                return Err(reason.into_error());
            }

            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue in between is not missed.
            notified.as_mut().enable();

            if let Some(entry) = self.try_dequeue() {
                return Ok(entry);
            }

            tokio::select! {
                biased;
                reason = token.stopped() => return Err(reason.into_error()),
                _ = &mut notified => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue statistics.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let pending_by_rank: BTreeMap<i64, usize> = state
            .buckets
            .iter()
            .map(|(rank, b)| (*rank, b.entries.len()))
            .collect();
        QueueStats {
            pending: pending_by_rank.values().sum(),
            pending_by_rank,
            promoted_total: state.promoted_total,
            sweeps_total: state.sweeps_total,
        }
    }

    // ─── Aging ─────────────────────────────────────────────────────────────────

    /// Run one aging pass. Returns the number of entries promoted.
    pub fn sweep(&self) -> usize {
        let mut state = self.state.lock();
        // Read under the lock so promoted entries never predate the bucket tail.
        let now = Instant::now();
        state.sweeps_total += 1;
        SchedulerMetrics::record_sweep();

        let ranks: Vec<i64> = state.buckets.keys().copied().collect();
        let mut promoted = 0;

        for pair in ranks.windows(2) {
            let (target_rank, source_rank) = (pair[0], pair[1]);

            let Some(source) = state.buckets.get(&source_rank) else {
                continue;
            };
            let Some(timeslice) = state.timeslice(&source.priority) else {
                continue;
            };
            let due = source
                .entries
                .iter()
                .take_while(|e| now.saturating_duration_since(e.last_promoted_at) >= timeslice)
                .count();
            if due == 0 {
                continue;
            }

            let moving: Vec<QueuedEntry<T>> = match state.buckets.get_mut(&source_rank) {
                Some(source) => {
                    let moving = source.entries.drain(..due).collect();
                    SchedulerMetrics::set_queue_depth(source_rank, source.entries.len());
                    moving
                }
                None => continue,
            };

            let Some(target) = state.buckets.get_mut(&target_rank) else {
                continue;
            };
            for mut entry in moving {
                entry.current = target.priority.clone();
                entry.last_promoted_at = now;
                entry.promotions += 1;
                target.entries.push_back(entry);
            }
            SchedulerMetrics::set_queue_depth(target_rank, target.entries.len());
            SchedulerMetrics::record_promotion(source_rank, target_rank, due);

            tracing::debug!(
                from = source_rank,
                to = target_rank,
                count = due,
                "Promoted aged entries"
            );
            promoted += due;
        }

        state.promoted_total += promoted as u64;
        promoted
    }
}

impl<T: Send + 'static> AgingPriorityQueue<T> {
    /// Run [`sweep`](Self::sweep) every effective sweep interval until `token`
    /// fires. Configuration changes take effect on the next tick.
    pub fn spawn_sweeper(self: &Arc<Self>, token: CancelToken) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tracing::debug!("Aging sweeper started");
            loop {
                let changed = queue.config_changed.notified();
                tokio::pin!(changed);
                changed.as_mut().enable();

                match queue.effective_sweep_interval() {
                    Some(every) => {
                        tokio::select! {
                            biased;
                            _ = token.stopped() => break,
                            _ = &mut changed => {}
                            _ = tokio::time::sleep(every) => {
                                queue.sweep();
                            }
                        }
                    }
                    None => {
                        tokio::select! {
                            biased;
                            _ = token.stopped() => break,
                            _ = &mut changed => {}
                        }
                    }
                }
            }
            tracing::debug!("Aging sweeper stopped");
        })
    }
}
