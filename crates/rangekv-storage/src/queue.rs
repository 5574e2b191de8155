//! Generic bounded priority queue for periodic per-range maintenance.
//!
//! A queue is parameterized by a [`QueueImpl`] that scores a range and processes
//! it. The background worker offers every hosted range to the queue once per
//! tick, then drains the queue highest priority first:
//!
//! ```text
//!   tick ──► maybe_add(range) ──► should_queue() ──► admitted (bounded, ranked)
//!                                                          │
//!   process_one() ◄── pop highest priority ◄───────────────┘
//! ```
//!
//! When the queue is full the lowest priority entry is evicted, so urgent
//! ranges are never blocked behind a backlog of low-urgency ones.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use rangekv_core::metrics::{
    QUEUE_ADMISSIONS, QUEUE_EVICTIONS, QUEUE_PENDING, QUEUE_PROCESSED, QUEUE_PROCESS_DURATION,
};
use rangekv_core::{CoreError, CoreResult, RangeId};

/// Something a queue can hold.
pub trait Queueable: Send + Sync + 'static {
    fn queue_id(&self) -> RangeId;
}

/// Scoring and processing logic plugged into a [`BaseQueue`].
#[async_trait]
pub trait QueueImpl<R: Queueable>: Send + Sync {
    /// Decides whether `item` needs processing and how urgently.
    /// Must be cheap and must not block.
    fn should_queue(&self, now: DateTime<Utc>, item: &R) -> (bool, f64);

    /// Processes one item. Never called concurrently for the same item.
    async fn process(&self, now: DateTime<Utc>, item: &R) -> CoreResult<()>;
}

/// Supplies the items offered to a queue on every tick.
pub trait ItemSource<R>: Send + Sync {
    fn items(&self) -> Vec<Arc<R>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Priority(f64);

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Ascending rank: the last entry is popped next, the first is evicted next.
/// Among equal priorities the earliest queued ranks highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    priority: Priority,
    seq: Reverse<u64>,
}

struct QueueState<R> {
    ranked: BTreeMap<Rank, RangeId>,
    entries: HashMap<RangeId, (Rank, Arc<R>)>,
    processing: HashSet<RangeId>,
    next_seq: u64,
}

impl<R> Default for QueueState<R> {
    fn default() -> Self {
        Self {
            ranked: BTreeMap::new(),
            entries: HashMap::new(),
            processing: HashSet::new(),
            next_seq: 0,
        }
    }
}

/// Clears the in-flight mark of an item when processing ends, however it ends.
struct InFlight<R> {
    state: Arc<Mutex<QueueState<R>>>,
    id: RangeId,
}

impl<R> Drop for InFlight<R> {
    fn drop(&mut self) {
        self.state.lock().processing.remove(&self.id);
    }
}

/// Bounded priority queue with a background worker.
pub struct BaseQueue<R: Queueable> {
    name: &'static str,
    max_size: usize,
    imp: Arc<dyn QueueImpl<R>>,
    state: Arc<Mutex<QueueState<R>>>,
    worker: Option<JoinHandle<()>>,
}

impl<R: Queueable> BaseQueue<R> {
    /// Creates a queue holding at most `max_size` pending items.
    pub fn new(name: &'static str, imp: Arc<dyn QueueImpl<R>>, max_size: usize) -> Self {
        Self {
            name,
            max_size,
            imp,
            state: Arc::new(Mutex::new(QueueState::default())),
            worker: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `id` is pending.
    pub fn contains(&self, id: RangeId) -> bool {
        self.state.lock().entries.contains_key(&id)
    }

    /// Priority of a pending item.
    pub fn priority(&self, id: RangeId) -> Option<f64> {
        self.state
            .lock()
            .entries
            .get(&id)
            .map(|(rank, _)| rank.priority.0)
    }

    /// Scores `item` and queues it if it needs processing.
    ///
    /// Items being processed are skipped. An item that no longer needs
    /// processing is dropped from the queue. Returns true if the item is
    /// pending afterwards.
    pub fn maybe_add(&self, now: DateTime<Utc>, item: Arc<R>) -> bool {
        let id = item.queue_id();
        if self.state.lock().processing.contains(&id) {
            QUEUE_ADMISSIONS
                .with_label_values(&[self.name, "in_flight"])
                .inc();
            return false;
        }

        let (should_queue, priority) = self.imp.should_queue(now, &item);
        if !should_queue || !priority.is_finite() {
            QUEUE_ADMISSIONS
                .with_label_values(&[self.name, "rejected"])
                .inc();
            if self.remove(id) {
                tracing::debug!(queue = self.name, range_id = %id, "Dropped range that no longer needs processing");
            }
            return false;
        }

        self.add(item, priority)
    }

    /// Queues `item` at `priority`, or re-prioritizes it if already pending.
    ///
    /// Returns false if the item is being processed, or if it was itself the
    /// lowest priority entry evicted to respect the size bound.
    pub fn add(&self, item: Arc<R>, priority: f64) -> bool {
        let id = item.queue_id();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.processing.contains(&id) {
            return false;
        }

        if let Some((rank, _)) = state.entries.get_mut(&id) {
            state.ranked.remove(&*rank);
            rank.priority = Priority(priority);
            state.ranked.insert(*rank, id);
            QUEUE_ADMISSIONS
                .with_label_values(&[self.name, "updated"])
                .inc();
            return true;
        }

        let rank = Rank {
            priority: Priority(priority),
            seq: Reverse(state.next_seq),
        };
        state.next_seq += 1;
        state.ranked.insert(rank, id);
        state.entries.insert(id, (rank, item));

        let mut admitted = true;
        if state.entries.len() > self.max_size {
            if let Some((evicted_rank, evicted)) = state.ranked.pop_first() {
                state.entries.remove(&evicted);
                QUEUE_EVICTIONS.with_label_values(&[self.name]).inc();
                tracing::debug!(
                    queue = self.name,
                    range_id = %evicted,
                    priority = evicted_rank.priority.0,
                    "Queue full, evicted lowest priority range"
                );
                admitted = evicted != id;
            }
        }

        QUEUE_ADMISSIONS
            .with_label_values(&[self.name, if admitted { "admitted" } else { "rejected" }])
            .inc();
        QUEUE_PENDING
            .with_label_values(&[self.name])
            .set(state.entries.len() as i64);
        admitted
    }

    /// Removes and returns the highest priority item.
    pub fn pop(&self) -> Option<Arc<R>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let (_, id) = state.ranked.pop_last()?;
        let (_, item) = state.entries.remove(&id)?;
        QUEUE_PENDING
            .with_label_values(&[self.name])
            .set(state.entries.len() as i64);
        Some(item)
    }

    /// Drops a pending item. Returns true if it was pending.
    pub fn remove(&self, id: RangeId) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some((rank, _)) = state.entries.remove(&id) else {
            return false;
        };
        state.ranked.remove(&rank);
        QUEUE_PENDING
            .with_label_values(&[self.name])
            .set(state.entries.len() as i64);
        true
    }

    /// Pops the highest priority item and processes it.
    ///
    /// Returns `None` when the queue is empty. Errors are logged and returned;
    /// the item is not re-queued and will be scored again on the next tick.
    pub async fn process_one(&self, now: DateTime<Utc>) -> Option<CoreResult<()>> {
        let (id, item) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let (_, id) = state.ranked.pop_last()?;
            let (_, item) = state.entries.remove(&id)?;
            state.processing.insert(id);
            QUEUE_PENDING
                .with_label_values(&[self.name])
                .set(state.entries.len() as i64);
            (id, item)
        };
        let _in_flight = InFlight {
            state: Arc::clone(&self.state),
            id,
        };

        let start = Instant::now();
        let result = self.imp.process(now, &item).await;
        let elapsed = start.elapsed();
        QUEUE_PROCESS_DURATION
            .with_label_values(&[self.name])
            .observe(elapsed.as_secs_f64());

        match &result {
            Ok(()) => {
                QUEUE_PROCESSED
                    .with_label_values(&[self.name, "success"])
                    .inc();
                tracing::debug!(
                    queue = self.name,
                    range_id = %id,
                    duration_ms = elapsed.as_millis(),
                    "Processed range"
                );
            }
            Err(e @ CoreError::PartialScan { .. }) => {
                QUEUE_PROCESSED
                    .with_label_values(&[self.name, "partial"])
                    .inc();
                tracing::warn!(queue = self.name, range_id = %id, error = %e, "Range processed with failures");
            }
            Err(e) => {
                QUEUE_PROCESSED
                    .with_label_values(&[self.name, "error"])
                    .inc();
                tracing::error!(queue = self.name, range_id = %id, error = %e, "Failed to process range");
            }
        }

        Some(result)
    }

    /// Runs one scheduling tick: offers every item of `source`, then drains the
    /// queue. Returns the number of items processed.
    pub async fn run_cycle(&self, source: &dyn ItemSource<R>) -> usize {
        let now = Utc::now();
        for item in source.items() {
            self.maybe_add(now, item);
        }

        let mut processed = 0;
        while self.process_one(Utc::now()).await.is_some() {
            processed += 1;
        }
        processed
    }

    /// Starts the background worker ticking every `interval`.
    pub fn start_worker(&mut self, source: Arc<dyn ItemSource<R>>, interval: Duration) {
        if self.worker.is_some() {
            tracing::warn!(queue = self.name, "Background worker already running");
            return;
        }

        let queue = self.clone_for_worker();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                let processed = queue.run_cycle(source.as_ref()).await;
                tracing::debug!(queue = queue.name, processed, "Queue cycle complete");
            }
        });

        self.worker = Some(handle);
        tracing::info!(queue = self.name, "Background worker started (interval: {:?})", interval);
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Shutdown background worker
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.worker.take() {
            handle.abort();
            let _ = handle.await;
            tracing::info!(queue = self.name, "Background worker shut down");
        }
    }

    /// Clone for worker (without JoinHandle)
    fn clone_for_worker(&self) -> Self {
        Self {
            name: self.name,
            max_size: self.max_size,
            imp: Arc::clone(&self.imp),
            state: Arc::clone(&self.state),
            worker: None,
        }
    }
}
