//! Write coalescer for the reading history.
//!
//! Buffers incoming readings and flushes them to the durable store on a
//! debounce interval, collapsing runs of unchanged values so a flat channel
//! does not flood the store with identical rows.
//!
//! Flush policy, per channel:
//! - exact value repeats inside one batch are dropped;
//! - a value equal to one of the channel's two newest stored rows slides
//!   the newest row's timestamp forward instead of inserting, except for
//!   booleans, which always insert (uptime math needs stepped rows);
//! - a changed value inserts a new row and back-dates a copy of the
//!   previous value at 1ms before it (booleans: 2ms and 1ms before) so
//!   charts reconstruct transition edges without interpolation.
//!
//! One flush is one atomic store transaction. A failed flush drops its
//! batch: live memory and fan-out are unaffected and ingestion never
//! blocks on storage.

use crate::error::Result;
use crate::history::{FlushPlan, HistoryStore, StoredRow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use warden_model::{Reading, TypedValue, ValueKind};

/// Coalescer configuration
#[derive(Clone, Debug)]
pub struct CoalescerConfig {
    /// Debounce interval in milliseconds (default: 100ms)
    pub debounce_ms: u64,
    /// Pending readings before forcing a flush (default: 10000)
    pub max_pending: usize,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            max_pending: 10_000,
        }
    }
}

/// Statistics for monitoring coalescer behavior
#[derive(Debug, Default)]
pub struct CoalescerStats {
    /// Total readings enqueued
    pub enqueued: AtomicU64,
    /// Total flush operations that reached the store
    pub flush_count: AtomicU64,
    /// Flushes forced by the pending-queue cap
    pub forced_flushes: AtomicU64,
    /// New boundary rows inserted
    pub rows_inserted: AtomicU64,
    /// Boundary rows slid forward in time
    pub rows_slid: AtomicU64,
    /// Back-dated edge rows inserted
    pub rows_backdated: AtomicU64,
    /// In-batch duplicates dropped
    pub duplicates_dropped: AtomicU64,
    /// Batches dropped because the store failed
    pub batches_dropped: AtomicU64,
}

impl CoalescerStats {
    /// Get a snapshot of current stats
    pub fn snapshot(&self) -> CoalescerStatsSnapshot {
        CoalescerStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
            forced_flushes: self.forced_flushes.load(Ordering::Relaxed),
            rows_inserted: self.rows_inserted.load(Ordering::Relaxed),
            rows_slid: self.rows_slid.load(Ordering::Relaxed),
            rows_backdated: self.rows_backdated.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of coalescer statistics
#[derive(Debug, Clone)]
pub struct CoalescerStatsSnapshot {
    pub enqueued: u64,
    pub flush_count: u64,
    pub forced_flushes: u64,
    pub rows_inserted: u64,
    pub rows_slid: u64,
    pub rows_backdated: u64,
    pub duplicates_dropped: u64,
    pub batches_dropped: u64,
}

/// Where the newest boundary row of a channel currently lives.
#[derive(Clone, Copy, Debug)]
enum TailRef {
    /// Already persisted under this row id
    Stored(i64),
    /// Pending in the current plan at this insert index
    Pending(usize),
}

/// The two newest values of a channel, fetched once per flush and updated
/// locally as the batch applies.
struct ChannelTail {
    values: VecDeque<TypedValue>,
    newest: Option<TailRef>,
}

impl ChannelTail {
    fn from_rows(rows: &[StoredRow]) -> Self {
        Self {
            values: rows.iter().map(|r| r.reading.value.clone()).collect(),
            newest: rows.first().map(|r| TailRef::Stored(r.id)),
        }
    }

    fn matches(&self, value: &TypedValue) -> bool {
        self.values.iter().any(|v| v == value)
    }

    fn newest_value(&self) -> Option<&TypedValue> {
        self.values.front()
    }

    fn push_newest(&mut self, row: TailRef, value: TypedValue) {
        self.values.push_front(value);
        self.values.truncate(2);
        self.newest = Some(row);
    }
}

#[derive(Default)]
struct PlanCounts {
    inserted: u64,
    slid: u64,
    backdated: u64,
    deduped: u64,
}

/// Debounced, deduplicating persistence writer.
pub struct WriteCoalescer {
    pending: Mutex<Vec<Reading>>,
    flush_notify: Arc<Notify>,
    config: CoalescerConfig,
    stats: CoalescerStats,
}

impl WriteCoalescer {
    pub fn new(config: CoalescerConfig) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            flush_notify: Arc::new(Notify::new()),
            config,
            stats: CoalescerStats::default(),
        }
    }

    pub fn config(&self) -> &CoalescerConfig {
        &self.config
    }

    pub fn stats(&self) -> &CoalescerStats {
        &self.stats
    }

    /// Queue a reading for the next flush (returns immediately).
    pub fn enqueue(&self, reading: Reading) {
        let len = {
            let mut pending = self.pending.lock();
            pending.push(reading);
            pending.len()
        };
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);

        if len >= self.config.max_pending {
            self.stats.forced_flushes.fetch_add(1, Ordering::Relaxed);
            self.flush_notify.notify_one();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    fn drain_pending(&self) -> Vec<Reading> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Background flush loop - runs until cancelled by the caller.
    pub async fn flush_loop<S>(&self, store: &S)
    where
        S: HistoryStore + ?Sized,
    {
        let interval = Duration::from_millis(self.config.debounce_ms);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.flush_notify.notified() => {}
            }

            if let Err(e) = self.flush(store).await {
                self.stats.batches_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "history flush failed, batch dropped");
            }
        }
    }

    /// Background flush loop with shutdown support.
    ///
    /// Like `flush_loop`, but stops on cancellation after a final flush so
    /// pending readings are not lost on graceful shutdown.
    pub async fn flush_loop_with_shutdown<S>(&self, store: &S, shutdown: CancellationToken)
    where
        S: HistoryStore + ?Sized,
    {
        let interval = Duration::from_millis(self.config.debounce_ms);

        loop {
            tokio::select! {
                biased;  // Check shutdown first

                _ = shutdown.cancelled() => {
                    tracing::debug!("write coalescer received shutdown signal");
                    if let Err(e) = self.flush(store).await {
                        self.stats.batches_dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(error = %e, "final history flush failed, batch dropped");
                    }
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
                _ = self.flush_notify.notified() => {}
            }

            if let Err(e) = self.flush(store).await {
                self.stats.batches_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "history flush failed, batch dropped");
            }
        }

        tracing::debug!("write coalescer stopped");
    }

    /// Drain the queue, build the coalesced plan, and apply it atomically.
    ///
    /// Returns the number of store operations. On error the drained batch
    /// is gone; callers log and move on (at-most-once persistence).
    pub async fn flush<S>(&self, store: &S) -> Result<usize>
    where
        S: HistoryStore + ?Sized,
    {
        let batch = self.drain_pending();
        if batch.is_empty() {
            return Ok(0);
        }

        let (plan, counts) = self.build_plan(batch, store).await?;
        if plan.is_empty() {
            return Ok(0);
        }

        let operations = plan.len();
        store.apply(plan).await?;

        self.stats.flush_count.fetch_add(1, Ordering::Relaxed);
        self.stats
            .rows_inserted
            .fetch_add(counts.inserted, Ordering::Relaxed);
        self.stats.rows_slid.fetch_add(counts.slid, Ordering::Relaxed);
        self.stats
            .rows_backdated
            .fetch_add(counts.backdated, Ordering::Relaxed);
        self.stats
            .duplicates_dropped
            .fetch_add(counts.deduped, Ordering::Relaxed);

        tracing::trace!(operations, "history flush applied");

        Ok(operations)
    }

    async fn build_plan<S>(
        &self,
        batch: Vec<Reading>,
        store: &S,
    ) -> Result<(FlushPlan, PlanCounts)>
    where
        S: HistoryStore + ?Sized,
    {
        // Group per channel, preserving arrival order within each.
        let mut order: HashMap<String, usize> = HashMap::new();
        let mut grouped: Vec<(String, Vec<Reading>)> = Vec::new();
        for reading in batch {
            match order.get(reading.channel.as_str()) {
                Some(&i) => grouped[i].1.push(reading),
                None => {
                    order.insert(reading.channel.clone(), grouped.len());
                    grouped.push((reading.channel.clone(), vec![reading]));
                },
            }
        }

        let mut plan = FlushPlan::default();
        let mut slides: HashMap<i64, DateTime<Utc>> = HashMap::new();
        let mut counts = PlanCounts::default();

        for (channel, readings) in grouped {
            let tail_rows = store.latest_rows(&channel, 2).await?;
            let mut tail = ChannelTail::from_rows(&tail_rows);
            let mut last_value: Option<TypedValue> = None;

            for reading in readings {
                if last_value.as_ref() == Some(&reading.value) {
                    counts.deduped += 1;
                    continue;
                }
                last_value = Some(reading.value.clone());
                plan_reading(reading, &mut tail, &mut plan, &mut slides, &mut counts);
            }
        }

        let mut slides: Vec<(i64, DateTime<Utc>)> = slides.into_iter().collect();
        slides.sort_by_key(|(id, _)| *id);
        plan.slides = slides;

        Ok((plan, counts))
    }
}

fn plan_reading(
    reading: Reading,
    tail: &mut ChannelTail,
    plan: &mut FlushPlan,
    slides: &mut HashMap<i64, DateTime<Utc>>,
    counts: &mut PlanCounts,
) {
    if tail.matches(&reading.value) {
        if reading.kind() == ValueKind::Boolean {
            // Booleans keep stepped rows even when the value repeats.
            let value = reading.value.clone();
            let index = plan.inserts.len();
            plan.inserts.push(reading);
            tail.push_newest(TailRef::Pending(index), value);
            counts.inserted += 1;
            return;
        }
        match tail.newest {
            Some(TailRef::Stored(id)) => {
                slides.insert(id, reading.timestamp);
                counts.slid += 1;
            },
            Some(TailRef::Pending(index)) => {
                plan.inserts[index].timestamp = reading.timestamp;
                counts.slid += 1;
            },
            // A non-empty tail always has a newest ref; nothing to do if
            // the store returned rows without one.
            None => {},
        }
        return;
    }

    // Value changed: back-date the previous value to the transition edge,
    // then insert the new boundary row.
    if let Some(prev) = tail.newest_value().cloned() {
        if prev.kind() == ValueKind::Boolean {
            plan.inserts.push(Reading::new(
                reading.channel.clone(),
                prev.clone(),
                reading.timestamp - chrono::Duration::milliseconds(2),
            ));
            counts.backdated += 1;
        }
        plan.inserts.push(Reading::new(
            reading.channel.clone(),
            prev,
            reading.timestamp - chrono::Duration::milliseconds(1),
        ));
        counts.backdated += 1;
    }

    let value = reading.value.clone();
    let index = plan.inserts.len();
    plan.inserts.push(reading);
    tail.push_newest(TailRef::Pending(index), value);
    counts.inserted += 1;
}
