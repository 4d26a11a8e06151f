//! Bounded per-channel working-set memory.
//!
//! The single in-process authority for "current value" queries: every
//! channel keeps its most recent K readings, newest first. The ingestion
//! path is the only writer; the rule engine and query surfaces read. A
//! channel that was never seen answers with empty/`None`, never an error.

use crate::error::Result;
use crate::history::HistoryStore;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use warden_model::Reading;

/// Default readings retained per channel.
pub const DEFAULT_WINDOW_SIZE: usize = 5;

pub struct WorkingSet {
    channels: DashMap<String, RwLock<VecDeque<Reading>>>,
    capacity: usize,
}

impl WorkingSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Prepend a reading to its channel's ring and truncate to capacity.
    ///
    /// Writers for one channel are serialized by the per-channel lock, so
    /// readers never observe a torn ring.
    pub fn update(&self, reading: Reading) {
        // Two-phase lookup: the entry API takes the shard write lock, so
        // try the read path first for already-known channels.
        if let Some(cell) = self.channels.get(reading.channel.as_str()) {
            let mut ring = cell.write();
            ring.push_front(reading);
            ring.truncate(self.capacity);
            return;
        }
        let cell = self.channels.entry(reading.channel.clone()).or_default();
        let mut ring = cell.write();
        ring.push_front(reading);
        ring.truncate(self.capacity);
    }

    /// Newest reading for a channel.
    pub fn current(&self, channel: &str) -> Option<Reading> {
        self.channels
            .get(channel)
            .and_then(|cell| cell.read().front().cloned())
    }

    /// Up to `n` newest readings, newest first.
    pub fn recent(&self, channel: &str, n: usize) -> Vec<Reading> {
        match self.channels.get(channel) {
            Some(cell) => cell.read().iter().take(n).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Number of readings currently retained for a channel.
    pub fn retained(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |cell| cell.read().len())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Point-in-time copy of every channel's newest reading.
    pub fn snapshot(&self) -> HashMap<String, Reading> {
        let mut out = HashMap::with_capacity(self.channels.len());
        for entry in self.channels.iter() {
            if let Some(front) = entry.value().read().front() {
                out.insert(entry.key().clone(), front.clone());
            }
        }
        out
    }

    /// Readings covering the trailing `window`, oldest first, including the
    /// one reading immediately preceding the window when available.
    ///
    /// Served from memory alone when the ring already reaches past the
    /// window start; otherwise the durable store fills in via its range and
    /// before queries, merged with whatever memory holds (the coalescer may
    /// not have flushed the newest readings yet). This is the only
    /// historical lookup path; windowed expression functions go through it.
    pub async fn windowed<S>(
        &self,
        channel: &str,
        window: Duration,
        store: &S,
    ) -> Result<Vec<Reading>>
    where
        S: HistoryStore + ?Sized,
    {
        let now = Utc::now();
        let start = now - window;

        let mut in_memory = self.recent(channel, self.capacity);
        in_memory.reverse(); // oldest first

        let memory_covers = in_memory
            .first()
            .is_some_and(|oldest| oldest.timestamp <= start);
        if memory_covers {
            return Ok(trim_to_window(in_memory, start));
        }

        let mut rows = store.range(channel, start, now).await?;
        if let Some(boundary) = store.before(channel, start).await? {
            rows.insert(0, boundary);
        }
        // Memory readings the store has not seen yet; same-timestamp rows
        // are already represented (the slide path keeps the boundary row at
        // the newest repeated timestamp).
        for reading in in_memory {
            if !rows.iter().any(|r| r.timestamp == reading.timestamp) {
                rows.push(reading);
            }
        }
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }
}

impl Default for WorkingSet {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

/// Drop readings older than the newest one at-or-before the window start.
fn trim_to_window(mut rows: Vec<Reading>, start: DateTime<Utc>) -> Vec<Reading> {
    if let Some(boundary) = rows.iter().rposition(|r| r.timestamp <= start) {
        rows.drain(..boundary);
    }
    rows
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::memory_history::MemoryHistory;
    use chrono::TimeZone;
    use warden_model::TypedValue;

    fn ts(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, secs).unwrap()
    }

    fn reading(channel: &str, v: f64, at: DateTime<Utc>) -> Reading {
        Reading::new(channel, TypedValue::Float(v), at)
    }

    #[test]
    fn test_update_bounds_ring() {
        let set = WorkingSet::new(5);
        for i in 0..8 {
            set.update(reading("a", i as f64, ts(i)));
        }
        assert_eq!(set.retained("a"), 5);
        let current = set.current("a").unwrap();
        assert_eq!(current.value, TypedValue::Float(7.0));

        let recent = set.recent("a", 5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].value, TypedValue::Float(7.0));
        assert_eq!(recent[4].value, TypedValue::Float(3.0));
    }

    #[test]
    fn test_update_fewer_than_capacity() {
        let set = WorkingSet::new(5);
        set.update(reading("a", 1.0, ts(0)));
        set.update(reading("a", 2.0, ts(1)));
        assert_eq!(set.retained("a"), 2);
    }

    #[test]
    fn test_absent_channel_is_empty_not_error() {
        let set = WorkingSet::default();
        assert_eq!(set.current("missing"), None);
        assert!(set.recent("missing", 3).is_empty());
        assert_eq!(set.retained("missing"), 0);
    }

    #[test]
    fn test_snapshot_copies() {
        let set = WorkingSet::default();
        set.update(reading("a", 1.0, ts(0)));
        set.update(reading("b", 2.0, ts(1)));

        let snap = set.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["a"].value, TypedValue::Float(1.0));

        // Later updates do not alter the snapshot
        set.update(reading("a", 9.0, ts(2)));
        assert_eq!(snap["a"].value, TypedValue::Float(1.0));
    }

    #[tokio::test]
    async fn test_windowed_served_from_memory() {
        let set = WorkingSet::new(5);
        let store = MemoryHistory::new();
        let now = Utc::now();
        for i in 0..5u32 {
            set.update(reading(
                "a",
                i as f64,
                now - Duration::seconds(40 - 10 * i as i64),
            ));
        }

        // 25s window: boundary is the reading at -30s, no store access needed
        let rows = set.windowed("a", Duration::seconds(25), &store).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].value, TypedValue::Float(1.0));
        assert_eq!(rows[3].value, TypedValue::Float(4.0));
        assert_eq!(store.row_count(), 0);
    }

    #[tokio::test]
    async fn test_windowed_falls_back_to_store() {
        let set = WorkingSet::new(2);
        let store = MemoryHistory::new();
        let now = Utc::now();

        store
            .insert_rows(&[
                reading("a", 1.0, now - Duration::seconds(500)),
                reading("a", 2.0, now - Duration::seconds(200)),
                reading("a", 3.0, now - Duration::seconds(100)),
            ])
            .await
            .unwrap();
        // Memory only holds the most recent reading, not yet flushed
        set.update(reading("a", 4.0, now - Duration::seconds(5)));

        let rows = set
            .windowed("a", Duration::seconds(300), &store)
            .await
            .unwrap();
        // boundary (-500s) + two in-range rows + unflushed memory reading
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].value, TypedValue::Float(1.0));
        assert_eq!(rows[3].value, TypedValue::Float(4.0));
    }

    #[tokio::test]
    async fn test_windowed_absent_channel() {
        let set = WorkingSet::default();
        let store = MemoryHistory::new();
        let rows = set
            .windowed("missing", Duration::seconds(60), &store)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_windowed_deduplicates_flushed_readings() {
        let set = WorkingSet::new(2);
        let store = MemoryHistory::new();
        let now = Utc::now();
        let at = now - Duration::seconds(50);

        store
            .insert_rows(&[
                reading("a", 1.0, now - Duration::seconds(400)),
                reading("a", 2.0, at),
            ])
            .await
            .unwrap();
        // The same reading still sits in memory
        set.update(reading("a", 2.0, at));

        let rows = set
            .windowed("a", Duration::seconds(300), &store)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }
}
