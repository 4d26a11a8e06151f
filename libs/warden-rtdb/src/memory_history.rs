//! In-memory implementation of the history store.
//!
//! Backs tests and embedded runs with plain locked vectors; query methods
//! scan, which is fine at test scale. Write paths can be made to fail on
//! demand to exercise the coalescer's drop-batch behavior.

use crate::error::{Result, StoreError};
use crate::history::{FlushPlan, HistoryStore, StoredRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use warden_model::{DailyRollup, Reading};

#[derive(Debug, Default)]
pub struct MemoryHistory {
    rows: RwLock<Vec<StoredRow>>,
    rollups: RwLock<Vec<DailyRollup>>,
    next_id: AtomicI64,
    fail_writes: AtomicBool,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (storage-outage simulation).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All rows for one channel, oldest first.
    pub fn rows_for(&self, channel: &str) -> Vec<StoredRow> {
        let rows = self.rows.read();
        let mut out: Vec<StoredRow> = rows
            .iter()
            .filter(|r| r.reading.channel == channel)
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.reading.timestamp, r.id));
        out
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    pub fn rollup_count(&self) -> usize {
        self.rollups.read().len()
    }

    /// All stored rollups for one channel.
    pub fn rollups_for(&self, channel: &str) -> Vec<DailyRollup> {
        self.rollups
            .read()
            .iter()
            .filter(|r| r.channel == channel)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.rows.write().clear();
        self.rollups.write().clear();
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected write failure".to_string()));
        }
        Ok(())
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn apply(&self, plan: FlushPlan) -> Result<()> {
        self.check_writable()?;
        // Single write lock makes the whole plan atomic for readers.
        let mut rows = self.rows.write();
        // Resolve every slide target before mutating anything; a missing
        // row rejects the whole plan with the store untouched.
        let mut slides = Vec::with_capacity(plan.slides.len());
        for (row_id, timestamp) in plan.slides {
            let index = rows
                .iter()
                .position(|r| r.id == row_id)
                .ok_or(StoreError::RowNotFound(row_id))?;
            slides.push((index, timestamp));
        }
        for (index, timestamp) in slides {
            rows[index].reading.timestamp = timestamp;
        }
        for reading in plan.inserts {
            let id = self.alloc_id();
            rows.push(StoredRow { id, reading });
        }
        Ok(())
    }

    async fn insert_rows(&self, readings: &[Reading]) -> Result<Vec<i64>> {
        self.check_writable()?;
        let mut rows = self.rows.write();
        let mut ids = Vec::with_capacity(readings.len());
        for reading in readings {
            let id = self.alloc_id();
            rows.push(StoredRow {
                id,
                reading: reading.clone(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn slide_timestamp(&self, row_id: i64, timestamp: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        let mut rows = self.rows.write();
        let row = rows
            .iter_mut()
            .find(|r| r.id == row_id)
            .ok_or(StoreError::RowNotFound(row_id))?;
        row.reading.timestamp = timestamp;
        Ok(())
    }

    async fn latest_rows(&self, channel: &str, n: usize) -> Result<Vec<StoredRow>> {
        let rows = self.rows.read();
        let mut matching: Vec<StoredRow> = rows
            .iter()
            .filter(|r| r.reading.channel == channel)
            .cloned()
            .collect();
        matching.sort_by_key(|r| std::cmp::Reverse((r.reading.timestamp, r.id)));
        matching.truncate(n);
        Ok(matching)
    }

    async fn latest_per_channel(&self) -> Result<Vec<Reading>> {
        let rows = self.rows.read();
        let mut newest: HashMap<&str, &StoredRow> = HashMap::new();
        for row in rows.iter() {
            let entry = newest.entry(row.reading.channel.as_str()).or_insert(row);
            if (row.reading.timestamp, row.id) > (entry.reading.timestamp, entry.id) {
                *entry = row;
            }
        }
        let mut out: Vec<Reading> = newest.values().map(|r| r.reading.clone()).collect();
        out.sort_by(|a, b| a.channel.cmp(&b.channel));
        Ok(out)
    }

    async fn range(
        &self,
        channel: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        let rows = self.rows.read();
        let mut matching: Vec<&StoredRow> = rows
            .iter()
            .filter(|r| {
                r.reading.channel == channel
                    && r.reading.timestamp >= start
                    && r.reading.timestamp < end
            })
            .collect();
        matching.sort_by_key(|r| (r.reading.timestamp, r.id));
        Ok(matching.into_iter().map(|r| r.reading.clone()).collect())
    }

    async fn before(&self, channel: &str, ts: DateTime<Utc>) -> Result<Option<Reading>> {
        let rows = self.rows.read();
        Ok(rows
            .iter()
            .filter(|r| r.reading.channel == channel && r.reading.timestamp < ts)
            .max_by_key(|r| (r.reading.timestamp, r.id))
            .map(|r| r.reading.clone()))
    }

    async fn insert_rollups(&self, rollups: &[DailyRollup]) -> Result<()> {
        self.check_writable()?;
        let mut stored = self.rollups.write();
        for rollup in rollups {
            stored.retain(|r| !(r.channel == rollup.channel && r.date == rollup.date));
            stored.push(rollup.clone());
        }
        Ok(())
    }

    async fn distinct_channels(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let rows = self.rows.read();
        let channels: BTreeSet<String> = rows
            .iter()
            .filter(|r| r.reading.timestamp >= start && r.reading.timestamp < end)
            .map(|r| r.reading.channel.clone())
            .collect();
        Ok(channels.into_iter().collect())
    }
}
