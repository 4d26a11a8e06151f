//! Durable history store abstraction.
//!
//! The store keeps every persisted reading as an append-mostly time series
//! plus the daily rollup table. The write coalescer talks to it through
//! [`FlushPlan`] so that one flush commits atomically; read paths serve the
//! working set's window fallback and the rollup job.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use warden_model::{DailyRollup, Reading};

/// A persisted reading together with its row id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: i64,
    pub reading: Reading,
}

/// One atomic batch of writes produced by a coalescer flush.
///
/// `inserts` are applied in order; `slides` move an existing boundary row's
/// timestamp forward without touching its value.
#[derive(Debug, Clone, Default)]
pub struct FlushPlan {
    pub inserts: Vec<Reading>,
    pub slides: Vec<(i64, DateTime<Utc>)>,
}

impl FlushPlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.slides.is_empty()
    }

    /// Total write operations in the plan.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.slides.len()
    }
}

/// Persistent reading history.
///
/// Implementations: [`SqliteHistory`](crate::SqliteHistory) for deployment,
/// [`MemoryHistory`](crate::MemoryHistory) for tests.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Apply one flush plan atomically; partial application must not be
    /// observable.
    async fn apply(&self, plan: FlushPlan) -> Result<()>;

    /// Insert readings, returning their row ids in input order.
    async fn insert_rows(&self, readings: &[Reading]) -> Result<Vec<i64>>;

    /// Move a row's timestamp forward.
    async fn slide_timestamp(&self, row_id: i64, timestamp: DateTime<Utc>) -> Result<()>;

    /// Up to `n` newest rows for a channel, newest first.
    async fn latest_rows(&self, channel: &str, n: usize) -> Result<Vec<StoredRow>>;

    /// Most recent durable reading for a channel.
    async fn latest(&self, channel: &str) -> Result<Option<Reading>> {
        Ok(self
            .latest_rows(channel, 1)
            .await?
            .into_iter()
            .next()
            .map(|row| row.reading))
    }

    /// Newest reading of every channel ever stored.
    async fn latest_per_channel(&self) -> Result<Vec<Reading>>;

    /// Readings in `[start, end)`, oldest first.
    async fn range(
        &self,
        channel: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>>;

    /// Newest reading strictly before `ts`.
    async fn before(&self, channel: &str, ts: DateTime<Utc>) -> Result<Option<Reading>>;

    /// Upsert daily rollups (idempotent per channel and date).
    async fn insert_rollups(&self, rollups: &[DailyRollup]) -> Result<()>;

    /// Channels with at least one row in `[start, end)`.
    async fn distinct_channels(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>>;
}
