//! SQLite-backed reading history.
//!
//! Rows are append-mostly: the coalescer inserts boundary rows and slides
//! the newest row of a channel forward in time, so the table stays compact
//! even for chatty sensors. Timestamps are stored as unix milliseconds.

use crate::error::{Result, StoreError};
use crate::history::{FlushPlan, HistoryStore, StoredRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
    },
    Row, SqlitePool,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use warden_model::{DailyRollup, Reading, TypedValue, ValueKind};

/// Reading history stored in a local SQLite database.
#[derive(Clone)]
pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    /// Open (or create) the database with settings tuned for edge deployment.
    pub async fn connect(db_path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(format!("create data directory: {e}")))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .journal_mode(SqliteJournalMode::Wal) // Enable WAL for concurrent reads
            .synchronous(SqliteSynchronous::Normal) // Balance performance and safety
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        // Set cache size to 2MB (negative value means KB)
        sqlx::query("PRAGMA cache_size = -2000")
            .execute(&pool)
            .await?;

        // Set page size to 4KB (only effective for new databases)
        sqlx::query("PRAGMA page_size = 4096")
            .execute(&pool)
            .await?;

        let history = Self { pool };
        history.ensure_schema().await?;

        info!("reading history database ready: {}", db_path_str);

        Ok(history)
    }

    /// Build a history on an existing pool (shared with the rule repository).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS readings (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,
                kind    TEXT NOT NULL,
                value   TEXT NOT NULL,
                ts      INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_readings_channel_ts ON readings (channel, ts)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS rollups (
                channel       TEXT NOT NULL,
                date          TEXT NOT NULL,
                kind          TEXT NOT NULL,
                min           REAL,
                max           REAL,
                avg           REAL,
                count         INTEGER NOT NULL,
                rising_count  INTEGER NOT NULL,
                falling_count INTEGER NOT NULL,
                uptime_secs   REAL NOT NULL,
                downtime_secs REAL NOT NULL,
                PRIMARY KEY (channel, date)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn apply(&self, plan: FlushPlan) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for reading in &plan.inserts {
            sqlx::query("INSERT INTO readings (channel, kind, value, ts) VALUES (?, ?, ?, ?)")
                .bind(&reading.channel)
                .bind(reading.value.kind().as_str())
                .bind(encode_value(&reading.value))
                .bind(reading.timestamp.timestamp_millis())
                .execute(&mut *tx)
                .await?;
        }

        for (id, ts) in &plan.slides {
            let result = sqlx::query("UPDATE readings SET ts = ? WHERE id = ?")
                .bind(ts.timestamp_millis())
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::RowNotFound(*id));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_rows(&self, readings: &[Reading]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(readings.len());
        let mut tx = self.pool.begin().await?;

        for reading in readings {
            let result = sqlx::query(
                "INSERT INTO readings (channel, kind, value, ts) VALUES (?, ?, ?, ?)",
            )
            .bind(&reading.channel)
            .bind(reading.value.kind().as_str())
            .bind(encode_value(&reading.value))
            .bind(reading.timestamp.timestamp_millis())
            .execute(&mut *tx)
            .await?;
            ids.push(result.last_insert_rowid());
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn slide_timestamp(&self, id: i64, ts: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE readings SET ts = ? WHERE id = ?")
            .bind(ts.timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound(id));
        }
        Ok(())
    }

    async fn latest_rows(&self, channel: &str, limit: usize) -> Result<Vec<StoredRow>> {
        let rows = sqlx::query(
            r"
            SELECT id, channel, kind, value, ts FROM readings
            WHERE channel = ?
            ORDER BY ts DESC, id DESC
            LIMIT ?
            ",
        )
        .bind(channel)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_stored).collect()
    }

    async fn latest_per_channel(&self) -> Result<Vec<Reading>> {
        let rows = sqlx::query(
            r"
            SELECT r.id, r.channel, r.kind, r.value, r.ts FROM readings r
            WHERE r.id = (
                SELECT id FROM readings
                WHERE channel = r.channel
                ORDER BY ts DESC, id DESC
                LIMIT 1
            )
            ORDER BY r.channel
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row_to_stored(row).map(|r| r.reading))
            .collect()
    }

    async fn range(
        &self,
        channel: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        let rows = sqlx::query(
            r"
            SELECT id, channel, kind, value, ts FROM readings
            WHERE channel = ? AND ts >= ? AND ts < ?
            ORDER BY ts ASC, id ASC
            ",
        )
        .bind(channel)
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row_to_stored(row).map(|r| r.reading))
            .collect()
    }

    async fn before(&self, channel: &str, ts: DateTime<Utc>) -> Result<Option<Reading>> {
        let row = sqlx::query(
            r"
            SELECT id, channel, kind, value, ts FROM readings
            WHERE channel = ? AND ts < ?
            ORDER BY ts DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(channel)
        .bind(ts.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(|r| row_to_stored(r).map(|s| s.reading))
            .transpose()
    }

    async fn insert_rollups(&self, rollups: &[DailyRollup]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for rollup in rollups {
            sqlx::query(
                r"
                INSERT OR REPLACE INTO rollups
                    (channel, date, kind, min, max, avg, count,
                     rising_count, falling_count, uptime_secs, downtime_secs)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(&rollup.channel)
            .bind(rollup.date.to_string())
            .bind(rollup.kind.as_str())
            .bind(rollup.min)
            .bind(rollup.max)
            .bind(rollup.avg)
            .bind(rollup.count as i64)
            .bind(rollup.rising_count as i64)
            .bind(rollup.falling_count as i64)
            .bind(rollup.uptime_secs)
            .bind(rollup.downtime_secs)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn distinct_channels(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT channel FROM readings
            WHERE ts >= ? AND ts < ?
            ORDER BY channel
            ",
        )
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("channel").map_err(StoreError::from))
            .collect()
    }
}

fn encode_value(value: &TypedValue) -> String {
    match value {
        TypedValue::Bool(b) => b.to_string(),
        TypedValue::Float(n) => n.to_string(),
        TypedValue::Text(s) => s.clone(),
    }
}

fn decode_stored_value(kind: &str, raw: &str) -> Result<TypedValue> {
    let kind = ValueKind::parse(kind)
        .ok_or_else(|| StoreError::Database(format!("unknown value kind '{kind}'")))?;
    Ok(match kind {
        ValueKind::Boolean => TypedValue::Bool(raw == "true"),
        ValueKind::Float => TypedValue::Float(
            raw.parse()
                .map_err(|_| StoreError::Database(format!("invalid float value '{raw}'")))?,
        ),
        ValueKind::Text => TypedValue::Text(raw.to_string()),
    })
}

fn row_to_stored(row: &SqliteRow) -> Result<StoredRow> {
    let id: i64 = row.try_get("id")?;
    let channel: String = row.try_get("channel")?;
    let kind: String = row.try_get("kind")?;
    let value: String = row.try_get("value")?;
    let ts: i64 = row.try_get("ts")?;

    let value = decode_stored_value(&kind, &value)?;
    let timestamp = DateTime::from_timestamp_millis(ts)
        .ok_or_else(|| StoreError::Database(format!("invalid timestamp {ts} for row {id}")))?;

    Ok(StoredRow {
        id,
        reading: Reading::new(channel, value, timestamp),
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn open_history() -> (TempDir, SqliteHistory) {
        let dir = TempDir::new().unwrap();
        let history = SqliteHistory::connect(dir.path().join("test.db"), 5)
            .await
            .unwrap();
        (dir, history)
    }

    fn ts(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs as i64)
    }

    #[tokio::test]
    async fn test_insert_and_latest() {
        let (_dir, history) = open_history().await;

        let ids = history
            .insert_rows(&[
                Reading::new("t/room", TypedValue::Float(20.5), ts(0)),
                Reading::new("t/room", TypedValue::Float(21.0), ts(10)),
            ])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[1] > ids[0]);

        let latest = history.latest("t/room").await.unwrap().unwrap();
        assert_eq!(latest.value, TypedValue::Float(21.0));
        assert_eq!(latest.timestamp, ts(10));
    }

    #[tokio::test]
    async fn test_value_kinds_survive_storage() {
        let (_dir, history) = open_history().await;

        history
            .insert_rows(&[
                Reading::new("a", TypedValue::Bool(true), ts(0)),
                Reading::new("b", TypedValue::Float(23.5), ts(0)),
                Reading::new("c", TypedValue::Text("ajar".to_string()), ts(0)),
            ])
            .await
            .unwrap();

        assert_eq!(
            history.latest("a").await.unwrap().unwrap().value,
            TypedValue::Bool(true)
        );
        assert_eq!(
            history.latest("b").await.unwrap().unwrap().value,
            TypedValue::Float(23.5)
        );
        assert_eq!(
            history.latest("c").await.unwrap().unwrap().value,
            TypedValue::Text("ajar".to_string())
        );
    }

    #[tokio::test]
    async fn test_apply_plan_inserts_and_slides() {
        let (_dir, history) = open_history().await;

        let ids = history
            .insert_rows(&[Reading::new("t/room", TypedValue::Float(20.0), ts(0))])
            .await
            .unwrap();

        let plan = FlushPlan {
            inserts: vec![Reading::new("t/room", TypedValue::Float(21.0), ts(20))],
            slides: vec![(ids[0], ts(10))],
        };
        history.apply(plan).await.unwrap();

        let rows = history.latest_rows("t/room", 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        // Newest first
        assert_eq!(rows[0].reading.value, TypedValue::Float(21.0));
        assert_eq!(rows[1].reading.timestamp, ts(10));
    }

    #[tokio::test]
    async fn test_slide_unknown_row_fails_whole_plan() {
        let (_dir, history) = open_history().await;

        let plan = FlushPlan {
            inserts: vec![Reading::new("t/room", TypedValue::Float(21.0), ts(0))],
            slides: vec![(9999, ts(10))],
        };
        let err = history.apply(plan).await.unwrap_err();
        assert!(matches!(err, StoreError::RowNotFound(9999)));

        // Transaction rolled back, insert not visible
        assert!(history.latest("t/room").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_range_and_before() {
        let (_dir, history) = open_history().await;

        history
            .insert_rows(&[
                Reading::new("t/room", TypedValue::Float(1.0), ts(0)),
                Reading::new("t/room", TypedValue::Float(2.0), ts(60)),
                Reading::new("t/room", TypedValue::Float(3.0), ts(120)),
                Reading::new("t/other", TypedValue::Float(9.0), ts(60)),
            ])
            .await
            .unwrap();

        // End bound is exclusive
        let rows = history.range("t/room", ts(0), ts(120)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, TypedValue::Float(1.0));
        assert_eq!(rows[1].value, TypedValue::Float(2.0));

        let boundary = history.before("t/room", ts(60)).await.unwrap().unwrap();
        assert_eq!(boundary.value, TypedValue::Float(1.0));
        assert!(history.before("t/room", ts(0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_per_channel() {
        let (_dir, history) = open_history().await;

        history
            .insert_rows(&[
                Reading::new("b", TypedValue::Float(1.0), ts(0)),
                Reading::new("b", TypedValue::Float(2.0), ts(10)),
                Reading::new("a", TypedValue::Bool(false), ts(5)),
            ])
            .await
            .unwrap();

        let latest = history.latest_per_channel().await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].channel, "a");
        assert_eq!(latest[1].channel, "b");
        assert_eq!(latest[1].value, TypedValue::Float(2.0));
    }

    #[tokio::test]
    async fn test_rollup_upsert() {
        let (_dir, history) = open_history().await;
        let date = chrono::NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();

        let mut rollup = DailyRollup {
            channel: "t/room".to_string(),
            date,
            kind: ValueKind::Float,
            min: Some(20.0),
            max: Some(25.0),
            avg: Some(22.0),
            count: 10,
            rising_count: 2,
            falling_count: 1,
            uptime_secs: 0.0,
            downtime_secs: 0.0,
        };
        history.insert_rollups(&[rollup.clone()]).await.unwrap();

        // Re-running the same day replaces the row
        rollup.count = 12;
        history.insert_rollups(&[rollup]).await.unwrap();

        let row = sqlx::query("SELECT count FROM rollups WHERE channel = ? AND date = ?")
            .bind("t/room")
            .bind(date.to_string())
            .fetch_one(history.pool())
            .await
            .unwrap();
        let count: i64 = row.try_get("count").unwrap();
        assert_eq!(count, 12);
    }

    #[tokio::test]
    async fn test_distinct_channels_in_window() {
        let (_dir, history) = open_history().await;

        history
            .insert_rows(&[
                Reading::new("a", TypedValue::Float(1.0), ts(0)),
                Reading::new("b", TypedValue::Float(1.0), ts(100)),
                Reading::new("c", TypedValue::Float(1.0), ts(1000)),
            ])
            .await
            .unwrap();

        let channels = history.distinct_channels(ts(0), ts(200)).await.unwrap();
        assert_eq!(channels, vec!["a".to_string(), "b".to_string()]);
    }
}
