//! Daily rollup job
//!
//! Aggregates one calendar day of stored readings per channel into a single
//! rollup row: min/max/avg and edge counts for floats, uptime/downtime and
//! edge counts for booleans. The boundary reading before midnight supplies
//! the standing state at 00:00. Runs from a scheduler task once per day and
//! from the CLI for backfills; writes are upserts, so re-running a day is
//! harmless.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_model::DailyRollup;
use warden_rtdb::{HistoryStore, Result};

/// Compute and store rollups for every channel active on `date`.
///
/// A channel that fails to aggregate is logged and skipped; the job
/// finishes the rest. Returns the number of rollups written.
pub async fn run_for_day<S>(store: &S, date: NaiveDate) -> Result<usize>
where
    S: HistoryStore + ?Sized,
{
    let start = day_start(date);
    let end = start + ChronoDuration::days(1);

    let channels = store.distinct_channels(start, end).await?;
    let mut rollups = Vec::with_capacity(channels.len());
    for channel in channels {
        match channel_rollup(store, &channel, date, start, end).await {
            Ok(Some(rollup)) => rollups.push(rollup),
            Ok(None) => {}
            Err(e) => {
                warn!(channel = %channel, error = %e, "rollup skipped for channel");
            }
        }
    }

    if !rollups.is_empty() {
        store.insert_rollups(&rollups).await?;
    }
    info!(date = %date, channels = rollups.len(), "daily rollup written");
    Ok(rollups.len())
}

/// Run the rollup for the previous day at the configured UTC hour, forever.
pub async fn scheduler<S>(store: &S, hour_utc: u32, cancel: CancellationToken)
where
    S: HistoryStore + ?Sized,
{
    info!(hour_utc, "rollup scheduler started");
    loop {
        let wait = until_next_run(Utc::now(), hour_utc);
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }

        let Some(day) = Utc::now().date_naive().pred_opt() else {
            error!("rollup scheduler could not determine the previous day");
            continue;
        };
        if let Err(e) = run_for_day(store, day).await {
            error!(date = %day, error = %e, "daily rollup job failed");
        }
    }
    info!("rollup scheduler stopped");
}

async fn channel_rollup<S>(
    store: &S,
    channel: &str,
    date: NaiveDate,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Option<DailyRollup>>
where
    S: HistoryStore + ?Sized,
{
    let rows = store.range(channel, start, end).await?;
    let boundary = store.before(channel, start).await?;
    Ok(DailyRollup::compute(channel, date, boundary.as_ref(), &rows))
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Time until the next occurrence of `hour_utc:00:00`, strictly after `now`.
fn until_next_run(now: DateTime<Utc>, hour_utc: u32) -> Duration {
    let Some(at_hour) = now.date_naive().and_hms_opt(hour_utc, 0, 0) else {
        return Duration::from_secs(3600);
    };
    let at_hour = at_hour.and_utc();
    let run_at = if at_hour > now {
        at_hour
    } else {
        at_hour + ChronoDuration::days(1)
    };
    (run_at - now).to_std().unwrap_or_default()
}
