//! Daily rollup aggregation.
//!
//! A rollup summarizes one channel's readings for one UTC calendar day:
//! min/max/avg for numeric channels, uptime/downtime for boolean channels,
//! and rising/falling edge counts for both. Computation is pure; the rollup
//! job feeds it rows from the durable store.

use crate::reading::Reading;
use crate::value::{TypedValue, ValueKind};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Immutable-once-written summary of one channel for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRollup {
    pub channel: String,
    pub date: NaiveDate,
    pub kind: ValueKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    /// Rows persisted during the day (the boundary reading is not counted).
    pub count: u64,
    pub rising_count: u64,
    pub falling_count: u64,
    pub uptime_secs: f64,
    pub downtime_secs: f64,
}

impl DailyRollup {
    /// Aggregate one channel's day.
    ///
    /// # Arguments
    /// * `boundary` - last reading before the day start, if any; supplies the
    ///   state at midnight for uptime math and the first edge comparison
    /// * `rows` - the day's readings, oldest first
    ///
    /// Returns `None` when there is no data at all for the day.
    pub fn compute(
        channel: impl Into<String>,
        date: NaiveDate,
        boundary: Option<&Reading>,
        rows: &[Reading],
    ) -> Option<Self> {
        if rows.is_empty() && boundary.is_none() {
            return None;
        }
        let day_start = date.and_hms_opt(0, 0, 0)?.and_utc();
        let day_end = day_start + Duration::days(1);

        let kind = rows
            .last()
            .map(Reading::kind)
            .or_else(|| boundary.map(Reading::kind))?;

        // Numeric stats over the day's float rows; a flat channel whose only
        // row precedes the day still reports its standing value.
        let floats: Vec<f64> = rows.iter().filter_map(|r| r.value.as_f64()).collect();
        let (min, max, avg) = if floats.is_empty() {
            match boundary.and_then(|r| r.value.as_f64()) {
                Some(v) => (Some(v), Some(v), Some(v)),
                None => (None, None, None),
            }
        } else {
            let min = floats.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = floats.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let avg = floats.iter().sum::<f64>() / floats.len() as f64;
            (Some(min), Some(max), Some(avg))
        };

        // Edge counts across the boundary-prefixed chain.
        let mut rising = 0u64;
        let mut falling = 0u64;
        let mut prev = boundary.map(|r| r.value.clone());
        for row in rows {
            if let Some(p) = &prev {
                match (p, &row.value) {
                    (TypedValue::Float(a), TypedValue::Float(b)) => {
                        if b > a {
                            rising += 1;
                        } else if b < a {
                            falling += 1;
                        }
                    },
                    (TypedValue::Bool(a), TypedValue::Bool(b)) => {
                        if !*a && *b {
                            rising += 1;
                        } else if *a && !*b {
                            falling += 1;
                        }
                    },
                    _ => {},
                }
            }
            prev = Some(row.value.clone());
        }

        // Time-in-state from stepped boolean rows. Time before the first
        // known state counts toward neither bucket.
        let mut uptime = Duration::zero();
        let mut downtime = Duration::zero();
        let mut state = boundary.and_then(|r| r.value.as_bool());
        let mut cursor = day_start;
        for row in rows {
            let Some(next) = row.value.as_bool() else {
                continue;
            };
            let at = row.timestamp.clamp(day_start, day_end);
            if let Some(s) = state {
                let span = at - cursor;
                if s {
                    uptime = uptime + span;
                } else {
                    downtime = downtime + span;
                }
            }
            cursor = cursor.max(at);
            state = Some(next);
        }
        if let Some(s) = state {
            let span = day_end - cursor;
            if s {
                uptime = uptime + span;
            } else {
                downtime = downtime + span;
            }
        }

        Some(Self {
            channel: channel.into(),
            date,
            kind,
            min,
            max,
            avg,
            count: rows.len() as u64,
            rising_count: rising,
            falling_count: falling,
            uptime_secs: uptime.num_milliseconds() as f64 / 1000.0,
            downtime_secs: downtime.num_milliseconds() as f64 / 1000.0,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn at(h: u32, m: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn float_row(h: u32, v: f64) -> Reading {
        Reading::new("t/room", TypedValue::Float(v), at(h, 0))
    }

    fn bool_row(h: u32, v: bool) -> Reading {
        Reading::new("t/door", TypedValue::Bool(v), at(h, 0))
    }

    #[test]
    fn test_empty_day_yields_nothing() {
        assert_eq!(DailyRollup::compute("t/room", day(), None, &[]), None);
    }

    #[test]
    fn test_float_stats() {
        let rows = vec![float_row(6, 20.0), float_row(12, 25.0), float_row(18, 22.0)];
        let r = DailyRollup::compute("t/room", day(), None, &rows).unwrap();
        assert_eq!(r.kind, ValueKind::Float);
        assert_eq!(r.min, Some(20.0));
        assert_eq!(r.max, Some(25.0));
        assert!((r.avg.unwrap() - 22.333333).abs() < 1e-5);
        assert_eq!(r.count, 3);
        assert_eq!(r.rising_count, 1);
        assert_eq!(r.falling_count, 1);
        assert_eq!(r.uptime_secs, 0.0);
    }

    #[test]
    fn test_float_boundary_joins_edge_chain() {
        let boundary = Reading::new(
            "t/room",
            TypedValue::Float(21.0),
            Utc.with_ymd_and_hms(2025, 3, 9, 23, 0, 0).unwrap(),
        );
        let rows = vec![float_row(6, 20.0), float_row(12, 25.0)];
        let r = DailyRollup::compute("t/room", day(), Some(&boundary), &rows).unwrap();
        // 21 -> 20 falls, 20 -> 25 rises; boundary value is not in min/max
        assert_eq!(r.falling_count, 1);
        assert_eq!(r.rising_count, 1);
        assert_eq!(r.min, Some(20.0));
    }

    #[test]
    fn test_boolean_uptime_downtime() {
        let boundary = Reading::new(
            "t/door",
            TypedValue::Bool(true),
            Utc.with_ymd_and_hms(2025, 3, 9, 20, 0, 0).unwrap(),
        );
        let rows = vec![bool_row(6, false), bool_row(18, true)];
        let r = DailyRollup::compute("t/door", day(), Some(&boundary), &rows).unwrap();
        // true 00:00-06:00, false 06:00-18:00, true 18:00-24:00
        assert_eq!(r.uptime_secs, 12.0 * 3600.0);
        assert_eq!(r.downtime_secs, 12.0 * 3600.0);
        assert_eq!(r.rising_count, 1);
        assert_eq!(r.falling_count, 1);
        assert_eq!(r.count, 2);
    }

    #[test]
    fn test_boolean_flat_day_from_boundary_alone() {
        let boundary = Reading::new(
            "t/door",
            TypedValue::Bool(true),
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        );
        let r = DailyRollup::compute("t/door", day(), Some(&boundary), &[]).unwrap();
        assert_eq!(r.uptime_secs, 86400.0);
        assert_eq!(r.downtime_secs, 0.0);
        assert_eq!(r.count, 0);
    }

    #[test]
    fn test_unknown_initial_state_counts_neither() {
        let rows = vec![bool_row(12, true)];
        let r = DailyRollup::compute("t/door", day(), None, &rows).unwrap();
        // 00:00-12:00 unknown, 12:00-24:00 up
        assert_eq!(r.uptime_secs, 12.0 * 3600.0);
        assert_eq!(r.downtime_secs, 0.0);
    }

    #[test]
    fn test_flat_float_day_reports_standing_value() {
        let boundary = Reading::new(
            "t/room",
            TypedValue::Float(19.5),
            Utc.with_ymd_and_hms(2025, 3, 8, 10, 0, 0).unwrap(),
        );
        let r = DailyRollup::compute("t/room", day(), Some(&boundary), &[]).unwrap();
        assert_eq!(r.min, Some(19.5));
        assert_eq!(r.max, Some(19.5));
        assert_eq!(r.avg, Some(19.5));
        assert_eq!(r.count, 0);
    }
}
