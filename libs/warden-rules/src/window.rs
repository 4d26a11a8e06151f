//! Windowed aggregation over reading sequences
//!
//! Pure math over the reading slices produced by the working set's
//! windowed lookup. Sequences are oldest first and include the one
//! reading immediately preceding the window when the store has it, so
//! interval math sees the standing value at the window edge.

use crate::ast::{ChangeDirection, CompareOp};
use async_trait::async_trait;
use chrono::Duration;
use warden_model::{Reading, TypedValue, ValueKind};

/// Reading history as seen by condition evaluation.
///
/// Implemented by the service over working-set memory plus the durable
/// store; tests swap in fixed data.
#[async_trait]
pub trait WindowSource: Send + Sync {
    /// Readings in the trailing window, oldest first, including the
    /// reading immediately before the window start when available.
    async fn windowed(&self, channel: &str, window: Duration) -> anyhow::Result<Vec<Reading>>;

    /// Most recent durable value for the channel, bypassing memory.
    async fn last_stored(&self, channel: &str) -> anyhow::Result<Option<Reading>>;
}

/// CHANGE magnitude over a window.
///
/// FLOAT channels: value swing (max - min, sign per direction).
/// BOOLEAN channels: number of matching edges. Returns None when the
/// window holds no usable data, which callers treat as indeterminate.
pub fn change_over(readings: &[Reading], direction: ChangeDirection) -> Option<f64> {
    match readings.last()?.kind() {
        ValueKind::Float => {
            let values: Vec<f64> = readings.iter().filter_map(|r| r.value.as_f64()).collect();
            if values.is_empty() {
                return None;
            }
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            Some(match direction {
                ChangeDirection::Absolute | ChangeDirection::Positive => max - min,
                ChangeDirection::Negative => min - max,
            })
        },
        ValueKind::Boolean => {
            let states: Vec<bool> = readings.iter().filter_map(|r| r.value.as_bool()).collect();
            let mut rising = 0u32;
            let mut falling = 0u32;
            for pair in states.windows(2) {
                match (pair[0], pair[1]) {
                    (false, true) => rising += 1,
                    (true, false) => falling += 1,
                    _ => {},
                }
            }
            Some(f64::from(match direction {
                ChangeDirection::Absolute => rising + falling,
                ChangeDirection::Positive => rising,
                ChangeDirection::Negative => falling,
            }))
        },
        ValueKind::Text => None,
    }
}

/// SUSTAINED check: every reading in the window satisfies the comparison.
///
/// Returns None when the window is empty or a value cannot be compared
/// against the threshold.
pub fn sustained_over(readings: &[Reading], op: CompareOp, threshold: &TypedValue) -> Option<bool> {
    if readings.is_empty() {
        return None;
    }
    for reading in readings {
        match compare_values(&reading.value, op, threshold) {
            Some(true) => {},
            Some(false) => return Some(false),
            None => return None,
        }
    }
    Some(true)
}

/// Compare two typed values; None on a type mismatch.
pub fn compare_values(left: &TypedValue, op: CompareOp, right: &TypedValue) -> Option<bool> {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => values_equal(left, right).map(|eq| !eq),
        CompareOp::Gt => numeric_pair(left, right).map(|(a, b)| a > b),
        CompareOp::Gte => numeric_pair(left, right).map(|(a, b)| a >= b),
        CompareOp::Lt => numeric_pair(left, right).map(|(a, b)| a < b),
        CompareOp::Lte => numeric_pair(left, right).map(|(a, b)| a <= b),
    }
}

fn values_equal(left: &TypedValue, right: &TypedValue) -> Option<bool> {
    match (left, right) {
        (TypedValue::Float(a), TypedValue::Float(b)) => Some((a - b).abs() < f64::EPSILON),
        (TypedValue::Bool(a), TypedValue::Bool(b)) => Some(a == b),
        (TypedValue::Text(a), TypedValue::Text(b)) => Some(a == b),
        _ => None,
    }
}

fn numeric_pair(left: &TypedValue, right: &TypedValue) -> Option<(f64, f64)> {
    Some((left.as_f64()?, right.as_f64()?))
}
