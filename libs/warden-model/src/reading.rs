//! Sensor readings.

use crate::value::{TypedValue, ValueKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single decoded sensor reading. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Source channel, e.g. `zige/pozar0/temp/val`
    pub channel: String,
    pub value: TypedValue,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(
        channel: impl Into<String>,
        value: TypedValue,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            channel: channel.into(),
            value,
            timestamp,
        }
    }

    /// Reading stamped with the current wall clock.
    pub fn now(channel: impl Into<String>, value: TypedValue) -> Self {
        Self::new(channel, value, Utc::now())
    }

    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_reading_kind_follows_value() {
        let r = Reading::now("a/b", TypedValue::Float(1.5));
        assert_eq!(r.kind(), ValueKind::Float);
        let r = Reading::now("a/b", TypedValue::Bool(true));
        assert_eq!(r.kind(), ValueKind::Boolean);
    }

    #[test]
    fn test_reading_serde_round_trip() {
        let r = Reading::new(
            "zige/pozar0/temp/val",
            TypedValue::Float(23.5),
            Utc::now(),
        );
        let json = serde_json::to_string(&r).unwrap();
        let back: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
