//! Warden Model Library
//!
//! Core data types for WardenHMS: typed sensor values, the total payload
//! decoder, readings, and daily rollup aggregation. Pure logic without
//! service dependencies.

pub mod reading;
pub mod rollup;
pub mod value;

// Re-exports for convenience
pub use reading::Reading;
pub use rollup::DailyRollup;
pub use value::{decode, decode_with_policy, DecodePolicy, TypedValue, ValueKind};
