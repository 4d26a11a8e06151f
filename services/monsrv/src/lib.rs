//! MonSrv Library
//!
//! Monitoring service business logic for WardenHMS.
//!
//! ## Architecture
//!
//! Readings arrive on the message bus, flow through the ingest pipeline into
//! the in-memory working set and the write coalescer, and every accepted
//! update triggers rule evaluation:
//!
//! ```text
//! ┌─────────┐    ┌──────────┐    ┌─────────────┐    ┌────────────┐
//! │   Bus   │───▶│ Pipeline │───▶│ Working set │───▶│ RuleEngine │
//! │ (MQTT-  │    │ (decode, │    │  + history  │    │ (activate, │
//! │  style) │    │  stamp)  │    │   (SQLite)  │    │   notify)  │
//! └─────────┘    └──────────┘    └─────────────┘    └────────────┘
//!                      │
//!                      ▼
//!                 ┌─────────┐
//!                 │ Fan-out │
//!                 │ (live)  │
//!                 └─────────┘
//! ```
//!
//! The daily rollup job aggregates the durable history once per day.

// Core modules
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod rollup;

// Re-export commonly used types
pub use bus::{topic_matches, BusEvent, LocalBus, MessageBus};
pub use config::Config;
pub use engine::{EngineStats, RuleEngine};
pub use error::{MonsrvError, Result};
pub use fanout::{FanOut, FanOutStats};
pub use notify::{LogNotifier, Notification, Notifier, RecordingNotifier};
pub use pipeline::{Pipeline, PipelineStats};
