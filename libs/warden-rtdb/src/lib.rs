//! Warden realtime reading store
//!
//! Keeps the working set of recent sensor readings in memory and persists
//! a coalesced history to SQLite.
//!
//! # Key Components
//!
//! - **WorkingSet**: bounded in-memory ring of recent readings per channel
//! - **HistoryStore trait**: durable reading history operations
//! - **WriteCoalescer**: debounced writer that dedups, slides and back-dates
//! - **SqliteHistory / MemoryHistory**: store backends (disk and test)

pub mod coalescer;

pub mod error;

pub mod history;

pub mod memory_history;

pub mod sqlite;

pub mod working_set;

// Re-exports
pub use error::{Result, StoreError};
pub use history::{FlushPlan, HistoryStore, StoredRow};

pub use coalescer::{CoalescerConfig, CoalescerStats, CoalescerStatsSnapshot, WriteCoalescer};

pub use memory_history::MemoryHistory;
pub use sqlite::SqliteHistory;
pub use working_set::{WorkingSet, DEFAULT_WINDOW_SIZE};

/// Helper functions for common operations
pub mod helpers {
    use super::{HistoryStore, MemoryHistory};
    use std::sync::Arc;

    /// Create an in-memory history store for unit testing
    ///
    /// Suitable for tests that should not touch the filesystem.
    pub fn create_test_history() -> Arc<dyn HistoryStore> {
        Arc::new(MemoryHistory::new())
    }

    /// Create a concrete MemoryHistory for unit testing
    ///
    /// Use this when the test needs direct access to MemoryHistory methods
    /// (e.g., for inspecting stored rows or injecting write failures).
    pub fn create_test_memory_history() -> Arc<MemoryHistory> {
        Arc::new(MemoryHistory::new())
    }
}
