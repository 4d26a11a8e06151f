//! Live reading fan-out
//!
//! Pushes every ingested reading to subscribed clients over bounded queues.
//! Delivery is best-effort: a full queue drops the frame for that client, a
//! closed queue prunes the client. Ingestion never blocks here.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;
use warden_model::Reading;

/// Fan-out counters
#[derive(Debug, Default)]
struct Counters {
    broadcast: AtomicU64,
    dropped_frames: AtomicU64,
    pruned_clients: AtomicU64,
}

/// Snapshot of fan-out counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutStats {
    pub subscribers: usize,
    pub broadcast: u64,
    pub dropped_frames: u64,
    pub pruned_clients: u64,
}

/// Bounded-queue broadcaster for live readings
pub struct FanOut {
    capacity: usize,
    clients: DashMap<Uuid, mpsc::Sender<Arc<Reading>>>,
    counters: Counters,
}

impl FanOut {
    pub fn new(client_queue_capacity: usize) -> Self {
        FanOut {
            capacity: client_queue_capacity,
            clients: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Register a new subscriber and return its id and frame queue
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<Arc<Reading>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.clients.insert(id, tx);
        debug!(subscriber = %id, "fan-out subscriber added");
        (id, rx)
    }

    /// Remove a subscriber
    pub fn unsubscribe(&self, id: Uuid) {
        if self.clients.remove(&id).is_some() {
            debug!(subscriber = %id, "fan-out subscriber removed");
        }
    }

    /// Push a reading to every subscriber without blocking
    pub fn broadcast(&self, reading: &Reading) {
        self.counters.broadcast.fetch_add(1, Ordering::Relaxed);
        let frame = Arc::new(reading.clone());

        let mut closed = Vec::new();
        for entry in self.clients.iter() {
            match entry.value().try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(*entry.key());
                }
            }
        }

        // Removal happens outside the iteration to keep the map shards free
        for id in closed {
            self.clients.remove(&id);
            self.counters.pruned_clients.fetch_add(1, Ordering::Relaxed);
            debug!(subscriber = %id, "fan-out subscriber pruned");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.clients.len()
    }

    pub fn stats(&self) -> FanOutStats {
        FanOutStats {
            subscribers: self.clients.len(),
            broadcast: self.counters.broadcast.load(Ordering::Relaxed),
            dropped_frames: self.counters.dropped_frames.load(Ordering::Relaxed),
            pruned_clients: self.counters.pruned_clients.load(Ordering::Relaxed),
        }
    }
}
