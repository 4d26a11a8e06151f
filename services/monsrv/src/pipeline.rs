//! Ingestion pipeline
//!
//! The hot path from a bus payload to everything downstream: decode under
//! the sentinel policy, stamp the arrival time, update the working set,
//! broadcast to live subscribers, enqueue for persistence, and signal the
//! rule engine over the bounded update queue. Retained bus messages replay
//! pre-shutdown state into memory only; nothing downstream fires for them,
//! so a restart never re-alerts.
//!
//! Every stage here is non-blocking: a full update queue drops the trigger
//! (the reading itself is already in memory and queued for storage), never
//! the data.

use crate::bus::BusEvent;
use crate::fanout::FanOut;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_model::{decode_with_policy, DecodePolicy, Reading};
use warden_rtdb::{HistoryStore, Result as StoreResult, WorkingSet, WriteCoalescer};

/// Pipeline counters
#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    replayed: AtomicU64,
    dropped_triggers: AtomicU64,
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub replayed: u64,
    pub dropped_triggers: u64,
}

/// Bus-to-engine ingestion wiring
pub struct Pipeline {
    memory: Arc<WorkingSet>,
    coalescer: Arc<WriteCoalescer>,
    fanout: Arc<FanOut>,
    policy: DecodePolicy,
    updates: mpsc::Sender<String>,
    counters: Counters,
}

impl Pipeline {
    pub fn new(
        memory: Arc<WorkingSet>,
        coalescer: Arc<WriteCoalescer>,
        fanout: Arc<FanOut>,
        policy: DecodePolicy,
        updates: mpsc::Sender<String>,
    ) -> Self {
        Pipeline {
            memory,
            coalescer,
            fanout,
            policy,
            updates,
            counters: Counters::default(),
        }
    }

    /// Seed the working set from the newest stored reading per channel.
    ///
    /// Runs before the bus subscription starts so windowed conditions see
    /// pre-restart values immediately.
    pub async fn hydrate<S>(&self, store: &S) -> StoreResult<usize>
    where
        S: HistoryStore + ?Sized,
    {
        let rows = store.latest_per_channel().await?;
        let count = rows.len();
        for reading in rows {
            self.memory.update(reading);
        }
        info!(channels = count, "working set hydrated from store");
        Ok(count)
    }

    /// Process one bus event end to end
    pub fn handle_event(&self, event: BusEvent) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let raw = String::from_utf8_lossy(&event.payload);
        let Some(value) = decode_with_policy(&raw, &self.policy) else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(channel = %event.channel, payload = %raw, "sentinel payload dropped");
            return;
        };
        let reading = Reading::new(event.channel.clone(), value, Utc::now());

        if event.retained {
            self.memory.update(reading);
            self.counters.replayed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        self.memory.update(reading.clone());
        self.fanout.broadcast(&reading);
        self.coalescer.enqueue(reading);

        match self.updates.try_send(event.channel) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(channel)) => {
                self.counters.dropped_triggers.fetch_add(1, Ordering::Relaxed);
                warn!(channel = %channel, "update queue full, evaluation trigger dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("update queue closed, engine no longer consuming");
            }
        }
    }

    /// Consume bus events until cancelled
    pub async fn run(&self, mut events: mpsc::Receiver<BusEvent>, cancel: CancellationToken) {
        info!("ingestion pipeline started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                maybe = events.recv() => match maybe {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        info!("ingestion pipeline stopped");
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            received: self.counters.received.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            replayed: self.counters.replayed.load(Ordering::Relaxed),
            dropped_triggers: self.counters.dropped_triggers.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use bytes::Bytes;
    use warden_model::TypedValue;
    use warden_rtdb::{CoalescerConfig, MemoryHistory};

    struct Fixture {
        pipeline: Pipeline,
        memory: Arc<WorkingSet>,
        coalescer: Arc<WriteCoalescer>,
        fanout: Arc<FanOut>,
        updates: mpsc::Receiver<String>,
    }

    fn fixture(policy: DecodePolicy, queue_capacity: usize) -> Fixture {
        let memory = Arc::new(WorkingSet::new(5));
        let coalescer = Arc::new(WriteCoalescer::new(CoalescerConfig::default()));
        let fanout = Arc::new(FanOut::new(8));
        let (tx, rx) = mpsc::channel(queue_capacity);
        let pipeline = Pipeline::new(
            memory.clone(),
            coalescer.clone(),
            fanout.clone(),
            policy,
            tx,
        );
        Fixture {
            pipeline,
            memory,
            coalescer,
            fanout,
            updates: rx,
        }
    }

    fn event(channel: &str, payload: &str) -> BusEvent {
        BusEvent {
            channel: channel.to_string(),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
            retained: false,
        }
    }

    #[tokio::test]
    async fn test_event_flows_to_all_stages() {
        let mut fx = fixture(DecodePolicy::default(), 16);
        let (_id, mut frames) = fx.fanout.subscribe();

        fx.pipeline.handle_event(event("zige/pozar0/temp/val", "31"));

        let current = fx.memory.current("zige/pozar0/temp/val").unwrap();
        assert_eq!(current.value, TypedValue::Float(31.0));

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.value, TypedValue::Float(31.0));

        assert_eq!(fx.coalescer.pending_len(), 1);
        assert_eq!(fx.updates.recv().await.unwrap(), "zige/pozar0/temp/val");
        assert_eq!(fx.pipeline.stats().accepted, 1);
    }

    #[tokio::test]
    async fn test_sentinel_payload_goes_nowhere() {
        let mut fx = fixture(DecodePolicy::rejecting(["null"]), 16);

        fx.pipeline.handle_event(event("t/room", "null"));

        assert!(fx.memory.current("t/room").is_none());
        assert_eq!(fx.coalescer.pending_len(), 0);
        assert!(fx.updates.try_recv().is_err());
        assert_eq!(fx.pipeline.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_retained_replays_into_memory_only() {
        let mut fx = fixture(DecodePolicy::default(), 16);
        let (_id, mut frames) = fx.fanout.subscribe();

        fx.pipeline.handle_event(BusEvent {
            channel: "t/room".to_string(),
            payload: Bytes::from_static(b"21.5"),
            retained: true,
        });

        assert_eq!(
            fx.memory.current("t/room").unwrap().value,
            TypedValue::Float(21.5)
        );
        assert!(frames.try_recv().is_err());
        assert_eq!(fx.coalescer.pending_len(), 0);
        assert!(fx.updates.try_recv().is_err());
        assert_eq!(fx.pipeline.stats().replayed, 1);
    }

    #[tokio::test]
    async fn test_full_update_queue_drops_trigger_not_data() {
        let fx = fixture(DecodePolicy::default(), 1);

        fx.pipeline.handle_event(event("t/room", "1.0"));
        fx.pipeline.handle_event(event("t/room", "2.0"));

        assert_eq!(fx.pipeline.stats().dropped_triggers, 1);
        // Both readings survive in memory and in the write queue
        assert_eq!(
            fx.memory.current("t/room").unwrap().value,
            TypedValue::Float(2.0)
        );
        assert_eq!(fx.coalescer.pending_len(), 2);
    }

    #[tokio::test]
    async fn test_hydrate_seeds_memory() {
        let fx = fixture(DecodePolicy::default(), 16);
        let store = MemoryHistory::new();
        store
            .insert_rows(&[
                Reading::new("t/room", TypedValue::Float(21.0), Utc::now()),
                Reading::new("t/door", TypedValue::Bool(true), Utc::now()),
            ])
            .await
            .unwrap();

        let count = fx.pipeline.hydrate(&store).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            fx.memory.current("t/room").unwrap().value,
            TypedValue::Float(21.0)
        );
        assert_eq!(
            fx.memory.current("t/door").unwrap().value,
            TypedValue::Bool(true)
        );
    }

    #[tokio::test]
    async fn test_run_consumes_until_source_closes() {
        let fx = fixture(DecodePolicy::default(), 16);
        let (tx, rx) = mpsc::channel(16);

        tx.send(event("t/room", "25.0")).await.unwrap();
        drop(tx);

        fx.pipeline.run(rx, CancellationToken::new()).await;

        assert_eq!(
            fx.memory.current("t/room").unwrap().value,
            TypedValue::Float(25.0)
        );
    }

    #[tokio::test]
    async fn test_run_exits_on_cancellation() {
        let fx = fixture(DecodePolicy::default(), 16);
        let (_tx, rx) = mpsc::channel::<BusEvent>(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Returns despite the sender staying open
        fx.pipeline.run(rx, cancel).await;
        assert_eq!(fx.pipeline.stats().received, 0);
    }
}
