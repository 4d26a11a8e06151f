//! Message bus boundary
//!
//! The ingestion pipeline consumes `BusEvent`s from a `MessageBus` without
//! knowing the transport. `LocalBus` is the in-process implementation used
//! for embedded wiring and tests: a broadcast channel plus a retained-message
//! map replayed to new subscribers, MQTT-style topic patterns (`+` one
//! segment, `#` the rest).

use crate::error::{MonsrvError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// One message delivered from the bus
#[derive(Debug, Clone)]
pub struct BusEvent {
    /// Topic the payload was published on
    pub channel: String,
    /// Raw payload bytes
    pub payload: Bytes,
    /// True when this event replays pre-subscription state
    pub retained: bool,
}

/// Pub/sub transport boundary
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Subscribe to all topics matching `pattern`. Retained messages are
    /// delivered first, flagged `retained`.
    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<BusEvent>>;

    /// Publish a payload on a topic.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    /// Publish a payload and retain it for future subscribers.
    async fn publish_retained(&self, channel: &str, payload: Bytes) -> Result<()>;
}

/// In-process bus implementation
pub struct LocalBus {
    sender: broadcast::Sender<BusEvent>,
    retained: Arc<DashMap<String, Bytes>>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        LocalBus {
            sender,
            retained: Arc::new(DashMap::new()),
        }
    }

    fn send(&self, event: BusEvent) {
        // A send error only means no subscriber is connected yet
        let _ = self.sender.send(event);
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<BusEvent>> {
        let (tx, rx) = mpsc::channel(256);
        let mut source = self.sender.subscribe();
        let pattern = pattern.to_string();

        // Snapshot retained messages before live delivery starts
        let mut replay: Vec<BusEvent> = self
            .retained
            .iter()
            .filter(|entry| topic_matches(&pattern, entry.key()))
            .map(|entry| BusEvent {
                channel: entry.key().clone(),
                payload: entry.value().clone(),
                retained: true,
            })
            .collect();
        replay.sort_by(|a, b| a.channel.cmp(&b.channel));

        tokio::spawn(async move {
            for event in replay {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if !topic_matches(&pattern, &event.channel) {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "bus subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(rx)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        if channel.is_empty() {
            return Err(MonsrvError::BusError("empty topic".to_string()));
        }
        self.send(BusEvent {
            channel: channel.to_string(),
            payload,
            retained: false,
        });
        Ok(())
    }

    async fn publish_retained(&self, channel: &str, payload: Bytes) -> Result<()> {
        if channel.is_empty() {
            return Err(MonsrvError::BusError("empty topic".to_string()));
        }
        self.retained.insert(channel.to_string(), payload.clone());
        self.send(BusEvent {
            channel: channel.to_string(),
            payload,
            retained: true,
        });
        Ok(())
    }
}

/// Match a topic against an MQTT-style pattern
///
/// `+` matches exactly one segment, `#` matches the remainder (only valid as
/// the final segment).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_segs = pattern.split('/');
    let mut topic_segs = topic.split('/');

    loop {
        match (pattern_segs.next(), topic_segs.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("#", "zige/pozar0/temp/val"));
        assert!(topic_matches("zige/#", "zige/pozar0/temp/val"));
        assert!(topic_matches("zige/+/temp/val", "zige/pozar0/temp/val"));
        assert!(topic_matches("zige/pozar0/temp/val", "zige/pozar0/temp/val"));

        assert!(!topic_matches("zige/+/temp/val", "zige/pozar0/smoke/val"));
        assert!(!topic_matches("zige/+", "zige/pozar0/temp"));
        assert!(!topic_matches("other/#", "zige/pozar0/temp/val"));
        assert!(!topic_matches("zige/pozar0/temp", "zige/pozar0/temp/val"));
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe("#").await.unwrap();

        bus.publish("a/b", Bytes::from_static(b"21.5")).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, "a/b");
        assert_eq!(event.payload, Bytes::from_static(b"21.5"));
        assert!(!event.retained);
    }

    #[tokio::test]
    async fn test_pattern_filters_events() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe("zige/+/temp/val").await.unwrap();

        bus.publish("zige/pozar0/smoke/val", Bytes::from_static(b"1"))
            .await
            .unwrap();
        bus.publish("zige/pozar0/temp/val", Bytes::from_static(b"31"))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, "zige/pozar0/temp/val");
    }

    #[tokio::test]
    async fn test_retained_replayed_to_new_subscriber() {
        let bus = LocalBus::new();
        bus.publish_retained("a/b", Bytes::from_static(b"true"))
            .await
            .unwrap();

        let mut rx = bus.subscribe("#").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, "a/b");
        assert!(event.retained);
    }

    #[tokio::test]
    async fn test_empty_topic_rejected() {
        let bus = LocalBus::new();
        assert!(bus.publish("", Bytes::new()).await.is_err());
    }
}
