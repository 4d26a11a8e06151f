//! Notification boundary
//!
//! The engine dispatches `Notification`s through a `Notifier`; the delivery
//! transport (web push, mail, whatever the deployment wires in) lives behind
//! the trait. `LogNotifier` is the default sink, `RecordingNotifier` the test
//! mock.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;
use warden_model::TypedValue;
use warden_rules::{render_template, Rule, Severity};

/// One rendered notification ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Icon asset name, derived from severity
    pub icon: String,
    /// Collapse key; repeats with the same tag replace each other client-side
    pub tag: String,
}

impl Notification {
    /// Render a rule's templates against the current snapshot
    pub fn for_rule(rule: &Rule, snapshot: &HashMap<String, TypedValue>) -> Self {
        Notification {
            title: render_template(&rule.notification_title, snapshot),
            body: render_template(&rule.notification_body, snapshot),
            icon: severity_icon(rule.severity).to_string(),
            tag: rule.id.to_string(),
        }
    }
}

/// Icon asset for a severity level
pub fn severity_icon(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "icons/info.png",
        Severity::Warning => "icons/warning.png",
        Severity::Serious => "icons/serious.png",
    }
}

/// Delivery transport boundary
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification to all of an owner's subscriptions.
    ///
    /// Implementations own per-subscription failure handling and dead
    /// subscription cleanup; an error here means delivery failed outright.
    async fn send(&self, owner_id: &str, notification: Notification) -> Result<()>;
}

/// Default sink: logs every delivery
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, owner_id: &str, notification: Notification) -> Result<()> {
        info!(
            owner = %owner_id,
            title = %notification.title,
            body = %notification.body,
            tag = %notification.tag,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Test mock collecting every delivery
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Notification)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, owner_id: &str, notification: Notification) -> Result<()> {
        self.sent.lock().push((owner_id.to_string(), notification));
        Ok(())
    }
}
