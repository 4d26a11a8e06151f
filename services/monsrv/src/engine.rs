//! Rule engine runtime
//!
//! Holds the installed rules and their activation state, consumes channel
//! updates from the ingestion pipeline, and re-evaluates exactly the rules
//! that reference the updated channel. Activation edges dispatch
//! notifications; SERIOUS rules additionally repeat on an interval while
//! active. Every rule starts INACTIVE on install and reload, so a restart
//! never replays old alerts.

use crate::config::EngineConfig;
use crate::notify::{Notification, Notifier};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_model::{Reading, TypedValue};
use warden_rtdb::{HistoryStore, WorkingSet};
use warden_rules::{evaluate, EvalContext, Rule, Severity, WindowSource};

/// Windowed and durable lookups served to the expression evaluator
struct WindowAccess {
    memory: Arc<WorkingSet>,
    store: Arc<dyn HistoryStore>,
}

#[async_trait]
impl WindowSource for WindowAccess {
    async fn windowed(
        &self,
        channel: &str,
        window: chrono::Duration,
    ) -> anyhow::Result<Vec<Reading>> {
        let rows = self
            .memory
            .windowed(channel, window, self.store.as_ref())
            .await?;
        Ok(rows)
    }

    async fn last_stored(&self, channel: &str) -> anyhow::Result<Option<Reading>> {
        let row = self.store.latest(channel).await?;
        Ok(row)
    }
}

/// One installed rule with its derived channel set
struct InstalledRule {
    rule: Arc<Rule>,
    channels: BTreeSet<String>,
}

/// Mutable engine state, all behind one lock
#[derive(Default)]
struct EngineState {
    rules: FxHashMap<i64, InstalledRule>,
    owners: FxHashMap<String, Vec<i64>>,
    active: HashSet<i64>,
    repeat_timers: FxHashMap<i64, JoinHandle<()>>,
}

/// Engine counters
#[derive(Debug, Default)]
struct Counters {
    evaluations: AtomicU64,
    activations: AtomicU64,
    deactivations: AtomicU64,
    timeouts: AtomicU64,
}

/// Snapshot of engine counters and state sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub rules: usize,
    pub active: usize,
    pub evaluations: u64,
    pub activations: u64,
    pub deactivations: u64,
    pub timeouts: u64,
}

/// Rule evaluation runtime
pub struct RuleEngine {
    memory: Arc<WorkingSet>,
    windows: WindowAccess,
    notifier: Arc<dyn Notifier>,
    evaluation_timeout: Duration,
    serious_repeat: Duration,
    state: Mutex<EngineState>,
    counters: Counters,
}

impl RuleEngine {
    pub fn new(
        memory: Arc<WorkingSet>,
        store: Arc<dyn HistoryStore>,
        notifier: Arc<dyn Notifier>,
        config: &EngineConfig,
    ) -> Self {
        RuleEngine {
            windows: WindowAccess {
                memory: memory.clone(),
                store,
            },
            memory,
            notifier,
            evaluation_timeout: config.evaluation_timeout(),
            serious_repeat: config.serious_repeat(),
            state: Mutex::new(EngineState::default()),
            counters: Counters::default(),
        }
    }

    /// Install rules grouped by owner, all INACTIVE
    pub async fn install(&self, rules: Vec<Rule>) {
        let mut by_owner: HashMap<String, Vec<Rule>> = HashMap::new();
        for rule in rules {
            by_owner.entry(rule.owner_id.clone()).or_default().push(rule);
        }
        for (owner, set) in by_owner {
            self.reload_rules_for(&owner, set).await;
        }
    }

    /// Atomically replace one owner's rule set.
    ///
    /// Every replaced or removed rule is deactivated first (active-set
    /// eviction plus repeat-timer abort); the new set installs INACTIVE.
    pub async fn reload_rules_for(&self, owner_id: &str, rules: Vec<Rule>) {
        let mut state = self.state.lock().await;

        if let Some(ids) = state.owners.remove(owner_id) {
            for id in ids {
                state.active.remove(&id);
                if let Some(handle) = state.repeat_timers.remove(&id) {
                    handle.abort();
                }
                state.rules.remove(&id);
            }
        }

        let mut ids = Vec::with_capacity(rules.len());
        for rule in rules {
            let channels = rule.channels();
            ids.push(rule.id);
            state.rules.insert(
                rule.id,
                InstalledRule {
                    rule: Arc::new(rule),
                    channels,
                },
            );
        }
        info!(owner = %owner_id, rules = ids.len(), "rule set reloaded");
        if !ids.is_empty() {
            state.owners.insert(owner_id.to_string(), ids);
        }
    }

    /// Re-evaluate every rule referencing the updated channel
    pub async fn on_channel_update(&self, channel: &str) {
        let candidates: Vec<Arc<Rule>> = {
            let state = self.state.lock().await;
            state
                .rules
                .values()
                .filter(|installed| installed.channels.contains(channel))
                .map(|installed| installed.rule.clone())
                .collect()
        };
        if candidates.is_empty() {
            return;
        }

        let snapshot = self.latest_values();
        let ctx = EvalContext {
            latest: &snapshot,
            source: &self.windows,
        };

        for rule in candidates {
            self.counters.evaluations.fetch_add(1, Ordering::Relaxed);
            let satisfied = match timeout(self.evaluation_timeout, conditions_hold(&rule, &ctx))
                .await
            {
                Ok(holds) => holds,
                Err(_) => {
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(rule = rule.id, name = %rule.name, "rule evaluation timed out");
                    false
                }
            };
            self.apply_transition(&rule, satisfied, &snapshot).await;
        }
    }

    /// Consume the update queue until cancelled
    pub async fn run(&self, mut updates: mpsc::Receiver<String>, cancel: CancellationToken) {
        info!("rule engine started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                maybe = updates.recv() => match maybe {
                    Some(channel) => self.on_channel_update(&channel).await,
                    None => break,
                },
            }
        }
        self.shutdown().await;
        info!("rule engine stopped");
    }

    /// Abort all repeat timers
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        for (_, handle) in state.repeat_timers.drain() {
            handle.abort();
        }
    }

    pub async fn is_active(&self, rule_id: i64) -> bool {
        self.state.lock().await.active.contains(&rule_id)
    }

    pub async fn stats(&self) -> EngineStats {
        let state = self.state.lock().await;
        EngineStats {
            rules: state.rules.len(),
            active: state.active.len(),
            evaluations: self.counters.evaluations.load(Ordering::Relaxed),
            activations: self.counters.activations.load(Ordering::Relaxed),
            deactivations: self.counters.deactivations.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Apply the activation edge for one evaluated rule
    async fn apply_transition(
        &self,
        rule: &Arc<Rule>,
        satisfied: bool,
        snapshot: &HashMap<String, TypedValue>,
    ) {
        let fire = {
            let mut state = self.state.lock().await;
            // The rule may have been reloaded or deleted during evaluation;
            // a stale instance must not touch the fresh state.
            match state.rules.get(&rule.id) {
                Some(installed) if Arc::ptr_eq(&installed.rule, rule) => {}
                _ => return,
            }

            let was_active = state.active.contains(&rule.id);
            match (was_active, satisfied) {
                (false, true) => {
                    state.active.insert(rule.id);
                    self.counters.activations.fetch_add(1, Ordering::Relaxed);
                    if rule.severity == Severity::Serious {
                        let handle = self.spawn_repeat_timer(rule.clone());
                        if let Some(old) = state.repeat_timers.insert(rule.id, handle) {
                            old.abort();
                        }
                    }
                    true
                }
                (true, false) => {
                    state.active.remove(&rule.id);
                    self.counters.deactivations.fetch_add(1, Ordering::Relaxed);
                    if let Some(handle) = state.repeat_timers.remove(&rule.id) {
                        handle.abort();
                    }
                    debug!(rule = rule.id, name = %rule.name, "rule deactivated");
                    false
                }
                _ => false,
            }
        };

        if fire {
            info!(
                rule = rule.id,
                name = %rule.name,
                severity = %rule.severity,
                "rule activated"
            );
            let notification = Notification::for_rule(rule, snapshot);
            if let Err(e) = self.notifier.send(&rule.owner_id, notification).await {
                warn!(rule = rule.id, error = %e, "notification dispatch failed");
            }
        }
    }

    /// Re-notify on an interval until aborted; content re-renders from the
    /// live working set so repeated alerts show current values.
    fn spawn_repeat_timer(&self, rule: Arc<Rule>) -> JoinHandle<()> {
        let memory = self.memory.clone();
        let notifier = self.notifier.clone();
        let interval = self.serious_repeat;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let snapshot: HashMap<String, TypedValue> = memory
                    .snapshot()
                    .into_iter()
                    .map(|(channel, reading)| (channel, reading.value))
                    .collect();
                let notification = Notification::for_rule(&rule, &snapshot);
                if let Err(e) = notifier.send(&rule.owner_id, notification).await {
                    warn!(rule = rule.id, error = %e, "repeat notification failed");
                }
            }
        })
    }

    fn latest_values(&self) -> HashMap<String, TypedValue> {
        self.memory
            .snapshot()
            .into_iter()
            .map(|(channel, reading)| (channel, reading.value))
            .collect()
    }
}

/// All of a rule's conditions hold (logical AND, short-circuit)
async fn conditions_hold(rule: &Rule, ctx: &EvalContext<'_, WindowAccess>) -> bool {
    for condition in &rule.conditions {
        if !evaluate(condition, ctx).await {
            return false;
        }
    }
    true
}
