//! Rule type definitions
//!
//! Core types for rule storage and evaluation:
//! - Rule: stored notification rule with its condition expressions
//! - RuleDraft: rule payload before an id is assigned
//! - RuleChangeSet: batched add/edit/delete submitted by an editor
//! - Severity: notification urgency, drives re-notify behavior

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::LazyLock;
use warden_model::TypedValue;

/// Notification urgency.
///
/// INFO and WARNING notify once per activation; SERIOUS re-notifies on a
/// short interval until the rule deactivates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Serious,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Serious => "SERIOUS",
        }
    }

    /// Parse a stored severity tag.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(Severity::Info),
            "WARNING" => Some(Severity::Warning),
            "SERIOUS" => Some(Severity::Serious),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored notification rule.
///
/// A rule is active when all of its conditions hold. Placeholders in the
/// notification title and body are filled with current channel values when
/// the notification fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier
    pub id: i64,

    /// Owning user
    pub owner_id: String,

    /// Display name shown in rule listings
    pub name: String,

    /// Notification title template
    pub notification_title: String,

    /// Notification body template
    pub notification_body: String,

    /// Notification urgency
    pub severity: Severity,

    /// Condition expressions, all of which must hold
    pub conditions: Vec<String>,
}

impl Rule {
    /// Channels referenced anywhere in this rule.
    ///
    /// Covers the title and body templates as well as every condition, so
    /// an update on a template-only channel still re-renders and re-checks
    /// the rule. Computed from the current field values, never cached on
    /// the struct.
    pub fn channels(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_placeholders(&self.notification_title, &mut out);
        collect_placeholders(&self.notification_body, &mut out);
        for condition in &self.conditions {
            collect_placeholders(condition, &mut out);
        }
        out
    }
}

/// Rule payload before an id is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub owner_id: String,
    pub name: String,
    pub notification_title: String,
    pub notification_body: String,
    pub severity: Severity,
    pub conditions: Vec<String>,
}

/// Batched rule changes submitted by an editor.
///
/// Applied atomically: if any added or edited rule fails validation, the
/// whole set is rejected and nothing is written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleChangeSet {
    #[serde(default)]
    pub added: Vec<RuleDraft>,

    #[serde(default)]
    pub edited: Vec<Rule>,

    /// Rule ids to remove; unknown ids are ignored
    #[serde(default)]
    pub deleted: Vec<i64>,
}

impl RuleChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.edited.is_empty() && self.deleted.is_empty()
    }
}

// Fixed placeholder pattern, compiled once and shared by collection
// and rendering
static PLACEHOLDER_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").ok());

/// Collect `{channel}` placeholder names from a template or condition.
pub fn collect_placeholders(text: &str, out: &mut BTreeSet<String>) {
    if let Some(re) = PLACEHOLDER_RE.as_ref() {
        for caps in re.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                let name = name.as_str().trim();
                if !name.is_empty() {
                    out.insert(name.to_string());
                }
            }
        }
    }
}

/// Fill `{channel}` placeholders with current values.
///
/// Channels without a value render as `?` so a notification always goes
/// out with a readable message.
pub fn render_template(template: &str, values: &HashMap<String, TypedValue>) -> String {
    match PLACEHOLDER_RE.as_ref() {
        Some(re) => re
            .replace_all(template, |caps: &regex::Captures<'_>| {
                let name = caps[1].trim();
                match values.get(name) {
                    Some(value) => value.to_string(),
                    None => "?".to_string(),
                }
            })
            .into_owned(),
        None => template.to_string(),
    }
}
