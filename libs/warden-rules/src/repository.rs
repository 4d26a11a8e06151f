//! Rules repository - SQLite persistence for notification rules
//!
//! Rule edits arrive as batched change sets. A batch is validated against
//! the known channel kinds before anything is written, then applied in one
//! transaction so a bad edit can never leave half a batch behind.

use crate::error::{Result, RuleError};
use crate::eval;
use crate::types::{Rule, RuleChangeSet, Severity};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use warden_model::ValueKind;

/// Create the rules table and its indexes.
pub async fn ensure_rules_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            notification_title TEXT NOT NULL,
            notification_body TEXT NOT NULL,
            severity TEXT NOT NULL,
            conditions_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rules_owner ON rules(owner_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Load every stored rule.
pub async fn load_all_rules(pool: &SqlitePool) -> Result<Vec<Rule>> {
    let rows = sqlx::query(
        r#"
        SELECT id, owner_id, name, notification_title, notification_body,
               severity, conditions_json
        FROM rules
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut rules = Vec::with_capacity(rows.len());
    for row in rows {
        rules.push(hydrate_rule(row)?);
    }
    Ok(rules)
}

/// Load the rules belonging to one owner.
pub async fn load_rules_for_owner(pool: &SqlitePool, owner_id: &str) -> Result<Vec<Rule>> {
    let rows = sqlx::query(
        r#"
        SELECT id, owner_id, name, notification_title, notification_body,
               severity, conditions_json
        FROM rules
        WHERE owner_id = ?
        ORDER BY id ASC
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    let mut rules = Vec::with_capacity(rows.len());
    for row in rows {
        rules.push(hydrate_rule(row)?);
    }
    Ok(rules)
}

/// Get a single rule by id.
pub async fn get_rule(pool: &SqlitePool, id: i64) -> Result<Rule> {
    let row = sqlx::query(
        r#"
        SELECT id, owner_id, name, notification_title, notification_body,
               severity, conditions_json
        FROM rules
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => hydrate_rule(row),
        None => Err(RuleError::NotFound(id)),
    }
}

/// Apply a batched change set atomically.
///
/// Every added and edited rule is validated against the channel kinds
/// first; any failure rejects the whole batch with nothing written.
/// Deletes of unknown ids are ignored so retries stay harmless. Returns
/// the distinct owners whose rule sets changed, for engine reload.
pub async fn apply_changes(
    pool: &SqlitePool,
    changes: &RuleChangeSet,
    channels: &HashMap<String, ValueKind>,
) -> Result<Vec<String>> {
    validate_changes(changes, channels)?;

    let mut owners = BTreeSet::new();
    let mut tx = pool.begin().await?;

    for draft in &changes.added {
        let conditions_json = serde_json::to_string(&draft.conditions)?;
        sqlx::query(
            r#"
            INSERT INTO rules (owner_id, name, notification_title, notification_body,
                               severity, conditions_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&draft.owner_id)
        .bind(&draft.name)
        .bind(&draft.notification_title)
        .bind(&draft.notification_body)
        .bind(draft.severity.as_str())
        .bind(&conditions_json)
        .execute(&mut *tx)
        .await?;

        owners.insert(draft.owner_id.clone());
    }

    for rule in &changes.edited {
        // Ownership never moves on edit; the stored owner is the one to reload.
        let stored_owner: Option<String> =
            sqlx::query_scalar("SELECT owner_id FROM rules WHERE id = ?")
                .bind(rule.id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(stored_owner) = stored_owner else {
            return Err(RuleError::NotFound(rule.id));
        };

        let conditions_json = serde_json::to_string(&rule.conditions)?;
        sqlx::query(
            r#"
            UPDATE rules
            SET name = ?, notification_title = ?, notification_body = ?,
                severity = ?, conditions_json = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(&rule.name)
        .bind(&rule.notification_title)
        .bind(&rule.notification_body)
        .bind(rule.severity.as_str())
        .bind(&conditions_json)
        .bind(rule.id)
        .execute(&mut *tx)
        .await?;

        owners.insert(stored_owner);
    }

    for id in &changes.deleted {
        let stored_owner: Option<String> =
            sqlx::query_scalar("SELECT owner_id FROM rules WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(stored_owner) = stored_owner else {
            continue;
        };

        sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        owners.insert(stored_owner);
    }

    tx.commit().await?;
    Ok(owners.into_iter().collect())
}

fn validate_changes(
    changes: &RuleChangeSet,
    channels: &HashMap<String, ValueKind>,
) -> Result<()> {
    for draft in &changes.added {
        check_conditions(&draft.name, &draft.conditions, channels)?;
    }
    for rule in &changes.edited {
        check_conditions(&rule.name, &rule.conditions, channels)?;
    }
    Ok(())
}

fn check_conditions(
    name: &str,
    conditions: &[String],
    channels: &HashMap<String, ValueKind>,
) -> Result<()> {
    if conditions.is_empty() {
        return Err(RuleError::ValidationError(format!(
            "rule '{}' has no conditions",
            name
        )));
    }
    for (i, condition) in conditions.iter().enumerate() {
        eval::check(condition, channels).map_err(|e| {
            RuleError::ValidationError(format!("rule '{}' condition {}: {}", name, i + 1, e))
        })?;
    }
    Ok(())
}

/// Hydrate a row into a Rule.
fn hydrate_rule(row: SqliteRow) -> Result<Rule> {
    let id: i64 = row.try_get("id")?;
    let owner_id: String = row.try_get("owner_id")?;
    let name: String = row.try_get("name")?;
    let notification_title: String = row.try_get("notification_title")?;
    let notification_body: String = row.try_get("notification_body")?;
    let severity_tag: String = row.try_get("severity")?;
    let conditions_json: String = row.try_get("conditions_json")?;

    let severity = Severity::parse(&severity_tag).ok_or_else(|| {
        RuleError::SerializationError(format!("unknown severity tag: {}", severity_tag))
    })?;
    let conditions: Vec<String> = serde_json::from_str(&conditions_json)
        .map_err(|e| RuleError::SerializationError(format!("conditions: {}", e)))?;

    Ok(Rule {
        id,
        owner_id,
        name,
        notification_title,
        notification_body,
        severity,
        conditions,
    })
}
