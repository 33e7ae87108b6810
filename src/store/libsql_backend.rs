//! libSQL backend: async `RuleRepository` implementation.
//!
//! Supports local file and in-memory databases. Patterns and label lists
//! are stored as JSON text; timestamps as RFC 3339.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::graph::{NodeKind, VocabularyEntry};
use crate::mail::{EmailLabel, LabelKind};
use crate::rules::{ClassificationRule, RulePattern};
use crate::store::migrations;
use crate::store::traits::RuleRepository;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Rule database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_real(v: Option<f32>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(f64::from(v)),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, DatabaseError> {
    serde_json::to_string(value)
        .map_err(|e| DatabaseError::Serialization(format!("{what}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(format!("{what}: {e}")))
}

const RULE_COLUMNS: &str = "id, name, description, pattern, labels, is_active, priority, ai_threshold, version, created_at, updated_at, deleted_at";

fn row_to_rule(row: &libsql::Row) -> Result<ClassificationRule, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("rule row parse: {e}"));

    let id_str: String = row.get(0).map_err(get_err)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("rule id {id_str:?}: {e}")))?;
    let pattern_json: String = row.get(3).map_err(get_err)?;
    let labels_json: String = row.get(4).map_err(get_err)?;
    let pattern: RulePattern = from_json(&pattern_json, "rule pattern")?;
    let labels: Vec<String> = from_json(&labels_json, "rule labels")?;
    let created_str: String = row.get(9).map_err(get_err)?;
    let updated_str: String = row.get(10).map_err(get_err)?;
    let deleted_str: Option<String> = row.get(11).ok();

    Ok(ClassificationRule {
        id,
        name: row.get(1).map_err(get_err)?,
        description: row.get::<String>(2).unwrap_or_default(),
        pattern,
        labels,
        is_active: row.get::<i64>(5).map_err(get_err)? != 0,
        priority: row.get::<f64>(6).map_err(get_err)? as f32,
        ai_threshold: row.get::<f64>(7).ok().map(|t| t as f32),
        version: row.get::<i64>(8).map_err(get_err)?.max(0) as u64,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        deleted_at: deleted_str.as_deref().map(parse_datetime),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RuleRepository for LibSqlBackend {
    async fn load_rules(&self) -> Result<Vec<ClassificationRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM rules ORDER BY created_at, id"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_rules: {e}")))?;

        let mut rules = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => rules.push(row_to_rule(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("load_rules: {e}"))),
            }
        }
        debug!(count = rules.len(), "Loaded rules");
        Ok(rules)
    }

    async fn save_rule(&self, rule: &ClassificationRule) -> Result<(), DatabaseError> {
        let pattern_json = to_json(&rule.pattern, "rule pattern")?;
        let labels_json = to_json(&rule.labels, "rule labels")?;

        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO rules ({RULE_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    rule.id.to_string(),
                    rule.name.clone(),
                    rule.description.clone(),
                    pattern_json,
                    labels_json,
                    i64::from(rule.is_active),
                    f64::from(rule.priority),
                    opt_real(rule.ai_threshold),
                    rule.version as i64,
                    rule.created_at.to_rfc3339(),
                    rule.updated_at.to_rfc3339(),
                    opt_text_owned(rule.deleted_at.map(|d| d.to_rfc3339())),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_rule: {e}")))?;
        Ok(())
    }

    async fn load_labels(&self) -> Result<Vec<EmailLabel>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id, name, kind, color FROM labels ORDER BY name, id", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("load_labels: {e}")))?;

        let mut labels = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let get_err = |e: libsql::Error| DatabaseError::Query(format!("label row parse: {e}"));
                    let kind: String = row.get(2).map_err(get_err)?;
                    labels.push(EmailLabel {
                        id: row.get(0).map_err(get_err)?,
                        name: row.get(1).map_err(get_err)?,
                        kind: LabelKind::parse(&kind),
                        color: row.get(3).ok(),
                    });
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("load_labels: {e}"))),
            }
        }
        Ok(labels)
    }

    async fn save_label(&self, label: &EmailLabel) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO labels (id, name, kind, color) VALUES (?1, ?2, ?3, ?4)",
                params![
                    label.id.clone(),
                    label.name.clone(),
                    label.kind.as_str(),
                    opt_text_owned(label.color.clone()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_label: {e}")))?;
        Ok(())
    }

    async fn load_vocabulary(&self) -> Result<Vec<VocabularyEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT kind, name, phrases FROM vocabulary ORDER BY created_at, kind, name",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_vocabulary: {e}")))?;

        let mut entries = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let get_err =
                        |e: libsql::Error| DatabaseError::Query(format!("vocabulary row parse: {e}"));
                    let kind_str: String = row.get(0).map_err(get_err)?;
                    let kind: NodeKind = kind_str
                        .parse()
                        .map_err(|e: String| DatabaseError::Serialization(format!("vocabulary kind: {e}")))?;
                    let phrases_json: String = row.get(2).map_err(get_err)?;
                    entries.push(VocabularyEntry {
                        kind,
                        name: row.get(1).map_err(get_err)?,
                        phrases: from_json(&phrases_json, "vocabulary phrases")?,
                    });
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("load_vocabulary: {e}"))),
            }
        }
        Ok(entries)
    }

    async fn save_vocabulary(&self, entry: &VocabularyEntry) -> Result<(), DatabaseError> {
        let phrases_json = to_json(&entry.phrases, "vocabulary phrases")?;
        self.conn()
            .execute(
                "INSERT INTO vocabulary (kind, name, phrases) VALUES (?1, ?2, ?3) \
                 ON CONFLICT (kind, name) DO UPDATE SET phrases = excluded.phrases",
                params![entry.kind.as_str(), entry.name.clone(), phrases_json],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_vocabulary: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeKind, NodeKind};
    use crate::rules::{ConditionOperator, EdgeTemplate, NodeTemplate, PatternKind, RuleCondition};

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_rule(name: &str) -> ClassificationRule {
        let now = Utc::now();
        let mut company = NodeTemplate::new("c", NodeKind::Company).named("Acme");
        company.min_weight = Some(1.0);
        ClassificationRule {
            id: Uuid::new_v4(),
            name: name.into(),
            description: "Escalations from Acme staff".into(),
            pattern: RulePattern {
                kind: PatternKind::Graph,
                nodes: vec![NodeTemplate::new("p", NodeKind::Person), company],
                edges: vec![EdgeTemplate::new("e", "p", "c", EdgeKind::EmployedBy)],
                conditions: vec![RuleCondition::new(
                    "thread.subject",
                    ConditionOperator::Contains,
                    "urgent",
                )],
            },
            labels: vec!["escalation".into(), "acme".into()],
            is_active: true,
            priority: 2.5,
            ai_threshold: Some(0.8),
            version: 3,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    // ── Rule tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn save_and_load_rule_round_trips() {
        let db = test_db().await;
        let rule = make_rule("Client Escalation");
        db.save_rule(&rule).await.unwrap();

        let loaded = db.load_rules().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let got = &loaded[0];
        assert_eq!(got.id, rule.id);
        assert_eq!(got.pattern, rule.pattern);
        assert_eq!(got.labels, rule.labels);
        assert_eq!(got.priority, 2.5);
        assert_eq!(got.ai_threshold, Some(0.8));
        assert_eq!(got.version, 3);
        assert_eq!(got.updated_at, rule.updated_at);
        assert!(got.deleted_at.is_none());
    }

    #[tokio::test]
    async fn save_replaces_and_keeps_tombstones() {
        let db = test_db().await;
        let mut rule = make_rule("r");
        db.save_rule(&rule).await.unwrap();

        rule.deleted_at = Some(Utc::now());
        rule.version += 1;
        db.save_rule(&rule).await.unwrap();

        let loaded = db.load_rules().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].deleted_at.is_some());
        assert_eq!(loaded[0].version, 4);
    }

    // ── Label tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn labels_upsert_by_id() {
        let db = test_db().await;
        db.save_label(&EmailLabel::new("vip", "VIP", LabelKind::User))
            .await
            .unwrap();
        let mut renamed = EmailLabel::new("vip", "Very Important", LabelKind::User);
        renamed.color = Some("#ff0000".into());
        db.save_label(&renamed).await.unwrap();

        let labels = db.load_labels().await.unwrap();
        assert_eq!(labels, vec![renamed]);
    }

    // ── Vocabulary tests ────────────────────────────────────────────

    #[tokio::test]
    async fn vocabulary_upserts_phrases() {
        let db = test_db().await;
        db.save_vocabulary(&VocabularyEntry::new(NodeKind::Topic, "billing"))
            .await
            .unwrap();
        db.save_vocabulary(
            &VocabularyEntry::new(NodeKind::Topic, "billing").with_phrases(&["invoice"]),
        )
        .await
        .unwrap();

        let entries = db.load_vocabulary().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].phrases, vec!["invoice"]);
    }

    #[tokio::test]
    async fn local_file_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rules.db");
        let rule = make_rule("persisted");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.save_rule(&rule).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let loaded = db.load_rules().await.unwrap();
        assert_eq!(loaded[0].id, rule.id);
    }
}
