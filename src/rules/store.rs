//! Rule store: validated CRUD over rules, the label catalog and the
//! vocabulary, published to readers as immutable snapshots.
//!
//! Writers serialize on a gate held across the repository write and the
//! snapshot swap. Readers only clone an `Arc`, so a slow write never blocks
//! classification for longer than the pointer swap.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::RuleSource;
use super::model::{ClassificationRule, RuleDraft, RuleUpdate};
use super::snapshot::RuleSnapshot;
use super::validate::validate;
use crate::error::{DatabaseError, EngineUnavailableError, RuleStoreError};
use crate::graph::model::normalize_name;
use crate::graph::{NodeKind, VocabularyEntry};
use crate::mail::EmailLabel;
use crate::store::RuleRepository;

struct Published {
    snapshot: Arc<RuleSnapshot>,
    /// Set when the last reload failed.
    unavailable: Option<String>,
}

pub struct RuleStore {
    published: RwLock<Published>,
    writer: Mutex<()>,
    repository: Option<Arc<dyn RuleRepository>>,
}

impl RuleStore {
    /// In-memory store with no persistence.
    pub fn new() -> Self {
        Self {
            published: RwLock::new(Published {
                snapshot: Arc::new(RuleSnapshot::empty()),
                unavailable: None,
            }),
            writer: Mutex::new(()),
            repository: None,
        }
    }

    /// Store backed by a repository; loads everything it holds.
    pub async fn open(repository: Arc<dyn RuleRepository>) -> Result<Self, DatabaseError> {
        let store = Self {
            repository: Some(repository),
            ..Self::new()
        };
        store.reload().await?;
        Ok(store)
    }

    /// Re-read the repository and publish what it holds.
    ///
    /// On failure the store is marked unavailable until a reload succeeds.
    pub async fn reload(&self) -> Result<(), DatabaseError> {
        let Some(repository) = &self.repository else {
            return Ok(());
        };
        let _gate = self.writer.lock().await;

        let loaded = async {
            let rules = repository.load_rules().await?;
            let labels = repository.load_labels().await?;
            let vocabulary = repository.load_vocabulary().await?;
            Ok::<_, DatabaseError>((rules, labels, vocabulary))
        }
        .await;

        match loaded {
            Ok((rules, labels, vocabulary)) => {
                let rules: BTreeMap<Uuid, ClassificationRule> = rules
                    .into_iter()
                    .filter(|r| !r.is_deleted())
                    .map(|r| (r.id, r))
                    .collect();
                let labels = labels.into_iter().map(|l| (l.id.clone(), l)).collect();
                let count = rules.len();
                self.publish(rules, labels, vocabulary).await;
                self.published.write().await.unavailable = None;
                info!(rules = count, "Rule store loaded");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Rule store reload failed; marking unavailable");
                self.published.write().await.unavailable = Some(e.to_string());
                Err(e)
            }
        }
    }

    // ── Rules ───────────────────────────────────────────────────────

    pub async fn create(&self, draft: RuleDraft) -> Result<ClassificationRule, RuleStoreError> {
        let _gate = self.writer.lock().await;
        let current = self.current().await;

        let now = Utc::now();
        let rule = ClassificationRule {
            id: Uuid::new_v4(),
            name: draft.name.trim().to_string(),
            description: draft.description,
            pattern: draft.pattern,
            labels: draft.labels,
            is_active: draft.is_active,
            priority: draft.priority,
            ai_threshold: draft.ai_threshold,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        validate(&rule)?;
        self.persist(&rule).await?;

        let mut rules = current.rules.clone();
        rules.insert(rule.id, rule.clone());
        self.publish(rules, current.labels.clone(), current.vocabulary_entries.clone())
            .await;

        info!(rule_id = %rule.id, name = %rule.name, "Rule created");
        Ok(rule)
    }

    pub async fn update(&self, id: Uuid, update: RuleUpdate) -> Result<ClassificationRule, RuleStoreError> {
        let _gate = self.writer.lock().await;
        let current = self.current().await;

        let mut rule = current
            .rules
            .get(&id)
            .cloned()
            .ok_or(RuleStoreError::NotFound { id })?;
        update.apply_to(&mut rule);
        rule.name = rule.name.trim().to_string();
        validate(&rule)?;
        rule.version += 1;
        rule.updated_at = next_timestamp(rule.updated_at);
        self.persist(&rule).await?;

        let mut rules = current.rules.clone();
        rules.insert(id, rule.clone());
        self.publish(rules, current.labels.clone(), current.vocabulary_entries.clone())
            .await;

        info!(rule_id = %id, version = rule.version, "Rule updated");
        Ok(rule)
    }

    /// Soft delete: the rule disappears from reads, a tombstone is persisted.
    pub async fn delete(&self, id: Uuid) -> Result<(), RuleStoreError> {
        let _gate = self.writer.lock().await;
        let current = self.current().await;

        let mut rule = current
            .rules
            .get(&id)
            .cloned()
            .ok_or(RuleStoreError::NotFound { id })?;
        let at = next_timestamp(rule.updated_at);
        rule.deleted_at = Some(at);
        rule.updated_at = at;
        rule.version += 1;
        self.persist(&rule).await?;

        let mut rules = current.rules.clone();
        rules.remove(&id);
        self.publish(rules, current.labels.clone(), current.vocabulary_entries.clone())
            .await;

        info!(rule_id = %id, "Rule deleted");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Option<ClassificationRule> {
        self.current().await.rules.get(&id).cloned()
    }

    /// Rules ordered by creation time, optionally only the active ones.
    pub async fn list(&self, active_only: bool) -> Vec<ClassificationRule> {
        let snapshot = self.current().await;
        let mut rules: Vec<ClassificationRule> = snapshot
            .rules
            .values()
            .filter(|r| !active_only || r.is_active)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rules
    }

    // ── Labels ──────────────────────────────────────────────────────

    pub async fn upsert_label(&self, label: EmailLabel) -> Result<EmailLabel, RuleStoreError> {
        let label = EmailLabel {
            id: label.id.trim().to_string(),
            name: label.name.trim().to_string(),
            ..label
        };
        if label.id.is_empty() {
            return Err(RuleStoreError::InvalidLabel {
                reason: "id must not be empty".into(),
            });
        }
        if label.name.is_empty() {
            return Err(RuleStoreError::InvalidLabel {
                reason: "name must not be empty".into(),
            });
        }

        let _gate = self.writer.lock().await;
        let current = self.current().await;
        if let Some(repository) = &self.repository {
            repository.save_label(&label).await?;
        }

        let mut labels = current.labels.clone();
        labels.insert(label.id.clone(), label.clone());
        self.publish(current.rules.clone(), labels, current.vocabulary_entries.clone())
            .await;
        Ok(label)
    }

    /// Label catalog ordered by name.
    pub async fn labels(&self) -> Vec<EmailLabel> {
        let mut labels: Vec<EmailLabel> = self.current().await.labels.values().cloned().collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        labels
    }

    // ── Vocabulary ──────────────────────────────────────────────────

    /// Register a project/topic, merging phrases into an existing entry
    /// with the same normalized name.
    pub async fn add_vocabulary(&self, entry: VocabularyEntry) -> Result<VocabularyEntry, RuleStoreError> {
        if !matches!(entry.kind, NodeKind::Project | NodeKind::Topic) {
            return Err(RuleStoreError::InvalidVocabulary {
                reason: format!("{} entries are inferred from addresses, not vocabulary", entry.kind),
            });
        }
        let key = normalize_name(&entry.name);
        if key.is_empty() {
            return Err(RuleStoreError::InvalidVocabulary {
                reason: "name must not be empty".into(),
            });
        }

        let _gate = self.writer.lock().await;
        let current = self.current().await;
        let mut entries = current.vocabulary_entries.clone();

        let merged = match entries
            .iter_mut()
            .find(|e| e.kind == entry.kind && normalize_name(&e.name) == key)
        {
            Some(existing) => {
                for phrase in entry.phrases {
                    let phrase = phrase.trim().to_string();
                    if !phrase.is_empty() && !existing.phrases.contains(&phrase) {
                        existing.phrases.push(phrase);
                    }
                }
                existing.clone()
            }
            None => {
                let fresh = VocabularyEntry {
                    kind: entry.kind,
                    name: entry.name.trim().to_string(),
                    phrases: entry
                        .phrases
                        .into_iter()
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect(),
                };
                entries.push(fresh.clone());
                fresh
            }
        };

        if let Some(repository) = &self.repository {
            repository.save_vocabulary(&merged).await?;
        }
        self.publish(current.rules.clone(), current.labels.clone(), entries)
            .await;
        Ok(merged)
    }

    pub async fn vocabulary(&self) -> Vec<VocabularyEntry> {
        self.current().await.vocabulary_entries.clone()
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Latest published snapshot, regardless of availability.
    pub async fn current(&self) -> Arc<RuleSnapshot> {
        self.published.read().await.snapshot.clone()
    }

    async fn persist(&self, rule: &ClassificationRule) -> Result<(), RuleStoreError> {
        if let Some(repository) = &self.repository {
            repository.save_rule(rule).await.map_err(|e| {
                warn!(rule_id = %rule.id, error = %e, "Failed to persist rule");
                e
            })?;
        }
        Ok(())
    }

    /// Build and swap in the next snapshot. Callers hold the writer gate.
    async fn publish(
        &self,
        rules: BTreeMap<Uuid, ClassificationRule>,
        labels: BTreeMap<String, EmailLabel>,
        vocabulary: Vec<VocabularyEntry>,
    ) {
        let generation = self.current().await.generation + 1;
        let next = Arc::new(RuleSnapshot::build(generation, rules, labels, vocabulary));
        self.published.write().await.snapshot = next;
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleSource for RuleStore {
    async fn snapshot(&self) -> Result<Arc<RuleSnapshot>, EngineUnavailableError> {
        let published = self.published.read().await;
        match &published.unavailable {
            Some(reason) => Err(EngineUnavailableError {
                reason: reason.clone(),
            }),
            None => Ok(published.snapshot.clone()),
        }
    }
}

/// `now`, or 1 ms past `previous` when the clock has not moved past it.
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::error::InvalidRuleError;
    use crate::graph::EdgeKind;
    use crate::mail::LabelKind;
    use crate::rules::model::{ConditionOperator, EdgeTemplate, NodeTemplate, RuleCondition, RulePattern};
    use crate::store::LibSqlBackend;

    fn escalation_draft() -> RuleDraft {
        RuleDraft::new(
            "Client Escalation",
            RulePattern {
                nodes: vec![
                    NodeTemplate::new("p", NodeKind::Person),
                    NodeTemplate::new("c", NodeKind::Company).named("Acme"),
                ],
                edges: vec![EdgeTemplate::new("e", "p", "c", EdgeKind::EmployedBy)],
                conditions: vec![RuleCondition::new("thread.subject", ConditionOperator::Contains, "urgent")],
                ..Default::default()
            },
            &["escalation"],
        )
    }

    #[tokio::test]
    async fn create_get_and_list() {
        let store = RuleStore::new();
        let rule = store.create(escalation_draft()).await.unwrap();
        assert_eq!(rule.version, 1);
        assert_eq!(rule.created_at, rule.updated_at);

        assert_eq!(store.get(rule.id).await.unwrap(), rule);
        assert_eq!(store.list(true).await.len(), 1);
        assert_eq!(store.snapshot().await.unwrap().active.len(), 1);
    }

    #[tokio::test]
    async fn invalid_rule_leaves_store_unchanged() {
        let store = RuleStore::new();
        let mut draft = escalation_draft();
        draft
            .pattern
            .conditions
            .push(RuleCondition::new("thread.subject", ConditionOperator::Regex, "(unclosed"));

        let before = store.current().await.generation;
        let err = store.create(draft).await.unwrap_err();
        match err {
            RuleStoreError::Invalid(InvalidRuleError { field, .. }) => assert_eq!(field, "conditions[1].value"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.list(false).await.is_empty());
        assert_eq!(store.current().await.generation, before);
    }

    #[tokio::test]
    async fn update_bumps_version_and_updated_at() {
        let store = RuleStore::new();
        let rule = store.create(escalation_draft()).await.unwrap();

        let first = store
            .update(rule.id, RuleUpdate { is_active: Some(false), ..Default::default() })
            .await
            .unwrap();
        let second = store
            .update(rule.id, RuleUpdate { name: Some("Renamed".into()), ..Default::default() })
            .await
            .unwrap();

        assert_eq!(second.version, 3);
        assert!(first.updated_at > rule.updated_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.created_at, rule.created_at);
        assert!(store.list(true).await.is_empty());
        assert_eq!(store.list(false).await.len(), 1);
    }

    #[tokio::test]
    async fn invalid_update_is_rejected_without_changes() {
        let store = RuleStore::new();
        let rule = store.create(escalation_draft()).await.unwrap();
        let err = store
            .update(rule.id, RuleUpdate { labels: Some(vec![]), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, RuleStoreError::Invalid(_)));
        assert_eq!(store.get(rule.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn delete_hides_rule_and_missing_ids_are_not_found() {
        let store = RuleStore::new();
        let rule = store.create(escalation_draft()).await.unwrap();
        store.delete(rule.id).await.unwrap();

        assert!(store.get(rule.id).await.is_none());
        assert!(store.list(false).await.is_empty());
        assert!(store.snapshot().await.unwrap().active.is_empty());
        assert!(matches!(store.delete(rule.id).await, Err(RuleStoreError::NotFound { .. })));
        assert!(matches!(
            store.update(rule.id, RuleUpdate::default()).await,
            Err(RuleStoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn held_snapshot_is_unaffected_by_later_writes() {
        let store = RuleStore::new();
        let rule = store.create(escalation_draft()).await.unwrap();
        let held = store.snapshot().await.unwrap();
        store.delete(rule.id).await.unwrap();

        assert_eq!(held.active.len(), 1);
        assert!(store.snapshot().await.unwrap().generation > held.generation);
    }

    #[tokio::test]
    async fn labels_and_vocabulary() {
        let store = RuleStore::new();
        store
            .upsert_label(EmailLabel::new("vip", "VIP", LabelKind::User))
            .await
            .unwrap();
        store
            .upsert_label(EmailLabel::new("billing", "Billing", LabelKind::Custom))
            .await
            .unwrap();
        let names: Vec<String> = store.labels().await.into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["Billing", "VIP"]);
        assert!(store.upsert_label(EmailLabel::new(" ", "x", LabelKind::User)).await.is_err());

        store
            .add_vocabulary(VocabularyEntry::new(NodeKind::Topic, "billing"))
            .await
            .unwrap();
        let merged = store
            .add_vocabulary(VocabularyEntry::new(NodeKind::Topic, "Billing").with_phrases(&["invoice"]))
            .await
            .unwrap();
        assert_eq!(merged.phrases, vec!["invoice"]);
        assert_eq!(store.vocabulary().await.len(), 1);
        assert!(matches!(
            store.add_vocabulary(VocabularyEntry::new(NodeKind::Company, "Acme")).await,
            Err(RuleStoreError::InvalidVocabulary { .. })
        ));
    }

    #[tokio::test]
    async fn persisted_state_survives_reopen() {
        let backend: Arc<dyn RuleRepository> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let store = RuleStore::open(backend.clone()).await.unwrap();
        let kept = store.create(escalation_draft()).await.unwrap();
        let dropped = store.create(escalation_draft()).await.unwrap();
        store.delete(dropped.id).await.unwrap();
        store
            .upsert_label(EmailLabel::new("escalation", "Escalation", LabelKind::User))
            .await
            .unwrap();

        let reopened = RuleStore::open(backend).await.unwrap();
        let rules = reopened.list(false).await;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0], kept);
        assert_eq!(reopened.labels().await.len(), 1);
    }

    struct FlakyRepository {
        failing: AtomicBool,
    }

    #[async_trait]
    impl RuleRepository for FlakyRepository {
        async fn load_rules(&self) -> Result<Vec<ClassificationRule>, DatabaseError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(DatabaseError::Query("connection refused".into()))
            } else {
                Ok(vec![])
            }
        }
        async fn save_rule(&self, _rule: &ClassificationRule) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn load_labels(&self) -> Result<Vec<EmailLabel>, DatabaseError> {
            Ok(vec![])
        }
        async fn save_label(&self, _label: &EmailLabel) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn load_vocabulary(&self) -> Result<Vec<VocabularyEntry>, DatabaseError> {
            Ok(vec![])
        }
        async fn save_vocabulary(&self, _entry: &VocabularyEntry) -> Result<(), DatabaseError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_reload_marks_store_unavailable_until_recovery() {
        let repo = Arc::new(FlakyRepository {
            failing: AtomicBool::new(false),
        });
        let store = RuleStore::open(repo.clone()).await.unwrap();
        assert!(store.snapshot().await.is_ok());

        repo.failing.store(true, Ordering::SeqCst);
        assert!(store.reload().await.is_err());
        let err = store.snapshot().await.unwrap_err();
        assert!(err.reason.contains("connection refused"));

        repo.failing.store(false, Ordering::SeqCst);
        store.reload().await.unwrap();
        assert!(store.snapshot().await.is_ok());
    }
}
