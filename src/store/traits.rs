//! `RuleRepository` trait: the persistence seam behind the rule store.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::graph::VocabularyEntry;
use crate::mail::EmailLabel;
use crate::rules::ClassificationRule;

/// Backend-agnostic storage for rules, the label catalog and the vocabulary.
///
/// The rule store keeps the authoritative in-memory view; a repository only
/// has to persist what it is given and hand it back on load.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    // ── Rules ───────────────────────────────────────────────────────

    /// Load every rule, soft-deleted tombstones included.
    async fn load_rules(&self) -> Result<Vec<ClassificationRule>, DatabaseError>;

    /// Insert or replace a rule by id.
    async fn save_rule(&self, rule: &ClassificationRule) -> Result<(), DatabaseError>;

    // ── Labels ──────────────────────────────────────────────────────

    async fn load_labels(&self) -> Result<Vec<EmailLabel>, DatabaseError>;

    /// Insert or replace a label by id.
    async fn save_label(&self, label: &EmailLabel) -> Result<(), DatabaseError>;

    // ── Vocabulary ──────────────────────────────────────────────────

    async fn load_vocabulary(&self) -> Result<Vec<VocabularyEntry>, DatabaseError>;

    /// Insert or replace an entry keyed by `(kind, name)`.
    async fn save_vocabulary(&self, entry: &VocabularyEntry) -> Result<(), DatabaseError>;
}
