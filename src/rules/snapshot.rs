//! Immutable, compiled view of the rule store handed to classification.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use tracing::warn;
use uuid::Uuid;

use super::model::{ClassificationRule, ConditionOperator};
use super::validate::FieldPath;
use crate::graph::{NodeKind, Vocabulary, VocabularyEntry};
use crate::mail::EmailLabel;

/// A condition with its field resolved and regex precompiled.
///
/// `field` or `regex` is `None` only for stored data that no longer
/// compiles; such a condition is never satisfied.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    pub field: Option<FieldPath>,
    pub operator: ConditionOperator,
    pub value: String,
    pub regex: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: ClassificationRule,
    pub conditions: Vec<CompiledCondition>,
}

impl CompiledRule {
    pub fn compile(rule: ClassificationRule) -> Self {
        let conditions = rule
            .pattern
            .conditions
            .iter()
            .map(|condition| {
                let field = FieldPath::resolve(&condition.field, &rule.pattern)
                    .map_err(|reason| {
                        warn!(rule_id = %rule.id, field = %condition.field, %reason, "Stored condition field does not resolve");
                    })
                    .ok();
                let regex = match condition.operator {
                    ConditionOperator::Regex => Regex::new(&condition.value)
                        .map_err(|e| {
                            warn!(rule_id = %rule.id, error = %e, "Stored condition regex does not compile");
                        })
                        .ok(),
                    _ => None,
                };
                CompiledCondition {
                    field,
                    operator: condition.operator,
                    value: condition.value.clone(),
                    regex,
                }
            })
            .collect();

        Self { rule, conditions }
    }
}

/// Copy-on-write snapshot: what one classification call or batch sees.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    /// Increases with every published change.
    pub generation: u64,
    /// Every non-deleted rule, active or not.
    pub rules: BTreeMap<Uuid, ClassificationRule>,
    /// Active rules, compiled, ordered by creation time then id.
    pub active: Vec<Arc<CompiledRule>>,
    pub labels: BTreeMap<String, EmailLabel>,
    pub vocabulary_entries: Vec<VocabularyEntry>,
    /// Registered entries plus active project/topic template names.
    pub vocabulary: Vocabulary,
}

impl RuleSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn build(
        generation: u64,
        rules: BTreeMap<Uuid, ClassificationRule>,
        labels: BTreeMap<String, EmailLabel>,
        vocabulary_entries: Vec<VocabularyEntry>,
    ) -> Self {
        let mut live: Vec<&ClassificationRule> = rules.values().filter(|r| r.is_live()).collect();
        live.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let active: Vec<Arc<CompiledRule>> = live
            .into_iter()
            .map(|r| Arc::new(CompiledRule::compile(r.clone())))
            .collect();

        let template_terms: Vec<VocabularyEntry> = active
            .iter()
            .flat_map(|compiled| compiled.rule.pattern.nodes.iter())
            .filter(|n| matches!(n.kind, NodeKind::Project | NodeKind::Topic))
            .filter_map(|n| n.name.as_ref().map(|name| VocabularyEntry::new(n.kind, name.clone())))
            .collect();
        let vocabulary = Vocabulary::compile(vocabulary_entries.iter().chain(template_terms.iter()));

        Self {
            generation,
            rules,
            active,
            labels,
            vocabulary_entries,
            vocabulary,
        }
    }

    /// Resolve a label id through the catalog; unknown ids become custom labels.
    pub fn label(&self, id: &str) -> EmailLabel {
        self.labels
            .get(id)
            .cloned()
            .unwrap_or_else(|| EmailLabel::custom(id))
    }
}
