//! Rule definitions as authored and persisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::graph::{EdgeKind, NodeKind};

/// How the rule was authored. Informational only; every rule is matched
/// the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    #[default]
    Graph,
    Text,
    Regex,
    Ai,
}

/// A node the pattern requires in the thread's entity graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Exact name constraint, compared normalized. Persons also match on email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Exact (case-insensitive) property constraints.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    /// Require at least this node weight (e.g. mentioned N times).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_weight: Option<f64>,
}

impl NodeTemplate {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            properties: BTreeMap::new(),
            min_weight: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Number of exact-value constraints, used to order the search.
    pub fn constraint_count(&self) -> usize {
        usize::from(self.name.is_some()) + self.properties.len() + usize::from(self.min_weight.is_some())
    }
}

/// An edge the pattern requires between two node templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeTemplate {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    /// Exact (case-insensitive) edge property constraints, e.g. `weight`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl EdgeTemplate {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            kind,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    Regex,
    AiMatch,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::Regex => "regex",
            Self::AiMatch => "ai_match",
        }
    }
}

/// Leaf predicate on `<scope>.<property>`, where scope is `thread` or a
/// template id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: String,
}

impl RuleCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulePattern {
    #[serde(rename = "type", default)]
    pub kind: PatternKind,
    #[serde(default)]
    pub nodes: Vec<NodeTemplate>,
    #[serde(default)]
    pub edges: Vec<EdgeTemplate>,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
}

/// A stored classification rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRule {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pattern: RulePattern,
    /// Target label ids.
    pub labels: Vec<String>,
    pub is_active: bool,
    /// Aggregation weight, finite and > 0.
    pub priority: f32,
    /// Similarity cutoff for `ai_match` conditions; engine default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_threshold: Option<f32>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ClassificationRule {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Active and not soft-deleted.
    pub fn is_live(&self) -> bool {
        self.is_active && !self.is_deleted()
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> f32 {
    1.0
}

/// Input for creating a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pattern: RulePattern,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_priority")]
    pub priority: f32,
    #[serde(default)]
    pub ai_threshold: Option<f32>,
}

impl RuleDraft {
    pub fn new(name: impl Into<String>, pattern: RulePattern, labels: &[&str]) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            pattern,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            is_active: true,
            priority: default_priority(),
            ai_threshold: None,
        }
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pattern: Option<RulePattern>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub priority: Option<f32>,
    /// `null` clears a stored threshold back to the engine default.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub ai_threshold: Option<Option<f32>>,
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field (`None`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl RuleUpdate {
    pub fn apply_to(self, rule: &mut ClassificationRule) {
        if let Some(name) = self.name {
            rule.name = name;
        }
        if let Some(description) = self.description {
            rule.description = description;
        }
        if let Some(pattern) = self.pattern {
            rule.pattern = pattern;
        }
        if let Some(labels) = self.labels {
            rule.labels = labels;
        }
        if let Some(is_active) = self.is_active {
            rule.is_active = is_active;
        }
        if let Some(priority) = self.priority {
            rule.priority = priority;
        }
        if let Some(ai_threshold) = self.ai_threshold {
            rule.ai_threshold = ai_threshold;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_defaults_from_minimal_json() {
        let draft: RuleDraft = serde_json::from_str(
            r#"{"name": "VIP", "labels": ["vip"], "pattern": {"nodes": [{"id": "p", "type": "person"}]}}"#,
        )
        .unwrap();
        assert!(draft.is_active);
        assert_eq!(draft.priority, 1.0);
        assert_eq!(draft.pattern.kind, PatternKind::Graph);
        assert_eq!(draft.pattern.nodes[0].kind, NodeKind::Person);
    }

    #[test]
    fn condition_operators_use_snake_case() {
        let cond: RuleCondition =
            serde_json::from_str(r#"{"field": "thread.subject", "operator": "ai_match", "value": "renewal"}"#).unwrap();
        assert_eq!(cond.operator, ConditionOperator::AiMatch);
    }

    #[test]
    fn edge_template_kinds_are_kebab_case() {
        let edge: EdgeTemplate =
            serde_json::from_str(r#"{"id": "e", "source": "p", "target": "c", "type": "employed-by"}"#).unwrap();
        assert_eq!(edge.kind, EdgeKind::EmployedBy);
    }

    #[test]
    fn update_only_touches_given_fields() {
        let now = Utc::now();
        let mut rule = ClassificationRule {
            id: Uuid::new_v4(),
            name: "Old".into(),
            description: "keep".into(),
            pattern: RulePattern::default(),
            labels: vec!["a".into()],
            is_active: true,
            priority: 2.0,
            ai_threshold: Some(0.5),
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        RuleUpdate {
            name: Some("New".into()),
            is_active: Some(false),
            ..Default::default()
        }
        .apply_to(&mut rule);
        assert_eq!(rule.name, "New");
        assert_eq!(rule.description, "keep");
        assert!(!rule.is_active);
        assert_eq!(rule.ai_threshold, Some(0.5));
        assert!(!rule.is_live());
    }

    #[test]
    fn explicit_null_clears_ai_threshold() {
        let absent: RuleUpdate = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert_eq!(absent.ai_threshold, None);
        let cleared: RuleUpdate = serde_json::from_str(r#"{"aiThreshold": null}"#).unwrap();
        assert_eq!(cleared.ai_threshold, Some(None));
        let set: RuleUpdate = serde_json::from_str(r#"{"aiThreshold": 0.9}"#).unwrap();
        assert_eq!(set.ai_threshold, Some(Some(0.9)));

        let now = Utc::now();
        let mut rule = ClassificationRule {
            id: Uuid::new_v4(),
            name: "Semantic".into(),
            description: String::new(),
            pattern: RulePattern::default(),
            labels: vec!["a".into()],
            is_active: true,
            priority: 1.0,
            ai_threshold: Some(0.5),
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        absent.apply_to(&mut rule);
        assert_eq!(rule.ai_threshold, Some(0.5));
        cleared.apply_to(&mut rule);
        assert_eq!(rule.ai_threshold, None);
    }

    #[test]
    fn edge_template_properties_are_optional() {
        let edge: EdgeTemplate = serde_json::from_str(
            r#"{"id": "m", "source": "p", "target": "x", "type": "mentions", "properties": {"weight": "2"}}"#,
        )
        .unwrap();
        assert_eq!(edge.properties["weight"], "2");
        let bare = serde_json::to_value(EdgeTemplate::new("m", "p", "x", EdgeKind::Mentions)).unwrap();
        assert!(bare.get("properties").is_none());
    }
}
