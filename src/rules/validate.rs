//! Structural validation of rule patterns.
//!
//! Every failure names the offending field with the path a rule author
//! sees, so the API can point at it.

use std::collections::HashSet;

use regex::Regex;

use super::model::{ClassificationRule, ConditionOperator, RulePattern};
use crate::error::InvalidRuleError;
use crate::graph::model::THREAD_PROPERTIES;

/// What a condition field refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Thread,
    /// Index into `pattern.nodes`.
    Node(usize),
    /// Index into `pattern.edges`.
    Edge(usize),
}

/// A resolved `<scope>.<property>` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub scope: Scope,
    pub property: String,
}

impl FieldPath {
    /// Resolve `field` against a pattern's declared templates.
    pub fn resolve(field: &str, pattern: &RulePattern) -> Result<Self, String> {
        let (scope, property) = field
            .trim()
            .split_once('.')
            .ok_or_else(|| format!("{field:?} is not of the form <scope>.<property>"))?;

        if scope == "thread" {
            return if THREAD_PROPERTIES.contains(&property) {
                Ok(Self {
                    scope: Scope::Thread,
                    property: property.to_string(),
                })
            } else {
                Err(format!("unknown thread property {property:?}"))
            };
        }

        if let Some(i) = pattern.nodes.iter().position(|n| n.id == scope) {
            let kind = pattern.nodes[i].kind;
            return if kind.properties().contains(&property) {
                Ok(Self {
                    scope: Scope::Node(i),
                    property: property.to_string(),
                })
            } else {
                Err(format!("{kind} nodes have no property {property:?}"))
            };
        }

        if let Some(i) = pattern.edges.iter().position(|e| e.id == scope) {
            let kind = pattern.edges[i].kind;
            return if kind.properties().contains(&property) {
                Ok(Self {
                    scope: Scope::Edge(i),
                    property: property.to_string(),
                })
            } else {
                Err(format!("edges have no property {property:?}"))
            };
        }

        Err(format!("{scope:?} is not a declared template or \"thread\""))
    }
}

/// Check a rule before it is saved. Nothing is persisted when this fails.
pub fn validate(rule: &ClassificationRule) -> Result<(), InvalidRuleError> {
    if rule.name.trim().is_empty() {
        return Err(InvalidRuleError::new("name", "must not be empty"));
    }
    if rule.labels.is_empty() {
        return Err(InvalidRuleError::new("labels", "at least one target label is required"));
    }
    if rule.labels.iter().any(|l| l.trim().is_empty()) {
        return Err(InvalidRuleError::new("labels", "label ids must not be empty"));
    }
    if !rule.priority.is_finite() || rule.priority <= 0.0 {
        return Err(InvalidRuleError::new("priority", "must be a finite number greater than 0"));
    }
    if let Some(threshold) = rule.ai_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(InvalidRuleError::new("ai_threshold", "must be within [0, 1]"));
        }
    }

    validate_pattern(&rule.pattern)
}

fn validate_pattern(pattern: &RulePattern) -> Result<(), InvalidRuleError> {
    let mut seen: HashSet<&str> = HashSet::new();

    for (i, node) in pattern.nodes.iter().enumerate() {
        let field = format!("pattern.nodes[{i}].id");
        check_template_id(&node.id, &field, &mut seen)?;

        for key in node.properties.keys() {
            if !node.kind.properties().contains(&key.as_str()) {
                return Err(InvalidRuleError::new(
                    format!("pattern.nodes[{i}].properties.{key}"),
                    format!("{} nodes have no property {key:?}", node.kind),
                ));
            }
        }
        if let Some(min) = node.min_weight {
            if !min.is_finite() || min < 0.0 {
                return Err(InvalidRuleError::new(
                    format!("pattern.nodes[{i}].min_weight"),
                    "must be a finite, non-negative number",
                ));
            }
        }
    }

    for (i, edge) in pattern.edges.iter().enumerate() {
        check_template_id(&edge.id, &format!("pattern.edges[{i}].id"), &mut seen)?;
        if !pattern.nodes.iter().any(|n| n.id == edge.source) {
            return Err(InvalidRuleError::new(
                format!("pattern.edges[{i}].source"),
                format!("{:?} is not a declared node template", edge.source),
            ));
        }
        if !pattern.nodes.iter().any(|n| n.id == edge.target) {
            return Err(InvalidRuleError::new(
                format!("pattern.edges[{i}].target"),
                format!("{:?} is not a declared node template", edge.target),
            ));
        }
        for key in edge.properties.keys() {
            if !edge.kind.properties().contains(&key.as_str()) {
                return Err(InvalidRuleError::new(
                    format!("pattern.edges[{i}].properties.{key}"),
                    format!("edges have no property {key:?}"),
                ));
            }
        }
    }

    for (i, condition) in pattern.conditions.iter().enumerate() {
        FieldPath::resolve(&condition.field, pattern)
            .map_err(|reason| InvalidRuleError::new(format!("conditions[{i}].field"), reason))?;

        if condition.value.is_empty() {
            return Err(InvalidRuleError::new(format!("conditions[{i}].value"), "must not be empty"));
        }
        if condition.operator == ConditionOperator::Regex {
            Regex::new(&condition.value).map_err(|e| {
                InvalidRuleError::new(format!("conditions[{i}].value"), format!("regex does not compile: {e}"))
            })?;
        }
    }

    Ok(())
}

fn check_template_id<'a>(id: &'a str, field: &str, seen: &mut HashSet<&'a str>) -> Result<(), InvalidRuleError> {
    if id.trim().is_empty() {
        return Err(InvalidRuleError::new(field, "must not be empty"));
    }
    if id == "thread" {
        return Err(InvalidRuleError::new(field, "\"thread\" is reserved"));
    }
    if id.contains('.') {
        return Err(InvalidRuleError::new(field, "must not contain '.'"));
    }
    if !seen.insert(id) {
        return Err(InvalidRuleError::new(field, format!("duplicate template id {id:?}")));
    }
    Ok(())
}
