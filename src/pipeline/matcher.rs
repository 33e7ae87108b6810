//! Pattern matcher: binds a rule's template graph onto a thread's entity
//! graph and scores its conditions under every binding found.
//!
//! Node templates are bound by backtracking, most selective first. A
//! partial binding is only extended when every edge template between
//! already-bound templates has a matching graph edge. Bindings are
//! injective and capped per rule; candidates that satisfy more of the
//! rule's node conditions are tried first.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use super::types::{BoundEntity, MatchWitness};
use crate::error::SemanticError;
use crate::graph::model::normalize_name;
use crate::graph::{EdgeIdx, EntityGraph, EntityNode, NodeIdx, NodeKind, PropertyValue};
use crate::rules::{
    CompiledCondition, CompiledRule, ConditionOperator, EdgeTemplate, FieldPath, NodeTemplate, RulePattern, Scope,
};
use crate::semantic::SemanticMatcher;

/// One complete assignment of templates to graph elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    /// Indexed like `pattern.nodes`.
    pub nodes: Vec<NodeIdx>,
    /// Indexed like `pattern.edges`.
    pub edges: Vec<EdgeIdx>,
}

pub struct PatternMatcher {
    semantic: Arc<dyn SemanticMatcher>,
    default_ai_threshold: f32,
    max_bindings: usize,
}

impl PatternMatcher {
    pub fn new(semantic: Arc<dyn SemanticMatcher>, default_ai_threshold: f32, max_bindings: usize) -> Self {
        Self {
            semantic,
            default_ai_threshold,
            max_bindings: max_bindings.max(1),
        }
    }

    /// Every witness for `compiled` against `graph`; empty when the
    /// structure does not bind.
    pub async fn match_rule(&self, compiled: &CompiledRule, graph: &EntityGraph) -> Vec<MatchWitness> {
        let rule = &compiled.rule;
        let bindings = find_bindings(&rule.pattern, &compiled.conditions, graph, self.max_bindings);
        if bindings.is_empty() {
            return Vec::new();
        }

        let threshold = rule.ai_threshold.unwrap_or(self.default_ai_threshold);
        let total = compiled.conditions.len();
        // (condition index, text) → satisfied; thread-scoped ai_match
        // conditions repeat across bindings.
        let mut ai_cache: HashMap<(usize, String), bool> = HashMap::new();
        let mut witnesses = Vec::with_capacity(bindings.len());

        for binding in &bindings {
            let mut satisfied = 0;
            for (i, condition) in compiled.conditions.iter().enumerate() {
                let Some(value) = resolve(condition, graph, binding) else {
                    continue;
                };
                let ok = match condition.operator {
                    ConditionOperator::AiMatch => {
                        let text = value.render();
                        match ai_cache.get(&(i, text.clone())) {
                            Some(hit) => *hit,
                            None => {
                                let hit = self.ai_match(&text, &condition.value, threshold, rule.name.as_str()).await;
                                ai_cache.insert((i, text), hit);
                                hit
                            }
                        }
                    }
                    op => value_satisfies(op, &value, &condition.value, condition.regex.as_ref()),
                };
                if ok {
                    satisfied += 1;
                }
            }

            let raw_score = if total == 0 {
                1.0
            } else {
                satisfied as f32 / total as f32
            };
            witnesses.push(witness(compiled, graph, binding, raw_score, satisfied, total));
        }

        debug!(
            rule_id = %rule.id,
            witnesses = witnesses.len(),
            best = witnesses.iter().map(|w| w.raw_score).fold(0.0_f32, f32::max),
            "Rule matched structurally"
        );
        witnesses
    }

    async fn ai_match(&self, text: &str, concept: &str, threshold: f32, rule_name: &str) -> bool {
        let provider = self.semantic.name().to_string();
        let score = self
            .semantic
            .similarity(text, concept)
            .await
            .and_then(|score| {
                if score.is_finite() && (0.0..=1.0).contains(&score) {
                    Ok(score)
                } else {
                    Err(SemanticError::InvalidScore { provider, score })
                }
            });
        match score {
            Ok(score) => score >= threshold,
            Err(e) => {
                warn!(rule = rule_name, error = %e, "ai_match treated as unsatisfied");
                false
            }
        }
    }
}

// ── Structural search ───────────────────────────────────────────────

/// Enumerate injective bindings of `pattern` onto `graph`, at most `cap`.
///
/// Candidates for each template are tried in order of how many of the
/// template's own scalar conditions they satisfy, so when the cap cuts the
/// search short the bindings left out are the weakest ones.
///
/// A pattern with no node templates has exactly one (empty) binding.
pub fn find_bindings(
    pattern: &RulePattern,
    conditions: &[CompiledCondition],
    graph: &EntityGraph,
    cap: usize,
) -> Vec<Binding> {
    if pattern.nodes.is_empty() {
        return vec![Binding::default()];
    }

    // Edge templates with endpoints resolved to template indices.
    let mut edge_templates = Vec::with_capacity(pattern.edges.len());
    for edge in &pattern.edges {
        let source = pattern.nodes.iter().position(|n| n.id == edge.source);
        let target = pattern.nodes.iter().position(|n| n.id == edge.target);
        match (source, target) {
            (Some(s), Some(t)) => edge_templates.push((s, t, edge)),
            _ => return Vec::new(),
        }
    }

    let mut candidates: Vec<Vec<NodeIdx>> = Vec::with_capacity(pattern.nodes.len());
    let mut exact: Vec<usize> = Vec::with_capacity(pattern.nodes.len());
    for (i, template) in pattern.nodes.iter().enumerate() {
        let local: Vec<&CompiledCondition> = conditions.iter().filter(|c| is_local_to(c, i)).collect();
        let mut ranked: Vec<(usize, NodeIdx)> = graph
            .nodes_of_kind(template.kind)
            .filter(|idx| node_satisfies(template, graph.node(*idx)))
            .map(|idx| {
                let node = graph.node(idx);
                (local.iter().filter(|c| node_condition_holds(c, node)).count(), idx)
            })
            .collect();
        if ranked.is_empty() {
            return Vec::new();
        }
        // Stable, so insertion order breaks ties.
        ranked.sort_by_key(|&(hits, _)| Reverse(hits));
        candidates.push(ranked.into_iter().map(|(_, idx)| idx).collect());
        exact.push(
            template.constraint_count()
                + local
                    .iter()
                    .filter(|c| c.operator == ConditionOperator::Equals)
                    .count(),
        );
    }

    let mut order: Vec<usize> = (0..pattern.nodes.len()).collect();
    order.sort_by_key(|&i| (Reverse(exact[i]), candidates[i].len(), i));

    let mut search = Search {
        graph,
        candidates: &candidates,
        edge_templates: &edge_templates,
        order: &order,
        assigned: vec![None; pattern.nodes.len()],
        used: HashSet::new(),
        found: Vec::new(),
        cap,
    };
    search.extend(0);

    if search.found.len() >= cap {
        debug!(cap, "Binding cap reached; remaining bindings skipped");
    }
    search.found
}

struct Search<'a> {
    graph: &'a EntityGraph,
    candidates: &'a [Vec<NodeIdx>],
    edge_templates: &'a [(usize, usize, &'a EdgeTemplate)],
    order: &'a [usize],
    assigned: Vec<Option<NodeIdx>>,
    used: HashSet<NodeIdx>,
    found: Vec<Binding>,
    cap: usize,
}

impl Search<'_> {
    fn extend(&mut self, depth: usize) {
        if self.found.len() >= self.cap {
            return;
        }
        if depth == self.order.len() {
            self.record();
            return;
        }

        let template = self.order[depth];
        let candidates = self.candidates;
        for &candidate in &candidates[template] {
            if self.used.contains(&candidate) || !self.edges_hold(template, candidate) {
                continue;
            }
            self.assigned[template] = Some(candidate);
            self.used.insert(candidate);
            self.extend(depth + 1);
            self.used.remove(&candidate);
            self.assigned[template] = None;

            if self.found.len() >= self.cap {
                return;
            }
        }
    }

    /// Every edge template touching `template` whose other end is already
    /// bound has a matching graph edge.
    fn edges_hold(&self, template: usize, candidate: NodeIdx) -> bool {
        self.edge_templates.iter().all(|&(s, t, edge)| {
            if s != template && t != template {
                return true;
            }
            let source = if s == template { Some(candidate) } else { self.assigned[s] };
            let target = if t == template { Some(candidate) } else { self.assigned[t] };
            match (source, target) {
                (Some(a), Some(b)) => bound_edge(self.graph, a, b, edge).is_some(),
                _ => true,
            }
        })
    }

    fn record(&mut self) {
        let nodes: Vec<NodeIdx> = self.assigned.iter().flatten().copied().collect();
        let edges: Option<Vec<EdgeIdx>> = self
            .edge_templates
            .iter()
            .map(|&(s, t, edge)| bound_edge(self.graph, nodes[s], nodes[t], edge))
            .collect();
        if let Some(edges) = edges {
            self.found.push(Binding { nodes, edges });
        }
    }
}

/// The graph edge `template` binds to between `source` and `target`, if any.
fn bound_edge(graph: &EntityGraph, source: NodeIdx, target: NodeIdx, template: &EdgeTemplate) -> Option<EdgeIdx> {
    graph
        .edge_between(source, target, template.kind)
        .filter(|idx| properties_hold(&template.properties, |key| graph.edge(*idx).property(key)))
}

/// Exact-value constraints of a node template.
fn node_satisfies(template: &NodeTemplate, node: &EntityNode) -> bool {
    if let Some(name) = &template.name {
        let wanted = normalize_name(name);
        let email_match = node.kind == NodeKind::Person
            && node
                .property("email")
                .is_some_and(|email| email.render() == wanted);
        if normalize_name(&node.name) != wanted && !email_match {
            return false;
        }
    }
    if !properties_hold(&template.properties, |key| node.property(key)) {
        return false;
    }
    if let Some(min) = template.min_weight {
        if node.weight() < min {
            return false;
        }
    }
    true
}

/// Case-insensitive exact match of every `key: value` pair.
fn properties_hold(expected: &BTreeMap<String, String>, lookup: impl Fn(&str) -> Option<PropertyValue>) -> bool {
    expected.iter().all(|(key, wanted)| {
        lookup(key).is_some_and(|actual| match actual {
            PropertyValue::List(items) => items.iter().any(|i| i.eq_ignore_ascii_case(wanted.trim())),
            scalar => scalar.render().trim().eq_ignore_ascii_case(wanted.trim()),
        })
    })
}

/// A scalar condition on one of template `i`'s own properties.
fn is_local_to(condition: &CompiledCondition, i: usize) -> bool {
    condition.operator != ConditionOperator::AiMatch
        && matches!(&condition.field, Some(FieldPath { scope: Scope::Node(j), .. }) if *j == i)
}

fn node_condition_holds(condition: &CompiledCondition, node: &EntityNode) -> bool {
    condition
        .field
        .as_ref()
        .and_then(|field| node.property(&field.property))
        .is_some_and(|value| value_satisfies(condition.operator, &value, &condition.value, condition.regex.as_ref()))
}

// ── Conditions ──────────────────────────────────────────────────────

fn resolve(condition: &CompiledCondition, graph: &EntityGraph, binding: &Binding) -> Option<PropertyValue> {
    let field = condition.field.as_ref()?;
    match field.scope {
        Scope::Thread => graph.facts.property(&field.property),
        Scope::Node(i) => graph.node(*binding.nodes.get(i)?).property(&field.property),
        Scope::Edge(i) => graph.edge(*binding.edges.get(i)?).property(&field.property),
    }
}

/// Scalar operators; a list satisfies when any element does.
fn value_satisfies(op: ConditionOperator, value: &PropertyValue, expected: &str, regex: Option<&Regex>) -> bool {
    match value {
        PropertyValue::List(items) => items.iter().any(|item| scalar_satisfies(op, item, expected, regex)),
        scalar => scalar_satisfies(op, &scalar.render(), expected, regex),
    }
}

fn scalar_satisfies(op: ConditionOperator, value: &str, expected: &str, regex: Option<&Regex>) -> bool {
    match op {
        ConditionOperator::Equals => value == expected,
        ConditionOperator::Contains => value.to_lowercase().contains(&expected.to_lowercase()),
        ConditionOperator::Regex => regex.is_some_and(|r| r.is_match(value)),
        // Async; evaluated by the matcher itself.
        ConditionOperator::AiMatch => false,
    }
}

fn witness(
    compiled: &CompiledRule,
    graph: &EntityGraph,
    binding: &Binding,
    raw_score: f32,
    satisfied: usize,
    total: usize,
) -> MatchWitness {
    let pattern = &compiled.rule.pattern;
    let mut entities = Vec::with_capacity(binding.nodes.len());
    let mut node_bindings = BTreeMap::new();
    for (template, idx) in pattern.nodes.iter().zip(&binding.nodes) {
        let node = graph.node(*idx);
        entities.push(BoundEntity {
            template_id: template.id.clone(),
            kind: node.kind,
            label: node.display_label(),
        });
        node_bindings.insert(template.id.clone(), node.id.clone());
    }
    let edge_bindings = pattern
        .edges
        .iter()
        .zip(&binding.edges)
        .map(|(template, idx)| (template.id.clone(), graph.edge(*idx).id.clone()))
        .collect();

    MatchWitness {
        rule_id: compiled.rule.id,
        rule_name: compiled.rule.name.clone(),
        entities,
        node_bindings,
        edge_bindings,
        raw_score,
        satisfied,
        total,
    }
}
