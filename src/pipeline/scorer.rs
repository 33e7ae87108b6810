//! Combines match witnesses into the final label set, confidence and
//! reasoning for one thread.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use super::types::MatchWitness;
use crate::mail::EmailLabel;
use crate::rules::RuleSnapshot;

pub const NO_MATCH_REASONING: &str = "No classification rules matched this thread.";

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub labels: Vec<EmailLabel>,
    pub confidence: f32,
    pub reasoning: String,
}

impl Aggregate {
    pub fn no_match() -> Self {
        Self {
            labels: Vec::new(),
            confidence: 0.0,
            reasoning: NO_MATCH_REASONING.to_string(),
        }
    }
}

/// One rule's best witness.
struct Contribution<'a> {
    witness: &'a MatchWitness,
    priority: f32,
    labels: &'a [String],
}

/// Aggregate witnesses from every rule matched against one thread.
///
/// Only rules whose best score is above zero contribute. Confidence is the
/// priority-weighted mean of those best scores.
pub fn aggregate(witnesses: &[MatchWitness], snapshot: &RuleSnapshot) -> Aggregate {
    let mut best: HashMap<Uuid, &MatchWitness> = HashMap::new();
    for witness in witnesses {
        best.entry(witness.rule_id)
            .and_modify(|current| {
                if witness.raw_score > current.raw_score {
                    *current = witness;
                }
            })
            .or_insert(witness);
    }

    let mut contributions: Vec<Contribution<'_>> = best
        .into_values()
        .filter(|w| w.raw_score > 0.0)
        .filter_map(|witness| {
            let rule = snapshot.rules.get(&witness.rule_id)?;
            Some(Contribution {
                witness,
                priority: rule.priority,
                labels: &rule.labels,
            })
        })
        .collect();
    if contributions.is_empty() {
        return Aggregate::no_match();
    }

    contributions.sort_by(|a, b| {
        b.witness
            .raw_score
            .total_cmp(&a.witness.raw_score)
            .then_with(|| a.witness.rule_name.cmp(&b.witness.rule_name))
            .then_with(|| a.witness.rule_id.cmp(&b.witness.rule_id))
    });

    let weight: f32 = contributions.iter().map(|c| c.priority).sum();
    let weighted: f32 = contributions
        .iter()
        .map(|c| c.priority * c.witness.raw_score)
        .sum();
    let confidence = if weight > 0.0 {
        (weighted / weight).clamp(0.0, 1.0)
    } else {
        0.0
    };

    // Contributions are strongest first, so the first sighting of a label
    // carries its best score.
    let mut seen: HashSet<&str> = HashSet::new();
    let mut scored: Vec<(f32, EmailLabel)> = Vec::new();
    for contribution in &contributions {
        for id in contribution.labels {
            if seen.insert(id.as_str()) {
                scored.push((contribution.witness.raw_score, snapshot.label(id)));
            }
        }
    }
    scored.sort_by(|(sa, la), (sb, lb)| {
        sb.total_cmp(sa)
            .then_with(|| la.name.cmp(&lb.name))
            .then_with(|| la.id.cmp(&lb.id))
    });

    let reasoning = contributions
        .iter()
        .map(|c| sentence(c.witness))
        .collect::<Vec<_>>()
        .join(" ");

    Aggregate {
        labels: scored.into_iter().map(|(_, label)| label).collect(),
        confidence,
        reasoning,
    }
}

fn sentence(witness: &MatchWitness) -> String {
    let pct = (witness.raw_score * 100.0).round() as u32;
    let entities: Vec<String> = witness
        .entities
        .iter()
        .map(|e| format!("{}:{}", e.kind, e.label))
        .collect();
    if entities.is_empty() {
        format!("Rule '{}' matched ({pct}%) on thread content.", witness.rule_name)
    } else {
        format!("Rule '{}' matched ({pct}%) via {}.", witness.rule_name, join_natural(&entities))
    }
}

/// `a`, `a and b`, `a, b and c`.
fn join_natural(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}
