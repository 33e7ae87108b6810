//! Project/topic vocabulary used to spot mentions in subjects and bodies.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::model::{NodeKind, normalize_name};

/// One registered project or topic and the phrases that mention it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub kind: NodeKind,
    pub name: String,
    /// Extra phrases besides the name itself.
    #[serde(default)]
    pub phrases: Vec<String>,
}

impl VocabularyEntry {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            phrases: Vec::new(),
        }
    }

    pub fn with_phrases(mut self, phrases: &[&str]) -> Self {
        self.phrases = phrases.iter().map(|p| p.to_string()).collect();
        self
    }
}

/// A compiled vocabulary term.
#[derive(Debug, Clone)]
pub struct Term {
    pub kind: NodeKind,
    /// Display name (first spelling registered).
    pub name: String,
    /// Normalized name, the node dedup key.
    pub key: String,
    pattern: Regex,
}

/// Compiled vocabulary: one case-insensitive, word-bounded regex per term.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    terms: Vec<Term>,
}

impl Vocabulary {
    /// Compile entries. Entries sharing `(kind, normalized name)` merge
    /// their phrases; only project and topic entries are kept.
    pub fn compile<'a>(entries: impl IntoIterator<Item = &'a VocabularyEntry>) -> Self {
        let mut merged: Vec<(NodeKind, String, String, Vec<String>)> = Vec::new();

        for entry in entries {
            if !matches!(entry.kind, NodeKind::Project | NodeKind::Topic) {
                continue;
            }
            let key = normalize_name(&entry.name);
            if key.is_empty() {
                continue;
            }
            let phrases = std::iter::once(entry.name.as_str())
                .chain(entry.phrases.iter().map(String::as_str))
                .map(normalize_name)
                .filter(|p| !p.is_empty());

            match merged
                .iter_mut()
                .find(|(kind, k, _, _)| *kind == entry.kind && *k == key)
            {
                Some((_, _, _, existing)) => {
                    for phrase in phrases {
                        if !existing.contains(&phrase) {
                            existing.push(phrase);
                        }
                    }
                }
                None => {
                    let mut unique: Vec<String> = Vec::new();
                    for phrase in phrases {
                        if !unique.contains(&phrase) {
                            unique.push(phrase);
                        }
                    }
                    merged.push((entry.kind, key, entry.name.trim().to_string(), unique));
                }
            }
        }

        let terms = merged
            .into_iter()
            .filter_map(|(kind, key, name, phrases)| {
                // Longest phrases first so alternation prefers them.
                let mut phrases = phrases;
                phrases.sort_by_key(|p| std::cmp::Reverse(p.len()));
                let alternation = phrases
                    .iter()
                    .map(|p| bounded(p))
                    .collect::<Vec<_>>()
                    .join("|");
                match Regex::new(&format!("(?i)(?:{alternation})")) {
                    Ok(pattern) => Some(Term {
                        kind,
                        name,
                        key,
                        pattern,
                    }),
                    Err(e) => {
                        warn!(term = %name, error = %e, "Skipping vocabulary term that does not compile");
                        None
                    }
                }
            })
            .collect();

        Self { terms }
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Count occurrences of every term in `text`. Terms with no hits are omitted.
    pub fn scan<'v>(&'v self, text: &str) -> Vec<(&'v Term, usize)> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.terms
            .iter()
            .filter_map(|term| {
                let count = term.pattern.find_iter(text).count();
                (count > 0).then_some((term, count))
            })
            .collect()
    }
}

/// Escape a phrase, let any run of whitespace match, and add `\b` on the
/// sides that start or end with a word character.
fn bounded(phrase: &str) -> String {
    let body = phrase
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = if phrase.chars().next().is_some_and(is_word) { r"\b" } else { "" };
    let trail = if phrase.chars().last().is_some_and(is_word) { r"\b" } else { "" };
    format!("{lead}{body}{trail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(entries: &[VocabularyEntry]) -> Vocabulary {
        Vocabulary::compile(entries.iter())
    }

    #[test]
    fn counts_case_insensitive_word_bounded_hits() {
        let v = vocab(&[VocabularyEntry::new(NodeKind::Project, "Phoenix")]);
        let hits = v.scan("phoenix launch; PHOENIX again; phoenixes do not count");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.name, "Phoenix");
        assert_eq!(hits[0].1, 2);
    }

    #[test]
    fn phrases_and_whitespace_variants_match() {
        let v = vocab(&[VocabularyEntry::new(NodeKind::Topic, "billing")
            .with_phrases(&["invoice", "payment  terms"])]);
        let hits = v.scan("Invoice attached, see payment\nterms and billing.");
        assert_eq!(hits[0].1, 3);
    }

    #[test]
    fn merges_entries_with_same_normalized_name() {
        let v = vocab(&[
            VocabularyEntry::new(NodeKind::Topic, "Billing"),
            VocabularyEntry::new(NodeKind::Topic, "billing ").with_phrases(&["invoice"]),
            VocabularyEntry::new(NodeKind::Project, "billing"),
        ]);
        assert_eq!(v.terms().len(), 2);
        assert_eq!(v.terms()[0].name, "Billing");
    }

    #[test]
    fn ignores_non_mention_kinds_and_blank_names() {
        let v = vocab(&[
            VocabularyEntry::new(NodeKind::Company, "Acme"),
            VocabularyEntry::new(NodeKind::Topic, "   "),
        ]);
        assert!(v.is_empty());
    }

    #[test]
    fn punctuation_edges_do_not_require_word_boundaries() {
        let v = vocab(&[VocabularyEntry::new(NodeKind::Project, "C++")]);
        assert_eq!(v.scan("we ship C++ code")[0].1, 1);
    }
}
