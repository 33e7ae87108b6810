//! Semantic similarity seam used by `ai_match` conditions.
//!
//! The engine only needs a score in [0, 1]. `LexicalMatcher` is the built-in
//! implementation; a model-backed matcher plugs in through the same trait.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::SemanticError;

/// Scores how well `text` expresses `concept`.
#[async_trait]
pub trait SemanticMatcher: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &str;

    /// Similarity in [0, 1]. Errors make the asking condition unsatisfied.
    async fn similarity(&self, text: &str, concept: &str) -> Result<f32, SemanticError>;
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "re", "fw", "fwd", "the", "this", "to", "with",
];

/// Minimum token length for prefix matching (`renew` ~ `renewal`).
const PREFIX_MIN: usize = 4;

/// Token-containment similarity: the share of the concept's content words
/// that appear in the text.
#[derive(Debug, Clone, Default)]
pub struct LexicalMatcher;

impl LexicalMatcher {
    pub fn new() -> Self {
        Self
    }

    fn tokens(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .filter(|t| !STOPWORDS.contains(&t.as_str()))
            .collect()
    }

    fn token_matches(concept: &str, candidate: &str) -> bool {
        if concept == candidate {
            return true;
        }
        let (short, long) = if concept.len() <= candidate.len() {
            (concept, candidate)
        } else {
            (candidate, concept)
        };
        short.len() >= PREFIX_MIN && long.starts_with(short)
    }
}

#[async_trait]
impl SemanticMatcher for LexicalMatcher {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn similarity(&self, text: &str, concept: &str) -> Result<f32, SemanticError> {
        let concept_tokens: Vec<String> = {
            let mut seen = HashSet::new();
            Self::tokens(concept)
                .into_iter()
                .filter(|t| seen.insert(t.clone()))
                .collect()
        };
        if concept_tokens.is_empty() {
            return Ok(0.0);
        }
        let text_tokens: HashSet<String> = Self::tokens(text).into_iter().collect();

        let hits = concept_tokens
            .iter()
            .filter(|c| text_tokens.iter().any(|t| Self::token_matches(c, t)))
            .count();
        Ok(hits as f32 / concept_tokens.len() as f32)
    }
}
