//! Error types for the graph classifier.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A rule definition failed structural or compilation validation.
///
/// `field` names the offending part of the rule using the same paths a rule
/// author sees, e.g. `conditions[2].value` or `pattern.edges[0].source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Invalid rule field {field}: {reason}")]
pub struct InvalidRuleError {
    pub field: String,
    pub reason: String,
}

impl InvalidRuleError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Rule store errors.
#[derive(Debug, thiserror::Error)]
pub enum RuleStoreError {
    #[error(transparent)]
    Invalid(#[from] InvalidRuleError),

    #[error("Rule {id} not found")]
    NotFound { id: Uuid },

    #[error("Invalid label: {reason}")]
    InvalidLabel { reason: String },

    #[error("Invalid vocabulary entry: {reason}")]
    InvalidVocabulary { reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// The rule store could not be read. Fatal for the current call; callers
/// decide whether to retry.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Classification engine unavailable: {reason}")]
pub struct EngineUnavailableError {
    pub reason: String,
}

/// Why a single thread could not be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadErrorKind {
    /// The per-thread (or whole-bulk) deadline passed before classification finished.
    Timeout,
    /// The thread data is unusable (e.g. empty id).
    MalformedThread,
    /// The bulk call was cancelled or ran out of time before this thread was started.
    NotDispatched,
    /// The worker failed unexpectedly.
    Internal,
}

impl ThreadErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::MalformedThread => "malformed_thread",
            Self::NotDispatched => "not_dispatched",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ThreadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One thread's classification failed. Isolated to that thread in bulk mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("Thread {thread_id} could not be classified ({kind}): {message}")]
pub struct ThreadClassificationError {
    pub thread_id: String,
    pub kind: ThreadErrorKind,
    pub message: String,
}

impl ThreadClassificationError {
    pub fn new(thread_id: impl Into<String>, kind: ThreadErrorKind, message: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(thread_id: impl Into<String>, after: Duration) -> Self {
        Self::new(
            thread_id,
            ThreadErrorKind::Timeout,
            format!("timed out after {after:?}"),
        )
    }

    pub fn not_dispatched(thread_id: impl Into<String>) -> Self {
        Self::new(
            thread_id,
            ThreadErrorKind::NotDispatched,
            "bulk classification stopped before this thread was started",
        )
    }
}

/// Errors from the single-thread classification entry point.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Unavailable(#[from] EngineUnavailableError),

    #[error(transparent)]
    Thread(#[from] ThreadClassificationError),
}

/// Errors reported by a semantic matcher collaborator.
///
/// These never abort classification: the condition that asked is simply
/// treated as unsatisfied.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SemanticError {
    #[error("Semantic matcher {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Semantic matcher {provider} returned an out-of-range score {score}")]
    InvalidScore { provider: String, score: f32 },
}
