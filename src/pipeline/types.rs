//! Shared types for the classification pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ThreadClassificationError;
use crate::graph::NodeKind;
use crate::mail::EmailLabel;

// ── Match evidence ──────────────────────────────────────────────────

/// A graph entity bound to one of a rule's node templates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundEntity {
    pub template_id: String,
    pub kind: NodeKind,
    /// Email for persons, name for everything else.
    pub label: String,
}

/// Evidence that one rule matched one thread under one binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchWitness {
    pub rule_id: Uuid,
    pub rule_name: String,
    /// Bound entities in template declaration order.
    pub entities: Vec<BoundEntity>,
    /// Node template id → graph node id.
    pub node_bindings: BTreeMap<String, String>,
    /// Edge template id → graph edge id.
    pub edge_bindings: BTreeMap<String, String>,
    /// `satisfied / total`, or 1.0 with no conditions.
    pub raw_score: f32,
    pub satisfied: usize,
    pub total: usize,
}

// ── Results ─────────────────────────────────────────────────────────

/// Final classification of one thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub thread_id: String,
    /// Deduplicated, strongest rule first.
    pub labels: Vec<EmailLabel>,
    pub confidence: f32,
    pub reasoning: String,
    pub applied_at: DateTime<Utc>,
}

/// One slot of a bulk call, 1:1 with the input threads.
pub type BulkItem = Result<ClassificationResult, ThreadClassificationError>;

/// Per-call overrides for bulk classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOptions {
    pub concurrency: Option<usize>,
    pub thread_timeout: Option<Duration>,
    pub bulk_timeout: Option<Duration>,
}

/// Outcome of a bulk call.
#[derive(Debug, Clone)]
pub struct BulkOutcome {
    pub items: Vec<BulkItem>,
    /// The cancellation signal fired before every thread was dispatched.
    pub cancelled: bool,
    /// The bulk deadline passed before every thread finished.
    pub timed_out: bool,
}

impl BulkOutcome {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }
}
