//! Classification rules: definitions, validation, the store and its snapshots.

pub mod model;
pub mod snapshot;
pub mod store;
pub mod validate;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineUnavailableError;

pub use model::{
    ClassificationRule, ConditionOperator, EdgeTemplate, NodeTemplate, PatternKind, RuleCondition,
    RuleDraft, RulePattern, RuleUpdate,
};
pub use snapshot::{CompiledCondition, CompiledRule, RuleSnapshot};
pub use store::RuleStore;
pub use validate::{FieldPath, Scope};

/// Where the classifier gets its rules from.
///
/// Implementations hand out an immutable snapshot; a failure means the
/// rules cannot be read at all and the call is abandoned.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn snapshot(&self) -> Result<Arc<RuleSnapshot>, EngineUnavailableError>;
}
