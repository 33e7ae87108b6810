//! Classification pipeline.
//!
//! Every thread flows through:
//! 1. `GraphBuilder::build()`: thread → entity graph
//! 2. `PatternMatcher::match_rule()`: one witness per binding, per active rule
//! 3. `scorer::aggregate()`: labels, confidence and reasoning
//!
//! `Classifier` drives these for one thread or a bounded-concurrency batch.

pub mod classifier;
pub mod matcher;
pub mod scorer;
pub mod types;

pub use classifier::Classifier;
pub use matcher::PatternMatcher;
pub use types::{BulkItem, BulkOptions, BulkOutcome, ClassificationResult, MatchWitness};
