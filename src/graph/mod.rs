//! Per-thread entity graph: model, vocabulary and builder.

pub mod builder;
pub mod model;
pub mod vocabulary;

pub use builder::GraphBuilder;
pub use model::{
    EdgeIdx, EdgeKind, EntityEdge, EntityGraph, EntityNode, NodeIdx, NodeKind, PropertyValue,
    ThreadFacts,
};
pub use vocabulary::{Vocabulary, VocabularyEntry};
