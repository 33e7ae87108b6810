//! Graph Classifier: rule-based email thread classification over a
//! per-thread entity graph.

pub mod api;
pub mod config;
pub mod error;
pub mod graph;
pub mod mail;
pub mod pipeline;
pub mod rules;
pub mod semantic;
pub mod store;
