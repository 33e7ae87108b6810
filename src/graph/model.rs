//! Entity graph data model: an arena of typed nodes and directed edges.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Kinds ───────────────────────────────────────────────────────────

/// What an entity node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Person,
    Project,
    Topic,
    Company,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Project => "project",
            Self::Topic => "topic",
            Self::Company => "company",
        }
    }

    /// Property names a condition may address on a node of this kind.
    pub fn properties(&self) -> &'static [&'static str] {
        match self {
            Self::Person => &[
                "name",
                "email",
                "domain",
                "display_name",
                "role",
                "messages_sent",
                "weight",
            ],
            Self::Company => &["name", "domain", "weight"],
            Self::Project | Self::Topic => &["name", "weight"],
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "person" => Ok(Self::Person),
            "project" => Ok(Self::Project),
            "topic" => Ok(Self::Topic),
            "company" => Ok(Self::Company),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

/// Relation between two entity nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// person → company, inferred from the email domain.
    EmployedBy,
    /// person ↔ person, stored as two directed records sharing one id.
    CoParticipant,
    /// person → project/topic.
    Mentions,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmployedBy => "employed-by",
            Self::CoParticipant => "co-participant",
            Self::Mentions => "mentions",
        }
    }

    pub fn properties(&self) -> &'static [&'static str] {
        &["kind", "weight"]
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thread-level facts a condition may address as `thread.<property>`.
pub const THREAD_PROPERTIES: &[&str] = &[
    "subject",
    "body",
    "snippet",
    "participants",
    "labels",
    "message_count",
    "attachments",
];

// ── Property values ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl PropertyValue {
    /// String form used for scalar comparisons. Integral numbers render
    /// without a fractional part so `weight equals 3` works.
    pub fn render(&self) -> String {
        match self {
            Self::Number(n) => render_number(*n),
            Self::Text(s) => s.clone(),
            Self::List(items) => items.join(", "),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::List(_) => None,
        }
    }
}

fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

// ── Arena ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeIdx(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EdgeIdx(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityNode {
    /// Unique within one graph, e.g. `person:alice@acme.com`.
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl EntityNode {
    pub fn new(id: impl Into<String>, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Look up a property; `name` is synthesized from the node itself.
    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        if key == "name" {
            return Some(PropertyValue::Text(self.name.clone()));
        }
        self.properties.get(key).cloned()
    }

    pub fn weight(&self) -> f64 {
        self.properties
            .get("weight")
            .and_then(PropertyValue::as_number)
            .unwrap_or(0.0)
    }

    /// Label used in reasoning: persons show their email, others their name.
    pub fn display_label(&self) -> String {
        match (self.kind, self.properties.get("email")) {
            (NodeKind::Person, Some(PropertyValue::Text(email))) => email.clone(),
            _ => self.name.clone(),
        }
    }

    pub(crate) fn add_weight(&mut self, by: f64) {
        let current = self.weight();
        self.properties
            .insert("weight".into(), PropertyValue::Number(current + by));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityEdge {
    pub id: String,
    pub source: NodeIdx,
    pub target: NodeIdx,
    pub kind: EdgeKind,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl EntityEdge {
    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        if key == "kind" {
            return Some(PropertyValue::Text(self.kind.as_str().to_string()));
        }
        self.properties.get(key).cloned()
    }

    pub fn weight(&self) -> f64 {
        self.properties
            .get("weight")
            .and_then(PropertyValue::as_number)
            .unwrap_or(0.0)
    }

    pub(crate) fn add_weight(&mut self, by: f64) {
        let current = self.weight();
        self.properties
            .insert("weight".into(), PropertyValue::Number(current + by));
    }
}

/// Facts about the thread as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThreadFacts {
    pub subject: String,
    pub body: String,
    pub snippet: String,
    pub participants: Vec<String>,
    pub labels: Vec<String>,
    pub message_count: usize,
    pub attachments: Vec<String>,
}

impl ThreadFacts {
    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        let value = match key {
            "subject" => PropertyValue::Text(self.subject.clone()),
            "body" => PropertyValue::Text(self.body.clone()),
            "snippet" => PropertyValue::Text(self.snippet.clone()),
            "participants" => PropertyValue::List(self.participants.clone()),
            "labels" => PropertyValue::List(self.labels.clone()),
            "message_count" => PropertyValue::Number(self.message_count as f64),
            "attachments" => PropertyValue::List(self.attachments.clone()),
            _ => return None,
        };
        Some(value)
    }
}

/// Per-thread entity graph.
///
/// Nodes are deduplicated by `(kind, key)` where the key is the normalized
/// name (the email address for persons). Edges are deduplicated by
/// `(source, target, kind)` and refer to their endpoints by arena index.
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    nodes: Vec<EntityNode>,
    edges: Vec<EntityEdge>,
    node_index: HashMap<(NodeKind, String), NodeIdx>,
    edge_index: HashMap<(NodeIdx, NodeIdx, EdgeKind), EdgeIdx>,
    pub facts: ThreadFacts,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[EntityNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[EntityEdge] {
        &self.edges
    }

    pub fn node(&self, idx: NodeIdx) -> &EntityNode {
        &self.nodes[idx.0]
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> &mut EntityNode {
        &mut self.nodes[idx.0]
    }

    pub fn edge(&self, idx: EdgeIdx) -> &EntityEdge {
        &self.edges[idx.0]
    }

    pub fn edge_mut(&mut self, idx: EdgeIdx) -> &mut EntityEdge {
        &mut self.edges[idx.0]
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find_node(&self, kind: NodeKind, key: &str) -> Option<NodeIdx> {
        self.node_index.get(&(kind, key.to_string())).copied()
    }

    /// Insert a node under `key`, or return the existing one.
    ///
    /// The boolean is `true` when the node was newly created.
    pub fn upsert_node(
        &mut self,
        kind: NodeKind,
        key: &str,
        make: impl FnOnce() -> EntityNode,
    ) -> (NodeIdx, bool) {
        let slot = (kind, key.to_string());
        if let Some(idx) = self.node_index.get(&slot) {
            return (*idx, false);
        }
        let node = make();
        debug_assert_eq!(node.kind, kind);
        let idx = NodeIdx(self.nodes.len());
        self.nodes.push(node);
        self.node_index.insert(slot, idx);
        (idx, true)
    }

    /// Add a directed edge, or return the existing one for the same
    /// `(source, target, kind)`.
    pub fn add_edge(
        &mut self,
        id: impl Into<String>,
        source: NodeIdx,
        target: NodeIdx,
        kind: EdgeKind,
    ) -> EdgeIdx {
        if let Some(idx) = self.edge_index.get(&(source, target, kind)) {
            return *idx;
        }
        let idx = EdgeIdx(self.edges.len());
        self.edges.push(EntityEdge {
            id: id.into(),
            source,
            target,
            kind,
            properties: BTreeMap::new(),
        });
        self.edge_index.insert((source, target, kind), idx);
        idx
    }

    pub fn edge_between(&self, source: NodeIdx, target: NodeIdx, kind: EdgeKind) -> Option<EdgeIdx> {
        self.edge_index.get(&(source, target, kind)).copied()
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = NodeIdx> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.kind == kind)
            .map(|(i, _)| NodeIdx(i))
    }
}

/// Trim, lowercase, and collapse internal whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
