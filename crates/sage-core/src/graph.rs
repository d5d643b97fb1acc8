//! Knowledge-graph snapshot and history types.
//!
//! - [`GraphSnapshot`]: one immutable version of the graph
//! - [`GraphHistory`]: append-only snapshot sequence with a current pointer
//! - [`GraphModification`]: a per-turn batch of proposed mutations,
//!   consumed by the patch engine and never persisted itself
//!
//! Node ids are small positive integers stored string-encoded (the wire
//! format the graph view expects). Labels double as a human identity:
//! modifications reference nodes by label, and resolution to ids happens
//! inside the patch engine before commit.

use serde::{Deserialize, Serialize};

/// Default type tag for nodes the provider creates.
pub const DEFAULT_NODE_TYPE: &str = "concept";

/// One node in a graph snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Small positive integer, string-encoded. Unique within a snapshot.
    pub id: String,
    /// Human-readable label; modifications address nodes by it.
    pub label: String,
    /// Type tag used for coloring in the graph view.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Layout position, maintained by the client view.
    #[serde(default)]
    pub x: f64,
    /// Layout position, maintained by the client view.
    #[serde(default)]
    pub y: f64,
    /// Layout velocity, maintained by the client view.
    #[serde(default)]
    pub vx: f64,
    /// Layout velocity, maintained by the client view.
    #[serde(default)]
    pub vy: f64,
}

impl GraphNode {
    /// New node with default type, description, and layout fields.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            node_type: DEFAULT_NODE_TYPE.to_owned(),
            description: String::new(),
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
        }
    }
}

/// One edge in a graph snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node id (or raw label when unresolved at commit time).
    pub source: String,
    /// Target node id (or raw label when unresolved at commit time).
    pub target: String,
    /// Optional relationship label.
    #[serde(default)]
    pub label: String,
}

/// One immutable version of the knowledge graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Nodes, unique by id.
    pub nodes: Vec<GraphNode>,
    /// Edges referencing node ids (or unresolved labels).
    pub edges: Vec<GraphEdge>,
}

impl GraphSnapshot {
    /// Find a node by exact label.
    #[must_use]
    pub fn node_by_label(&self, label: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.label == label)
    }

    /// Find a node by id.
    #[must_use]
    pub fn node_by_id(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Smallest positive integer id not currently in use, string-encoded.
    ///
    /// Non-numeric ids are ignored for the purpose of allocation.
    #[must_use]
    pub fn next_node_id(&self) -> String {
        let used: std::collections::HashSet<u64> = self
            .nodes
            .iter()
            .filter_map(|n| n.id.parse::<u64>().ok())
            .collect();
        let mut candidate = 1u64;
        while used.contains(&candidate) {
            candidate += 1;
        }
        candidate.to_string()
    }

    /// Whether an edge with exactly this source/target pair exists.
    #[must_use]
    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source == source && e.target == target)
    }
}

/// Append-only sequence of graph snapshots plus a current pointer.
///
/// Created lazily on first modification. Every accepted turn with
/// modifications appends exactly one snapshot; prior snapshots are never
/// mutated in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphHistory {
    /// Snapshot versions, oldest first.
    pub snapshots: Vec<GraphSnapshot>,
    /// Index of the snapshot considered current.
    pub current_index: usize,
}

impl GraphHistory {
    /// The snapshot at `current_index`, if any.
    #[must_use]
    pub fn current(&self) -> Option<&GraphSnapshot> {
        self.snapshots.get(self.current_index)
    }

    /// Append a snapshot and point `current_index` at it.
    pub fn push(&mut self, snapshot: GraphSnapshot) {
        self.snapshots.push(snapshot);
        self.current_index = self.snapshots.len() - 1;
    }

    /// Number of snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the history holds no snapshots yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// An unresolved source/target label pair from the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPair {
    /// Source node label.
    pub source: String,
    /// Target node label.
    pub target: String,
}

impl LabelPair {
    /// Convenience constructor.
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// One turn's batch of proposed graph mutations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphModification {
    /// Labels of nodes to create (or refresh, if the label exists).
    #[serde(default)]
    pub add_nodes: Vec<String>,
    /// Ids or labels of nodes to delete.
    #[serde(default)]
    pub remove_nodes: Vec<String>,
    /// Label pairs to connect.
    #[serde(default)]
    pub add_connections: Vec<LabelPair>,
    /// Label pairs to disconnect.
    #[serde(default)]
    pub remove_connections: Vec<LabelPair>,
}

impl GraphModification {
    /// Whether the batch proposes no changes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add_nodes.is_empty()
            && self.remove_nodes.is_empty()
            && self.add_connections.is_empty()
            && self.remove_connections.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
