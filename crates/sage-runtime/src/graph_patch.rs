//! Graph patch engine: applies one modification batch to a snapshot.
//!
//! Runs in the background phase, after the turn's reply has already been
//! delivered, so the merge is best-effort: a malformed single operation
//! is skipped and logged, never failing the batch.

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use sage_core::graph::{
    GraphEdge, GraphHistory, GraphModification, GraphNode, GraphSnapshot,
};

/// A single skipped operation. Logged, never propagated.
#[derive(Debug, Error)]
pub enum GraphPatchError {
    /// A node operation carried an empty label.
    #[error("empty node label")]
    EmptyLabel,
    /// A connection endpoint was empty.
    #[error("empty connection endpoint")]
    EmptyEndpoint,
}

/// Applies modification batches to versioned snapshots.
pub struct GraphPatchEngine;

impl GraphPatchEngine {
    /// Apply a batch to a history: derive the next snapshot from the
    /// current one and append it. An empty batch appends nothing.
    pub fn apply(history: &mut GraphHistory, batch: &GraphModification) {
        if batch.is_empty() {
            return;
        }
        let base = history.current().cloned().unwrap_or_default();
        let next = Self::apply_to_snapshot(&base, batch);
        history.push(next);
        counter!("sage_graph_snapshots_total").increment(1);
    }

    /// Produce the next snapshot. Operation order is fixed so later
    /// steps can reference nodes created earlier in the same batch:
    /// add nodes, remove nodes, add connections, remove connections.
    #[must_use]
    pub fn apply_to_snapshot(prev: &GraphSnapshot, batch: &GraphModification) -> GraphSnapshot {
        let mut next = prev.clone();

        for label in &batch.add_nodes {
            if let Err(err) = Self::add_node(&mut next, label) {
                warn!(%err, label, "skipping add_nodes entry");
            }
        }
        for key in &batch.remove_nodes {
            Self::remove_node(&mut next, key);
        }
        for pair in &batch.add_connections {
            if let Err(err) = Self::add_connection(&mut next, &pair.source, &pair.target) {
                warn!(%err, source = %pair.source, target = %pair.target, "skipping add_connections entry");
            }
        }
        for pair in &batch.remove_connections {
            if let Err(err) = Self::remove_connection(&mut next, &pair.source, &pair.target) {
                warn!(%err, source = %pair.source, target = %pair.target, "skipping remove_connections entry");
            }
        }

        next
    }

    /// Create a node, or refresh an existing one while keeping its id.
    fn add_node(snapshot: &mut GraphSnapshot, label: &str) -> Result<(), GraphPatchError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(GraphPatchError::EmptyLabel);
        }

        if let Some(existing) = snapshot.nodes.iter_mut().find(|n| n.label == label) {
            // Label already present: reset the mutable fields, keep the id.
            let id = existing.id.clone();
            *existing = GraphNode::new(id, label);
            debug!(label, "refreshed existing node");
            return Ok(());
        }

        let id = snapshot.next_node_id();
        debug!(label, %id, "added node");
        snapshot.nodes.push(GraphNode::new(id, label));
        Ok(())
    }

    /// Delete nodes matching the key by id or label, plus any edge that
    /// references the key or a removed node's id or label.
    fn remove_node(snapshot: &mut GraphSnapshot, key: &str) {
        let removed: Vec<GraphNode> = snapshot
            .nodes
            .iter()
            .filter(|n| n.id == key || n.label == key)
            .cloned()
            .collect();
        if removed.is_empty() {
            // Non-existent target: a no-op, never an error.
            debug!(key, "remove_nodes matched nothing");
            return;
        }

        snapshot.nodes.retain(|n| n.id != key && n.label != key);

        // Callers reference edges by id or label interchangeably.
        let mut dead: Vec<&str> = vec![key];
        for node in &removed {
            dead.push(&node.id);
            dead.push(&node.label);
        }
        snapshot
            .edges
            .retain(|e| !dead.contains(&e.source.as_str()) && !dead.contains(&e.target.as_str()));
        debug!(key, removed = removed.len(), "removed nodes");
    }

    /// Resolve a label to the current node id, falling back to the raw
    /// label when no node carries it yet.
    fn resolve(snapshot: &GraphSnapshot, label: &str) -> String {
        snapshot
            .node_by_label(label)
            .map_or_else(|| label.to_owned(), |n| n.id.clone())
    }

    /// Connect two nodes by label, deduplicating by resolved pair.
    fn add_connection(
        snapshot: &mut GraphSnapshot,
        source: &str,
        target: &str,
    ) -> Result<(), GraphPatchError> {
        if source.trim().is_empty() || target.trim().is_empty() {
            return Err(GraphPatchError::EmptyEndpoint);
        }
        let source = Self::resolve(snapshot, source);
        let target = Self::resolve(snapshot, target);
        if snapshot.has_edge(&source, &target) {
            debug!(%source, %target, "connection already present");
            return Ok(());
        }
        snapshot.edges.push(GraphEdge {
            source,
            target,
            label: String::new(),
        });
        Ok(())
    }

    /// Remove every edge matching the resolved pair.
    fn remove_connection(
        snapshot: &mut GraphSnapshot,
        source: &str,
        target: &str,
    ) -> Result<(), GraphPatchError> {
        if source.trim().is_empty() || target.trim().is_empty() {
            return Err(GraphPatchError::EmptyEndpoint);
        }
        let source = Self::resolve(snapshot, source);
        let target = Self::resolve(snapshot, target);
        snapshot
            .edges
            .retain(|e| !(e.source == source && e.target == target));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use sage_core::graph::LabelPair;

    fn batch_add(labels: &[&str]) -> GraphModification {
        GraphModification {
            add_nodes: labels.iter().map(|s| (*s).to_owned()).collect(),
            ..GraphModification::default()
        }
    }

    #[test]
    fn empty_graph_gains_node_with_id_one() {
        let mut history = GraphHistory::default();
        GraphPatchEngine::apply(&mut history, &batch_add(&["Alice"]));

        assert_eq!(history.len(), 1);
        assert_eq!(history.current_index, history.len() - 1);
        let snap = history.current().unwrap();
        assert_eq!(snap.nodes.len(), 1);
        assert_eq!(snap.nodes[0].id, "1");
        assert_eq!(snap.nodes[0].label, "Alice");
    }

    #[test]
    fn empty_batch_appends_nothing() {
        let mut history = GraphHistory::default();
        GraphPatchEngine::apply(&mut history, &GraphModification::default());
        assert!(history.is_empty());
    }

    #[test]
    fn prior_snapshots_are_never_mutated() {
        let mut history = GraphHistory::default();
        GraphPatchEngine::apply(&mut history, &batch_add(&["Alice"]));
        GraphPatchEngine::apply(&mut history, &batch_add(&["Bob"]));

        assert_eq!(history.len(), 2);
        assert_eq!(history.snapshots[0].nodes.len(), 1);
        assert_eq!(history.snapshots[1].nodes.len(), 2);
        assert_eq!(history.current_index, 1);
    }

    #[test]
    fn re_adding_label_preserves_id_and_resets_fields() {
        let mut snap = GraphSnapshot::default();
        GraphPatchEngine::add_node(&mut snap, "Alice").unwrap();
        snap.nodes[0].description = "old description".into();
        snap.nodes[0].node_type = "person".into();

        GraphPatchEngine::add_node(&mut snap, "Alice").unwrap();
        assert_eq!(snap.nodes.len(), 1);
        assert_eq!(snap.nodes[0].id, "1");
        assert_eq!(snap.nodes[0].description, "");
        assert_eq!(snap.nodes[0].node_type, sage_core::graph::DEFAULT_NODE_TYPE);
    }

    #[test]
    fn new_node_takes_smallest_free_id() {
        let snap = GraphSnapshot {
            nodes: vec![GraphNode::new("1", "a"), GraphNode::new("3", "c")],
            edges: vec![],
        };
        let next = GraphPatchEngine::apply_to_snapshot(&snap, &batch_add(&["b"]));
        assert_eq!(next.node_by_label("b").unwrap().id, "2");
    }

    #[test]
    fn remove_by_id_and_by_label_both_clean_edges() {
        let base = GraphSnapshot {
            nodes: vec![GraphNode::new("1", "Alice"), GraphNode::new("2", "Bob")],
            edges: vec![
                GraphEdge { source: "1".into(), target: "2".into(), label: String::new() },
                GraphEdge { source: "2".into(), target: "Alice".into(), label: String::new() },
            ],
        };

        // By label.
        let mut by_label = base.clone();
        GraphPatchEngine::remove_node(&mut by_label, "Alice");
        assert_eq!(by_label.nodes.len(), 1);
        assert!(by_label.edges.is_empty());

        // By id.
        let mut by_id = base;
        GraphPatchEngine::remove_node(&mut by_id, "1");
        assert_eq!(by_id.nodes.len(), 1);
        assert!(by_id.edges.is_empty());
    }

    #[test]
    fn removing_missing_node_is_a_noop() {
        let mut snap = GraphSnapshot {
            nodes: vec![GraphNode::new("1", "Alice")],
            edges: vec![GraphEdge {
                source: "1".into(),
                target: "1".into(),
                label: String::new(),
            }],
        };
        GraphPatchEngine::remove_node(&mut snap, "Nobody");
        assert_eq!(snap.nodes.len(), 1);
        assert_eq!(snap.edges.len(), 1);
    }

    #[test]
    fn connections_resolve_labels_to_ids() {
        let batch = GraphModification {
            add_nodes: vec!["Alice".into(), "Bob".into()],
            add_connections: vec![LabelPair::new("Alice", "Bob")],
            ..GraphModification::default()
        };
        let next = GraphPatchEngine::apply_to_snapshot(&GraphSnapshot::default(), &batch);
        assert_eq!(next.edges.len(), 1);
        assert_eq!(next.edges[0].source, "1");
        assert_eq!(next.edges[0].target, "2");
    }

    #[test]
    fn unresolved_label_falls_back_to_raw_string() {
        let batch = GraphModification {
            add_connections: vec![LabelPair::new("Alice", "NotYetCreated")],
            add_nodes: vec!["Alice".into()],
            ..GraphModification::default()
        };
        let next = GraphPatchEngine::apply_to_snapshot(&GraphSnapshot::default(), &batch);
        assert_eq!(next.edges[0].source, "1");
        assert_eq!(next.edges[0].target, "NotYetCreated");
    }

    #[test]
    fn add_connection_deduplicates_by_resolved_pair() {
        let batch = GraphModification {
            add_nodes: vec!["Alice".into(), "Bob".into()],
            add_connections: vec![
                LabelPair::new("Alice", "Bob"),
                LabelPair::new("Alice", "Bob"),
            ],
            ..GraphModification::default()
        };
        let next = GraphPatchEngine::apply_to_snapshot(&GraphSnapshot::default(), &batch);
        assert_eq!(next.edges.len(), 1);
    }

    #[test]
    fn remove_connection_deletes_all_matching_edges() {
        let snap = GraphSnapshot {
            nodes: vec![GraphNode::new("1", "Alice"), GraphNode::new("2", "Bob")],
            edges: vec![
                GraphEdge { source: "1".into(), target: "2".into(), label: String::new() },
                GraphEdge { source: "1".into(), target: "2".into(), label: "dup".into() },
                GraphEdge { source: "2".into(), target: "1".into(), label: String::new() },
            ],
        };
        let batch = GraphModification {
            remove_connections: vec![LabelPair::new("Alice", "Bob")],
            ..GraphModification::default()
        };
        let next = GraphPatchEngine::apply_to_snapshot(&snap, &batch);
        // Only the reverse direction survives.
        assert_eq!(next.edges.len(), 1);
        assert_eq!(next.edges[0].source, "2");
    }

    #[test]
    fn removing_missing_connection_is_a_noop() {
        let snap = GraphSnapshot {
            nodes: vec![GraphNode::new("1", "Alice")],
            edges: vec![],
        };
        let batch = GraphModification {
            remove_connections: vec![LabelPair::new("Alice", "Bob")],
            ..GraphModification::default()
        };
        let next = GraphPatchEngine::apply_to_snapshot(&snap, &batch);
        assert!(next.edges.is_empty());
    }

    #[test]
    fn malformed_operations_are_skipped_not_fatal() {
        let batch = GraphModification {
            add_nodes: vec![String::new(), "Alice".into()],
            add_connections: vec![LabelPair::new("", "Alice")],
            ..GraphModification::default()
        };
        let next = GraphPatchEngine::apply_to_snapshot(&GraphSnapshot::default(), &batch);
        assert_eq!(next.nodes.len(), 1);
        assert!(next.edges.is_empty());
    }

    #[test]
    fn batch_order_allows_same_batch_references() {
        // Remove an old node, add a replacement, and wire it, all at once.
        let snap = GraphSnapshot {
            nodes: vec![GraphNode::new("1", "You"), GraphNode::new("2", "OldJob")],
            edges: vec![GraphEdge {
                source: "1".into(),
                target: "2".into(),
                label: String::new(),
            }],
        };
        let batch = GraphModification {
            add_nodes: vec!["NewJob".into()],
            remove_nodes: vec!["OldJob".into()],
            add_connections: vec![LabelPair::new("You", "NewJob")],
            ..GraphModification::default()
        };
        let next = GraphPatchEngine::apply_to_snapshot(&snap, &batch);

        assert!(next.node_by_label("OldJob").is_none());
        let new_job = next.node_by_label("NewJob").unwrap();
        // Added before the removal, so it takes the smallest id free then.
        assert_eq!(new_job.id, "3");
        assert_eq!(next.edges.len(), 1);
        assert_eq!(next.edges[0].target, "3");
    }
}
