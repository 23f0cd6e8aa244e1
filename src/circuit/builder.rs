// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building circuits from correspondences and attribution scores.
//!
//! Both builders produce edges directed parent -> child: information
//! flows from the upstream component into the downstream one. Whether
//! nodes with no present edge survive in the output is caller-dependent
//! ([`IsolatedNodes`]): comparison needs the full node universe, while a
//! circuit meant for visualisation usually wants present edges only.

use std::collections::HashMap;

use crate::circuit::graph::Circuit;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One record of a ground-truth correspondence: a directed interaction
/// from `parent` into `child`, flagged present or absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrespondenceEdge {
    /// Downstream component identifier (see [`node_id`](crate::node_id)).
    pub child: String,
    /// Upstream component identifier.
    pub parent: String,
    /// Whether the interaction is part of the circuit.
    pub present: bool,
}

impl CorrespondenceEdge {
    /// Create a correspondence record.
    pub fn new(child: impl Into<String>, parent: impl Into<String>, present: bool) -> Self {
        Self {
            child: child.into(),
            parent: parent.into(),
            present,
        }
    }
}

/// Whether nodes without any present incident edge are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolatedNodes {
    /// Retain the endpoints of absent edges as isolated nodes, yielding
    /// the full node universe.
    Keep,
    /// Only nodes incident to a present edge appear in the output.
    Discard,
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Build a circuit from a ground-truth correspondence.
///
/// Adds the edge parent -> child for every record flagged present.
/// Identical inputs produce identical graphs, and duplicate records
/// collapse to a single edge.
pub fn build_from_correspondence(
    records: impl IntoIterator<Item = CorrespondenceEdge>,
    isolated: IsolatedNodes,
) -> Circuit {
    let mut circuit = Circuit::new();
    for record in records {
        if record.present {
            circuit.add_edge(&record.parent, &record.child);
        } else if isolated == IsolatedNodes::Keep {
            circuit.add_node(&record.parent);
            circuit.add_node(&record.child);
        }
    }
    circuit
}

/// Build a circuit from attribution scores.
///
/// `scores` maps `(child, parent)` identifier pairs to a numeric score;
/// the edge parent -> child is present iff its score reaches `threshold`.
pub fn build_from_scores(
    scores: &HashMap<(String, String), f32>,
    threshold: f32,
    isolated: IsolatedNodes,
) -> Circuit {
    let mut circuit = Circuit::new();
    for ((child, parent), &score) in scores {
        if score >= threshold {
            circuit.add_edge(parent, child);
        } else if isolated == IsolatedNodes::Keep {
            circuit.add_node(parent);
            circuit.add_node(child);
        }
    }
    circuit
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// One present and one absent correspondence record.
    fn records() -> Vec<CorrespondenceEdge> {
        vec![
            CorrespondenceEdge::new("b", "a", true),
            CorrespondenceEdge::new("c", "b", false),
        ]
    }

    #[test]
    fn correspondence_keeps_present_edges_only() {
        let circuit = build_from_correspondence(records(), IsolatedNodes::Discard);
        assert_eq!(circuit.edge_count(), 1);
        assert!(circuit.contains_edge("a", "b"));
        assert!(!circuit.contains_edge("b", "c"));
        assert!(!circuit.contains_node("c"));
    }

    #[test]
    fn correspondence_keep_isolated_retains_node_universe() {
        let circuit = build_from_correspondence(records(), IsolatedNodes::Keep);
        assert_eq!(circuit.edge_count(), 1);
        assert_eq!(circuit.nodes(), vec!["a", "b", "c"]);
        assert!(circuit.contains_node("c"));
    }

    #[test]
    fn correspondence_build_is_idempotent() {
        let first = build_from_correspondence(records(), IsolatedNodes::Keep);
        let second = build_from_correspondence(records(), IsolatedNodes::Keep);
        assert_eq!(first.nodes(), second.nodes());
        assert_eq!(first.edges(), second.edges());
    }

    #[test]
    fn duplicate_records_collapse() {
        let mut duplicated = records();
        duplicated.extend(records());
        let circuit = build_from_correspondence(duplicated, IsolatedNodes::Keep);
        assert_eq!(circuit.edge_count(), 1);
        assert_eq!(circuit.node_count(), 3);
    }

    #[test]
    fn scores_threshold_selects_edges() {
        let mut scores = HashMap::new();
        scores.insert(("b".to_string(), "a".to_string()), 0.9_f32);
        scores.insert(("c".to_string(), "b".to_string()), 0.1_f32);
        scores.insert(("c".to_string(), "a".to_string()), 0.5_f32);

        let circuit = build_from_scores(&scores, 0.5, IsolatedNodes::Discard);
        assert_eq!(circuit.edge_count(), 2);
        assert!(circuit.contains_edge("a", "b"));
        assert!(circuit.contains_edge("a", "c")); // score == threshold kept
        assert!(!circuit.contains_edge("b", "c"));
    }

    #[test]
    fn scores_keep_isolated_retains_below_threshold_endpoints() {
        let mut scores = HashMap::new();
        scores.insert(("b".to_string(), "a".to_string()), 0.0_f32);

        let discarded = build_from_scores(&scores, 0.5, IsolatedNodes::Discard);
        assert!(discarded.is_empty());

        let kept = build_from_scores(&scores, 0.5, IsolatedNodes::Keep);
        assert_eq!(kept.nodes(), vec!["a", "b"]);
        assert_eq!(kept.edge_count(), 0);
    }
}
