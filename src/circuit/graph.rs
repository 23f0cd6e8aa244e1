// SPDX-License-Identifier: MIT OR Apache-2.0

//! Directed circuit graphs over canonical node identifiers.

use std::collections::HashMap;
use std::path::Path;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::error::{CircuitsError, Result};

// ---------------------------------------------------------------------------
// Canonical node identifiers
// ---------------------------------------------------------------------------

/// Canonical node identifier for a component, with an optional structural
/// index (head, position).
///
/// Every graph producer and consumer uses this single format, so set
/// operations between independently built graphs are well-defined over
/// the same identifier namespace.
///
/// ```
/// use candle_circuits::node_id;
///
/// assert_eq!(node_id("blocks.0.attn.hook_result", Some(1)),
///            "blocks.0.attn.hook_result[1]");
/// assert_eq!(node_id("hook_embed", None), "hook_embed");
/// ```
#[must_use]
pub fn node_id(name: &str, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("{name}[{i}]"),
        None => name.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Circuit
// ---------------------------------------------------------------------------

/// Serialised circuit document: a node list plus an edge list of
/// `(source, target)` identifier pairs.
#[derive(Debug, Serialize, Deserialize)]
struct CircuitDoc {
    /// All node identifiers, sorted.
    nodes: Vec<String>,
    /// All edges as `(source, target)` pairs, sorted.
    edges: Vec<(String, String)>,
}

/// A directed graph of circuit components.
///
/// Nodes are canonical string identifiers (see [`node_id`]); an edge
/// exists iff the corresponding component interaction was judged present
/// by the source algorithm. Edges are deduplicated; node and edge
/// listings are sorted so repeated constructions compare equal.
#[derive(Debug, Clone)]
pub struct Circuit {
    /// Underlying directed graph, node weights are the identifiers.
    graph: DiGraph<String, ()>,
    /// Identifier-to-node-index lookup.
    index: HashMap<String, NodeIndex>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl Circuit {
    /// Create an empty circuit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add a node, returning its index. Adding an existing node is a
    /// no-op returning the existing index.
    pub fn add_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.index.insert(id.to_string(), idx);
        idx
    }

    /// Add a directed edge, creating the endpoint nodes as needed.
    /// Duplicate edges are ignored.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let a = self.add_node(from);
        let b = self.add_node(to);
        if !self.graph.contains_edge(a, b) {
            self.graph.add_edge(a, b, ());
        }
    }

    /// Whether the circuit contains a node with this identifier.
    #[must_use]
    pub fn contains_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Whether the circuit contains the directed edge `from -> to`.
    #[must_use]
    pub fn contains_edge(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether the circuit has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All node identifiers, sorted.
    #[must_use]
    pub fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.index.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// All edges as `(source, target)` identifier pairs, sorted.
    #[must_use]
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = self
            .graph
            .edge_references()
            .filter_map(|edge| {
                let source = self.graph.node_weight(edge.source())?;
                let target = self.graph.node_weight(edge.target())?;
                Some((source.clone(), target.clone()))
            })
            .collect();
        edges.sort();
        edges
    }

    // --- Persistence -------------------------------------------------------

    /// Serialise to a JSON document of node and edge lists.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Circuit`] if serialisation fails.
    pub fn to_json(&self) -> Result<String> {
        let doc = CircuitDoc {
            nodes: self.nodes(),
            edges: self.edges(),
        };
        serde_json::to_string_pretty(&doc)
            .map_err(|e| CircuitsError::Circuit(format!("serialise circuit: {e}")))
    }

    /// Deserialise from a JSON document produced by [`to_json`](Self::to_json).
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Circuit`] if the document is malformed or
    /// an edge references an identifier missing from the node list.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: CircuitDoc = serde_json::from_str(json)
            .map_err(|e| CircuitsError::Circuit(format!("parse circuit: {e}")))?;

        let mut circuit = Self::new();
        for node in &doc.nodes {
            circuit.add_node(node);
        }
        for (from, to) in &doc.edges {
            if !circuit.contains_node(from) || !circuit.contains_node(to) {
                return Err(CircuitsError::Circuit(format!(
                    "edge ({from}, {to}) references an identifier missing \
                     from the node list"
                )));
            }
            circuit.add_edge(from, to);
        }
        Ok(circuit)
    }

    /// Write the JSON document to a file.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Circuit`] on serialisation failure or
    /// [`CircuitsError::Io`] on write failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a circuit from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Io`] on read failure or
    /// [`CircuitsError::Circuit`] if the document is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
