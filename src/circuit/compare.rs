// SPDX-License-Identifier: MIT OR Apache-2.0

//! Circuit comparison: FPR/TPR over the full edge universe.

use serde::Serialize;

use crate::circuit::graph::Circuit;
use crate::error::{CircuitsError, Result};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Classification counts plus the derived rates for one granularity
/// (edges or nodes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateCounts {
    /// Present in both discovered and ground truth.
    pub true_positives: usize,
    /// Present in discovered but not ground truth.
    pub false_positives: usize,
    /// Present in ground truth but not discovered.
    pub false_negatives: usize,
    /// Present in neither.
    pub true_negatives: usize,
    /// `TP / (TP + FN)`.
    pub tpr: f64,
    /// `FP / (FP + TN)`.
    pub fpr: f64,
}

impl RateCounts {
    /// Derive the rates from classification counts, or `None` when either
    /// denominator is zero (rates undefined).
    fn from_counts(
        true_positives: usize,
        false_positives: usize,
        false_negatives: usize,
        true_negatives: usize,
    ) -> Option<Self> {
        let positives = true_positives + false_negatives;
        let negatives = false_positives + true_negatives;
        if positives == 0 || negatives == 0 {
            return None;
        }

        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        Some(Self {
            true_positives,
            false_positives,
            false_negatives,
            true_negatives,
            tpr: true_positives as f64 / positives as f64,
            fpr: false_positives as f64 / negatives as f64,
        })
    }
}

/// Agreement between a discovered circuit and ground truth, over the
/// universe of structurally possible edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CircuitComparison {
    /// Edge-level classification and rates (the primary statistic).
    pub edges: RateCounts,
    /// Node-level classification and rates. `None` when the node rates
    /// are undefined, e.g. every universe node appears in both circuits
    /// so there are no node negatives. Node membership is usually
    /// saturated even when edge membership is informative, so this is a
    /// distinct signal rather than an error.
    pub nodes: Option<RateCounts>,
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Compute FPR and TPR of a discovered circuit against ground truth.
///
/// `full` enumerates every structurally possible edge (and node); it is
/// the universe over which true negatives are counted. Both circuits
/// under comparison must be subgraphs of `full`.
///
/// # Errors
///
/// Returns [`CircuitsError::Validation`] if either circuit contains an
/// edge or node outside the universe, or if an edge-level rate
/// denominator is zero: an empty ground truth (TPR undefined) or a
/// universe with no negative edges (FPR undefined) must be signalled,
/// never silently turned into NaN.
pub fn calculate_fpr_and_tpr(
    discovered: &Circuit,
    ground_truth: &Circuit,
    full: &Circuit,
) -> Result<CircuitComparison> {
    ensure_subgraph("discovered", discovered, full)?;
    ensure_subgraph("ground truth", ground_truth, full)?;

    // --- Edges ---
    let mut edge_tp = 0;
    let mut edge_fp = 0;
    let mut edge_fn = 0;
    let mut edge_tn = 0;
    for (from, to) in full.edges() {
        let in_discovered = discovered.contains_edge(&from, &to);
        let in_ground_truth = ground_truth.contains_edge(&from, &to);
        match (in_discovered, in_ground_truth) {
            (true, true) => edge_tp += 1,
            (true, false) => edge_fp += 1,
            (false, true) => edge_fn += 1,
            (false, false) => edge_tn += 1,
        }
    }

    let edges = RateCounts::from_counts(edge_tp, edge_fp, edge_fn, edge_tn).ok_or_else(|| {
        if edge_tp + edge_fn == 0 {
            CircuitsError::Validation(
                "ground truth circuit has no edges; TPR is undefined".into(),
            )
        } else {
            CircuitsError::Validation(
                "edge universe has no negative edges; FPR is undefined".into(),
            )
        }
    })?;

    // --- Nodes ---
    let mut node_tp = 0;
    let mut node_fp = 0;
    let mut node_fn = 0;
    let mut node_tn = 0;
    for node in full.nodes() {
        let in_discovered = discovered.contains_node(&node);
        let in_ground_truth = ground_truth.contains_node(&node);
        match (in_discovered, in_ground_truth) {
            (true, true) => node_tp += 1,
            (true, false) => node_fp += 1,
            (false, true) => node_fn += 1,
            (false, false) => node_tn += 1,
        }
    }
    let nodes = RateCounts::from_counts(node_tp, node_fp, node_fn, node_tn);

    Ok(CircuitComparison { edges, nodes })
}

/// Every node and edge of `circuit` must appear in the universe.
fn ensure_subgraph(label: &str, circuit: &Circuit, full: &Circuit) -> Result<()> {
    for node in circuit.nodes() {
        if !full.contains_node(&node) {
            return Err(CircuitsError::Validation(format!(
                "{label} circuit node `{node}` is not in the full graph"
            )));
        }
    }
    for (from, to) in circuit.edges() {
        if !full.contains_edge(&from, &to) {
            return Err(CircuitsError::Validation(format!(
                "{label} circuit edge ({from}, {to}) is not in the full graph"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
