// SPDX-License-Identifier: MIT OR Apache-2.0

//! Circuit building, persistence, and FPR/TPR comparison scenarios.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::missing_docs_in_private_items,
    missing_docs
)]

use std::collections::HashMap;

use candle_circuits::{
    Circuit, CorrespondenceEdge, IsolatedNodes, build_from_correspondence, build_from_scores,
    calculate_fpr_and_tpr, node_id,
};

/// Universe for the A/B/C scenarios: every structurally possible edge of
/// a tiny three-component model.
fn full_graph() -> Circuit {
    let mut full = Circuit::new();
    full.add_edge("A", "B");
    full.add_edge("B", "C");
    full.add_edge("A", "C");
    full
}

#[test]
fn correspondence_scenario_builds_one_edge_and_compares_perfectly() {
    // Ground-truth correspondence: A -> B present, B -> C absent.
    let records = vec![
        CorrespondenceEdge::new("B", "A", true),
        CorrespondenceEdge::new("C", "B", false),
    ];
    let circuit = build_from_correspondence(records, IsolatedNodes::Discard);

    assert_eq!(circuit.edge_count(), 1);
    assert!(circuit.contains_edge("A", "B"));
    assert!(!circuit.contains_edge("B", "C"));

    // Compared against itself the circuit is recovered perfectly.
    let comparison = calculate_fpr_and_tpr(&circuit, &circuit, &full_graph()).unwrap();
    assert_eq!(comparison.edges.tpr, 1.0);
    assert_eq!(comparison.edges.fpr, 0.0);
}

#[test]
fn builder_is_idempotent() {
    let records = || {
        vec![
            CorrespondenceEdge::new("B", "A", true),
            CorrespondenceEdge::new("C", "A", true),
            CorrespondenceEdge::new("C", "B", false),
        ]
    };
    let first = build_from_correspondence(records(), IsolatedNodes::Keep);
    let second = build_from_correspondence(records(), IsolatedNodes::Keep);

    assert_eq!(first.nodes(), second.nodes());
    assert_eq!(first.edges(), second.edges());
}

#[test]
fn empty_discovered_circuit_has_zero_tpr() {
    let discovered = Circuit::new();
    let ground_truth = build_from_correspondence(
        vec![CorrespondenceEdge::new("B", "A", true)],
        IsolatedNodes::Discard,
    );

    let comparison =
        calculate_fpr_and_tpr(&discovered, &ground_truth, &full_graph()).unwrap();
    assert_eq!(comparison.edges.tpr, 0.0);
}

#[test]
fn rates_are_well_defined_probabilities() {
    let mut scores = HashMap::new();
    scores.insert(("B".to_string(), "A".to_string()), 0.9_f32);
    scores.insert(("C".to_string(), "B".to_string()), 0.2_f32);
    scores.insert(("C".to_string(), "A".to_string()), 0.7_f32);
    let discovered = build_from_scores(&scores, 0.5, IsolatedNodes::Discard);

    let ground_truth = build_from_correspondence(
        vec![
            CorrespondenceEdge::new("B", "A", true),
            CorrespondenceEdge::new("C", "B", true),
        ],
        IsolatedNodes::Discard,
    );

    let comparison =
        calculate_fpr_and_tpr(&discovered, &ground_truth, &full_graph()).unwrap();
    assert!((0.0..=1.0).contains(&comparison.edges.tpr));
    assert!((0.0..=1.0).contains(&comparison.edges.fpr));

    // A -> B found, C -> B missed: TPR 1/2. A -> C is the one negative,
    // and it was discovered: FPR 1.
    assert_eq!(comparison.edges.tpr, 0.5);
    assert_eq!(comparison.edges.fpr, 1.0);

    // Every universe node appears in both circuits; node rates are
    // undefined and signalled distinctly rather than as NaN.
    assert!(comparison.nodes.is_none());
}

#[test]
fn indexed_node_identifiers_are_shared_across_producers() {
    let head = node_id("blocks.0.attn.hook_result", Some(0));

    let from_correspondence = build_from_correspondence(
        vec![CorrespondenceEdge::new(head.clone(), "hook_embed", true)],
        IsolatedNodes::Discard,
    );

    let mut scores = HashMap::new();
    scores.insert((head.clone(), "hook_embed".to_string()), 1.0_f32);
    let from_scores = build_from_scores(&scores, 0.5, IsolatedNodes::Discard);

    // Both producers emit the same canonical identifiers, so their edge
    // sets are directly comparable.
    assert_eq!(from_correspondence.edges(), from_scores.edges());
    assert!(from_correspondence.contains_edge("hook_embed", &head));
}

#[test]
fn circuit_persists_through_json_save_and_load() {
    let ground_truth = build_from_correspondence(
        vec![
            CorrespondenceEdge::new("B", "A", true),
            CorrespondenceEdge::new("C", "B", true),
            CorrespondenceEdge::new("C", "A", false),
        ],
        IsolatedNodes::Keep,
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ground_truth.json");
    ground_truth.save(&path).unwrap();
    let restored = Circuit::load(&path).unwrap();

    assert_eq!(restored.nodes(), ground_truth.nodes());
    assert_eq!(restored.edges(), ground_truth.edges());

    // The restored circuit still compares cleanly.
    let comparison =
        calculate_fpr_and_tpr(&restored, &ground_truth, &full_graph()).unwrap();
    assert_eq!(comparison.edges.tpr, 1.0);
    assert_eq!(comparison.edges.fpr, 0.0);
}
