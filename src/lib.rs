// SPDX-License-Identifier: MIT OR Apache-2.0

//! # candle-circuits
//!
//! A benchmark harness for circuit discovery in mechanistic
//! interpretability, built on [candle](https://github.com/huggingface/candle).
//!
//! Given a ground-truth ("base") transformer and a learned ("hypothesis")
//! transformer, candle-circuits measures how faithfully the hypothesis
//! model reproduces the base model's internal causal structure:
//!
//! - **Resample ablation** — patch matched activation sites in both models
//!   with values cached from a corrupted input, forward-run both on the
//!   clean input, and score the divergence of their output logits
//!   ([`resample_ablation_loss`]).
//! - **Circuit graphs** — build directed graphs of causally relevant
//!   components from attribution scores or a ground-truth correspondence
//!   ([`Circuit`], [`build_from_correspondence`], [`build_from_scores`]).
//! - **Circuit comparison** — false/true positive rates of a discovered
//!   circuit against ground truth over the universe of structurally
//!   possible edges ([`calculate_fpr_and_tpr`]).
//!
//! Models plug in through the [`HookedBackend`] trait: a forward pass that
//! can capture activations at named [`HookPoint`]s and apply scoped
//! [`Patch`]es at the same points. A ready-made backend for compiled
//! transformer weights is provided behind the `transformer` feature
//! ([`HookedTransformer`]).

#![deny(warnings)]
#![warn(missing_docs)]

pub mod backend;
pub mod circuit;
pub mod data;
pub mod error;
pub mod eval;
pub mod hooks;
pub mod mapper;
pub mod sites;

#[cfg(feature = "transformer")]
pub mod model;
#[cfg(all(test, feature = "transformer"))]
pub(crate) mod testing;
#[cfg(feature = "transformer")]
pub(crate) mod util;

pub use backend::{HookedBackend, ensure_comparable};
pub use circuit::builder::{
    CorrespondenceEdge, IsolatedNodes, build_from_correspondence, build_from_scores,
};
pub use circuit::compare::{CircuitComparison, RateCounts, calculate_fpr_and_tpr};
pub use circuit::graph::{Circuit, node_id};
pub use data::TokenDataset;
pub use error::{CircuitsError, Result};
pub use eval::data::{InterventionData, build_intervention_data, reclaim_device_memory};
pub use eval::resample::{
    ResampleAblationOutput, resample_ablation_loss, resample_ablation_loss_from_inputs,
};
pub use hooks::{HookCache, HookPoint, HookSpec, Patch};
pub use mapper::{IdentityMapper, LinearMapper, ResidualStreamMapper};
pub use sites::{SiteKind, all_intervention_sites, intervention_sites};

#[cfg(feature = "transformer")]
pub use model::{HookedTransformer, ModelConfig};
