// SPDX-License-Identifier: MIT OR Apache-2.0

//! Circuit graphs: construction, persistence, and comparison.
//!
//! - [`graph`] — the directed [`Circuit`](graph::Circuit) graph over
//!   canonical node identifiers, with JSON persistence.
//! - [`builder`] — building circuits from ground-truth correspondences
//!   or thresholded attribution scores.
//! - [`compare`] — false/true positive rates of a discovered circuit
//!   against ground truth over the full edge universe.

pub mod builder;
pub mod compare;
pub mod graph;
