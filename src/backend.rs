// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core backend trait for hook-aware models.
//!
//! [`HookedBackend`] is the trait that every model under evaluation
//! implements. The single [`forward`](HookedBackend::forward) method
//! covers the plain, cached, and patched forward passes: the caller
//! specifies captures and patches via [`HookSpec`], and the backend
//! returns a [`HookCache`] containing the output logits plus any
//! requested activations.

use candle_core::Tensor;

use crate::error::{CircuitsError, Result};
use crate::hooks::{HookCache, HookSpec};

// ---------------------------------------------------------------------------
// HookedBackend trait
// ---------------------------------------------------------------------------

/// Unified interface for model backends with hook-aware forward passes.
///
/// Implementing this trait is the only requirement for plugging a model
/// into the evaluation engine. Patches arrive as part of the `hooks`
/// argument and are therefore scoped to a single call by construction:
/// the backend must not retain them between calls.
pub trait HookedBackend: Send + Sync {
    // --- Metadata --------------------------------------------------------

    /// Number of decoder layers.
    fn num_layers(&self) -> usize;

    /// Number of attention heads per layer.
    fn num_heads(&self) -> usize;

    /// Residual stream dimension (`d_model`).
    fn hidden_size(&self) -> usize;

    /// Vocabulary size.
    fn vocab_size(&self) -> usize;

    /// Maximum sequence length the model accepts.
    fn context_length(&self) -> usize;

    // --- Core forward pass -----------------------------------------------

    /// Unified forward pass with optional hook capture and patches.
    ///
    /// The returned [`HookCache`] always contains the output logits and
    /// any activations requested via [`HookSpec::capture`].
    ///
    /// # Shapes
    /// - `input_ids`: `[batch, seq]` -- token IDs
    /// - returns: [`HookCache`] containing logits at `[batch, seq, vocab_size]`
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Model`] on tensor operation failures and
    /// [`CircuitsError::Validation`] if the input exceeds the model's
    /// context length.
    fn forward(&self, input_ids: &Tensor, hooks: &HookSpec) -> Result<HookCache>;

    /// Plain forward pass returning only the output logits.
    ///
    /// # Shapes
    /// - `input_ids`: `[batch, seq]` -- token IDs
    /// - returns: `[batch, seq, vocab_size]`
    ///
    /// # Errors
    ///
    /// Propagates errors from [`forward`](Self::forward).
    fn forward_logits(&self, input_ids: &Tensor) -> Result<Tensor> {
        Ok(self.forward(input_ids, &HookSpec::new())?.into_output())
    }
}

// ---------------------------------------------------------------------------
// Comparability precondition
// ---------------------------------------------------------------------------

/// Check that two models can be compared site-by-site.
///
/// Both models must agree on layer count, head count, context length,
/// and vocabulary size; otherwise their intervention sites do not
/// correspond and any comparison is meaningless. Hidden sizes are
/// deliberately *not* checked here: a compressed hypothesis model has a
/// narrower residual stream, bridged by a
/// [`ResidualStreamMapper`](crate::ResidualStreamMapper).
///
/// # Errors
///
/// Returns [`CircuitsError::Validation`] naming the first mismatched axis.
pub fn ensure_comparable(base: &dyn HookedBackend, hypothesis: &dyn HookedBackend) -> Result<()> {
    if base.num_layers() != hypothesis.num_layers() {
        return Err(CircuitsError::Validation(format!(
            "models are not comparable: base has {} layers, hypothesis has {}",
            base.num_layers(),
            hypothesis.num_layers()
        )));
    }
    if base.num_heads() != hypothesis.num_heads() {
        return Err(CircuitsError::Validation(format!(
            "models are not comparable: base has {} heads, hypothesis has {}",
            base.num_heads(),
            hypothesis.num_heads()
        )));
    }
    if base.context_length() != hypothesis.context_length() {
        return Err(CircuitsError::Validation(format!(
            "models are not comparable: base context length {} != hypothesis {}",
            base.context_length(),
            hypothesis.context_length()
        )));
    }
    if base.vocab_size() != hypothesis.vocab_size() {
        return Err(CircuitsError::Validation(format!(
            "models are not comparable: base vocab size {} != hypothesis {}",
            base.vocab_size(),
            hypothesis.vocab_size()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
