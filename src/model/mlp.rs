// SPDX-License-Identifier: MIT OR Apache-2.0

//! ReLU MLP for the built-in transformer backend.

use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::error::Result;
use crate::model::ModelConfig;

/// Two-layer ReLU MLP: `fc_out(relu(fc_in(x)))`.
///
/// Compiled models use plain ReLU feed-forward blocks; there is no gating.
pub(crate) struct Mlp {
    /// First projection: `[hidden_size] -> [mlp_size]`.
    fc_in: Linear,
    /// Second projection: `[mlp_size] -> [hidden_size]`.
    fc_out: Linear,
}

impl Mlp {
    /// Load MLP weights from a [`VarBuilder`].
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Model`](crate::CircuitsError::Model) if
    /// weight loading fails.
    #[allow(clippy::needless_pass_by_value)] // VarBuilder is candle's pass-by-value convention
    pub(crate) fn load(config: &ModelConfig, vb: VarBuilder<'_>) -> Result<Self> {
        let fc_in = candle_nn::linear(config.hidden_size, config.mlp_size, vb.pp("fc_in"))?;
        let fc_out = candle_nn::linear(config.mlp_size, config.hidden_size, vb.pp("fc_out"))?;
        Ok(Self { fc_in, fc_out })
    }

    /// Run the MLP forward pass.
    ///
    /// # Shapes
    /// - `x`: `[batch, seq, hidden_size]`
    /// - returns: `[batch, seq, hidden_size]` — the block output, before
    ///   the residual add
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Model`](crate::CircuitsError::Model) on
    /// tensor operation failures.
    pub(crate) fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let hidden = self.fc_in.forward(x)?;
        let hidden = hidden.relu()?;
        Ok(self.fc_out.forward(&hidden)?)
    }
}
