// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-head attention for the built-in transformer backend.

use candle_core::{DType, Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::error::Result;
use crate::model::ModelConfig;

// ---------------------------------------------------------------------------
// Attention
// ---------------------------------------------------------------------------

/// Multi-head attention layer.
///
/// Plain MHA with separate Q/K/V/O projections and biases, matching the
/// weight layout compiled models are exported with. The head dimension is
/// independent of `hidden_size / num_heads`: compiled models frequently
/// use small key/query spaces.
pub(crate) struct Attention {
    /// Query projection: `[hidden_size] -> [num_heads * head_dim]`.
    q_proj: Linear,
    /// Key projection: `[hidden_size] -> [num_heads * head_dim]`.
    k_proj: Linear,
    /// Value projection: `[hidden_size] -> [num_heads * head_dim]`.
    v_proj: Linear,
    /// Output projection: `[num_heads * head_dim] -> [hidden_size]`.
    o_proj: Linear,
    /// Number of attention heads.
    num_heads: usize,
    /// Dimension per head.
    head_dim: usize,
    /// Attention scale factor: `1/sqrt(head_dim)`.
    scale: f64,
}

impl Attention {
    /// Load attention weights from a [`VarBuilder`].
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Model`](crate::CircuitsError::Model) if
    /// weight loading fails.
    #[allow(clippy::needless_pass_by_value)] // VarBuilder is candle's pass-by-value convention
    pub(crate) fn load(config: &ModelConfig, vb: VarBuilder<'_>) -> Result<Self> {
        let proj_dim = config.num_heads * config.head_dim;

        let q_proj = candle_nn::linear(config.hidden_size, proj_dim, vb.pp("q_proj"))?;
        let k_proj = candle_nn::linear(config.hidden_size, proj_dim, vb.pp("k_proj"))?;
        let v_proj = candle_nn::linear(config.hidden_size, proj_dim, vb.pp("v_proj"))?;
        let o_proj = candle_nn::linear(proj_dim, config.hidden_size, vb.pp("o_proj"))?;

        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let scale = 1.0 / (config.head_dim as f64).sqrt();

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            num_heads: config.num_heads,
            head_dim: config.head_dim,
            scale,
        })
    }

    /// Run the attention forward pass.
    ///
    /// # Shapes
    /// - `x`: `[batch, seq, hidden_size]`
    /// - `mask`: `[1, 1, seq, seq]` — causal mask
    /// - returns: `[batch, seq, hidden_size]` — the block output, before
    ///   the residual add
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Model`](crate::CircuitsError::Model) on
    /// tensor operation failures.
    pub(crate) fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _hidden) = x.dims3()?;

        let q = self.q_proj.forward(x)?;
        let k = self.k_proj.forward(x)?;
        let v = self.v_proj.forward(x)?;

        // [batch, seq, heads, head_dim] -> [batch, heads, seq, head_dim]
        let q = q
            .reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = k
            .reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = v
            .reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;

        // --- Attention scores ---
        // CONTIGUOUS: transpose produces non-unit strides; matmul requires contiguous layout
        let k_t = k.contiguous()?.transpose(2, 3)?;
        let q = q.contiguous()?;

        let mut scores = q.matmul(&k_t)?;
        scores = (scores * self.scale)?;
        scores = scores.broadcast_add(mask)?;

        // Softmax
        // PROMOTE: softmax over F16/BF16 can produce NaN; compute in F32
        let original_dtype = scores.dtype();
        let scores_f32 = if original_dtype == DType::F32 {
            scores
        } else {
            scores.to_dtype(DType::F32)?
        };
        let mut pattern = candle_nn::ops::softmax_last_dim(&scores_f32)?;
        if original_dtype != DType::F32 {
            pattern = pattern.to_dtype(original_dtype)?;
        }

        // --- Attention output ---
        let v = v.contiguous()?;
        let attn_output = pattern.matmul(&v)?;

        // [batch, heads, seq, head_dim] -> [batch, seq, heads * head_dim]
        let attn_output = attn_output.transpose(1, 2)?.contiguous()?.reshape((
            batch,
            seq_len,
            self.num_heads * self.head_dim,
        ))?;

        Ok(self.o_proj.forward(&attn_output)?)
    }
}
