// SPDX-License-Identifier: MIT OR Apache-2.0

//! Causal attention mask construction.

use candle_core::{DType, Device, Tensor};

use crate::error::Result;

/// Create a causal attention mask.
///
/// Future positions are set to `-inf`; the mask is added to attention
/// scores before softmax.
///
/// # Shapes
/// - returns: `[1, 1, seq_len, seq_len]`
///
/// # Errors
///
/// Returns [`CircuitsError::Model`](crate::CircuitsError::Model) if
/// tensor creation fails.
pub(crate) fn create_causal_mask(
    seq_len: usize,
    device: &Device,
    dtype: DType,
) -> Result<Tensor> {
    let mut mask_data = vec![0.0_f32; seq_len * seq_len];
    for i in 0..seq_len {
        for j in 0..seq_len {
            if j > i {
                let idx = i * seq_len + j;
                // idx is always < seq_len * seq_len by construction
                if let Some(cell) = mask_data.get_mut(idx) {
                    *cell = f32::NEG_INFINITY;
                }
            }
        }
    }
    Ok(Tensor::from_vec(mask_data, (1, 1, seq_len, seq_len), device)?.to_dtype(dtype)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
