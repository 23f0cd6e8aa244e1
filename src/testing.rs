// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared test fixtures: tiny deterministic models and datasets.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::cast_precision_loss,
    clippy::as_conversions
)]

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::data::TokenDataset;
use crate::model::{HookedTransformer, ModelConfig};

/// A 1-layer, 1-head model config with context length 4 and vocab size 5.
pub(crate) fn tiny_config() -> ModelConfig {
    ModelConfig {
        num_layers: 1,
        num_heads: 1,
        head_dim: 2,
        hidden_size: 4,
        mlp_size: 6,
        vocab_size: 5,
        context_length: 4,
    }
}

/// Deterministic pseudo-random weights from a linear congruential
/// generator, scaled to roughly [-0.5, 0.5].
pub(crate) fn weights(count: usize, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..count)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
        })
        .collect()
}

/// Full weight map for [`tiny_config`]-shaped models, keyed by the
/// [`HookedTransformer`] weight names.
pub(crate) fn tensor_map(
    config: &ModelConfig,
    device: &Device,
    seed: u32,
) -> HashMap<String, Tensor> {
    let d = config.hidden_size;
    let proj = config.num_heads * config.head_dim;
    let mlp = config.mlp_size;
    let vocab = config.vocab_size;
    let ctx = config.context_length;

    let mut map = HashMap::new();
    let mut insert = |name: &str, shape: (usize, usize), s: u32| {
        let t = Tensor::from_vec(weights(shape.0 * shape.1, s), shape, device).unwrap();
        map.insert(name.to_string(), t);
    };

    insert("embed.weight", (vocab, d), seed);
    insert("pos_embed.weight", (ctx, d), seed.wrapping_add(1));
    insert("blocks.0.attn.q_proj.weight", (proj, d), seed.wrapping_add(2));
    insert("blocks.0.attn.k_proj.weight", (proj, d), seed.wrapping_add(3));
    insert("blocks.0.attn.v_proj.weight", (proj, d), seed.wrapping_add(4));
    insert("blocks.0.attn.o_proj.weight", (d, proj), seed.wrapping_add(5));
    insert("blocks.0.mlp.fc_in.weight", (mlp, d), seed.wrapping_add(6));
    insert("blocks.0.mlp.fc_out.weight", (d, mlp), seed.wrapping_add(7));
    insert("unembed.weight", (vocab, d), seed.wrapping_add(8));

    let mut insert_bias = |name: &str, len: usize, s: u32| {
        let t = Tensor::from_vec(weights(len, s), (len,), device).unwrap();
        map.insert(name.to_string(), t);
    };
    insert_bias("blocks.0.attn.q_proj.bias", proj, seed.wrapping_add(9));
    insert_bias("blocks.0.attn.k_proj.bias", proj, seed.wrapping_add(10));
    insert_bias("blocks.0.attn.v_proj.bias", proj, seed.wrapping_add(11));
    insert_bias("blocks.0.attn.o_proj.bias", d, seed.wrapping_add(12));
    insert_bias("blocks.0.mlp.fc_in.bias", mlp, seed.wrapping_add(13));
    insert_bias("blocks.0.mlp.fc_out.bias", d, seed.wrapping_add(14));

    map
}

/// Build a [`tiny_config`]-shaped model with deterministic weights.
pub(crate) fn tiny_model(device: &Device, seed: u32) -> HookedTransformer {
    let config = tiny_config();
    let vb = VarBuilder::from_tensors(tensor_map(&config, device, seed), DType::F32, device);
    HookedTransformer::load(config, vb).unwrap()
}

/// Clean inputs for the tiny models: four sequences of length 4.
pub(crate) fn clean_rows() -> Vec<Vec<u32>> {
    vec![
        vec![0, 1, 2, 3],
        vec![1, 2, 3, 4],
        vec![4, 3, 2, 1],
        vec![2, 0, 1, 3],
    ]
}

/// Corrupted inputs: the clean sequences, each cyclically shifted.
pub(crate) fn corrupted_rows() -> Vec<Vec<u32>> {
    clean_rows()
        .into_iter()
        .map(|mut row| {
            row.rotate_left(1);
            row
        })
        .collect()
}

/// Clean dataset for the tiny models.
pub(crate) fn clean_dataset(device: &Device) -> TokenDataset {
    TokenDataset::from_rows(&clean_rows(), device).unwrap()
}

/// Corrupted dataset for the tiny models.
pub(crate) fn corrupted_dataset(device: &Device) -> TokenDataset {
    TokenDataset::from_rows(&corrupted_rows(), device).unwrap()
}
