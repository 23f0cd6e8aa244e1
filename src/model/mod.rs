// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in hook-aware transformer backend.
//!
//! A compact decoder stack able to host compiled ground-truth weights and
//! learned weights alike: token embedding plus learned positional
//! embedding, per-layer multi-head attention and ReLU MLP blocks (no
//! normalisation layers; compiled models do not use them), and an
//! unembedding projection. The forward pass exposes hook points at
//! exactly the four site kinds the evaluation engine intervenes on.

pub(crate) mod attention;
pub(crate) mod mlp;

use candle_core::{DType, Module, Tensor};
use candle_nn::{Embedding, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::backend::HookedBackend;
use crate::error::{CircuitsError, Result};
use crate::hooks::{HookCache, HookPoint, HookSpec, apply_patch};
use crate::util::masks;

use self::attention::Attention;
use self::mlp::Mlp;

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

/// Configuration for the built-in transformer backend.
///
/// `head_dim` is independent of `hidden_size / num_heads`: compiled
/// models frequently use key/query spaces much smaller than the residual
/// stream.
///
/// # Example
///
/// ```
/// use candle_circuits::ModelConfig;
///
/// let config = ModelConfig::from_json(r#"{
///     "num_layers": 1, "num_heads": 1, "head_dim": 2,
///     "hidden_size": 4, "mlp_size": 8, "vocab_size": 5,
///     "context_length": 4
/// }"#).unwrap();
/// assert_eq!(config.num_layers, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of decoder layers.
    pub num_layers: usize,
    /// Number of attention heads per layer.
    pub num_heads: usize,
    /// Dimension per attention head.
    pub head_dim: usize,
    /// Residual stream dimension (`d_model`).
    pub hidden_size: usize,
    /// MLP intermediate dimension.
    pub mlp_size: usize,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Maximum sequence length (learned positional embedding table size).
    pub context_length: usize,
}

impl ModelConfig {
    /// Parse a configuration from a JSON string and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Config`] if the JSON is malformed or any
    /// dimension is zero.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CircuitsError::Config(format!("parse model config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every dimension is nonzero.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Config`] naming the first zero dimension.
    pub fn validate(&self) -> Result<()> {
        let axes = [
            ("num_layers", self.num_layers),
            ("num_heads", self.num_heads),
            ("head_dim", self.head_dim),
            ("hidden_size", self.hidden_size),
            ("mlp_size", self.mlp_size),
            ("vocab_size", self.vocab_size),
            ("context_length", self.context_length),
        ];
        for (name, value) in axes {
            if value == 0 {
                return Err(CircuitsError::Config(format!("{name} must be nonzero")));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DecoderLayer
// ---------------------------------------------------------------------------

/// A single decoder layer: attention block plus MLP block.
struct DecoderLayer {
    /// Self-attention block.
    attention: Attention,
    /// MLP block.
    mlp: Mlp,
}

impl DecoderLayer {
    /// Load a single decoder layer from weights.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Model`] if weight loading fails.
    #[allow(clippy::needless_pass_by_value)] // VarBuilder is candle's pass-by-value convention
    fn load(config: &ModelConfig, vb: VarBuilder<'_>) -> Result<Self> {
        let attention = Attention::load(config, vb.pp("attn"))?;
        let mlp = Mlp::load(config, vb.pp("mlp"))?;
        Ok(Self { attention, mlp })
    }
}

// ---------------------------------------------------------------------------
// HookedTransformer
// ---------------------------------------------------------------------------

/// Hook-aware transformer over compiled or learned weights.
///
/// Weight names under the [`VarBuilder`] root:
/// `embed.weight`, `pos_embed.weight`,
/// `blocks.{i}.attn.{q,k,v,o}_proj.{weight,bias}`,
/// `blocks.{i}.mlp.{fc_in,fc_out}.{weight,bias}`, `unembed.weight`.
pub struct HookedTransformer {
    /// Token embedding matrix, `[vocab_size, hidden_size]`.
    embed: Embedding,
    /// Learned positional embedding matrix, `[context_length, hidden_size]`.
    pos_embed: Embedding,
    /// Decoder layers.
    layers: Vec<DecoderLayer>,
    /// Unembedding projection, `[hidden_size] -> [vocab_size]`.
    unembed: Linear,
    /// Model configuration.
    config: ModelConfig,
}

impl HookedTransformer {
    /// Load a transformer from a [`VarBuilder`].
    ///
    /// The caller constructs the `VarBuilder` (from safetensors on disk
    /// or from an in-memory tensor map via `VarBuilder::from_tensors`)
    /// and provides the validated config.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Config`] if the config is invalid and
    /// [`CircuitsError::Model`] if weight loading fails.
    #[allow(clippy::needless_pass_by_value)] // VarBuilder is candle's pass-by-value convention
    pub fn load(config: ModelConfig, vb: VarBuilder<'_>) -> Result<Self> {
        config.validate()?;

        let embed = candle_nn::embedding(config.vocab_size, config.hidden_size, vb.pp("embed"))?;
        let pos_embed = candle_nn::embedding(
            config.context_length,
            config.hidden_size,
            vb.pp("pos_embed"),
        )?;

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let vb_layer = vb.pp(format!("blocks.{i}"));
            layers.push(DecoderLayer::load(&config, vb_layer)?);
        }

        let unembed =
            candle_nn::linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("unembed"))?;

        Ok(Self {
            embed,
            pos_embed,
            layers,
            unembed,
            config,
        })
    }

    /// Access the model configuration.
    #[must_use]
    pub const fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Capture, then patch, the activation at one hook point.
    fn apply_hook(
        hooks: &HookSpec,
        cache: &mut HookCache,
        point: HookPoint,
        mut tensor: Tensor,
    ) -> Result<Tensor> {
        if hooks.is_captured(&point) {
            cache.store(point, tensor.clone());
        }
        for patch in hooks.patches_at(&point) {
            tensor = apply_patch(&tensor, patch)?;
        }
        Ok(tensor)
    }
}

impl HookedBackend for HookedTransformer {
    fn num_layers(&self) -> usize {
        self.config.num_layers
    }

    fn num_heads(&self) -> usize {
        self.config.num_heads
    }

    fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn context_length(&self) -> usize {
        self.config.context_length
    }

    fn forward(&self, input_ids: &Tensor, hooks: &HookSpec) -> Result<HookCache> {
        let device = input_ids.device();
        let (_batch, seq_len) = input_ids.dims2()?;
        if seq_len > self.config.context_length {
            return Err(CircuitsError::Validation(format!(
                "input length {seq_len} exceeds context length {}",
                self.config.context_length
            )));
        }

        // Capture cache — collects hook captures; output set at the end.
        let mut cache = HookCache::new(Tensor::zeros(1, DType::F32, device)?);

        // Hook: Embed — the token-embedding term, before the sum.
        let tok = self.embed.forward(input_ids)?;
        let tok = Self::apply_hook(hooks, &mut cache, HookPoint::Embed, tok)?;

        // Hook: PosEmbed — the positional-embedding term, shape [seq, d].
        let pos = self.pos_embed.embeddings().narrow(0, 0, seq_len)?;
        let pos = Self::apply_hook(hooks, &mut cache, HookPoint::PosEmbed, pos)?;

        let mut hidden = tok.broadcast_add(&pos.unsqueeze(0)?)?;

        let mask = masks::create_causal_mask(seq_len, device, hidden.dtype())?;

        // --- Layer loop ---
        for (layer_idx, layer) in self.layers.iter().enumerate() {
            // Hook: AttnOut — block output before the residual add.
            let attn_out = layer.attention.forward(&hidden, &mask)?;
            let attn_out =
                Self::apply_hook(hooks, &mut cache, HookPoint::AttnOut(layer_idx), attn_out)?;
            hidden = (hidden + attn_out)?;

            // Hook: MlpOut — block output before the residual add.
            let mlp_out = layer.mlp.forward(&hidden)?;
            let mlp_out =
                Self::apply_hook(hooks, &mut cache, HookPoint::MlpOut(layer_idx), mlp_out)?;
            hidden = (hidden + mlp_out)?;
        }

        // --- Unembedding ---
        let logits = self.unembed.forward(&hidden)?;
        cache.set_output(logits);

        Ok(cache)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::cast_precision_loss,
    clippy::as_conversions
)]
mod tests {
    use super::*;
    use crate::hooks::Patch;
    use crate::testing::{tensor_map, tiny_config, tiny_model};
    use candle_core::Device;

    /// Two sequences of length 4 within the tiny vocabulary.
    fn input_ids(device: &Device) -> Tensor {
        Tensor::from_vec(vec![0u32, 1, 2, 3, 4, 3, 2, 1], (2, 4), device).unwrap()
    }

    #[test]
    fn forward_shapes() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let logits = model.forward_logits(&input_ids(&device)).unwrap();
        assert_eq!(logits.dims(), &[2, 4, 5]);
    }

    #[test]
    fn capture_all_captures_every_site() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let spec = HookSpec::capture_all(model.num_layers());
        let cache = model.forward(&input_ids(&device), &spec).unwrap();

        assert_eq!(cache.num_captures(), 2 + 2 * model.num_layers());
        assert_eq!(cache.require(&HookPoint::Embed).unwrap().dims(), &[2, 4, 4]);
        assert_eq!(cache.require(&HookPoint::PosEmbed).unwrap().dims(), &[4, 4]);
        assert_eq!(
            cache.require(&HookPoint::AttnOut(0)).unwrap().dims(),
            &[2, 4, 4]
        );
        assert_eq!(
            cache.require(&HookPoint::MlpOut(0)).unwrap().dims(),
            &[2, 4, 4]
        );
    }

    #[test]
    fn replace_patch_with_own_capture_is_noop() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let ids = input_ids(&device);

        let spec = HookSpec::capture_all(model.num_layers());
        let cache = model.forward(&ids, &spec).unwrap();
        let plain: Vec<f32> = cache.output().flatten_all().unwrap().to_vec1().unwrap();

        // Patching a site with the activation captured on the same input
        // must reproduce the same logits.
        let mut patched_spec = HookSpec::new();
        patched_spec.patch(
            HookPoint::MlpOut(0),
            Patch::Replace(cache.require(&HookPoint::MlpOut(0)).unwrap().clone()),
        );
        let patched = model.forward(&ids, &patched_spec).unwrap();
        let patched: Vec<f32> = patched.output().flatten_all().unwrap().to_vec1().unwrap();

        for (a, b) in plain.iter().zip(patched.iter()) {
            assert!((a - b).abs() < 1e-6, "no-op patch changed logits: {a} vs {b}");
        }
    }

    #[test]
    fn zero_patch_changes_logits() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let ids = input_ids(&device);

        let plain: Vec<f32> = model
            .forward_logits(&ids)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();

        let mut spec = HookSpec::new();
        spec.patch(HookPoint::MlpOut(0), Patch::Zero);
        let patched: Vec<f32> = model
            .forward(&ids, &spec)
            .unwrap()
            .output()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();

        let max_diff = plain
            .iter()
            .zip(patched.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f32, f32::max);
        assert!(max_diff > 1e-4, "zero ablation had no effect on logits");
    }

    #[test]
    fn causal_mask_keeps_prefix_logits_stable() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);

        let a = Tensor::from_vec(vec![0u32, 1, 2, 3], (1, 4), &device).unwrap();
        let b = Tensor::from_vec(vec![0u32, 1, 2, 4], (1, 4), &device).unwrap();

        let logits_a = model.forward_logits(&a).unwrap();
        let logits_b = model.forward_logits(&b).unwrap();

        // Positions 0..3 see identical prefixes; only position 3 differs.
        let prefix_a: Vec<f32> = logits_a
            .narrow(1, 0, 3)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let prefix_b: Vec<f32> = logits_b
            .narrow(1, 0, 3)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        for (x, y) in prefix_a.iter().zip(prefix_b.iter()) {
            assert!((x - y).abs() < 1e-6, "future token leaked into prefix");
        }
    }

    #[test]
    fn scaled_unembed_scales_logits_only() {
        let device = Device::Cpu;
        let config = tiny_config();

        let mut map = tensor_map(&config, &device, 7);
        let base_vb = VarBuilder::from_tensors(map.clone(), DType::F32, &device);
        let base = HookedTransformer::load(config.clone(), base_vb).unwrap();

        let scaled = (map.get("unembed.weight").unwrap() * 2.0).unwrap();
        map.insert("unembed.weight".to_string(), scaled);
        let hyp_vb = VarBuilder::from_tensors(map, DType::F32, &device);
        let hyp = HookedTransformer::load(config, hyp_vb).unwrap();

        let ids = input_ids(&device);
        let spec = HookSpec::capture_all(1);
        let base_cache = base.forward(&ids, &spec).unwrap();
        let hyp_cache = hyp.forward(&ids, &spec).unwrap();

        // Internal activations identical.
        for point in [HookPoint::Embed, HookPoint::AttnOut(0), HookPoint::MlpOut(0)] {
            let a: Vec<f32> = base_cache
                .require(&point)
                .unwrap()
                .flatten_all()
                .unwrap()
                .to_vec1()
                .unwrap();
            let b: Vec<f32> = hyp_cache
                .require(&point)
                .unwrap()
                .flatten_all()
                .unwrap()
                .to_vec1()
                .unwrap();
            for (x, y) in a.iter().zip(b.iter()) {
                assert!((x - y).abs() < 1e-6);
            }
        }

        // Logits scaled by 2.
        let base_logits: Vec<f32> = base_cache
            .output()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let hyp_logits: Vec<f32> = hyp_cache.output().flatten_all().unwrap().to_vec1().unwrap();
        for (x, y) in base_logits.iter().zip(hyp_logits.iter()) {
            assert!((2.0 * x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn input_exceeding_context_length_errors() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let too_long = Tensor::zeros((1, 5), DType::U32, &device).unwrap();
        assert!(model.forward_logits(&too_long).is_err());
    }

    #[test]
    fn config_json_roundtrip_and_validation() {
        let config = tiny_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = ModelConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);

        let zero = r#"{"num_layers": 0, "num_heads": 1, "head_dim": 2,
            "hidden_size": 4, "mlp_size": 6, "vocab_size": 5, "context_length": 4}"#;
        assert!(ModelConfig::from_json(zero).is_err());

        assert!(ModelConfig::from_json("not json").is_err());
    }
}
