// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hook system for activation capture and patching.
//!
//! Provides [`HookPoint`] (named locations in a forward pass),
//! [`HookSpec`] (what to capture and where to patch), and [`HookCache`]
//! (captured tensors from a forward pass).
//!
//! Patches are threaded explicitly through each forward call as part of
//! the [`HookSpec`] argument. No state is ever installed on the model, so
//! a patch is scoped to exactly one call's dynamic extent and cannot leak
//! into later calls, whether the call succeeds or fails.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use candle_core::Tensor;

use crate::error::{CircuitsError, Result};
use crate::sites::SiteKind;

// ---------------------------------------------------------------------------
// HookPoint
// ---------------------------------------------------------------------------

/// Named location in a forward pass where activations can be captured
/// or patched.
///
/// These are the residual-stream write sites of a decoder block stack.
/// Two models are matched site-by-site through this enum (kind + layer
/// index), never by comparing backend-internal names, so compression or
/// renaming inside a backend cannot silently drop sites.
///
/// # String conversion
///
/// ```
/// use candle_circuits::HookPoint;
///
/// let hook = HookPoint::AttnOut(3);
/// assert_eq!(hook.to_string(), "blocks.3.hook_attn_out");
///
/// let parsed: HookPoint = "blocks.3.hook_attn_out".parse().unwrap();
/// assert_eq!(parsed, hook);
/// ```
///
/// Unknown strings fail to parse: a site that a backend cannot honour
/// must never be silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Token-embedding term, before it is summed into the residual stream
    /// (`hook_embed`).
    Embed,
    /// Positional-embedding term, before it is summed into the residual
    /// stream (`hook_pos_embed`).
    PosEmbed,
    /// Attention block output in layer `i`, before the residual add
    /// (`blocks.{i}.hook_attn_out`).
    AttnOut(usize),
    /// MLP block output in layer `i`, before the residual add
    /// (`blocks.{i}.hook_mlp_out`).
    MlpOut(usize),
}

impl HookPoint {
    /// The site kind of this hook point.
    #[must_use]
    pub const fn kind(&self) -> SiteKind {
        match self {
            Self::Embed => SiteKind::Embed,
            Self::PosEmbed => SiteKind::PosEmbed,
            Self::AttnOut(_) => SiteKind::AttnOut,
            Self::MlpOut(_) => SiteKind::MlpOut,
        }
    }

    /// The layer index, for per-layer sites.
    #[must_use]
    pub const fn layer(&self) -> Option<usize> {
        match self {
            Self::Embed | Self::PosEmbed => None,
            Self::AttnOut(i) | Self::MlpOut(i) => Some(*i),
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embed => write!(f, "hook_embed"),
            Self::PosEmbed => write!(f, "hook_pos_embed"),
            Self::AttnOut(i) => write!(f, "blocks.{i}.hook_attn_out"),
            Self::MlpOut(i) => write!(f, "blocks.{i}.hook_mlp_out"),
        }
    }
}

impl FromStr for HookPoint {
    type Err = CircuitsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hook_embed" => return Ok(Self::Embed),
            "hook_pos_embed" => return Ok(Self::PosEmbed),
            _ => {}
        }

        // "blocks.{layer}.{suffix}" pattern.
        if let Some(rest) = s.strip_prefix("blocks.") {
            if let Some((layer_str, suffix)) = rest.split_once('.') {
                if let Ok(layer) = layer_str.parse::<usize>() {
                    match suffix {
                        "hook_attn_out" => return Ok(Self::AttnOut(layer)),
                        "hook_mlp_out" => return Ok(Self::MlpOut(layer)),
                        _ => {}
                    }
                }
            }
        }

        Err(CircuitsError::Hook(format!("unknown hook point `{s}`")))
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// A patch to apply at a hook point during the forward pass.
///
/// Patches modify activations as they flow through the model. They are
/// specified as part of a [`HookSpec`] and applied by the backend at the
/// corresponding [`HookPoint`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Patch {
    /// Replace the activation entirely with a provided value (resample
    /// ablation: the value comes from a corrupted-input cache).
    Replace(Tensor),

    /// Zero the activation at this hook point (zero ablation).
    Zero,
}

/// Apply a single [`Patch`] to a tensor.
///
/// Used by backend implementations at each hook point.
///
/// # Shapes
/// - `tensor`: any shape — the activation at the hook point.
/// - returns: same shape as `tensor` (a `Replace` value must match).
///
/// # Errors
///
/// Returns [`CircuitsError::Model`] if the underlying tensor operation
/// fails.
pub fn apply_patch(tensor: &Tensor, patch: &Patch) -> Result<Tensor> {
    match patch {
        Patch::Replace(replacement) => Ok(replacement.clone()),
        Patch::Zero => Ok(tensor.zeros_like()?),
    }
}

// ---------------------------------------------------------------------------
// HookSpec
// ---------------------------------------------------------------------------

/// Declares which activations to capture and which patches to apply.
///
/// Passed to [`HookedBackend::forward`](crate::HookedBackend::forward).
/// When empty, the forward pass is a plain forward pass.
///
/// # Example
///
/// ```
/// use candle_circuits::{HookPoint, HookSpec};
///
/// let mut hooks = HookSpec::new();
/// hooks.capture(HookPoint::AttnOut(0)).capture(HookPoint::MlpOut(0));
/// assert_eq!(hooks.num_captures(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct HookSpec {
    /// Hook points to capture during the forward pass.
    captures: HashSet<HookPoint>,
    /// Patches to apply, stored as (`hook_point`, patch) pairs.
    patches: Vec<(HookPoint, Patch)>,
}

impl HookSpec {
    /// Create an empty hook specification (no captures, no patches).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A specification capturing every site of a `num_layers`-deep model:
    /// embedding, positional embedding, and attention/MLP outputs per
    /// layer. This is the "forward with cache" configuration used to
    /// build intervention data.
    #[must_use]
    pub fn capture_all(num_layers: usize) -> Self {
        let mut spec = Self::new();
        spec.capture(HookPoint::Embed).capture(HookPoint::PosEmbed);
        for layer in 0..num_layers {
            spec.capture(HookPoint::AttnOut(layer))
                .capture(HookPoint::MlpOut(layer));
        }
        spec
    }

    /// Request capture of the activation at the given hook point.
    pub fn capture(&mut self, hook: HookPoint) -> &mut Self {
        self.captures.insert(hook);
        self
    }

    /// Register a patch at the given hook point.
    pub fn patch(&mut self, hook: HookPoint, patch: Patch) -> &mut Self {
        self.patches.push((hook, patch));
        self
    }

    /// Check whether a specific hook point should be captured.
    #[must_use]
    pub fn is_captured(&self, hook: &HookPoint) -> bool {
        self.captures.contains(hook)
    }

    /// Check whether this spec has no captures and no patches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.captures.is_empty() && self.patches.is_empty()
    }

    /// Number of requested captures.
    #[must_use]
    pub fn num_captures(&self) -> usize {
        self.captures.len()
    }

    /// Number of registered patches.
    #[must_use]
    pub const fn num_patches(&self) -> usize {
        self.patches.len()
    }

    /// Iterate over patches registered at a specific hook point, in
    /// registration order.
    pub fn patches_at(&self, hook: &HookPoint) -> impl Iterator<Item = &Patch> {
        self.patches
            .iter()
            .filter(move |(h, _)| h == hook)
            .map(|(_, patch)| patch)
    }

    /// Check whether any patch targets the given hook point.
    #[must_use]
    pub fn has_patch_at(&self, hook: &HookPoint) -> bool {
        self.patches.iter().any(|(h, _)| h == hook)
    }
}

// ---------------------------------------------------------------------------
// HookCache
// ---------------------------------------------------------------------------

/// Tensors captured during a forward pass, plus the output logits.
///
/// Returned by [`HookedBackend::forward`](crate::HookedBackend::forward).
/// Caches are large (every captured layer at every position); they are
/// meant to live for one evaluation pass and be dropped afterwards.
#[derive(Debug)]
pub struct HookCache {
    /// Output tensor from the forward pass (logits).
    output: Tensor,
    /// Captured activations keyed by hook point.
    captures: HashMap<HookPoint, Tensor>,
}

impl HookCache {
    /// Create a new cache with the given output tensor and no captures.
    #[must_use]
    pub fn new(output: Tensor) -> Self {
        Self {
            output,
            captures: HashMap::new(),
        }
    }

    /// The output tensor from the forward pass.
    #[must_use]
    pub const fn output(&self) -> &Tensor {
        &self.output
    }

    /// Consume the cache and return the output tensor.
    #[must_use]
    pub fn into_output(self) -> Tensor {
        self.output
    }

    /// Retrieve a captured tensor by hook point.
    #[must_use]
    pub fn get(&self, hook: &HookPoint) -> Option<&Tensor> {
        self.captures.get(hook)
    }

    /// Retrieve a captured tensor, returning an error if not found.
    ///
    /// A site expected in one model's cache but absent signals a
    /// structural incompatibility between the models being compared, so
    /// callers must surface this error rather than skip the site.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Hook`] if the hook point was not captured.
    pub fn require(&self, hook: &HookPoint) -> Result<&Tensor> {
        self.captures
            .get(hook)
            .ok_or_else(|| CircuitsError::Hook(format!("hook point `{hook}` was not captured")))
    }

    /// Store a captured activation. Called by backend implementations.
    pub fn store(&mut self, hook: HookPoint, tensor: Tensor) {
        self.captures.insert(hook, tensor);
    }

    /// Replace the output tensor (e.g., after computing final logits).
    ///
    /// This allows the forward pass to collect captures into a cache
    /// initialized with a placeholder, then set the real output at the end.
    pub fn set_output(&mut self, output: Tensor) {
        self.output = output;
    }

    /// Number of captured tensors (excludes the output).
    #[must_use]
    pub fn num_captures(&self) -> usize {
        self.captures.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
