// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resample-ablation loss between a base and a hypothesis model.
//!
//! For every intervention site, both models are patched with the value
//! that site took on a corrupted input, then forward-run on the clean
//! input. If the hypothesis model has internalised the base model's
//! causal structure, the two patched forward passes agree; the mean
//! squared error between their logits is a per-component
//! fault-localisation signal. Sites are ablated one at a time, never
//! jointly.
//!
//! The loss is normalised into a variance-explained fraction against the
//! variance of the base model's un-patched clean-input logits.

use candle_core::{DType, Tensor};

use crate::backend::{HookedBackend, ensure_comparable};
use crate::data::TokenDataset;
use crate::error::{CircuitsError, Result};
use crate::eval::data::{InterventionData, build_intervention_data};
use crate::hooks::{HookPoint, HookSpec, Patch};
use crate::mapper::ResidualStreamMapper;
use crate::sites::{SiteKind, intervention_sites};

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Aggregated result of a resample-ablation evaluation.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ResampleAblationOutput {
    /// Mean squared error between the two models' logits, averaged within
    /// each site across bundles and then across sites.
    pub loss: f64,
    /// `1 - loss / baseline_variance`, averaged in the same order.
    pub variance_explained: f64,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Build intervention data from the datasets, then evaluate.
///
/// Convenience wrapper around [`build_intervention_data`] followed by
/// [`resample_ablation_loss`]. The bundles are dropped before returning,
/// releasing the caches.
///
/// # Errors
///
/// Propagates validation and forward-pass errors from both stages.
#[allow(clippy::too_many_arguments)] // mirrors the evaluation call surface: data, models, mapper, knobs
pub fn resample_ablation_loss_from_inputs(
    clean: &TokenDataset,
    corrupted: &TokenDataset,
    base: &dyn HookedBackend,
    hypothesis: &dyn HookedBackend,
    mapper: Option<&dyn ResidualStreamMapper>,
    site_filters: &[SiteKind],
    batch_size: usize,
    max_interventions: usize,
) -> Result<ResampleAblationOutput> {
    let data = build_intervention_data(clean, corrupted, base, hypothesis, mapper, batch_size)?;
    resample_ablation_loss(
        &data,
        base,
        hypothesis,
        mapper,
        site_filters,
        max_interventions,
    )
}

/// Evaluate the resample-ablation loss over pre-built intervention data.
///
/// # Algorithm
///
/// 1. Baseline: the unbiased variance of the base model's clean-input
///    logits, averaged across bundles.
/// 2. Enumerate intervention sites (filtered, capped at
///    `max_interventions`).
/// 3. Per site and bundle, patch each model at that single site with its
///    corrupted-cache value (the hypothesis value goes through the mapper
///    when one is configured), forward-run both on the clean inputs, and
///    record the MSE between their logits plus the derived
///    variance-explained value.
/// 4. Average within each site across bundles, then across sites.
///
/// # Errors
///
/// Returns [`CircuitsError::Validation`] on mismatched model
/// configurations, mismatched hidden widths without a mapper, a mapper
/// whose widths do not match the models, empty bundles, zero
/// `max_interventions`, filters yielding no sites, or a degenerate
/// (near-zero) baseline variance. Returns [`CircuitsError::Hook`] if a
/// site is absent from a cache: a structural incompatibility, never
/// skipped. Propagates forward-pass errors.
pub fn resample_ablation_loss(
    data: &[InterventionData],
    base: &dyn HookedBackend,
    hypothesis: &dyn HookedBackend,
    mapper: Option<&dyn ResidualStreamMapper>,
    site_filters: &[SiteKind],
    max_interventions: usize,
) -> Result<ResampleAblationOutput> {
    ensure_comparable(base, hypothesis)?;
    validate_widths(base, hypothesis, mapper)?;
    if data.is_empty() {
        return Err(CircuitsError::Validation(
            "no intervention data bundles supplied".into(),
        ));
    }

    let sites = intervention_sites(site_filters, base.num_layers(), max_interventions)?;
    if sites.is_empty() {
        return Err(CircuitsError::Validation(
            "site filters produced no intervention sites".into(),
        ));
    }

    // Baseline variance of the un-patched base model on the clean inputs,
    // averaged across bundles.
    let mut bundle_variances = Vec::with_capacity(data.len());
    for bundle in data {
        let logits = base.forward_logits(&bundle.clean_inputs)?;
        bundle_variances.push(unbiased_variance(&logits)?);
    }
    let baseline_variance = mean(&bundle_variances);
    if baseline_variance <= 1e-12 {
        return Err(CircuitsError::Validation(format!(
            "baseline logit variance {baseline_variance} is degenerate; \
             variance explained is undefined"
        )));
    }

    // Per-site-then-pooled averaging. The order matters when bundle sizes
    // vary: pooling first is a materially different statistic.
    let mut site_losses = Vec::with_capacity(sites.len());
    let mut site_variance_explained = Vec::with_capacity(sites.len());
    for site in &sites {
        let mut bundle_losses = Vec::with_capacity(data.len());
        let mut bundle_ve = Vec::with_capacity(data.len());
        for bundle in data {
            let loss = single_site_loss(base, hypothesis, mapper, *site, bundle)?;
            bundle_losses.push(loss);
            bundle_ve.push(1.0 - loss / baseline_variance);
        }
        site_losses.push(mean(&bundle_losses));
        site_variance_explained.push(mean(&bundle_ve));
    }

    Ok(ResampleAblationOutput {
        loss: mean(&site_losses),
        variance_explained: mean(&site_variance_explained),
    })
}

// ---------------------------------------------------------------------------
// Single-site intervention
// ---------------------------------------------------------------------------

/// Patch both models at one site from the bundle's corrupted caches, run
/// them on the clean inputs, and return the MSE between their logits.
fn single_site_loss(
    base: &dyn HookedBackend,
    hypothesis: &dyn HookedBackend,
    mapper: Option<&dyn ResidualStreamMapper>,
    site: HookPoint,
    bundle: &InterventionData,
) -> Result<f64> {
    let base_value = bundle.base_corrupted.require(&site)?.clone();
    let hypothesis_value = hypothesis_patch_value(mapper, site, bundle)?;

    let mut base_spec = HookSpec::new();
    base_spec.patch(site, Patch::Replace(base_value));
    let mut hypothesis_spec = HookSpec::new();
    hypothesis_spec.patch(site, Patch::Replace(hypothesis_value));

    let base_logits = base
        .forward(&bundle.clean_inputs, &base_spec)?
        .into_output();
    let hypothesis_logits = hypothesis
        .forward(&bundle.clean_inputs, &hypothesis_spec)?
        .into_output();

    // PROMOTE: compare logits in f32 regardless of model dtype
    let base_logits = base_logits.to_dtype(DType::F32)?;
    let hypothesis_logits = hypothesis_logits.to_dtype(DType::F32)?;

    let mse = candle_nn::loss::mse(&base_logits, &hypothesis_logits)?;
    Ok(f64::from(mse.to_scalar::<f32>()?))
}

/// The value patched into the hypothesis model at `site`.
///
/// Without a mapper this is the hypothesis model's own corrupted-cache
/// value. With a mapper the base model's corrupted value is translated
/// into the hypothesis basis by anchored mapping: the corrupted-minus-
/// clean offset is compressed and re-anchored at the hypothesis model's
/// clean activation. With an identity mapper and identical models this
/// degenerates to the unmapped value.
fn hypothesis_patch_value(
    mapper: Option<&dyn ResidualStreamMapper>,
    site: HookPoint,
    bundle: &InterventionData,
) -> Result<Tensor> {
    let Some(mapper) = mapper else {
        return Ok(bundle.hypothesis_corrupted.require(&site)?.clone());
    };

    let base_corrupted = bundle.base_corrupted.require(&site)?;
    let base_clean = bundle
        .base_clean
        .as_ref()
        .ok_or_else(|| missing_clean_cache("base"))?
        .require(&site)?;
    let hypothesis_clean = bundle
        .hypothesis_clean
        .as_ref()
        .ok_or_else(|| missing_clean_cache("hypothesis"))?
        .require(&site)?;

    let offset = (base_corrupted - base_clean)?;
    let mapped = mapper.compress(&offset)?;
    Ok((hypothesis_clean + &mapped)?)
}

/// Error for bundles built without a mapper but evaluated with one.
fn missing_clean_cache(which: &str) -> CircuitsError {
    CircuitsError::Hook(format!(
        "{which} clean-input cache missing; the intervention data was built \
         without a mapper but the evaluation uses one"
    ))
}

// ---------------------------------------------------------------------------
// Width preconditions
// ---------------------------------------------------------------------------

/// Hidden widths must match without a mapper; with a mapper, the mapper's
/// two widths must match the two models.
fn validate_widths(
    base: &dyn HookedBackend,
    hypothesis: &dyn HookedBackend,
    mapper: Option<&dyn ResidualStreamMapper>,
) -> Result<()> {
    match mapper {
        None => {
            if base.hidden_size() != hypothesis.hidden_size() {
                return Err(CircuitsError::Validation(format!(
                    "hidden sizes differ ({} vs {}) and no residual-stream \
                     mapper was supplied",
                    base.hidden_size(),
                    hypothesis.hidden_size()
                )));
            }
        }
        Some(mapper) => {
            if mapper.base_size() != base.hidden_size()
                || mapper.compressed_size() != hypothesis.hidden_size()
            {
                return Err(CircuitsError::Validation(format!(
                    "mapper widths [{} -> {}] do not match model hidden sizes \
                     [{} -> {}]",
                    mapper.base_size(),
                    mapper.compressed_size(),
                    base.hidden_size(),
                    hypothesis.hidden_size()
                )));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Numeric helpers
// ---------------------------------------------------------------------------

/// Unbiased variance of every element of a tensor.
fn unbiased_variance(tensor: &Tensor) -> Result<f64> {
    let n = tensor.elem_count();
    if n < 2 {
        return Err(CircuitsError::Validation(
            "variance requires at least two logit elements".into(),
        ));
    }

    // PROMOTE: accumulate in f32 regardless of model dtype
    let values = tensor.to_dtype(DType::F32)?;
    let mean = values.mean_all()?;
    let centered = values.broadcast_sub(&mean)?;
    let sum_squares = f64::from(centered.sqr()?.sum_all()?.to_scalar::<f32>()?);

    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    Ok(sum_squares / (n - 1) as f64)
}

/// Arithmetic mean of a nonempty slice.
fn mean(values: &[f64]) -> f64 {
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    let count = values.len().max(1) as f64;
    values.iter().sum::<f64>() / count
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, feature = "transformer"))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mapper::IdentityMapper;
    use crate::testing::{clean_dataset, corrupted_dataset, tiny_model};
    use candle_core::Device;

    #[test]
    fn identical_model_gives_zero_loss_and_full_variance_explained() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let clean = clean_dataset(&device);
        let corrupted = corrupted_dataset(&device);

        let output = resample_ablation_loss_from_inputs(
            &clean,
            &corrupted,
            &model,
            &model,
            None,
            &SiteKind::ALL,
            2,
            10,
        )
        .unwrap();

        assert!(output.loss.abs() < 1e-10, "loss {} not ~0", output.loss);
        assert!(
            (output.variance_explained - 1.0).abs() < 1e-10,
            "variance explained {} not ~1",
            output.variance_explained
        );
    }

    #[test]
    fn identity_mapper_preserves_the_noop_property() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let mapper = IdentityMapper::new(model.hidden_size());
        let clean = clean_dataset(&device);
        let corrupted = corrupted_dataset(&device);

        let output = resample_ablation_loss_from_inputs(
            &clean,
            &corrupted,
            &model,
            &model,
            Some(&mapper),
            &SiteKind::ALL,
            4,
            10,
        )
        .unwrap();

        assert!(output.loss.abs() < 1e-10);
        assert!((output.variance_explained - 1.0).abs() < 1e-10);
    }

    #[test]
    fn different_models_give_positive_loss() {
        let device = Device::Cpu;
        let base = tiny_model(&device, 7);
        let hypothesis = tiny_model(&device, 99);
        let clean = clean_dataset(&device);
        let corrupted = corrupted_dataset(&device);

        let output = resample_ablation_loss_from_inputs(
            &clean,
            &corrupted,
            &base,
            &hypothesis,
            None,
            &[SiteKind::MlpOut],
            4,
            10,
        )
        .unwrap();

        assert!(output.loss > 0.0);
        assert!(output.variance_explained < 1.0);
    }

    #[test]
    fn zero_max_interventions_rejected() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let clean = clean_dataset(&device);
        let corrupted = corrupted_dataset(&device);
        let data =
            build_intervention_data(&clean, &corrupted, &model, &model, None, 4).unwrap();

        let result = resample_ablation_loss(&data, &model, &model, None, &SiteKind::ALL, 0);
        assert!(matches!(result, Err(CircuitsError::Validation(_))));
    }

    #[test]
    fn empty_site_filters_rejected() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let clean = clean_dataset(&device);
        let corrupted = corrupted_dataset(&device);
        let data =
            build_intervention_data(&clean, &corrupted, &model, &model, None, 4).unwrap();

        let result = resample_ablation_loss(&data, &model, &model, None, &[], 10);
        assert!(matches!(result, Err(CircuitsError::Validation(_))));
    }

    #[test]
    fn empty_bundles_rejected() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let result = resample_ablation_loss(&[], &model, &model, None, &SiteKind::ALL, 10);
        assert!(matches!(result, Err(CircuitsError::Validation(_))));
    }

    #[test]
    fn mapper_width_mismatch_rejected() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let clean = clean_dataset(&device);
        let corrupted = corrupted_dataset(&device);
        let mapper = IdentityMapper::new(model.hidden_size() + 1);
        let data =
            build_intervention_data(&clean, &corrupted, &model, &model, Some(&mapper), 4)
                .unwrap();

        let result =
            resample_ablation_loss(&data, &model, &model, Some(&mapper), &SiteKind::ALL, 10);
        assert!(matches!(result, Err(CircuitsError::Validation(_))));
    }

    #[test]
    fn mapper_evaluation_requires_clean_caches() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let clean = clean_dataset(&device);
        let corrupted = corrupted_dataset(&device);
        let mapper = IdentityMapper::new(model.hidden_size());

        // Bundles built WITHOUT a mapper lack the clean caches.
        let data =
            build_intervention_data(&clean, &corrupted, &model, &model, None, 4).unwrap();
        let result =
            resample_ablation_loss(&data, &model, &model, Some(&mapper), &SiteKind::ALL, 10);
        assert!(matches!(result, Err(CircuitsError::Hook(_))));
    }

    #[test]
    fn max_interventions_caps_the_site_sequence() {
        let device = Device::Cpu;
        let model = tiny_model(&device, 7);
        let clean = clean_dataset(&device);
        let corrupted = corrupted_dataset(&device);
        let data =
            build_intervention_data(&clean, &corrupted, &model, &model, None, 4).unwrap();

        // Capped and uncapped runs agree on the loss for an identical
        // model pair (both are exactly zero), and both succeed.
        let capped =
            resample_ablation_loss(&data, &model, &model, None, &SiteKind::ALL, 1).unwrap();
        let full =
            resample_ablation_loss(&data, &model, &model, None, &SiteKind::ALL, 100).unwrap();
        assert!(capped.loss.abs() < 1e-10);
        assert!(full.loss.abs() < 1e-10);
    }
}
