// SPDX-License-Identifier: MIT OR Apache-2.0

//! Intervention-data bundles.
//!
//! Resample ablation patches activations cached from a corrupted input
//! into a clean-input forward pass. Running the models once per
//! intervention would recompute the same caches over and over; instead
//! the builder runs each model once per batch with full capture and
//! packages the results into reusable [`InterventionData`] bundles.
//!
//! Bundles hold every captured layer at every position and are therefore
//! large. They are built fresh per evaluation call and must be dropped
//! after the aggregation that consumes them; [`reclaim_device_memory`]
//! is exposed for callers running many evaluations back to back.

use candle_core::{Device, Tensor};

use crate::backend::HookedBackend;
use crate::data::TokenDataset;
use crate::error::{CircuitsError, Result};
use crate::hooks::{HookCache, HookSpec};
use crate::mapper::ResidualStreamMapper;

// ---------------------------------------------------------------------------
// InterventionData
// ---------------------------------------------------------------------------

/// Cached forward-pass data for one batch of paired clean/corrupted
/// inputs.
///
/// Owns the clean input batch and up to four activation caches: both
/// models on the corrupted inputs, and, when a mapper is configured,
/// both models on the clean inputs (anchored mapping needs the clean
/// activations as its reference point).
#[derive(Debug)]
pub struct InterventionData {
    /// Clean input batch, shape `[batch, seq]`.
    pub clean_inputs: Tensor,
    /// Base model activations on the corrupted inputs.
    pub base_corrupted: HookCache,
    /// Hypothesis model activations on the corrupted inputs.
    pub hypothesis_corrupted: HookCache,
    /// Base model activations on the clean inputs (mapper runs only).
    pub base_clean: Option<HookCache>,
    /// Hypothesis model activations on the clean inputs (mapper runs only).
    pub hypothesis_clean: Option<HookCache>,
}

// ---------------------------------------------------------------------------
// Device memory reclamation
// ---------------------------------------------------------------------------

/// Synchronise the device so buffers freed by dropped caches return to
/// the allocator before the next large allocation burst.
///
/// Exposed at the builder boundary as an explicit resource-scope
/// operation: callers running many evaluation configurations back to back
/// should invoke it between runs. [`build_intervention_data`] calls it
/// before building.
///
/// # Errors
///
/// Returns [`CircuitsError::Model`] if device synchronisation fails.
pub fn reclaim_device_memory(device: &Device) -> Result<()> {
    device.synchronize()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Build intervention-data bundles for paired clean/corrupted datasets.
///
/// Iterates both datasets in lock-step, `batch_size` samples at a time,
/// and runs both models on each corrupted batch with full capture. When
/// `mapper` is present, both models additionally run on each clean batch
/// with full capture. Bundles are returned in dataset order.
///
/// # Errors
///
/// Returns [`CircuitsError::Validation`] if the datasets differ in
/// length, are empty, are token-for-token identical (a no-op intervention
/// is not a meaningful test), exceed either model's context length, or if
/// `batch_size` is zero. Propagates forward-pass errors from the models.
pub fn build_intervention_data(
    clean: &TokenDataset,
    corrupted: &TokenDataset,
    base: &dyn HookedBackend,
    hypothesis: &dyn HookedBackend,
    mapper: Option<&dyn ResidualStreamMapper>,
    batch_size: usize,
) -> Result<Vec<InterventionData>> {
    if clean.len() != corrupted.len() {
        return Err(CircuitsError::Validation(format!(
            "clean and corrupted datasets must have the same length, got {} and {}",
            clean.len(),
            corrupted.len()
        )));
    }
    if clean.is_empty() {
        return Err(CircuitsError::Validation("datasets must not be empty".into()));
    }
    if clean.content_eq(corrupted)? {
        return Err(CircuitsError::Validation(
            "clean and corrupted datasets are identical; resample ablation \
             with identical inputs is a no-op intervention"
                .into(),
        ));
    }
    let max_seq = clean.seq_len().max(corrupted.seq_len());
    let min_ctx = base.context_length().min(hypothesis.context_length());
    if max_seq > min_ctx {
        return Err(CircuitsError::Validation(format!(
            "sequence length {max_seq} exceeds model context length {min_ctx}"
        )));
    }

    // Caches are large; give back freed buffers before allocating new ones.
    reclaim_device_memory(clean.device())?;

    let base_spec = HookSpec::capture_all(base.num_layers());
    let hypothesis_spec = HookSpec::capture_all(hypothesis.num_layers());

    let clean_batches = clean.batches(batch_size)?;
    let corrupted_batches = corrupted.batches(batch_size)?;

    let mut data = Vec::with_capacity(clean_batches.len());
    for (clean_batch, corrupted_batch) in clean_batches.into_iter().zip(corrupted_batches) {
        let base_corrupted = base.forward(&corrupted_batch, &base_spec)?;
        let hypothesis_corrupted = hypothesis.forward(&corrupted_batch, &hypothesis_spec)?;

        let (base_clean, hypothesis_clean) = if mapper.is_some() {
            (
                Some(base.forward(&clean_batch, &base_spec)?),
                Some(hypothesis.forward(&clean_batch, &hypothesis_spec)?),
            )
        } else {
            (None, None)
        };

        data.push(InterventionData {
            clean_inputs: clean_batch,
            base_corrupted,
            hypothesis_corrupted,
            base_clean,
            hypothesis_clean,
        });
    }

    Ok(data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, feature = "transformer"))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hooks::HookPoint;
    use crate::mapper::IdentityMapper;
    use crate::testing::{clean_dataset, corrupted_dataset, tiny_model};
    use candle_core::Device;

    #[test]
    fn builds_one_bundle_per_batch() {
        let device = Device::Cpu;
        let base = tiny_model(&device, 7);
        let hypothesis = tiny_model(&device, 21);
        let clean = clean_dataset(&device);
        let corrupted = corrupted_dataset(&device);

        let data =
            build_intervention_data(&clean, &corrupted, &base, &hypothesis, None, 3).unwrap();
        assert_eq!(data.len(), 2); // 4 samples, batch size 3 -> batches of 3 and 1

        let first = data.first().unwrap();
        assert_eq!(first.clean_inputs.dims(), &[3, 4]);
        assert!(first.base_corrupted.require(&HookPoint::MlpOut(0)).is_ok());
        assert!(
            first
                .hypothesis_corrupted
                .require(&HookPoint::Embed)
                .is_ok()
        );
        assert!(first.base_clean.is_none());
        assert!(first.hypothesis_clean.is_none());
    }

    #[test]
    fn mapper_adds_clean_caches() {
        let device = Device::Cpu;
        let base = tiny_model(&device, 7);
        let hypothesis = tiny_model(&device, 21);
        let mapper = IdentityMapper::new(base.hidden_size());
        let clean = clean_dataset(&device);
        let corrupted = corrupted_dataset(&device);

        let data =
            build_intervention_data(&clean, &corrupted, &base, &hypothesis, Some(&mapper), 4)
                .unwrap();
        let bundle = data.first().unwrap();
        assert!(bundle.base_clean.is_some());
        assert!(bundle.hypothesis_clean.is_some());
        assert!(
            bundle
                .base_clean
                .as_ref()
                .unwrap()
                .require(&HookPoint::AttnOut(0))
                .is_ok()
        );
    }

    #[test]
    fn identical_datasets_rejected() {
        let device = Device::Cpu;
        let base = tiny_model(&device, 7);
        let clean = clean_dataset(&device);

        let result = build_intervention_data(&clean, &clean.clone(), &base, &base, None, 2);
        assert!(matches!(result, Err(CircuitsError::Validation(_))));
    }

    #[test]
    fn length_mismatch_rejected() {
        let device = Device::Cpu;
        let base = tiny_model(&device, 7);
        let clean = clean_dataset(&device);
        let shorter = TokenDataset::from_rows(
            &crate::testing::corrupted_rows().get(..2).unwrap().to_vec(),
            &device,
        )
        .unwrap();

        let result = build_intervention_data(&clean, &shorter, &base, &base, None, 2);
        assert!(matches!(result, Err(CircuitsError::Validation(_))));
    }

    #[test]
    fn over_long_sequences_rejected() {
        let device = Device::Cpu;
        let base = tiny_model(&device, 7);
        let clean = TokenDataset::from_rows(&[vec![0, 1, 2, 3, 4]], &device).unwrap();
        let corrupted = TokenDataset::from_rows(&[vec![4, 3, 2, 1, 0]], &device).unwrap();

        let result = build_intervention_data(&clean, &corrupted, &base, &base, None, 1);
        assert!(matches!(result, Err(CircuitsError::Validation(_))));
    }

    #[test]
    fn reclaim_is_a_safe_noop_on_cpu() {
        assert!(reclaim_device_memory(&Device::Cpu).is_ok());
    }
}
