// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token datasets for paired clean/corrupted evaluation.

use candle_core::{DType, Device, Tensor};

use crate::error::{CircuitsError, Result};

/// A fixed-size dataset of token sequences.
///
/// Holds a rank-2 `u32` tensor of shape `[num_samples, seq_len]`. The
/// evaluation engine consumes two of these in lock-step: a clean dataset
/// and a corrupted dataset of the same length, batched identically.
///
/// # Example
///
/// ```
/// use candle_circuits::TokenDataset;
/// use candle_core::Device;
///
/// let data = TokenDataset::from_rows(
///     &[vec![0, 1, 2, 3], vec![3, 2, 1, 0]],
///     &Device::Cpu,
/// ).unwrap();
/// assert_eq!(data.len(), 2);
/// assert_eq!(data.seq_len(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct TokenDataset {
    /// Token IDs, shape `[num_samples, seq_len]`, dtype `U32`.
    inputs: Tensor,
    /// Number of samples (cached from the tensor shape).
    num_samples: usize,
    /// Sequence length (cached from the tensor shape).
    seq_len: usize,
}

impl TokenDataset {
    /// Create a dataset from a rank-2 `u32` token tensor.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Validation`] if the tensor is not rank-2
    /// or not `U32`.
    pub fn new(inputs: Tensor) -> Result<Self> {
        let (num_samples, seq_len) = inputs.dims2().map_err(|_| {
            CircuitsError::Validation(format!(
                "dataset tensor must be rank-2 [num_samples, seq_len], got shape {:?}",
                inputs.dims()
            ))
        })?;
        if inputs.dtype() != DType::U32 {
            return Err(CircuitsError::Validation(format!(
                "dataset tensor must be U32 token IDs, got {:?}",
                inputs.dtype()
            )));
        }
        Ok(Self {
            inputs,
            num_samples,
            seq_len,
        })
    }

    /// Create a dataset from rows of token IDs.
    ///
    /// All rows must have the same length.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Validation`] if `rows` is empty or ragged,
    /// or [`CircuitsError::Model`] if tensor creation fails.
    pub fn from_rows(rows: &[Vec<u32>], device: &Device) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| CircuitsError::Validation("dataset must not be empty".into()))?;
        let seq_len = first.len();
        if rows.iter().any(|row| row.len() != seq_len) {
            return Err(CircuitsError::Validation(
                "all dataset rows must have the same length".into(),
            ));
        }

        let flat: Vec<u32> = rows.iter().flatten().copied().collect();
        let inputs = Tensor::from_vec(flat, (rows.len(), seq_len), device)?;
        Self::new(inputs)
    }

    /// Number of samples.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.num_samples
    }

    /// Whether the dataset holds no samples.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    /// Sequence length of every sample.
    #[must_use]
    pub const fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// The device the dataset lives on.
    #[must_use]
    pub fn device(&self) -> &Device {
        self.inputs.device()
    }

    /// The full token tensor, shape `[num_samples, seq_len]`.
    #[must_use]
    pub const fn inputs(&self) -> &Tensor {
        &self.inputs
    }

    /// Split the dataset into batches of at most `batch_size` samples,
    /// in dataset order. The final batch may be smaller.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Validation`] if `batch_size` is zero, or
    /// [`CircuitsError::Model`] if slicing fails.
    pub fn batches(&self, batch_size: usize) -> Result<Vec<Tensor>> {
        if batch_size == 0 {
            return Err(CircuitsError::Validation(
                "batch_size must be greater than 0".into(),
            ));
        }

        let mut batches = Vec::new();
        let mut start = 0;
        while start < self.num_samples {
            let len = batch_size.min(self.num_samples - start);
            batches.push(self.inputs.narrow(0, start, len)?);
            start += len;
        }
        Ok(batches)
    }

    /// Exact token-level equality with another dataset.
    ///
    /// Used to reject clean/corrupted dataset pairs that are identical: a
    /// resample ablation with identical inputs is a no-op intervention and
    /// not a meaningful test.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Model`] if tensor extraction fails.
    pub fn content_eq(&self, other: &Self) -> Result<bool> {
        if self.num_samples != other.num_samples || self.seq_len != other.seq_len {
            return Ok(false);
        }
        let lhs: Vec<Vec<u32>> = self.inputs.to_vec2()?;
        let rhs: Vec<Vec<u32>> = other.inputs.to_vec2()?;
        Ok(lhs == rhs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
