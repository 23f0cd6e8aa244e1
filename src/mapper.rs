// SPDX-License-Identifier: MIT OR Apache-2.0

//! Residual-stream mappers between two models' bases.
//!
//! When the hypothesis model's residual stream has been compressed, its
//! activations live in a narrower basis than the base model's. A
//! [`ResidualStreamMapper`] translates between the two so that cached
//! activations from one model can be patched into the other.
//!
//! Mappers are deterministic pure functions of their fixed parameters.
//! Learned implementations (e.g. an autoencoder) are external
//! collaborators; this module ships the two built-ins the benchmark
//! needs: [`LinearMapper`] and [`IdentityMapper`].

use candle_core::Tensor;

use crate::error::{CircuitsError, Result};

// ---------------------------------------------------------------------------
// ResidualStreamMapper trait
// ---------------------------------------------------------------------------

/// Two-directional translation between a base model's residual-stream
/// basis and a compressed hypothesis model's basis.
pub trait ResidualStreamMapper: Send + Sync {
    /// Width of the base model's residual stream.
    fn base_size(&self) -> usize;

    /// Width of the compressed (hypothesis) residual stream.
    fn compressed_size(&self) -> usize;

    /// Translate an activation from the base basis to the compressed basis.
    ///
    /// # Shapes
    /// - `activation`: `[..., base_size]`
    /// - returns: `[..., compressed_size]`
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Model`] on shape mismatch or tensor
    /// operation failure.
    fn compress(&self, activation: &Tensor) -> Result<Tensor>;

    /// Translate an activation from the compressed basis back to the
    /// base basis.
    ///
    /// # Shapes
    /// - `activation`: `[..., compressed_size]`
    /// - returns: `[..., base_size]`
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Model`] on shape mismatch or tensor
    /// operation failure.
    fn decompress(&self, activation: &Tensor) -> Result<Tensor>;
}

// ---------------------------------------------------------------------------
// LinearMapper
// ---------------------------------------------------------------------------

/// Linear projection mapper: a pair of fixed projection matrices.
pub struct LinearMapper {
    /// Down projection, shape `[base_size, compressed_size]`.
    down: Tensor,
    /// Up projection, shape `[compressed_size, base_size]`.
    up: Tensor,
    /// Base residual-stream width.
    base_size: usize,
    /// Compressed residual-stream width.
    compressed_size: usize,
}

impl LinearMapper {
    /// Create a linear mapper from its two projection matrices.
    ///
    /// # Shapes
    /// - `down`: `[base_size, compressed_size]`
    /// - `up`: `[compressed_size, base_size]`
    ///
    /// # Errors
    ///
    /// Returns [`CircuitsError::Validation`] if the matrices are not
    /// rank-2 or their shapes are not transposes of each other.
    pub fn new(down: Tensor, up: Tensor) -> Result<Self> {
        let (base_size, compressed_size) = down.dims2().map_err(|_| {
            CircuitsError::Validation(format!(
                "down projection must be rank-2, got shape {:?}",
                down.dims()
            ))
        })?;
        let (up_in, up_out) = up.dims2().map_err(|_| {
            CircuitsError::Validation(format!(
                "up projection must be rank-2, got shape {:?}",
                up.dims()
            ))
        })?;
        if up_in != compressed_size || up_out != base_size {
            return Err(CircuitsError::Validation(format!(
                "projection shapes do not line up: down is [{base_size}, {compressed_size}], \
                 up is [{up_in}, {up_out}]"
            )));
        }
        Ok(Self {
            down,
            up,
            base_size,
            compressed_size,
        })
    }
}

impl ResidualStreamMapper for LinearMapper {
    fn base_size(&self) -> usize {
        self.base_size
    }

    fn compressed_size(&self) -> usize {
        self.compressed_size
    }

    fn compress(&self, activation: &Tensor) -> Result<Tensor> {
        Ok(activation.broadcast_matmul(&self.down)?)
    }

    fn decompress(&self, activation: &Tensor) -> Result<Tensor> {
        Ok(activation.broadcast_matmul(&self.up)?)
    }
}

// ---------------------------------------------------------------------------
// IdentityMapper
// ---------------------------------------------------------------------------

/// Identity mapper for models that share a residual-stream width.
///
/// Useful as a baseline and for exercising the mapped evaluation path
/// without an actual compression.
pub struct IdentityMapper {
    /// Shared residual-stream width.
    size: usize,
}

impl IdentityMapper {
    /// Create an identity mapper for the given residual-stream width.
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self { size }
    }
}

impl ResidualStreamMapper for IdentityMapper {
    fn base_size(&self) -> usize {
        self.size
    }

    fn compressed_size(&self) -> usize {
        self.size
    }

    fn compress(&self, activation: &Tensor) -> Result<Tensor> {
        Ok(activation.clone())
    }

    fn decompress(&self, activation: &Tensor) -> Result<Tensor> {
        Ok(activation.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn linear_mapper_shapes() {
        let device = Device::Cpu;
        let down = Tensor::zeros((4, 2), DType::F32, &device).unwrap();
        let up = Tensor::zeros((2, 4), DType::F32, &device).unwrap();
        let mapper = LinearMapper::new(down, up).unwrap();

        assert_eq!(mapper.base_size(), 4);
        assert_eq!(mapper.compressed_size(), 2);

        let act = Tensor::zeros((1, 3, 4), DType::F32, &device).unwrap();
        let compressed = mapper.compress(&act).unwrap();
        assert_eq!(compressed.dims(), &[1, 3, 2]);

        let restored = mapper.decompress(&compressed).unwrap();
        assert_eq!(restored.dims(), &[1, 3, 4]);
    }

    #[test]
    fn linear_mapper_rejects_mismatched_projections() {
        let device = Device::Cpu;
        let down = Tensor::zeros((4, 2), DType::F32, &device).unwrap();
        let up = Tensor::zeros((3, 4), DType::F32, &device).unwrap();
        assert!(LinearMapper::new(down, up).is_err());
    }

    #[test]
    fn identity_mapper_roundtrip() {
        let device = Device::Cpu;
        let mapper = IdentityMapper::new(4);
        let act = Tensor::from_vec(vec![1.0_f32, 2.0, 3.0, 4.0], (1, 4), &device).unwrap();

        let compressed = mapper.compress(&act).unwrap();
        let restored = mapper.decompress(&compressed).unwrap();

        let original: Vec<Vec<f32>> = act.to_vec2().unwrap();
        let roundtrip: Vec<Vec<f32>> = restored.to_vec2().unwrap();
        assert_eq!(original, roundtrip);
        assert_eq!(mapper.base_size(), mapper.compressed_size());
    }
}
