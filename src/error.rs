// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for candle-circuits.

/// Errors that can occur during benchmark operations.
#[derive(Debug, thiserror::Error)]
pub enum CircuitsError {
    /// Model loading or forward pass error (wraps candle).
    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),

    /// Precondition violation: mismatched model configurations, equal
    /// clean/corrupted datasets, zero denominators, and similar. Surfaced
    /// immediately rather than silently producing a meaningless statistic.
    #[error("validation error: {0}")]
    Validation(String),

    /// Hook capture or lookup error, including intervention sites that are
    /// expected in one model's cache but absent.
    #[error("hook error: {0}")]
    Hook(String),

    /// Circuit graph construction or persistence error.
    #[error("circuit error: {0}")]
    Circuit(String),

    /// Model configuration parsing error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for candle-circuits operations.
pub type Result<T> = std::result::Result<T, CircuitsError>;
