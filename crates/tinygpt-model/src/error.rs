//! Contract violations raised by the forward pass

use thiserror::Error;

/// Input tensors that do not satisfy the model's shape contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    /// Token ids must be `[batch, time]`
    #[error("expected token ids of shape [batch, time], got {0:?}")]
    NotBatchTime(Vec<usize>),
    /// Time dimension longer than the context window
    #[error("sequence length {len} exceeds maximum context {max}")]
    ContextTooLong {
        /// Length that was passed in
        len: usize,
        /// Configured maximum
        max: usize,
    },
    /// Zero-length time dimension
    #[error("context must contain at least one token")]
    EmptyContext,
    /// Targets and inputs disagree
    #[error("targets shape {targets:?} does not match inputs shape {inputs:?}")]
    TargetShapeMismatch {
        /// Input id shape
        inputs: Vec<usize>,
        /// Target id shape
        targets: Vec<usize>,
    },
}
