//! Model configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating a model configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Embedding width cannot be split evenly across the attention heads
    #[error("n_embd ({n_embd}) must be divisible by n_head ({n_head})")]
    HeadsDoNotDivideEmbedding {
        /// Embedding dimension
        n_embd: usize,
        /// Number of heads
        n_head: usize,
    },
    /// A dimension that must be positive is zero
    #[error("{0} must be greater than zero")]
    ZeroDimension(&'static str),
    /// Dropout probability outside of [0, 1)
    #[error("dropout must be in [0, 1), got {0}")]
    InvalidDropout(f32),
    /// Model and tokenizer disagree on the vocabulary size
    #[error("vocab size mismatch: model has {config}, tokenizer has {tokenizer}")]
    VocabSizeMismatch {
        /// Vocabulary size in the model configuration
        config: usize,
        /// Vocabulary size reported by the tokenizer
        tokenizer: usize,
    },
    /// Unrecognized compute backend name
    #[error("unknown compute backend '{0}' (expected cpu, cuda, metal or auto)")]
    UnknownBackend(String),
}

/// GPT model configuration
///
/// Fixed at construction time; the model never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GPTConfig {
    /// Maximum context length (size of the positional table and causal mask)
    pub sequence_len: usize,
    /// Vocabulary size
    pub vocab_size: usize,
    /// Number of transformer blocks
    pub n_layer: usize,
    /// Number of attention heads per block
    pub n_head: usize,
    /// Embedding dimension
    pub n_embd: usize,
    /// Dropout probability applied in training mode
    pub dropout: f32,
    /// Seed for parameter initialization (None = non-deterministic)
    pub seed: Option<u64>,
}

impl Default for GPTConfig {
    fn default() -> Self {
        Self {
            sequence_len: 256,
            vocab_size: 30000,
            n_layer: 6,
            n_head: 6,
            n_embd: 384,
            dropout: 0.2,
            seed: None,
        }
    }
}

impl GPTConfig {
    /// Create a validated configuration
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sequence_len: usize,
        vocab_size: usize,
        n_layer: usize,
        n_head: usize,
        n_embd: usize,
        dropout: f32,
        seed: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            sequence_len,
            vocab_size,
            n_layer,
            n_head,
            n_embd,
            dropout,
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    /// Default architecture sized for a tokenizer's vocabulary
    pub fn with_vocab_size(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            ..Self::default()
        }
    }

    /// Check every structural invariant of the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("sequence_len", self.sequence_len),
            ("vocab_size", self.vocab_size),
            ("n_layer", self.n_layer),
            ("n_head", self.n_head),
            ("n_embd", self.n_embd),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDimension(name));
            }
        }
        if self.n_embd % self.n_head != 0 {
            return Err(ConfigError::HeadsDoNotDivideEmbedding {
                n_embd: self.n_embd,
                n_head: self.n_head,
            });
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::InvalidDropout(self.dropout));
        }
        Ok(())
    }

    /// Width of each attention head's subspace
    pub fn head_size(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Verify the configuration matches a tokenizer's vocabulary
    pub fn validate_vocab_size(&self, tokenizer_vocab_size: usize) -> Result<(), ConfigError> {
        if self.vocab_size != tokenizer_vocab_size {
            return Err(ConfigError::VocabSizeMismatch {
                config: self.vocab_size,
                tokenizer: tokenizer_vocab_size,
            });
        }
        Ok(())
    }
}
