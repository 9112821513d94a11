//! Training configuration structures
//!
//! This module provides configuration structures for loading training hyperparameters
//! from JSON files. Every field has a default, so a config file only needs to name
//! the values it changes; command-line flags override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tinygpt_model::{ConfigError, GPTConfig};

/// Complete training configuration loaded from file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfigFile {
    /// Model configuration
    pub model: ModelConfig,
    /// Training hyperparameters
    pub training: TrainingHyperparams,
    /// Optimizer configuration
    pub optimizer: OptimizerHyperparams,
}

/// Model architecture configuration
///
/// The vocabulary size normally comes from the tokenizer; when it is set here
/// it must agree with the tokenizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Vocabulary size (None = take it from the tokenizer)
    pub vocab_size: Option<usize>,
    /// Number of transformer layers
    pub n_layer: usize,
    /// Number of attention heads
    pub n_head: usize,
    /// Model embedding dimension
    pub n_embd: usize,
    /// Maximum sequence length
    pub sequence_len: usize,
    /// Dropout probability during training
    pub dropout: f32,
    /// Seed for weight initialization
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let defaults = GPTConfig::default();
        Self {
            vocab_size: None,
            n_layer: defaults.n_layer,
            n_head: defaults.n_head,
            n_embd: defaults.n_embd,
            sequence_len: defaults.sequence_len,
            dropout: defaults.dropout,
            seed: defaults.seed,
        }
    }
}

impl ModelConfig {
    /// Build the validated model configuration for a tokenizer's vocabulary
    pub fn to_gpt_config(&self, tokenizer_vocab_size: usize) -> Result<GPTConfig, ConfigError> {
        let config = GPTConfig::new(
            self.sequence_len,
            self.vocab_size.unwrap_or(tokenizer_vocab_size),
            self.n_layer,
            self.n_head,
            self.n_embd,
            self.dropout,
            self.seed,
        )?;
        config.validate_vocab_size(tokenizer_vocab_size)?;
        Ok(config)
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingHyperparams {
    /// Sequences per batch
    pub batch_size: usize,
    /// Number of optimization steps ("epochs") to run
    pub epochs: usize,
    /// Steps between loss estimates (0 = disabled)
    pub eval_interval: usize,
    /// Batches per split when estimating the loss
    pub eval_iters: usize,
    /// Steps between checkpoint saves (0 = only the final one)
    pub checkpoint_interval: usize,
    /// Steps between progress lines (0 = disabled)
    pub log_interval: usize,
    /// Target vocabulary size when a tokenizer has to be trained
    pub tokenizer_vocab_size: usize,
    /// Seed for batch sampling and generation (None = non-deterministic)
    pub seed: Option<u64>,
}

impl Default for TrainingHyperparams {
    fn default() -> Self {
        Self {
            batch_size: 64,
            epochs: 0,
            eval_interval: 1000,
            eval_iters: 100,
            checkpoint_interval: 1000,
            log_interval: 100,
            tokenizer_vocab_size: tinygpt_tokenizer::DEFAULT_VOCAB_SIZE,
            seed: None,
        }
    }
}

/// Optimizer hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerHyperparams {
    /// Learning rate
    pub learning_rate: f64,
    /// Weight decay
    pub weight_decay: f64,
    /// AdamW beta1
    pub beta1: f64,
    /// AdamW beta2
    pub beta2: f64,
    /// AdamW epsilon
    pub eps: f64,
}

impl Default for OptimizerHyperparams {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 0.01,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl TrainingConfigFile {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON configuration file
    ///
    /// # Returns
    /// Loaded configuration or error if file cannot be read or parsed
    ///
    /// # Example
    /// ```no_run
    /// use tinygpt_pretrain::config::TrainingConfigFile;
    /// use std::path::Path;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = TrainingConfigFile::from_file(Path::new("config.json"))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: TrainingConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }
}
