//! Checkpoint save/load functionality
//!
//! A checkpoint is one safetensors file holding the model parameters
//! (`model.<param>`), the optimizer moments (`optimizer.m.<param>`,
//! `optimizer.v.<param>`) and step counter (`optimizer.step`), and the
//! training metadata (`meta.*`), including the position of the model's
//! dropout mask stream. The file is written to a temporary sibling
//! and renamed into place, so an interrupted save never leaves a partial
//! checkpoint behind.

use crate::optimizer::{AdamW, STEP_KEY};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tinygpt_model::{DropoutState, GPTConfig, GPT};

/// Checkpoint format version for compatibility checking
pub const CHECKPOINT_VERSION: i64 = 1;

const MODEL_PREFIX: &str = "model.";
const OPTIMIZER_PREFIX: &str = "optimizer.";
const META_EPOCH: &str = "meta.epoch";
const META_LOSS: &str = "meta.loss";
const META_VERSION: &str = "meta.version";
const META_CONFIG: &str = "meta.config";
const META_DROPOUT_SEED: &str = "meta.dropout_seed";
const META_DROPOUT_DRAWS: &str = "meta.dropout_draws";

/// Errors specific to checkpoint files
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The requested checkpoint does not exist
    #[error("checkpoint file does not exist: {0}")]
    NotFound(PathBuf),
    /// A required tensor is absent from the file
    #[error("checkpoint is missing entry '{0}'")]
    MissingEntry(String),
    /// A tensor's shape disagrees with the model
    #[error("checkpoint entry '{name}' has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Entry name
        name: String,
        /// Shape in the model
        expected: Vec<usize>,
        /// Shape in the file
        found: Vec<usize>,
    },
    /// Written by an incompatible format version
    #[error("checkpoint version {found} is not supported (expected {expected})")]
    UnsupportedVersion {
        /// Version in the file
        found: i64,
        /// Version this build writes
        expected: i64,
    },
    /// Written for a different architecture
    #[error("checkpoint was written for a different model: {0}")]
    ConfigMismatch(String),
}

/// Training information stored alongside the weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointMetadata {
    /// Epoch at which the checkpoint was taken
    pub epoch: usize,
    /// Training loss of that epoch
    pub loss: f32,
}

/// Save model, optimizer and metadata to `path` atomically
///
/// # Errors
/// Returns an error if the directory cannot be created or the file cannot
/// be written; an existing checkpoint at `path` is left intact in that case.
pub fn save_checkpoint<P: AsRef<Path>>(
    path: P,
    model: &GPT,
    optimizer: &AdamW,
    metadata: &CheckpointMetadata,
) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create checkpoint directory: {}", parent.display())
            })?;
            parent.to_path_buf()
        }
        None => PathBuf::from("."),
    };

    let device = model.device();
    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    for (name, tensor) in model.params().state_dict() {
        tensors.insert(format!("{MODEL_PREFIX}{name}"), tensor);
    }
    for (name, tensor) in optimizer.state()? {
        tensors.insert(format!("{OPTIMIZER_PREFIX}{name}"), tensor);
    }
    tensors.insert(META_EPOCH.to_string(), Tensor::new(metadata.epoch as i64, device)?);
    tensors.insert(META_LOSS.to_string(), Tensor::new(metadata.loss, device)?);
    tensors.insert(META_VERSION.to_string(), Tensor::new(CHECKPOINT_VERSION, device)?);
    let dropout = model.dropout_state();
    // Seed stored by bit pattern
    tensors.insert(META_DROPOUT_SEED.to_string(), Tensor::new(dropout.seed as i64, device)?);
    let draws = i64::try_from(dropout.draws).context("Dropout draw counter overflow")?;
    tensors.insert(META_DROPOUT_DRAWS.to_string(), Tensor::new(draws, device)?);
    let config = serde_json::to_vec(model.config()).context("Failed to serialize model config")?;
    tensors.insert(META_CONFIG.to_string(), Tensor::new(config.as_slice(), device)?);

    let tmp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    candle_core::safetensors::save(&tensors, tmp.path())
        .with_context(|| format!("Failed to write checkpoint to {}", tmp.path().display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to move checkpoint into place: {}", path.display()))?;
    Ok(())
}

/// Load a checkpoint into an existing model and optimizer
///
/// Every entry is validated against the model before any parameter or
/// moment is overwritten.
///
/// # Errors
/// [`CheckpointError::NotFound`] if `path` does not exist; other
/// [`CheckpointError`] variants for incompatible files.
pub fn load_checkpoint<P: AsRef<Path>>(
    path: P,
    model: &GPT,
    optimizer: &mut AdamW,
) -> Result<CheckpointMetadata> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(CheckpointError::NotFound(path.to_path_buf()).into());
    }
    let tensors = candle_core::safetensors::load(path, model.device())
        .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;

    let version = scalar_i64(&tensors, META_VERSION)?;
    if version != CHECKPOINT_VERSION {
        return Err(CheckpointError::UnsupportedVersion {
            found: version,
            expected: CHECKPOINT_VERSION,
        }
        .into());
    }
    check_config(&tensors, model.config())?;

    let mut model_state = HashMap::new();
    let mut optimizer_state = HashMap::new();
    for (name, var) in model.params().named_vars() {
        let expected = var.dims();
        let weight = entry(&tensors, &format!("{MODEL_PREFIX}{name}"), Some(expected))?;
        let m = entry(&tensors, &format!("{OPTIMIZER_PREFIX}m.{name}"), Some(expected))?;
        let v = entry(&tensors, &format!("{OPTIMIZER_PREFIX}v.{name}"), Some(expected))?;
        optimizer_state.insert(format!("m.{name}"), m.clone());
        optimizer_state.insert(format!("v.{name}"), v.clone());
        model_state.insert(name, weight.clone());
    }
    let step_key = format!("{OPTIMIZER_PREFIX}{STEP_KEY}");
    let step = scalar_i64(&tensors, &step_key)?;
    if step < 0 {
        anyhow::bail!("Checkpoint optimizer step is negative: {step}");
    }
    optimizer_state.insert(STEP_KEY.to_string(), Tensor::new(step, &Device::Cpu)?);

    let epoch = scalar_i64(&tensors, META_EPOCH)?;
    let epoch = usize::try_from(epoch).context("Checkpoint epoch is negative")?;
    let dropout = DropoutState {
        seed: scalar_i64(&tensors, META_DROPOUT_SEED)? as u64,
        draws: u64::try_from(scalar_i64(&tensors, META_DROPOUT_DRAWS)?)
            .context("Checkpoint dropout draw counter is negative")?,
    };
    let loss = entry(&tensors, META_LOSS, None)?
        .to_dtype(DType::F32)?
        .to_scalar::<f32>()
        .context("Checkpoint loss is not a scalar")?;

    model.params().load_state_dict(&model_state)?;
    optimizer.load_state(&optimizer_state)?;
    model.set_dropout_state(dropout);
    Ok(CheckpointMetadata { epoch, loss })
}

fn entry<'a>(
    tensors: &'a HashMap<String, Tensor>,
    name: &str,
    shape: Option<&[usize]>,
) -> Result<&'a Tensor> {
    let tensor = tensors
        .get(name)
        .ok_or_else(|| CheckpointError::MissingEntry(name.to_string()))?;
    if let Some(expected) = shape {
        if tensor.dims() != expected {
            return Err(CheckpointError::ShapeMismatch {
                name: name.to_string(),
                expected: expected.to_vec(),
                found: tensor.dims().to_vec(),
            }
            .into());
        }
    }
    Ok(tensor)
}

fn scalar_i64(tensors: &HashMap<String, Tensor>, name: &str) -> Result<i64> {
    entry(tensors, name, None)?
        .to_scalar::<i64>()
        .with_context(|| format!("Checkpoint entry '{name}' is not an i64 scalar"))
}

fn check_config(tensors: &HashMap<String, Tensor>, config: &GPTConfig) -> Result<()> {
    let bytes = entry(tensors, META_CONFIG, None)?
        .to_device(&Device::Cpu)?
        .to_vec1::<u8>()?;
    let saved: GPTConfig =
        serde_json::from_slice(&bytes).context("Failed to parse checkpoint model config")?;
    let same_architecture = saved.sequence_len == config.sequence_len
        && saved.vocab_size == config.vocab_size
        && saved.n_layer == config.n_layer
        && saved.n_head == config.n_head
        && saved.n_embd == config.n_embd;
    if !same_architecture {
        return Err(CheckpointError::ConfigMismatch(format!(
            "saved sequence_len={} vocab_size={} n_layer={} n_head={} n_embd={}, \
             current sequence_len={} vocab_size={} n_layer={} n_head={} n_embd={}",
            saved.sequence_len,
            saved.vocab_size,
            saved.n_layer,
            saved.n_head,
            saved.n_embd,
            config.sequence_len,
            config.vocab_size,
            config.n_layer,
            config.n_head,
            config.n_embd,
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerHyperparams;
    use crate::optimizer::setup_optimizers;
    use tempfile::TempDir;

    fn tiny(seed: u64) -> GPT {
        let config = GPTConfig {
            sequence_len: 4,
            vocab_size: 7,
            n_layer: 1,
            n_head: 2,
            n_embd: 4,
            dropout: 0.0,
            seed: Some(seed),
        };
        GPT::new(config, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_missing_checkpoint_is_not_found() {
        let model = tiny(0);
        let mut opt = setup_optimizers(&model, OptimizerHyperparams::default()).unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.safetensors");
        let err = load_checkpoint(path, &model, &mut opt).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::NotFound(_))
        ));
    }

    #[test]
    fn test_metadata_roundtrip() {
        let model = tiny(0);
        let mut opt = setup_optimizers(&model, OptimizerHyperparams::default()).unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ckpt.safetensors");

        let metadata = CheckpointMetadata { epoch: 12, loss: 1.25 };
        save_checkpoint(&path, &model, &opt, &metadata).unwrap();
        assert_eq!(load_checkpoint(&path, &model, &mut opt).unwrap(), metadata);
    }

    #[test]
    fn test_dropout_position_roundtrip() {
        let model = tiny(0);
        let opt = setup_optimizers(&model, OptimizerHyperparams::default()).unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ckpt.safetensors");

        let state = DropoutState {
            seed: u64::MAX - 5,
            draws: 41,
        };
        model.set_dropout_state(state);
        let metadata = CheckpointMetadata { epoch: 3, loss: 2.0 };
        save_checkpoint(&path, &model, &opt, &metadata).unwrap();

        let restored = tiny(0);
        let mut restored_opt =
            setup_optimizers(&restored, OptimizerHyperparams::default()).unwrap();
        load_checkpoint(&path, &restored, &mut restored_opt).unwrap();
        assert_eq!(restored.dropout_state(), state);
    }

    #[test]
    fn test_bad_step_counter_leaves_model_untouched() {
        let source = tiny(1);
        let opt = setup_optimizers(&source, OptimizerHyperparams::default()).unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ckpt.safetensors");
        let metadata = CheckpointMetadata { epoch: 1, loss: 1.0 };
        save_checkpoint(&path, &source, &opt, &metadata).unwrap();

        // Rewrite the step counter with the wrong dtype
        let mut tensors = candle_core::safetensors::load(&path, &Device::Cpu).unwrap();
        let step_key = format!("{OPTIMIZER_PREFIX}{STEP_KEY}");
        tensors.insert(step_key, Tensor::new(1f32, &Device::Cpu).unwrap());
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let target = tiny(2);
        let snapshot = |model: &GPT| -> Vec<(String, Vec<f32>)> {
            model
                .params()
                .named_vars()
                .into_iter()
                .map(|(name, var)| (name, var.flatten_all().unwrap().to_vec1::<f32>().unwrap()))
                .collect()
        };
        let before = snapshot(&target);
        let mut target_opt = setup_optimizers(&target, OptimizerHyperparams::default()).unwrap();
        assert!(load_checkpoint(&path, &target, &mut target_opt).is_err());
        assert_eq!(snapshot(&target), before);
        assert_eq!(target_opt.step_count(), 0);
    }
}
