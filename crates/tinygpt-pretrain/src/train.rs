//! Training loop for pretraining

use crate::checkpoint::{load_checkpoint, save_checkpoint, CheckpointMetadata};
use crate::dataloader::{DataLoader, Split};
use crate::metrics::{EvalLosses, MetricsLogger};
use crate::optimizer::AdamW;
use anyhow::{Context, Result};
use candle_core::Tensor;
use rand::Rng;
use std::path::{Path, PathBuf};
use tinygpt_model::GPT;

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Run epochs `start_epoch..epochs`
    pub epochs: usize,
    /// Epochs between loss estimates (0 = disabled)
    pub eval_interval: usize,
    /// Batches per split in each loss estimate
    pub eval_iters: usize,
    /// Epochs between checkpoints (0 = only after the last epoch)
    pub checkpoint_interval: usize,
    /// Epochs between progress lines (0 = disabled)
    pub log_interval: usize,
    /// Where checkpoints are written (None = never)
    pub save_path: Option<PathBuf>,
    /// Suppress progress output
    pub quiet: bool,
}

/// Where the trainer is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    /// Constructed, nothing run yet
    NotStarted,
    /// Inside the epoch loop
    Running,
    /// Writing a checkpoint
    Checkpointing,
    /// Sampling instead of training
    GeneratingOnly,
    /// Finished
    Done,
}

/// Whether a loss estimate runs before the step of `epoch`
///
/// Never on the first epoch of a run, so a resumed run does not re-evaluate
/// the state it was saved in.
pub fn should_evaluate(epoch: usize, start_epoch: usize, eval_interval: usize) -> bool {
    eval_interval > 0 && epoch != start_epoch && epoch % eval_interval == 0
}

/// Whether a checkpoint is written after the step of `epoch`
///
/// Never on the first epoch of a run, always after the last one.
pub fn should_checkpoint(
    epoch: usize,
    start_epoch: usize,
    checkpoint_interval: usize,
    epochs: usize,
) -> bool {
    let periodic =
        checkpoint_interval > 0 && epoch != start_epoch && epoch % checkpoint_interval == 0;
    periodic || epoch + 1 == epochs
}

/// Owns the model, optimizer and data for one training run
pub struct Trainer {
    model: GPT,
    optimizer: AdamW,
    data: Option<DataLoader>,
    config: TrainingConfig,
    logger: MetricsLogger,
    state: TrainingState,
    start_epoch: usize,
    last_loss: f32,
}

impl Trainer {
    /// Create a trainer
    ///
    /// `data` may be `None` when the trainer is only used for generation.
    pub fn new(
        model: GPT,
        optimizer: AdamW,
        data: Option<DataLoader>,
        config: TrainingConfig,
    ) -> Self {
        let logger = MetricsLogger::new(config.log_interval, config.quiet);
        if let Some(loader) = &data {
            for split in Split::ALL {
                if loader.window(split) < loader.seq_len() {
                    logger.warn(format_args!(
                        "{} split has only {} tokens; batches use a window of {} instead of {}",
                        split,
                        loader.tokens(split).len(),
                        loader.window(split),
                        loader.seq_len()
                    ));
                }
            }
        }
        Self {
            model,
            optimizer,
            data,
            config,
            logger,
            state: TrainingState::NotStarted,
            start_epoch: 0,
            last_loss: f32::INFINITY,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> TrainingState {
        self.state
    }

    /// First epoch the next [`run`](Self::run) executes
    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    /// Most recent training loss (infinity before the first step)
    pub fn last_loss(&self) -> f32 {
        self.last_loss
    }

    /// The model being trained
    pub fn model(&self) -> &GPT {
        &self.model
    }

    /// The optimizer
    pub fn optimizer(&self) -> &AdamW {
        &self.optimizer
    }

    /// Take back the trained model
    pub fn into_model(self) -> GPT {
        self.model
    }

    fn data_mut(&mut self) -> Result<&mut DataLoader> {
        self.data.as_mut().context("No training data loaded")
    }

    /// Restore model, optimizer, start epoch and last loss from a checkpoint
    ///
    /// The dropout mask stream continues where it was saved. The batch
    /// sampler is not checkpointed: a resumed run draws its batch offsets
    /// from the loader's seed again.
    pub fn resume_from(&mut self, path: &Path) -> Result<CheckpointMetadata> {
        let metadata = load_checkpoint(path, &self.model, &mut self.optimizer)
            .with_context(|| format!("Failed to load checkpoint from {:?}", path))?;
        self.start_epoch = metadata.epoch;
        self.last_loss = metadata.loss;
        self.logger.info(format_args!(
            "loaded checkpoint from {} at epoch {}",
            path.display(),
            metadata.epoch
        ));
        Ok(metadata)
    }

    /// One optimization step on a given batch
    ///
    /// # Returns
    /// The loss before the update
    pub fn train_on_batch(&mut self, inputs: &Tensor, targets: &Tensor) -> Result<f32> {
        let loss = self.model.loss(inputs, targets).context("Forward training failed")?;
        self.optimizer.backward_step(&loss)?;
        let loss = loss.to_scalar::<f32>()?;
        self.last_loss = loss;
        Ok(loss)
    }

    /// Sample a training batch and take one optimization step
    pub fn train_step(&mut self) -> Result<f32> {
        let (inputs, targets) = self.data_mut()?.get_batch(Split::Train)?;
        self.train_on_batch(&inputs, &targets)
    }

    /// Mean loss over `eval_iters` random batches of each split
    ///
    /// Dropout is disabled while estimating; the previous mode is restored.
    pub fn estimate_loss(&mut self) -> Result<EvalLosses> {
        let iters = self.config.eval_iters.max(1);
        let was_training = self.model.is_training();
        self.model.eval();

        let result = self.mean_losses(iters);
        self.model.set_training(was_training);
        result
    }

    fn mean_losses(&mut self, iters: usize) -> Result<EvalLosses> {
        let mut means = [0f32; 2];
        for (slot, split) in means.iter_mut().zip(Split::ALL) {
            let mut total = 0f32;
            for _ in 0..iters {
                let (inputs, targets) = self.data_mut()?.get_batch(split)?;
                total += self.model.loss(&inputs, &targets)?.to_scalar::<f32>()?;
            }
            *slot = total / iters as f32;
        }
        Ok(EvalLosses {
            train: means[0],
            eval: means[1],
        })
    }

    fn checkpoint(&mut self, epoch: usize) -> Result<()> {
        let Some(path) = self.config.save_path.clone() else {
            return Ok(());
        };
        self.state = TrainingState::Checkpointing;
        self.logger.log_checkpoint(epoch, &path);
        let metadata = CheckpointMetadata {
            epoch,
            loss: self.last_loss,
        };
        save_checkpoint(&path, &self.model, &self.optimizer, &metadata)
            .with_context(|| format!("Failed to save checkpoint to {:?}", path))?;
        self.state = TrainingState::Running;
        Ok(())
    }

    /// Run epochs `start_epoch..epochs`
    ///
    /// # Returns
    /// The loss of the last step taken
    pub fn run(&mut self) -> Result<f32> {
        let epochs = self.config.epochs;
        let start = self.start_epoch;
        self.data_mut()?;
        self.model.train();
        self.state = TrainingState::Running;
        self.logger.info(format_args!("starting training at epoch {start} of {epochs}"));

        for epoch in start..epochs {
            if should_evaluate(epoch, start, self.config.eval_interval) {
                let losses = self.estimate_loss().context("Loss estimation failed")?;
                self.logger.log_eval(epoch, &losses);
            }

            let loss = self.train_step()?;
            let tokens = {
                let data = self.data_mut()?;
                data.batch_size() * data.window(Split::Train)
            };
            self.logger
                .log_step(epoch, loss, self.optimizer.learning_rate(), tokens);

            if should_checkpoint(epoch, start, self.config.checkpoint_interval, epochs) {
                self.checkpoint(epoch)?;
            }
        }

        self.start_epoch = epochs.max(start);
        self.state = TrainingState::Done;
        Ok(self.last_loss)
    }

    /// Sample `max_new_tokens` tokens from a single `[0]` context
    pub fn generate<R: Rng + ?Sized>(
        &mut self,
        max_new_tokens: usize,
        rng: &mut R,
    ) -> Result<Vec<u32>> {
        self.state = TrainingState::GeneratingOnly;
        self.logger
            .info(format_args!("generating output of length {max_new_tokens}"));
        let tokens = self.model.generate_tokens(&[0], max_new_tokens, rng)?;
        self.state = TrainingState::Done;
        Ok(tokens)
    }
}
