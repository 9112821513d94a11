//! Data loading for pretraining
//!
//! Token streams are held in memory per split. Batches are windows taken at
//! uniformly random offsets, with targets shifted one token to the right.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tinygpt_tokenizer::Tokenizer;

/// Which token stream a batch is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    /// Training data
    Train,
    /// Held-out evaluation data
    Eval,
}

impl Split {
    /// Both splits, in reporting order
    pub const ALL: [Split; 2] = [Split::Train, Split::Eval];
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => f.write_str("train"),
            Split::Eval => f.write_str("eval"),
        }
    }
}

/// Path of the tokenized cache for a data file (`<file>_tokenized`)
pub fn tokenized_cache_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("_tokenized");
    PathBuf::from(name)
}

/// Load the token ids of a text file, tokenizing and caching them on first use
///
/// # Returns
/// The token ids and whether they came from the cache
pub fn load_or_tokenize(path: &Path, tokenizer: &Tokenizer) -> Result<(Vec<u32>, bool)> {
    let cache = tokenized_cache_path(path);
    if cache.exists() {
        let content = fs::read_to_string(&cache)
            .with_context(|| format!("Failed to read tokenized data: {:?}", cache))?;
        let ids: Vec<u32> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse tokenized data: {:?}", cache))?;
        return Ok((ids, true));
    }

    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    let ids = tokenizer.encode(&text).context("Failed to tokenize text")?;

    let content = serde_json::to_string(&ids).context("Failed to serialize tokenized data")?;
    fs::write(&cache, content)
        .with_context(|| format!("Failed to write tokenized data: {:?}", cache))?;
    Ok((ids, false))
}

/// Random-offset batch sampler over the train and eval token streams
pub struct DataLoader {
    train: Vec<u32>,
    eval: Vec<u32>,
    batch_size: usize,
    seq_len: usize,
    rng: StdRng,
    device: Device,
}

impl DataLoader {
    /// Create a new DataLoader
    ///
    /// # Arguments
    /// * `train` - Training token stream
    /// * `eval` - Evaluation token stream
    /// * `batch_size` - Sequences per batch
    /// * `seq_len` - Maximum window length (the model's context size)
    /// * `seed` - Seed for offset sampling (None = non-deterministic)
    /// * `device` - Device batches are created on
    ///
    /// # Errors
    /// Fails if a split has fewer than two tokens, since no (input, target)
    /// pair can be formed from it.
    pub fn new(
        train: Vec<u32>,
        eval: Vec<u32>,
        batch_size: usize,
        seq_len: usize,
        seed: Option<u64>,
        device: &Device,
    ) -> Result<Self> {
        if batch_size == 0 || seq_len == 0 {
            anyhow::bail!("batch_size and seq_len must be greater than zero");
        }
        for (split, tokens) in [(Split::Train, &train), (Split::Eval, &eval)] {
            if tokens.len() < 2 {
                anyhow::bail!(
                    "{} split has {} tokens; at least 2 are needed to form a batch",
                    split,
                    tokens.len()
                );
            }
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            train,
            eval,
            batch_size,
            seq_len,
            rng,
            device: device.clone(),
        })
    }

    /// Token stream of a split
    pub fn tokens(&self, split: Split) -> &[u32] {
        match split {
            Split::Train => &self.train,
            Split::Eval => &self.eval,
        }
    }

    /// Window length used for a split
    ///
    /// Splits shorter than `seq_len + 1` tokens get the longest window that
    /// still leaves room for the shifted target.
    pub fn window(&self, split: Split) -> usize {
        self.seq_len.min(self.tokens(split).len() - 1)
    }

    /// Draw `batch_size` offsets uniformly from `[0, len - window - 1]`
    pub fn sample_offsets(&mut self, split: Split) -> Vec<usize> {
        let max_offset = self.tokens(split).len() - self.window(split) - 1;
        (0..self.batch_size)
            .map(|_| self.rng.gen_range(0..=max_offset))
            .collect()
    }

    /// Build a batch from explicit offsets
    ///
    /// Row `b` of the inputs is `stream[s_b..s_b + window]` and row `b` of the
    /// targets is `stream[s_b + 1..s_b + window + 1]`.
    pub fn batch_from_offsets(&self, split: Split, offsets: &[usize]) -> Result<(Tensor, Tensor)> {
        let tokens = self.tokens(split);
        let window = self.window(split);
        let mut inputs = Vec::with_capacity(offsets.len() * window);
        let mut targets = Vec::with_capacity(offsets.len() * window);

        for &start in offsets {
            if start + window + 1 > tokens.len() {
                anyhow::bail!(
                    "offset {} out of range for {} split of {} tokens (window {})",
                    start,
                    split,
                    tokens.len(),
                    window
                );
            }
            inputs.extend_from_slice(&tokens[start..start + window]);
            targets.extend_from_slice(&tokens[start + 1..start + window + 1]);
        }

        let shape = (offsets.len(), window);
        let inputs = Tensor::from_vec(inputs, shape, &self.device)?;
        let targets = Tensor::from_vec(targets, shape, &self.device)?;
        Ok((inputs, targets))
    }

    /// Sample a random batch (inputs, targets), both `[batch_size, window]`
    pub fn get_batch(&mut self, split: Split) -> Result<(Tensor, Tensor)> {
        let offsets = self.sample_offsets(split);
        self.batch_from_offsets(split, &offsets)
    }

    /// Get batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get sequence length
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }
}
