//! GPT model implementation

use crate::attention::{causal_mask, MultiHeadAttention};
use crate::config::GPTConfig;
use crate::dropout::DropoutState;
use crate::error::ShapeError;
use crate::mlp::FeedForward;
use crate::norm::LayerNorm;
use crate::params::ParamStore;
use anyhow::Result;
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::{loss, ops, Embedding, Linear, Module};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Transformer decoder block
///
/// Architecture:
/// - Pre-norm attention: x = x + attn(ln1(x))
/// - Pre-norm MLP: x = x + mlp(ln2(x))
pub struct Block {
    sa: MultiHeadAttention,
    ffwd: FeedForward,
    ln1: LayerNorm,
    ln2: LayerNorm,
}

impl Block {
    /// Create a new transformer block
    ///
    /// # Arguments
    /// * `store` - Parameter store
    /// * `prefix` - Parameter name prefix (e.g. `blocks.3`)
    /// * `config` - Model configuration
    /// * `tril` - Causal mask shared by every head
    pub fn new(
        store: &mut ParamStore,
        prefix: &str,
        config: &GPTConfig,
        tril: &Tensor,
    ) -> Result<Self> {
        Ok(Self {
            sa: MultiHeadAttention::new(
                store,
                &format!("{prefix}.sa"),
                config.n_embd,
                config.n_head,
                tril,
                config.dropout,
            )?,
            ffwd: FeedForward::new(
                store,
                &format!("{prefix}.ffwd"),
                config.n_embd,
                config.dropout,
            )?,
            ln1: store.layer_norm(&format!("{prefix}.ln1"), config.n_embd)?,
            ln2: store.layer_norm(&format!("{prefix}.ln2"), config.n_embd)?,
        })
    }

    /// Forward pass through the block
    ///
    /// # Arguments
    /// * `x` - Input tensor [batch, seq_len, n_embd]
    /// * `train` - Whether dropout is active
    ///
    /// # Returns
    /// Output tensor [batch, seq_len, n_embd]
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = (x + self.sa.forward(&self.ln1.forward(x)?, train)?)?;
        let x = (&x + self.ffwd.forward(&self.ln2.forward(&x)?, train)?)?;
        Ok(x)
    }
}

/// Decoder-only transformer language model
pub struct GPT {
    config: GPTConfig,
    params: ParamStore,
    token_embedding: Embedding,
    position_embedding: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Linear,
    training: bool,
}

impl GPT {
    /// Build a freshly initialized model
    ///
    /// The configuration is validated first; an invalid one is returned as a
    /// [`ConfigError`](crate::ConfigError) before any tensor is allocated.
    pub fn new(config: GPTConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let mut params = ParamStore::new(device, config.seed);
        let tril = causal_mask(config.sequence_len, device)?;

        let token_embedding =
            params.embedding("token_embedding_table", config.vocab_size, config.n_embd)?;
        let position_embedding =
            params.embedding("position_embedding_table", config.sequence_len, config.n_embd)?;
        let blocks = (0..config.n_layer)
            .map(|i| Block::new(&mut params, &format!("blocks.{i}"), &config, &tril))
            .collect::<Result<Vec<_>>>()?;
        let ln_f = params.layer_norm("ln_f", config.n_embd)?;
        let lm_head = params.linear("lm_head", config.n_embd, config.vocab_size, true)?;

        Ok(Self {
            config,
            params,
            token_embedding,
            position_embedding,
            blocks,
            ln_f,
            lm_head,
            training: true,
        })
    }

    /// Model configuration
    pub fn config(&self) -> &GPTConfig {
        &self.config
    }

    /// Parameter store holding every trainable tensor
    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    /// Device the model lives on
    pub fn device(&self) -> &Device {
        self.params.device()
    }

    /// Total number of scalar parameters
    pub fn num_parameters(&self) -> usize {
        self.params.num_parameters()
    }

    /// Position of the dropout mask stream
    ///
    /// This pins down every future mask, so it is saved in checkpoints.
    pub fn dropout_state(&self) -> DropoutState {
        self.params.dropout_state()
    }

    /// Continue the dropout mask stream from `state`
    pub fn set_dropout_state(&self, state: DropoutState) {
        self.params.set_dropout_state(state);
    }

    /// Enable dropout
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Disable dropout
    pub fn eval(&mut self) {
        self.training = false;
    }

    /// Set training mode
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Whether dropout is active
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Forward pass in the current mode
    ///
    /// # Arguments
    /// * `idx` - Token ids [batch, T] with `1 <= T <= sequence_len`
    /// * `targets` - Optional next-token ids, same shape as `idx`
    ///
    /// # Returns
    /// Logits [batch, T, vocab_size] and, when targets are given, the mean
    /// cross-entropy over all `batch * T` positions.
    pub fn forward(
        &self,
        idx: &Tensor,
        targets: Option<&Tensor>,
    ) -> Result<(Tensor, Option<Tensor>)> {
        self.forward_t(idx, targets, self.training)
    }

    /// Forward pass that must produce a loss
    pub fn loss(&self, idx: &Tensor, targets: &Tensor) -> Result<Tensor> {
        let (_, loss) = self.forward(idx, Some(targets))?;
        loss.ok_or_else(|| anyhow::anyhow!("forward with targets returned no loss"))
    }

    fn forward_t(
        &self,
        idx: &Tensor,
        targets: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let (b, t) = batch_time(idx)?;
        if t > self.config.sequence_len {
            return Err(ShapeError::ContextTooLong {
                len: t,
                max: self.config.sequence_len,
            }
            .into());
        }
        let idx = idx.to_dtype(DType::U32)?;

        let tok_emb = self.token_embedding.forward(&idx)?;
        let pos = Tensor::arange(0u32, t as u32, idx.device())?;
        let pos_emb = self.position_embedding.forward(&pos)?;
        let mut x = tok_emb.broadcast_add(&pos_emb)?;
        for block in &self.blocks {
            x = block.forward(&x, train)?;
        }
        let x = self.ln_f.forward(&x)?;
        let logits = self.lm_head.forward(&x)?;

        let loss = match targets {
            None => None,
            Some(targets) => {
                if targets.dims() != idx.dims() {
                    return Err(ShapeError::TargetShapeMismatch {
                        inputs: idx.dims().to_vec(),
                        targets: targets.dims().to_vec(),
                    }
                    .into());
                }
                let logits = logits.reshape((b * t, self.config.vocab_size))?;
                let targets = targets.to_dtype(DType::U32)?.reshape(b * t)?;
                Some(loss::cross_entropy(&logits, &targets)?)
            }
        };
        Ok((logits, loss))
    }

    /// Autoregressively extend every row of `idx` by `max_new_tokens`
    ///
    /// Each step crops the context to the last `sequence_len` tokens, runs the
    /// model with dropout disabled, and samples the next token of each row
    /// from the softmax over the final position's logits.
    ///
    /// # Returns
    /// Token ids [batch, T + max_new_tokens]
    pub fn generate<R: Rng + ?Sized>(
        &self,
        idx: &Tensor,
        max_new_tokens: usize,
        rng: &mut R,
    ) -> Result<Tensor> {
        let (b, _) = batch_time(idx)?;
        let max = self.config.sequence_len;
        let mut idx = idx.to_dtype(DType::U32)?;

        for _ in 0..max_new_tokens {
            let len = idx.dim(1)?;
            let idx_cond = if len > max {
                idx.narrow(1, len - max, max)?
            } else {
                idx.clone()
            };
            let (logits, _) = self.forward_t(&idx_cond, None, false)?;
            let last = logits.i((.., logits.dim(1)? - 1, ..))?;
            let probs = ops::softmax(&last, D::Minus1)?;
            let next = sample_rows(&probs, rng)?;
            let next = Tensor::from_vec(next, (b, 1), idx.device())?;
            idx = Tensor::cat(&[&idx, &next], 1)?;
        }
        Ok(idx)
    }

    /// Extend a single token sequence by `max_new_tokens`
    pub fn generate_tokens<R: Rng + ?Sized>(
        &self,
        context: &[u32],
        max_new_tokens: usize,
        rng: &mut R,
    ) -> Result<Vec<u32>> {
        let idx = Tensor::from_vec(context.to_vec(), (1, context.len()), self.device())?;
        let out = self.generate(&idx, max_new_tokens, rng)?;
        Ok(out.i(0)?.to_vec1::<u32>()?)
    }
}

/// Validate a `[batch, time]` id tensor with a non-empty time axis
fn batch_time(idx: &Tensor) -> Result<(usize, usize)> {
    match *idx.dims() {
        [_, 0] => Err(ShapeError::EmptyContext.into()),
        [b, t] => Ok((b, t)),
        _ => Err(ShapeError::NotBatchTime(idx.dims().to_vec()).into()),
    }
}

/// Draw one index per row of a `[batch, vocab]` probability matrix
fn sample_rows<R: Rng + ?Sized>(probs: &Tensor, rng: &mut R) -> Result<Vec<u32>> {
    let rows = probs.to_dtype(DType::F32)?.to_vec2::<f32>()?;
    rows.iter()
        .map(|row| {
            let dist = WeightedIndex::new(row)?;
            Ok(dist.sample(rng) as u32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_config() -> GPTConfig {
        GPTConfig {
            sequence_len: 8,
            vocab_size: 11,
            n_layer: 2,
            n_head: 2,
            n_embd: 8,
            dropout: 0.0,
            seed: Some(0),
        }
    }

    #[test]
    fn test_block_preserves_shape() {
        let config = tiny_config();
        let mut store = ParamStore::new(&Device::Cpu, Some(0));
        let tril = causal_mask(config.sequence_len, &Device::Cpu).unwrap();
        let block = Block::new(&mut store, "blocks.0", &config, &tril).unwrap();
        let x = Tensor::ones((1, 4, 8), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(block.forward(&x, false).unwrap().dims(), &[1, 4, 8]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GPTConfig {
            n_embd: 10,
            n_head: 3,
            ..tiny_config()
        };
        let err = GPT::new(config, &Device::Cpu).err().unwrap();
        assert!(err.downcast_ref::<crate::ConfigError>().is_some());
    }

    #[test]
    fn test_sample_rows_degenerate_distribution() {
        let probs = Tensor::new(&[[0f32, 0., 1.], [1., 0., 0.]], &Device::Cpu).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(sample_rows(&probs, &mut rng).unwrap(), vec![2, 0]);
    }

    #[test]
    fn test_batch_time_rejects_rank() {
        let idx = Tensor::zeros(3, DType::U32, &Device::Cpu).unwrap();
        let err = batch_time(&idx).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ShapeError>(),
            Some(&ShapeError::NotBatchTime(vec![3]))
        );
    }

    #[test]
    fn test_mode_toggle() {
        let mut model = GPT::new(tiny_config(), &Device::Cpu).unwrap();
        assert!(model.is_training());
        model.eval();
        assert!(!model.is_training());
        model.train();
        assert!(model.is_training());
    }
}
