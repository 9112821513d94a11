//! Position-wise feed-forward network

use crate::dropout::Dropout;
use crate::params::ParamStore;
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{Linear, Module};

/// Two-layer MLP with ReLU activation
///
/// Architecture:
/// - Expansion: n_embd -> 4 * n_embd
/// - Activation: ReLU
/// - Projection: 4 * n_embd -> n_embd
/// - Dropout
pub struct FeedForward {
    /// Expansion layer: n_embd -> 4 * n_embd
    c_fc: Linear,
    /// Projection layer: 4 * n_embd -> n_embd
    c_proj: Linear,
    dropout: Dropout,
}

impl FeedForward {
    /// Create a new feed-forward layer
    ///
    /// # Arguments
    /// * `store` - Parameter store
    /// * `prefix` - Parameter name prefix
    /// * `n_embd` - Embedding dimension
    /// * `dropout` - Dropout probability on the output
    pub fn new(store: &mut ParamStore, prefix: &str, n_embd: usize, dropout: f32) -> Result<Self> {
        Ok(Self {
            c_fc: store.linear(&format!("{prefix}.c_fc"), n_embd, 4 * n_embd, true)?,
            c_proj: store.linear(&format!("{prefix}.c_proj"), 4 * n_embd, n_embd, true)?,
            dropout: store.dropout(dropout),
        })
    }

    /// Forward pass `[batch, T, n_embd] -> [batch, T, n_embd]`
    ///
    /// Every position is transformed independently of the others.
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.c_fc.forward(x)?.relu()?;
        let x = self.c_proj.forward(&x)?;
        self.dropout.forward(&x, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, IndexOp};

    #[test]
    fn test_feed_forward_shape() {
        let mut store = ParamStore::new(&Device::Cpu, Some(0));
        let ff = FeedForward::new(&mut store, "ffwd", 8, 0.0).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 3, 8), &Device::Cpu).unwrap();
        assert_eq!(ff.forward(&x, false).unwrap().dims(), &[2, 3, 8]);
        assert_eq!(store.num_parameters(), 8 * 32 + 32 + 32 * 8 + 8);
    }

    #[test]
    fn test_feed_forward_is_position_wise() {
        let mut store = ParamStore::new(&Device::Cpu, Some(1));
        let ff = FeedForward::new(&mut store, "ffwd", 4, 0.0).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 5, 4), &Device::Cpu).unwrap();
        let full = ff.forward(&x, false).unwrap();
        let tail = x.i((.., 4..5, ..)).unwrap().contiguous().unwrap();
        let last = ff.forward(&tail, false).unwrap();
        let a = full.i((0, 4)).unwrap().to_vec1::<f32>().unwrap();
        let b = last.i((0, 0)).unwrap().to_vec1::<f32>().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }
}
