//! Causal multi-head self-attention
//!
//! Each [`AttentionHead`] owns its own query/key/value projections; the
//! [`MultiHeadAttention`] layer runs them side by side over the same input,
//! concatenates their outputs and projects back to the embedding width.

use crate::dropout::Dropout;
use crate::error::ShapeError;
use crate::params::ParamStore;
use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{ops, Linear, Module};

/// Build the causal mask: `mask[i][j] == 1` iff `j <= i`
///
/// The diagonal is included so every position can attend at least to itself
/// and no softmax row is ever fully masked.
pub fn causal_mask(size: usize, device: &Device) -> Result<Tensor> {
    Ok(Tensor::tril2(size, DType::U8, device)?)
}

/// Single head of causally-masked scaled dot-product attention
pub struct AttentionHead {
    key: Linear,
    query: Linear,
    value: Linear,
    /// Lower-triangular `[max_len, max_len]` mask shared with the other heads
    tril: Tensor,
    dropout: Dropout,
    head_size: usize,
}

impl AttentionHead {
    /// Create a head projecting `n_embd -> head_size`
    ///
    /// # Arguments
    /// * `store` - Parameter store the projections are registered in
    /// * `prefix` - Parameter name prefix
    /// * `n_embd` - Input width
    /// * `head_size` - Width of the query/key/value subspace
    /// * `tril` - Causal mask covering the maximum context
    /// * `dropout` - Dropout probability on the attention weights
    pub fn new(
        store: &mut ParamStore,
        prefix: &str,
        n_embd: usize,
        head_size: usize,
        tril: Tensor,
        dropout: f32,
    ) -> Result<Self> {
        Ok(Self {
            key: store.linear(&format!("{prefix}.key"), n_embd, head_size, false)?,
            query: store.linear(&format!("{prefix}.query"), n_embd, head_size, false)?,
            value: store.linear(&format!("{prefix}.value"), n_embd, head_size, false)?,
            tril,
            dropout: store.dropout(dropout),
            head_size,
        })
    }

    /// Attention weights `[batch, T, T]` after masking and softmax
    ///
    /// Dropout is applied when `train` is set.
    pub fn attention_weights(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (_b, t, _c) = x.dims3()?;
        let max = self.tril.dim(0)?;
        if t > max {
            return Err(ShapeError::ContextTooLong { len: t, max }.into());
        }

        let k = self.key.forward(x)?;
        let q = self.query.forward(x)?;
        let scale = (self.head_size as f64).powf(-0.5);
        let scores = (q.matmul(&k.t()?)? * scale)?;

        let mask = self
            .tril
            .narrow(0, 0, t)?
            .narrow(1, 0, t)?
            .broadcast_as(scores.shape())?;
        let neg_inf =
            Tensor::new(f32::NEG_INFINITY, scores.device())?.broadcast_as(scores.shape())?;
        let scores = mask.where_cond(&scores, &neg_inf)?;

        let weights = ops::softmax(&scores, D::Minus1)?;
        self.dropout.forward(&weights, train)
    }

    /// Forward pass `[batch, T, n_embd] -> [batch, T, head_size]`
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let weights = self.attention_weights(x, train)?;
        let v = self.value.forward(x)?;
        Ok(weights.matmul(&v)?)
    }

    /// Width of this head's output
    pub fn head_size(&self) -> usize {
        self.head_size
    }
}

/// Independent attention heads concatenated and projected back to `n_embd`
pub struct MultiHeadAttention {
    heads: Vec<AttentionHead>,
    proj: Linear,
    dropout: Dropout,
}

impl MultiHeadAttention {
    /// Create `n_head` heads of width `n_embd / n_head`
    ///
    /// The caller guarantees `n_embd % n_head == 0` (checked by
    /// [`GPTConfig::validate`](crate::GPTConfig::validate)).
    pub fn new(
        store: &mut ParamStore,
        prefix: &str,
        n_embd: usize,
        n_head: usize,
        tril: &Tensor,
        dropout: f32,
    ) -> Result<Self> {
        let head_size = n_embd / n_head;
        let heads = (0..n_head)
            .map(|i| {
                AttentionHead::new(
                    store,
                    &format!("{prefix}.heads.{i}"),
                    n_embd,
                    head_size,
                    tril.clone(),
                    dropout,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let proj = store.linear(&format!("{prefix}.proj"), head_size * n_head, n_embd, true)?;

        Ok(Self {
            heads,
            proj,
            dropout: store.dropout(dropout),
        })
    }

    /// Forward pass `[batch, T, n_embd] -> [batch, T, n_embd]`
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let outputs = self
            .heads
            .iter()
            .map(|h| h.forward(x, train))
            .collect::<Result<Vec<_>>>()?;
        let out = Tensor::cat(&outputs, D::Minus1)?;
        let out = self.proj.forward(&out)?;
        self.dropout.forward(&out, train)
    }

    /// The individual heads
    pub fn heads(&self) -> &[AttentionHead] {
        &self.heads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_causal_mask_layout() {
        let mask = causal_mask(3, &Device::Cpu).unwrap().to_vec2::<u8>().unwrap();
        assert_eq!(mask, vec![vec![1, 0, 0], vec![1, 1, 0], vec![1, 1, 1]]);
    }

    #[test]
    fn test_head_output_shape() {
        let device = Device::Cpu;
        let mut store = ParamStore::new(&device, Some(0));
        let tril = causal_mask(8, &device).unwrap();
        let head = AttentionHead::new(&mut store, "h", 16, 4, tril, 0.0).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 5, 16), &device).unwrap();
        assert_eq!(head.forward(&x, false).unwrap().dims(), &[2, 5, 4]);
        assert_eq!(head.head_size(), 4);
    }

    #[test]
    fn test_head_rejects_long_sequence() {
        let device = Device::Cpu;
        let mut store = ParamStore::new(&device, Some(0));
        let tril = causal_mask(4, &device).unwrap();
        let head = AttentionHead::new(&mut store, "h", 8, 4, tril, 0.0).unwrap();
        let x = Tensor::zeros((1, 5, 8), DType::F32, &device).unwrap();
        let err = head.forward(&x, false).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ShapeError>(),
            Some(&ShapeError::ContextTooLong { len: 5, max: 4 })
        );
    }

    #[test]
    fn test_multi_head_shape_and_params() {
        let device = Device::Cpu;
        let mut store = ParamStore::new(&device, Some(0));
        let tril = causal_mask(8, &device).unwrap();
        let mha = MultiHeadAttention::new(&mut store, "sa", 12, 3, &tril, 0.0).unwrap();
        assert_eq!(mha.heads().len(), 3);
        // 3 heads * (q, k, v) + proj weight + proj bias
        assert_eq!(store.len(), 3 * 3 + 2);
        let x = Tensor::randn(0f32, 1.0, (2, 6, 12), &device).unwrap();
        assert_eq!(mha.forward(&x, true).unwrap().dims(), &[2, 6, 12]);
    }
}
