//! Layer normalization

use candle_core::{Result, Tensor, D};
use candle_nn::Module;

/// Default epsilon added to the variance
pub const LAYER_NORM_EPS: f64 = 1e-5;

/// Affine layer normalization over the last dimension
///
/// `y = (x - mean(x)) / sqrt(var(x) + eps) * weight + bias`
///
/// Built from primitive tensor ops so gradients flow through every term.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    /// Wrap existing weight and bias tensors
    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Self {
        Self { weight, bias, eps }
    }

    /// Scale parameter
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Shift parameter
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }
}

impl Module for LayerNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let hidden = x.dim(D::Minus1)? as f64;
        let mean = (x.sum_keepdim(D::Minus1)? / hidden)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_layer_norm_zero_mean_unit_var() {
        let device = Device::Cpu;
        let norm = LayerNorm::new(
            Tensor::ones(4, DType::F32, &device).unwrap(),
            Tensor::zeros(4, DType::F32, &device).unwrap(),
            LAYER_NORM_EPS,
        );
        let x = Tensor::new(&[[1f32, 2., 3., 4.], [10., 0., -10., 4.]], &device).unwrap();
        let y = norm.forward(&x).unwrap().to_vec2::<f32>().unwrap();
        for row in y {
            let mean: f32 = row.iter().sum::<f32>() / 4.0;
            let var: f32 = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_layer_norm_preserves_shape() {
        let device = Device::Cpu;
        let norm = LayerNorm::new(
            Tensor::ones(8, DType::F32, &device).unwrap(),
            Tensor::zeros(8, DType::F32, &device).unwrap(),
            LAYER_NORM_EPS,
        );
        let x = Tensor::ones((2, 3, 8), DType::F32, &device).unwrap();
        assert_eq!(norm.forward(&x).unwrap().dims(), &[2, 3, 8]);
    }
}
