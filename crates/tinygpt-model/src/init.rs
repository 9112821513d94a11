//! Weight initialization policy
//!
//! Every parameter-holding module belongs to a closed set of variants
//! ([`ParamSpec`]). The [`Initializer`] dispatches on that set once, when the
//! parameter is registered, so nothing inspects module types at runtime.
//!
//! - Linear weights: N(0, 0.02), biases: 0
//! - Embedding tables: N(0, 0.02)
//! - Normalization: weight 1, bias 0

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Standard deviation of every normally-initialized weight
pub const INIT_STD: f32 = 0.02;

/// Shape of a parameter-holding module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSpec {
    /// Affine map `in_features -> out_features`, weight stored `[out, in]`
    Linear {
        /// Input width
        in_features: usize,
        /// Output width
        out_features: usize,
        /// Whether the map has a bias vector
        bias: bool,
    },
    /// Lookup table `[num_embeddings, embedding_dim]`
    Embedding {
        /// Number of rows
        num_embeddings: usize,
        /// Row width
        embedding_dim: usize,
    },
    /// Affine layer normalization over the last dimension
    Norm {
        /// Normalized width
        dim: usize,
    },
}

/// Draws initial parameter values
pub struct Initializer {
    rng: StdRng,
    std: f32,
}

impl Initializer {
    /// Create an initializer; `None` seeds from OS entropy
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { rng, std: INIT_STD }
    }

    /// Produce the named tensors for one module, in registration order
    pub fn init(
        &mut self,
        spec: &ParamSpec,
        device: &Device,
    ) -> Result<Vec<(&'static str, Tensor)>> {
        match *spec {
            ParamSpec::Linear {
                in_features,
                out_features,
                bias,
            } => {
                let weight = self.normal(&[out_features, in_features], device)?;
                let mut tensors = vec![("weight", weight)];
                if bias {
                    tensors.push(("bias", Tensor::zeros(out_features, DType::F32, device)?));
                }
                Ok(tensors)
            }
            ParamSpec::Embedding {
                num_embeddings,
                embedding_dim,
            } => Ok(vec![("weight", self.normal(&[num_embeddings, embedding_dim], device)?)]),
            ParamSpec::Norm { dim } => Ok(vec![
                ("weight", Tensor::ones(dim, DType::F32, device)?),
                ("bias", Tensor::zeros(dim, DType::F32, device)?),
            ]),
        }
    }

    fn normal(&mut self, dims: &[usize], device: &Device) -> Result<Tensor> {
        let numel: usize = dims.iter().product();
        let std = self.std;
        let data: Vec<f32> = (0..numel)
            .map(|_| {
                let z: f32 = self.rng.sample(StandardNormal);
                std * z
            })
            .collect();
        Ok(Tensor::from_vec(data, dims, device)?)
    }
}
