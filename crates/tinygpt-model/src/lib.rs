//! Core GPT model implementation for tinygpt
//!
//! This crate provides a decoder-only transformer including:
//! - Causally masked scaled dot-product attention heads
//! - Multi-head attention with an output projection
//! - Position-wise feed-forward network with ReLU
//! - Pre-norm residual blocks with LayerNorm
//! - Learned token and position embeddings
//!
//! # Example
//!
//! ```no_run
//! use candle_core::{Device, Tensor};
//! use rand::SeedableRng;
//! use tinygpt_model::{GPTConfig, GPT};
//!
//! let config = GPTConfig::with_vocab_size(1000);
//! let mut model = GPT::new(config, &Device::Cpu)?;
//!
//! // Forward pass with targets [batch=1, seq_len=4]
//! let idx = Tensor::new(&[[1u32, 2, 3, 4]], &Device::Cpu)?;
//! let targets = Tensor::new(&[[2u32, 3, 4, 5]], &Device::Cpu)?;
//! let (logits, loss) = model.forward(&idx, Some(&targets))?;
//! // logits shape: [1, 4, 1000]
//!
//! // Sample 20 more tokens
//! model.eval();
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let tokens = model.generate_tokens(&[0], 20, &mut rng)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod attention;
pub mod config;
pub mod device;
pub mod dropout;
pub mod error;
pub mod gpt;
pub mod init;
pub mod mlp;
pub mod norm;
pub mod params;

pub use attention::{AttentionHead, MultiHeadAttention};
pub use config::{ConfigError, GPTConfig};
pub use device::ComputeBackend;
pub use dropout::{Dropout, DropoutRng, DropoutState};
pub use error::ShapeError;
pub use gpt::{Block, GPT};
pub use init::{Initializer, ParamSpec, INIT_STD};
pub use mlp::FeedForward;
pub use norm::LayerNorm;
pub use params::ParamStore;

pub type Result<T> = anyhow::Result<T>;
