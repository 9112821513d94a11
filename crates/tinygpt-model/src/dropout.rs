//! Seeded inverted dropout
//!
//! Every dropout layer of a model shares one [`DropoutRng`]. Mask `n` is
//! drawn from an RNG seeded with `(seed, n)`, so the whole mask sequence is
//! determined by a [`DropoutState`] and reproduced after a restart by
//! restoring it.

use anyhow::{anyhow, Result};
use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Bernoulli, Distribution};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const STREAM_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Position of a mask stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropoutState {
    /// Stream seed
    pub seed: u64,
    /// Masks drawn so far
    pub draws: u64,
}

#[derive(Debug)]
struct Stream {
    seed: AtomicU64,
    draws: AtomicU64,
}

/// Counter-based mask stream shared by the dropout layers of one model
#[derive(Debug, Clone)]
pub struct DropoutRng {
    stream: Arc<Stream>,
}

impl DropoutRng {
    /// Seeded stream, or one seeded from entropy when `seed` is `None`
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            stream: Arc::new(Stream {
                seed: AtomicU64::new(seed.unwrap_or_else(rand::random)),
                draws: AtomicU64::new(0),
            }),
        }
    }

    /// Current position of the stream
    pub fn state(&self) -> DropoutState {
        DropoutState {
            seed: self.stream.seed.load(Ordering::Relaxed),
            draws: self.stream.draws.load(Ordering::Relaxed),
        }
    }

    /// Continue from a position taken with [`state`](Self::state)
    pub fn set_state(&self, state: DropoutState) {
        self.stream.seed.store(state.seed, Ordering::Relaxed);
        self.stream.draws.store(state.draws, Ordering::Relaxed);
    }

    fn next_rng(&self) -> StdRng {
        let seed = self.stream.seed.load(Ordering::Relaxed);
        let draw = self.stream.draws.fetch_add(1, Ordering::Relaxed);
        StdRng::seed_from_u64(seed ^ draw.wrapping_add(1).wrapping_mul(STREAM_MIX))
    }
}

/// Zeroes each element with probability `p` in training mode and scales the
/// survivors by `1 / (1 - p)`
#[derive(Debug, Clone)]
pub struct Dropout {
    p: f32,
    rng: DropoutRng,
}

impl Dropout {
    /// Create a dropout layer drawing its masks from `rng`
    pub fn new(p: f32, rng: DropoutRng) -> Self {
        Self { p, rng }
    }

    /// Identity unless `train` is set and `p > 0`
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        if !train || self.p == 0.0 {
            return Ok(x.clone());
        }
        let keep = Bernoulli::new(f64::from(1.0 - self.p))
            .map_err(|e| anyhow!("Invalid dropout probability {}: {e}", self.p))?;
        let scale = 1.0 / (1.0 - self.p);

        let mut rng = self.rng.next_rng();
        let mask: Vec<f32> = (0..x.elem_count())
            .map(|_| if keep.sample(&mut rng) { scale } else { 0.0 })
            .collect();
        let mask = Tensor::from_vec(mask, x.dims(), x.device())?.to_dtype(x.dtype())?;
        Ok(x.mul(&mask)?)
    }
}
