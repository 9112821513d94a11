//! AdamW optimizer with exportable state
//!
//! Same update rule as `candle_nn::AdamW` (bias-corrected moments, decoupled
//! weight decay), but the moment accumulators are addressable by parameter
//! name so they can be written into and restored from a checkpoint.

use crate::config::OptimizerHyperparams;
use anyhow::{Context, Result};
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use std::collections::HashMap;
use tinygpt_model::GPT;

/// State key of the step counter
pub const STEP_KEY: &str = "step";

struct ParamState {
    name: String,
    param: Var,
    m: Var,
    v: Var,
}

/// AdamW over a fixed, named parameter set
pub struct AdamW {
    params: Vec<ParamState>,
    step: usize,
    config: OptimizerHyperparams,
}

/// Create the optimizer for every parameter of a model
pub fn setup_optimizers(model: &GPT, config: OptimizerHyperparams) -> Result<AdamW> {
    let parameters = model.params().named_vars();
    if parameters.is_empty() {
        anyhow::bail!("Model has no parameters to optimize");
    }
    AdamW::new(parameters, config)
}

impl AdamW {
    /// Create an optimizer with zeroed moments
    pub fn new(params: Vec<(String, Var)>, config: OptimizerHyperparams) -> Result<Self> {
        let params = params
            .into_iter()
            .map(|(name, param)| -> Result<ParamState> {
                let m = Var::zeros(param.shape(), param.dtype(), param.device())?;
                let v = Var::zeros(param.shape(), param.dtype(), param.device())?;
                Ok(ParamState { name, param, m, v })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { params, step: 0, config })
    }

    /// Apply one update from freshly computed gradients
    ///
    /// Parameters without a gradient are left untouched, moments included;
    /// they skip weight decay as well.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step += 1;
        let OptimizerHyperparams {
            learning_rate: lr,
            weight_decay,
            beta1,
            beta2,
            eps,
        } = self.config;
        let scale_m = 1.0 / (1.0 - beta1.powi(self.step as i32));
        let scale_v = 1.0 / (1.0 - beta2.powi(self.step as i32));

        for state in &self.params {
            let theta = state.param.as_tensor();
            let Some(g) = grads.get(theta) else {
                continue;
            };
            let next_m = ((state.m.as_tensor() * beta1)? + (g * (1.0 - beta1))?)?;
            let next_v = ((state.v.as_tensor() * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
            let m_hat = (&next_m * scale_m)?;
            let v_hat = (&next_v * scale_v)?;
            let decayed = (theta * (1.0 - lr * weight_decay))?;
            let update = (m_hat / (v_hat.sqrt()? + eps)?)?;
            let next_theta = (decayed - (update * lr)?)?;
            state.m.set(&next_m)?;
            state.v.set(&next_v)?;
            state.param.set(&next_theta)?;
        }
        Ok(())
    }

    /// Backpropagate `loss` and apply one update
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward().context("Backward pass failed")?;
        self.step(&grads)
    }

    /// Number of updates applied so far
    pub fn step_count(&self) -> usize {
        self.step
    }

    /// Current learning rate
    pub fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    /// Override the learning rate
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.config.learning_rate = lr;
    }

    /// Export moments (`m.<param>`, `v.<param>`) and the step counter
    pub fn state(&self) -> Result<HashMap<String, Tensor>> {
        let mut state = HashMap::with_capacity(2 * self.params.len() + 1);
        for p in &self.params {
            state.insert(format!("m.{}", p.name), p.m.as_tensor().copy()?);
            state.insert(format!("v.{}", p.name), p.v.as_tensor().copy()?);
        }
        let device = self.params.first().map(|p| p.param.device().clone());
        let device = device.context("Optimizer has no parameters")?;
        state.insert(STEP_KEY.to_string(), Tensor::new(self.step as i64, &device)?);
        Ok(state)
    }

    /// Restore state produced by [`state`](Self::state)
    ///
    /// Every entry is checked before any moment is overwritten.
    pub fn load_state(&mut self, state: &HashMap<String, Tensor>) -> Result<()> {
        let step = state
            .get(STEP_KEY)
            .context("Optimizer state is missing the step counter")?
            .to_scalar::<i64>()
            .context("Optimizer step counter is not an i64 scalar")?;
        let step = usize::try_from(step).context("Optimizer step counter is negative")?;

        let mut staged = Vec::with_capacity(self.params.len());
        for p in &self.params {
            let fetch = |kind: &str| -> Result<Tensor> {
                let key = format!("{kind}.{}", p.name);
                let t = state
                    .get(&key)
                    .with_context(|| format!("Optimizer state is missing {key}"))?;
                if t.shape() != p.param.shape() {
                    anyhow::bail!(
                        "Optimizer state {key} has shape {:?}, expected {:?}",
                        t.dims(),
                        p.param.dims()
                    );
                }
                Ok(t.to_dtype(p.param.dtype())?.to_device(p.param.device())?)
            };
            staged.push((fetch("m")?, fetch("v")?));
        }

        for (p, (m, v)) in self.params.iter().zip(staged) {
            p.m.set(&m)?;
            p.v.set(&v)?;
        }
        self.step = step;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn config(lr: f64, weight_decay: f64) -> OptimizerHyperparams {
        OptimizerHyperparams {
            learning_rate: lr,
            weight_decay,
            ..OptimizerHyperparams::default()
        }
    }

    #[test]
    fn test_first_step_moves_by_lr() {
        // With bias correction the first update is lr * g / (|g| + eps)
        let w = Var::new(&[1f32, -1.0], &Device::Cpu).unwrap();
        let mut opt = AdamW::new(vec![("w".to_string(), w.clone())], config(0.1, 0.0)).unwrap();

        let loss = (w.as_tensor() * 3.0).unwrap().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();

        let values = w.as_tensor().to_vec1::<f32>().unwrap();
        assert!((values[0] - 0.9).abs() < 1e-5);
        assert!((values[1] + 1.1).abs() < 1e-5);
        assert_eq!(opt.step_count(), 1);
    }

    fn one_step(weight_decay: f64) -> f32 {
        let w = Var::new(&[2f32], &Device::Cpu).unwrap();
        let mut opt = AdamW::new(vec![("w".to_string(), w.clone())], config(0.1, weight_decay))
            .unwrap();
        // Unit gradient, so the adaptive part of the update is identical
        let loss = w.as_tensor().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();
        w.as_tensor().to_vec1::<f32>().unwrap()[0]
    }

    #[test]
    fn test_weight_decay_is_decoupled() {
        let decayed = one_step(0.5);
        let plain = one_step(0.0);
        assert!((plain - 1.9).abs() < 1e-6, "{plain}");
        // lr * wd * w0
        assert!((plain - decayed - 0.1 * 0.5 * 2.0).abs() < 1e-6, "{plain} {decayed}");
    }

    #[test]
    fn test_param_without_grad_is_not_decayed() {
        let w = Var::new(&[2f32], &Device::Cpu).unwrap();
        let other = Var::new(&[1f32], &Device::Cpu).unwrap();
        let mut opt = AdamW::new(
            vec![("w".to_string(), w.clone()), ("other".to_string(), other.clone())],
            config(0.1, 0.5),
        )
        .unwrap();

        let loss = other.as_tensor().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();
        assert_eq!(w.as_tensor().to_vec1::<f32>().unwrap(), vec![2.0]);
        assert_ne!(other.as_tensor().to_vec1::<f32>().unwrap(), vec![1.0]);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let w = Var::new(&[5f32, -3.0], &Device::Cpu).unwrap();
        let mut opt = AdamW::new(vec![("w".to_string(), w.clone())], config(0.1, 0.0)).unwrap();
        for _ in 0..300 {
            let loss = w.as_tensor().sqr().unwrap().sum_all().unwrap();
            opt.backward_step(&loss).unwrap();
        }
        let values = w.as_tensor().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() < 0.25), "{values:?}");
    }

    #[test]
    fn test_load_state_validates_before_writing() {
        let a = Var::zeros(2, DType::F32, &Device::Cpu).unwrap();
        let b = Var::zeros(3, DType::F32, &Device::Cpu).unwrap();
        let mut opt = AdamW::new(
            vec![("a".to_string(), a.clone()), ("b".to_string(), b.clone())],
            config(0.1, 0.0),
        )
        .unwrap();

        let mut state = opt.state().unwrap();
        state.insert("m.a".to_string(), Tensor::ones(2, DType::F32, &Device::Cpu).unwrap());
        state.insert("v.b".to_string(), Tensor::ones(4, DType::F32, &Device::Cpu).unwrap());
        state.insert(STEP_KEY.to_string(), Tensor::new(7i64, &Device::Cpu).unwrap());

        assert!(opt.load_state(&state).is_err());
        let state_after = opt.state().unwrap();
        assert_eq!(state_after["m.a"].to_vec1::<f32>().unwrap(), vec![0.0, 0.0]);
        assert_eq!(opt.step_count(), 0);
    }
}
