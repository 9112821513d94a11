//! Named parameter storage
//!
//! The model's parameters live here as candle [`Var`]s keyed by their path in
//! the module tree (`blocks.0.sa.heads.1.key.weight`). Modules hold shallow
//! tensor handles to the same storage, so an optimizer update through a `Var`
//! is immediately visible to the forward pass.

use crate::dropout::{Dropout, DropoutRng, DropoutState};
use crate::init::{Initializer, ParamSpec};
use crate::norm::{LayerNorm, LAYER_NORM_EPS};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Embedding, Linear};
use std::collections::{BTreeMap, HashMap};

/// Owns every trainable parameter of a model
pub struct ParamStore {
    vars: BTreeMap<String, Var>,
    init: Initializer,
    dropout_rng: DropoutRng,
    device: Device,
}

impl ParamStore {
    /// Create an empty store on a device
    pub fn new(device: &Device, seed: Option<u64>) -> Self {
        Self {
            vars: BTreeMap::new(),
            init: Initializer::new(seed),
            dropout_rng: DropoutRng::new(seed),
            device: device.clone(),
        }
    }

    /// Device every parameter is allocated on
    pub fn device(&self) -> &Device {
        &self.device
    }

    fn register(&mut self, prefix: &str, spec: ParamSpec) -> Result<Vec<Tensor>> {
        let tensors = self.init.init(&spec, &self.device)?;
        let mut handles = Vec::with_capacity(tensors.len());
        for (suffix, tensor) in tensors {
            let name = format!("{prefix}.{suffix}");
            if self.vars.contains_key(&name) {
                anyhow::bail!("Parameter registered twice: {name}");
            }
            let var = Var::from_tensor(&tensor)?;
            handles.push(var.as_tensor().clone());
            self.vars.insert(name, var);
        }
        Ok(handles)
    }

    /// Register a linear map under `prefix`
    pub fn linear(
        &mut self,
        prefix: &str,
        in_features: usize,
        out_features: usize,
        bias: bool,
    ) -> Result<Linear> {
        let spec = ParamSpec::Linear {
            in_features,
            out_features,
            bias,
        };
        let mut tensors = self.register(prefix, spec)?.into_iter();
        let weight = tensors.next().context("linear weight missing")?;
        Ok(Linear::new(weight, tensors.next()))
    }

    /// Register an embedding table under `prefix`
    pub fn embedding(
        &mut self,
        prefix: &str,
        num_embeddings: usize,
        embedding_dim: usize,
    ) -> Result<Embedding> {
        let spec = ParamSpec::Embedding {
            num_embeddings,
            embedding_dim,
        };
        let table = self
            .register(prefix, spec)?
            .into_iter()
            .next()
            .context("embedding table missing")?;
        Ok(Embedding::new(table, embedding_dim))
    }

    /// Register an affine layer norm under `prefix`
    pub fn layer_norm(&mut self, prefix: &str, dim: usize) -> Result<LayerNorm> {
        let mut tensors = self.register(prefix, ParamSpec::Norm { dim })?.into_iter();
        let weight = tensors.next().context("norm weight missing")?;
        let bias = tensors.next().context("norm bias missing")?;
        Ok(LayerNorm::new(weight, bias, LAYER_NORM_EPS))
    }

    /// Dropout layer drawing from the store's shared mask stream
    pub fn dropout(&self, p: f32) -> Dropout {
        Dropout::new(p, self.dropout_rng.clone())
    }

    /// Position of the shared dropout mask stream
    pub fn dropout_state(&self) -> DropoutState {
        self.dropout_rng.state()
    }

    /// Move the shared dropout mask stream to `state`
    pub fn set_dropout_state(&self, state: DropoutState) {
        self.dropout_rng.set_state(state);
    }

    /// Look up a parameter by name
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.vars.get(name).map(|v| v.as_tensor())
    }

    /// Parameter names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// All parameters with their names, sorted by name
    pub fn named_vars(&self) -> Vec<(String, Var)> {
        self.vars.iter().map(|(n, v)| (n.clone(), v.clone())).collect()
    }

    /// Number of parameter tensors
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no parameter has been registered
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Total number of scalar parameters
    pub fn num_parameters(&self) -> usize {
        self.vars.values().map(|v| v.elem_count()).sum()
    }

    /// Snapshot of every parameter keyed by name
    pub fn state_dict(&self) -> HashMap<String, Tensor> {
        self.vars
            .iter()
            .map(|(n, v)| (n.clone(), v.as_tensor().clone()))
            .collect()
    }

    /// Replace every parameter with the matching tensor from `state`
    ///
    /// All names and shapes are checked before anything is written, so a bad
    /// state leaves the store untouched.
    pub fn load_state_dict(&self, state: &HashMap<String, Tensor>) -> Result<()> {
        let mut staged = Vec::with_capacity(self.vars.len());
        for (name, var) in &self.vars {
            let tensor = state
                .get(name)
                .with_context(|| format!("Missing parameter in state: {name}"))?;
            if tensor.dims() != var.dims() {
                anyhow::bail!(
                    "Shape mismatch for {name}: expected {:?}, found {:?}",
                    var.dims(),
                    tensor.dims()
                );
            }
            let tensor = tensor.to_device(&self.device)?.to_dtype(DType::F32)?;
            staged.push((var, tensor));
        }
        for (var, tensor) in staged {
            var.set(&tensor)?;
        }
        Ok(())
    }
}
