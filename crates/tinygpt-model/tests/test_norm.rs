//! Integration tests for LayerNorm

use candle_core::{Device, Tensor, Var};
use candle_nn::Module;
use tinygpt_model::norm::{LayerNorm, LAYER_NORM_EPS};

#[test]
fn test_layer_norm_matches_fused_kernel() {
    let device = Device::Cpu;
    let weight = Tensor::randn(1f32, 0.1, 16, &device).unwrap();
    let bias = Tensor::randn(0f32, 0.1, 16, &device).unwrap();
    let x = Tensor::randn(0f32, 3.0, (2, 5, 16), &device).unwrap();

    let ours = LayerNorm::new(weight.clone(), bias.clone(), LAYER_NORM_EPS)
        .forward(&x)
        .unwrap();
    let fused = candle_nn::ops::layer_norm(&x, &weight, &bias, LAYER_NORM_EPS as f32).unwrap();

    let diff = (ours - fused)
        .unwrap()
        .abs()
        .unwrap()
        .max_all()
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
    assert!(diff < 1e-4, "max difference {diff}");
}

#[test]
fn test_layer_norm_constant_input() {
    // Zero variance is guarded by eps; output collapses to the bias
    let device = Device::Cpu;
    let norm = LayerNorm::new(
        Tensor::ones(4, candle_core::DType::F32, &device).unwrap(),
        Tensor::new(&[0.5f32, -0.5, 0.0, 1.0], &device).unwrap(),
        LAYER_NORM_EPS,
    );
    let x = Tensor::new(&[[3f32, 3., 3., 3.]], &device).unwrap();
    let y = norm.forward(&x).unwrap().to_vec2::<f32>().unwrap();
    assert_eq!(y, vec![vec![0.5, -0.5, 0.0, 1.0]]);
}

#[test]
fn test_layer_norm_is_differentiable() {
    let device = Device::Cpu;
    let weight = Var::ones(4, candle_core::DType::F32, &device).unwrap();
    let bias = Var::zeros(4, candle_core::DType::F32, &device).unwrap();
    let norm = LayerNorm::new(weight.as_tensor().clone(), bias.as_tensor().clone(), LAYER_NORM_EPS);

    let x = Tensor::new(&[[1f32, 2., 3., 4.]], &device).unwrap();
    let target = Tensor::new(&[[0f32, 1., 0., 1.]], &device).unwrap();
    let loss = (norm.forward(&x).unwrap() - target)
        .unwrap()
        .sqr()
        .unwrap()
        .sum_all()
        .unwrap();
    let grads = loss.backward().unwrap();

    assert!(grads.get(weight.as_tensor()).is_some());
    let db = grads.get(bias.as_tensor()).unwrap().to_vec1::<f32>().unwrap();
    assert!(db.iter().any(|&g| g != 0.0));
}
