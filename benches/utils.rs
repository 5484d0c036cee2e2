#![allow(dead_code)]
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub(crate) fn create_condition(n_samples: usize, n_features: usize) -> Tensor {
    // reproducible seed
    let mut rng = StdRng::seed_from_u64(1903);
    let data: Vec<f32> = (0..n_samples * n_features)
        .map(|_| rng.gen_range(-1.0f32..1.0))
        .collect();
    Tensor::from_vec(data, (n_samples, n_features), &Device::Cpu).unwrap()
}

pub(crate) fn create_levels(n_samples: usize) -> Tensor {
    let mut rng = StdRng::seed_from_u64(1904);
    let data: Vec<f32> = (0..n_samples).map(|_| rng.gen_range(0.01f32..0.99)).collect();
    Tensor::from_vec(data, (n_samples, 1), &Device::Cpu).unwrap()
}

pub(crate) fn create_targets(n_samples: usize) -> Tensor {
    let mut rng = StdRng::seed_from_u64(1905);
    let data: Vec<f32> = (0..n_samples).map(|_| rng.gen_range(-2.0f32..2.0)).collect();
    Tensor::from_vec(data, (n_samples, 1), &Device::Cpu).unwrap()
}
