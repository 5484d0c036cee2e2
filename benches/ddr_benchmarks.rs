use candle_core::Device;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ddr::{DistributionConfig, DistributionCore, ForwardRequest};
use std::time::Duration;

// data generating
// functions
mod utils;
use utils::{create_condition, create_levels, create_targets};

pub fn distribution_benchmarks(c: &mut Criterion) {
    let n_samples = 256;
    let n_features = 32;
    let condition = create_condition(n_samples, n_features);
    let q_batch = create_levels(n_samples);
    let y_batch = create_targets(n_samples);

    let config = DistributionConfig::new(n_features).set_latent_dim(128);
    let core = DistributionCore::new(config, &Device::Cpu).unwrap();

    let mut group = c.benchmark_group("Distribution Core");
    group.warm_up_time(Duration::from_secs(5));
    group.bench_function("Median", |b| {
        b.iter(|| core.forward(black_box(&condition), &ForwardRequest::median()).unwrap())
    });
    group.bench_function("Quantile direction", |b| {
        b.iter(|| {
            core.forward(black_box(&condition), &ForwardRequest::quantile(q_batch.clone()))
                .unwrap()
        })
    });
    group.bench_function("Cdf direction", |b| {
        b.iter(|| {
            core.forward(black_box(&condition), &ForwardRequest::cdf(y_batch.clone()))
                .unwrap()
        })
    });
    group.bench_function("Both directions with round trips", |b| {
        b.iter(|| {
            let request = ForwardRequest::quantile(q_batch.clone())
                .set_y_batch(y_batch.clone())
                .set_do_inverse(true);
            core.forward(black_box(&condition), &request).unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, distribution_benchmarks);
criterion_main!(benches);
