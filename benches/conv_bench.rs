//! Convolution benchmarks: provider engine (both kernel variants) vs the
//! tiled pipeline, on the caller-side `nhwc`/`ihwo` buffers.
//!
//! Run with: cargo bench --bench conv_bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dilconv::{
    provider, random_input, AlternatePipeline, BenchmarkHarness, Buffer, ConvConfig,
    ExecutionContext, TiledPipeline,
};
use rand::{rngs::StdRng, SeedableRng};
use std::time::Duration;

fn inputs(config: &ConvConfig) -> (Buffer, Buffer, Buffer) {
    let [s, w, d] = config.canonical_descs().unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    (
        random_input(&s, &mut rng).unwrap(),
        random_input(&w, &mut rng).unwrap(),
        Buffer::zeros(&d).unwrap(),
    )
}

fn bench_dilated_conv(c: &mut Criterion) {
    let mut group = c.benchmark_group("dilated_conv");
    group.sample_size(10);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));

    let ctx = ExecutionContext::new(None).unwrap();
    // a single run per call; criterion does the repetition
    let once = BenchmarkHarness::new(0, 1, 1).unwrap();

    for dilation in [0usize, 7, 31] {
        // CO = 4 exercises the planar kernel, CO = 64 the channel-last one
        for co in [4usize, 64] {
            let config = ConvConfig::square(2, 64, co, 48, 32, 3, dilation);
            group.throughput(Throughput::Elements(config.flops() as u64));
            let (src, weights, mut dst) = inputs(&config);
            let id = format!("co{co}_d{dilation}");

            group.bench_with_input(BenchmarkId::new("provider", &id), &config, |bench, &config| {
                bench.iter(|| {
                    provider::dilated_conv(&ctx, &once, config, &src, &weights, &mut dst).unwrap()
                })
            });

            let pipe = TiledPipeline::new(config, None, None).unwrap();
            group.bench_with_input(BenchmarkId::new("tiled", &id), &config, |bench, _| {
                bench.iter(|| pipe.run(&src, &weights, &mut dst).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_conv_bn(c: &mut Criterion) {
    let mut group = c.benchmark_group("conv_bn");
    group.sample_size(10);

    let ctx = ExecutionContext::new(None).unwrap();
    let once = BenchmarkHarness::new(0, 1, 1).unwrap();
    let config = ConvConfig::square(2, 64, 64, 48, 32, 3, 15);
    let (src, weights, mut dst) = inputs(&config);

    group.bench_function("provider", |bench| {
        bench.iter(|| {
            provider::conv_bn(&ctx, &once, config, 1e-9, &src, &weights, &mut dst).unwrap()
        })
    });
    let pipe = TiledPipeline::new(config, Some(1e-9), None).unwrap();
    group.bench_function("tiled", |bench| {
        bench.iter(|| pipe.run(&src, &weights, &mut dst).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_dilated_conv, bench_conv_bn);
criterion_main!(benches);
