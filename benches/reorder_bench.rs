//! Layout conversion benchmarks for the activation and weight layouts the
//! convolution plans move between.
//!
//! Run with: cargo bench --bench reorder_bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dilconv::{random_input, reorder_into, Buffer, LayoutTag, TensorDescriptor};
use rand::{rngs::StdRng, SeedableRng};

fn bench_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("reorder");
    group.sample_size(20);

    let cases: [(&str, [usize; 4], LayoutTag, LayoutTag); 4] = [
        ("nhwc_to_nchw", [5, 128, 80, 100], LayoutTag::Nhwc, LayoutTag::Nchw),
        ("nchw_to_nhwc", [5, 128, 80, 100], LayoutTag::Nchw, LayoutTag::Nhwc),
        ("ihwo_to_hwio", [128, 128, 3, 3], LayoutTag::Ihwo, LayoutTag::Hwio),
        ("ihwo_to_oihw", [128, 128, 3, 3], LayoutTag::Ihwo, LayoutTag::Oihw),
    ];

    let mut rng = StdRng::seed_from_u64(7);
    for (name, dims, from, to) in cases {
        let src_desc = TensorDescriptor::f32(&dims, from).unwrap();
        let src = random_input(&src_desc, &mut rng).unwrap();
        let mut dst = Buffer::zeros(&src_desc.with_tag(to).unwrap()).unwrap();
        group.throughput(Throughput::Bytes(src_desc.size_in_bytes() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &dims, |bench, _| {
            bench.iter(|| reorder_into(&src, &mut dst).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reorder);
criterion_main!(benches);
