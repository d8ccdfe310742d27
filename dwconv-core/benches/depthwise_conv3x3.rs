use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use dwconv_core::kernels::{KernelSimulator, encode_weights, reorder_weights};
use dwconv_core::{
    Bhwc, DepthwiseConv2dAttributes, Ohwi, Padding2d, ShapeMap, ValueId, WeightsTensor,
    depthwise_conv2d_reference, depthwise_conv3x3_stride1x1, synthetic_values, to_phwc4,
};
use dwconv_utils::{Precision, RuntimeOptions};

const SHAPES: &[Bhwc] = &[
    Bhwc::new(1, 56, 56, 32),
    Bhwc::new(1, 112, 112, 16),
    Bhwc::new(1, 14, 14, 256),
];

fn attributes(channels: u32) -> DepthwiseConv2dAttributes {
    let shape = Ohwi::new(1, 3, 3, channels);
    let weights = WeightsTensor::new(shape, synthetic_values(shape.elements(), 1))
        .expect("synthetic weights match their shape");
    DepthwiseConv2dAttributes::new(
        weights,
        synthetic_values(channels as usize, 2),
        Padding2d::symmetric(1, 1),
    )
}

fn benchmark_weight_upload(c: &mut Criterion) {
    let mut group = c.benchmark_group("depthwise_conv3x3_weights");
    for channels in [32u32, 256, 1024] {
        let attr = attributes(channels);
        for precision in [Precision::Fp32, Precision::Fp16] {
            group.bench_with_input(
                BenchmarkId::new(precision.as_label(), channels),
                &attr,
                |b, attr| b.iter(|| encode_weights(&reorder_weights(black_box(attr)), precision)),
            );
        }
    }
    group.finish();
}

fn benchmark_simulation(c: &mut Criterion) {
    let options = RuntimeOptions::default();
    let mut group = c.benchmark_group("depthwise_conv3x3_simulate");
    group.sample_size(20);
    for shape in SHAPES {
        let attr = attributes(shape.c);
        let task = depthwise_conv3x3_stride1x1(0, ValueId(0), ValueId(1), &attr, &options)
            .expect("supported attributes");
        let resolved = task
            .resolve(&ShapeMap::from([(ValueId(0), *shape)]))
            .expect("resolvable shape");
        let simulator =
            KernelSimulator::new(&task, &resolved, &options).expect("simulator buffers");
        let input = synthetic_values(shape.elements().unwrap_or(0), 3);
        let packed = to_phwc4(&input, shape).expect("single batch input");

        group.bench_with_input(
            BenchmarkId::new("tiled", shape.to_string()),
            &packed,
            |b, packed| b.iter(|| simulator.run(black_box(packed)).expect("simulation")),
        );
        group.bench_with_input(
            BenchmarkId::new("reference", shape.to_string()),
            &input,
            |b, input| {
                b.iter(|| {
                    depthwise_conv2d_reference(black_box(input), shape, &attr).expect("reference")
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, benchmark_weight_upload, benchmark_simulation);
criterion_main!(benches);
