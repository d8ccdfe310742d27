//! Plan and verification reports emitted by the CLI.

use anyhow::Result;
use dwconv_core::kernels::{DepthwiseConv3x3Uniforms, KernelSimulator};
use dwconv_core::{
    ActivationKind, Bhwc, ComputeTaskDescriptor, DepthwiseConv2dAttributes, Ohwi, Padding2d,
    ResolvedTask, ShapeMap, TaskSummary, ValueId, WeightsTensor, depthwise_conv2d_reference,
    from_phwc4, synthetic_values, to_phwc4,
};
use dwconv_utils::{Phase, Precision, RuntimeOptions, timing_guard};
use log::{Level, debug};
use serde::Serialize;

pub const INPUT_ID: ValueId = ValueId(0);
pub const OUTPUT_ID: ValueId = ValueId(1);

/// Deterministic 3x3 attributes for a `channels`-wide input.
pub fn synthetic_attributes(
    channels: u32,
    padding: Padding2d,
    seed: u32,
) -> Result<DepthwiseConv2dAttributes> {
    let shape = Ohwi::new(1, 3, 3, channels);
    let weights = WeightsTensor::new(shape, synthetic_values(shape.elements(), seed))?;
    let bias = synthetic_values(channels as usize, seed.wrapping_add(1));
    Ok(DepthwiseConv2dAttributes::new(weights, bias, padding))
}

pub fn default_tolerance(precision: Precision) -> f32 {
    match precision {
        Precision::Fp32 => 1e-4,
        Precision::Fp16 => 2e-2,
    }
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub runtime: RuntimeOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuse: Option<ActivationKind>,
    pub task: TaskSummary,
    pub resolved: ResolvedTask,
    /// The uniform block as the shader reads it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uniform_words: Option<[i32; 16]>,
}

pub fn build_plan(
    task: &ComputeTaskDescriptor,
    input_shape: &Bhwc,
    options: &RuntimeOptions,
    fuse: Option<ActivationKind>,
) -> Result<PlanReport> {
    let resolved = task.resolve(&ShapeMap::from([(INPUT_ID, *input_shape)]))?;
    let uniform_words = resolved
        .uniform_buffers
        .first()
        .map(Vec::as_slice)
        .and_then(DepthwiseConv3x3Uniforms::from_bytes)
        .map(|uniforms| uniforms.words());
    Ok(PlanReport {
        runtime: *options,
        fuse,
        task: task.summary(),
        resolved,
        uniform_words,
    })
}

#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub input_shape: Bhwc,
    pub output_shape: Bhwc,
    pub precision: Precision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuse: Option<ActivationKind>,
    pub invocations: u64,
    pub max_abs_diff: f32,
    pub tolerance: f32,
    pub passed: bool,
}

/// Simulate the kernel on a synthetic input and compare with the reference.
pub fn verify(
    task: &ComputeTaskDescriptor,
    attr: &DepthwiseConv2dAttributes,
    input_shape: &Bhwc,
    options: &RuntimeOptions,
    fuse: Option<ActivationKind>,
    seed: u32,
    tolerance: f32,
) -> Result<VerifyReport> {
    let resolved = task.resolve(&ShapeMap::from([(INPUT_ID, *input_shape)]))?;
    let input = synthetic_values(
        input_shape.elements().unwrap_or(0),
        seed.wrapping_add(0x5eed),
    );

    let simulator = KernelSimulator::new(task, &resolved, options)?.with_activation(fuse);
    let packed = simulator.run(&to_phwc4(&input, input_shape)?)?;
    let actual = from_phwc4(&packed, &resolved.output_shape)?;

    let expected = {
        let _guard = timing_guard(task.id, Phase::Reference, "", Level::Debug);
        let (mut expected, _) = depthwise_conv2d_reference(&input, input_shape, attr)?;
        if let Some(kind) = fuse {
            expected.iter_mut().for_each(|v| *v = kind.apply(*v));
        }
        expected
    };

    let max_abs_diff = actual
        .iter()
        .zip(&expected)
        .map(|(a, e)| (a - e).abs())
        .fold(0.0f32, f32::max);
    debug!(
        "verified {} values, max abs diff {max_abs_diff:e}",
        actual.len()
    );

    Ok(VerifyReport {
        input_shape: *input_shape,
        output_shape: resolved.output_shape,
        precision: options.storage_precision,
        fuse,
        invocations: simulator.dispatch().threads().product(),
        max_abs_diff,
        tolerance,
        passed: max_abs_diff <= tolerance,
    })
}
