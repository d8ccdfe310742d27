//! CPU execution of the 3x3 kernel over its real dispatch grid.
//!
//! Consumes exactly what a GPU pipeline would bind: the encoded filter
//! buffer, the uniform block and the dispatch size from
//! [`ComputeTaskDescriptor::resolve`]. Each invocation computes one 2x2
//! output tile of one slice the same way the shader does, so the result
//! exercises the weight layout, the padding masks and the tile guards.

use super::depthwise_conv3x3::depthwise_conv3x3_stride1x1;
use super::dispatch::DispatchSize;
use super::fusion::ActivationKind;
use super::uniforms::DepthwiseConv3x3Uniforms;
use super::weights::{VECTORS_PER_SLICE, decode_weights};
use crate::attributes::DepthwiseConv2dAttributes;
use crate::reference::{from_phwc4, phwc4_len, to_phwc4};
use crate::shape::{Bhwc, ShapeMap, ValueId};
use crate::task::{ComputeTaskDescriptor, ResolvedTask};

use anyhow::{Context, Result};
use dwconv_utils::{Phase, Precision, RuntimeOptions, timing_guard};
use half::f16;
use log::{Level, debug};
use rayon::prelude::*;

const FLOATS_PER_SLICE: usize = VECTORS_PER_SLICE * 4;

type Vec4 = [f32; 4];

fn quantize(value: f32, precision: Precision) -> f32 {
    match precision {
        Precision::Fp32 => value,
        Precision::Fp16 => f16::from_f32(value).to_f32(),
    }
}

/// Host replay of a resolved depthwise 3x3 task.
#[derive(Debug, Clone)]
pub struct KernelSimulator {
    task_id: u32,
    uniforms: DepthwiseConv3x3Uniforms,
    filters: Vec<f32>,
    dispatch: DispatchSize,
    storage: Precision,
    activation: Option<ActivationKind>,
}

impl KernelSimulator {
    /// Decode the buffers of `task` as resolved into `resolved`.
    pub fn new(
        task: &ComputeTaskDescriptor,
        resolved: &ResolvedTask,
        options: &RuntimeOptions,
    ) -> Result<Self> {
        let filter_bytes = task
            .immutable_buffers
            .first()
            .context("task has no filter buffer")?;
        let filters = decode_weights(&filter_bytes.data, options.storage_precision)?;
        let uniform_bytes = resolved
            .uniform_buffers
            .first()
            .context("resolved task has no uniform buffer")?;
        let uniforms = DepthwiseConv3x3Uniforms::from_bytes(uniform_bytes)
            .context("uniform buffer is not a 64-byte block")?;

        let slices = uniforms.dst_size[3] as usize;
        anyhow::ensure!(
            filters.len() >= slices * FLOATS_PER_SLICE,
            "filter buffer covers {} slices, output has {slices}",
            filters.len() / FLOATS_PER_SLICE
        );

        Ok(Self {
            task_id: resolved.task_id,
            uniforms,
            filters,
            dispatch: resolved.dispatch,
            storage: options.storage_precision,
            activation: None,
        })
    }

    /// Apply `activation` to each stored value, like a linked activation fragment.
    pub fn with_activation(mut self, activation: Option<ActivationKind>) -> Self {
        self.activation = activation;
        self
    }

    pub fn dispatch(&self) -> DispatchSize {
        self.dispatch
    }

    /// Run every invocation of the dispatch over a slice-packed source.
    ///
    /// Returns the slice-packed destination. Positions no invocation writes
    /// stay zero.
    pub fn run(&self, src: &[f32]) -> Result<Vec<f32>> {
        let [src_w, src_h, src_plane, src_slices] = self.uniforms.src_size;
        let [dst_w, dst_h, dst_plane, dst_slices] = self.uniforms.dst_size;
        anyhow::ensure!(
            src.len() == (src_plane * src_slices) as usize * 4,
            "source holds {} values, uniforms describe {src_w}x{src_h} with {src_slices} slices",
            src.len()
        );

        let threads = self.dispatch.threads();
        // No slice guard in the kernel: extra z invocations would write past the end.
        anyhow::ensure!(
            threads.z as i32 <= dst_slices && threads.z as i32 <= src_slices,
            "dispatch spans {} slices, buffers hold {dst_slices}",
            threads.z
        );

        let _guard = timing_guard(self.task_id, Phase::Simulate, "", Level::Debug);
        let src: Vec<f32> = src.iter().map(|&v| quantize(v, self.storage)).collect();
        let mut dst = vec![0.0f32; (dst_plane * dst_slices) as usize * 4];
        let slice_len = dst_plane as usize * 4;

        dst.par_chunks_mut(slice_len)
            .take(threads.z as usize)
            .enumerate()
            .for_each(|(gid_z, dst_slice)| {
                let src_slice =
                    &src[gid_z * src_plane as usize * 4..(gid_z + 1) * src_plane as usize * 4];
                let taps = &self.filters[gid_z * FLOATS_PER_SLICE..(gid_z + 1) * FLOATS_PER_SLICE];
                for uy in 0..threads.y {
                    for ux in 0..threads.x {
                        self.invocation(ux as i32 * 2, uy as i32 * 2, src_slice, taps, dst_slice);
                    }
                }
            });

        debug!(
            "simulated {} invocations into {dst_w}x{dst_h}x{dst_slices} slices",
            threads.x as u64 * threads.y as u64 * threads.z as u64
        );
        Ok(dst)
    }

    fn invocation(&self, gid_x: i32, gid_y: i32, src: &[f32], taps: &[f32], dst: &mut [f32]) {
        let [src_w, src_h, ..] = self.uniforms.src_size;
        let [dst_w, dst_h, ..] = self.uniforms.dst_size;
        if gid_x >= dst_w || gid_y >= dst_h {
            return;
        }
        let [pad_x, pad_y] = self.uniforms.padding;

        // 4x4 source window with masked loads, clamped like the shader.
        let mut window = [[[0.0f32; 4]; 4]; 4];
        for (col, column) in window.iter_mut().enumerate() {
            let sx = gid_x + pad_x + col as i32;
            let x_out = sx < 0 || sx >= src_w;
            let sx = sx.clamp(0, src_w - 1);
            for (row, value) in column.iter_mut().enumerate() {
                let sy = gid_y + pad_y + row as i32;
                if x_out || sy < 0 || sy >= src_h {
                    continue;
                }
                let sy = sy.clamp(0, src_h - 1);
                let base = (sy * src_w + sx) as usize * 4;
                value.copy_from_slice(&src[base..base + 4]);
            }
        }

        let tap = |index: usize| -> Vec4 {
            let mut out = [0.0; 4];
            out.copy_from_slice(&taps[index * 4..index * 4 + 4]);
            out
        };

        let origin = (gid_y * dst_w + gid_x) as usize;
        for dx in 0..2 {
            for dy in 0..2 {
                if gid_x + dx as i32 >= dst_w || gid_y + dy as i32 >= dst_h {
                    continue;
                }
                let mut acc = [0.0f32; 4];
                for kx in 0..3 {
                    for ky in 0..3 {
                        let sample = window[dx + kx][dy + ky];
                        let weight = tap(kx * 3 + ky);
                        for lane in 0..4 {
                            acc[lane] += sample[lane] * weight[lane];
                        }
                    }
                }
                let bias = tap(VECTORS_PER_SLICE - 1);
                let index = (origin + dy * dst_w as usize + dx) * 4;
                for lane in 0..4 {
                    let mut value = quantize(acc[lane] + bias[lane], self.storage);
                    if let Some(activation) = self.activation {
                        value = quantize(activation.apply(value), self.storage);
                    }
                    dst[index + lane] = value;
                }
            }
        }
    }
}

/// Build, resolve and simulate the 3x3 kernel on a dense BHWC tensor.
///
/// Returns the dense output and its shape.
pub fn run_depthwise_conv3x3(
    input: &[f32],
    input_shape: &Bhwc,
    attr: &DepthwiseConv2dAttributes,
    options: &RuntimeOptions,
    activation: Option<ActivationKind>,
) -> Result<(Vec<f32>, Bhwc)> {
    let input_id = ValueId(0);
    let output_id = ValueId(1);
    let task = depthwise_conv3x3_stride1x1(0, input_id, output_id, attr, options)?;
    let resolved = task.resolve(&ShapeMap::from([(input_id, *input_shape)]))?;

    let simulator = KernelSimulator::new(&task, &resolved, options)?.with_activation(activation);
    let packed = simulator.run(&to_phwc4(input, input_shape)?)?;
    debug_assert_eq!(packed.len(), phwc4_len(&resolved.output_shape));
    let output = from_phwc4(&packed, &resolved.output_shape)?;
    Ok((output, resolved.output_shape))
}
