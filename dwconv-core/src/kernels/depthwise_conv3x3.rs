//! Specialized depthwise convolution: 3x3 kernel, unit stride and dilation,
//! channel multiplier 1.

use super::dispatch::{DispatchSize, depthwise_conv3x3_dispatch};
use super::shader::depthwise_conv3x3_source;
use super::uniforms::DepthwiseConv3x3Uniforms;
use super::weights::{KERNEL_SIZE, encode_weights, reorder_weights};
use crate::attributes::{DepthwiseConv2dAttributes, calculate_output_shape};
use crate::shape::{Bhwc, ShapeMap, ValueId};
use crate::task::{
    ComputeTaskDescriptor, ImmutableBufferDescriptor, InputBufferDescriptor,
    OutputBufferDescriptor, ResolveError, UniformBufferDescriptor, shape_of,
};

use anyhow::Result;
use dwconv_utils::{Phase, RuntimeOptions, timing_guard};
use log::{Level, debug, trace};
use std::sync::Arc;

/// Returns `true` when `attr` can run on the specialized kernel.
pub fn check_depthwise_conv3x3_stride1x1_support(attr: &DepthwiseConv2dAttributes) -> bool {
    unsupported_reason(attr).is_none()
}

/// Explain why `attr` cannot use the specialized kernel.
pub fn unsupported_reason(attr: &DepthwiseConv2dAttributes) -> Option<String> {
    let weights = &attr.weights.shape;
    if weights.o != 1 {
        return Some(format!("channel multiplier is {}, expected 1", weights.o));
    }
    if weights.h != KERNEL_SIZE || weights.w != KERNEL_SIZE {
        return Some(format!("kernel is {}x{}, expected 3x3", weights.h, weights.w));
    }
    if attr.strides.h != 1 || attr.strides.w != 1 {
        return Some(format!(
            "stride is {}x{}, expected 1x1",
            attr.strides.h, attr.strides.w
        ));
    }
    if attr.dilations.h != 1 || attr.dilations.w != 1 {
        return Some(format!(
            "dilation is {}x{}, expected 1x1",
            attr.dilations.h, attr.dilations.w
        ));
    }
    None
}

/// Build the compute task for a 3x3 stride-1 depthwise convolution.
///
/// Weights and bias share one immutable buffer stored at
/// `options.storage_precision`. The output shape, uniforms and dispatch size
/// are computed lazily from the shapes handed to
/// [`ComputeTaskDescriptor::resolve`].
pub fn depthwise_conv3x3_stride1x1(
    id: u32,
    input_id: ValueId,
    output_id: ValueId,
    attr: &DepthwiseConv2dAttributes,
    options: &RuntimeOptions,
) -> Result<ComputeTaskDescriptor> {
    if let Some(reason) = unsupported_reason(attr) {
        anyhow::bail!("depthwise 3x3 stride 1 kernel cannot run these attributes: {reason}");
    }

    let weights = {
        let mut guard = timing_guard(id, Phase::Assemble, "weight reorder", Level::Debug);
        let weights = encode_weights(&reorder_weights(attr), options.storage_precision);
        if guard.is_active() {
            guard.set_detail(format!("weight reorder ({} bytes)", weights.len()));
        }
        weights
    };
    debug!(
        "task {id}: depthwise conv 3x3 {input_id} -> {output_id}, {} channels, {} weight bytes ({})",
        attr.weights.shape.i,
        weights.len(),
        options.storage_precision
    );

    let output_attr = attr.clone();
    let dimensions = Arc::new(move |shapes: &ShapeMap| -> Result<Bhwc, ResolveError> {
        let input = shape_of(shapes, input_id)?;
        if input.b != 1 {
            return Err(ResolveError::ShapeInference {
                id: output_id,
                reason: format!("kernel processes a single batch, input is {input}"),
            });
        }
        if input.c != output_attr.weights.shape.i {
            return Err(ResolveError::ShapeInference {
                id: output_id,
                reason: format!(
                    "input {input} has {} channels, weights expect {}",
                    input.c, output_attr.weights.shape.i
                ),
            });
        }
        calculate_output_shape(&input, &output_attr).map_err(|err| {
            ResolveError::ShapeInference {
                id: output_id,
                reason: format!("{err:#}"),
            }
        })
    });

    let uniform_attr = attr.clone();
    let uniforms = Arc::new(move |shapes: &ShapeMap| -> Result<Vec<u8>, ResolveError> {
        let src = shape_of(shapes, input_id)?;
        let dst = shape_of(shapes, output_id)?;
        Ok(DepthwiseConv3x3Uniforms::new(&src, &dst, &uniform_attr).to_bytes())
    });

    let resize = Arc::new(move |shapes: &ShapeMap| -> Result<DispatchSize, ResolveError> {
        let dst = shape_of(shapes, output_id)?;
        let dispatch = depthwise_conv3x3_dispatch(&dst);
        trace!(
            "task {id}: dst {dst} -> group size {} x groups {}",
            dispatch.group_size, dispatch.groups
        );
        Ok(dispatch)
    });

    Ok(ComputeTaskDescriptor {
        id,
        description: "DepthwiseConv3x3Stride1x1".to_string(),
        is_linkable: false,
        shader_source: depthwise_conv3x3_source(),
        input_buffers: vec![InputBufferDescriptor {
            id: input_id,
            declaration: "device FLT4* const src_buffer".to_string(),
        }],
        output_buffer: OutputBufferDescriptor {
            id: output_id,
            declaration: "device FLT4* dst_buffer".to_string(),
            dimensions,
        },
        immutable_buffers: vec![ImmutableBufferDescriptor {
            declaration: "device FLT4* const filters".to_string(),
            data: weights,
        }],
        uniform_buffers: vec![UniformBufferDescriptor {
            declaration: "constant uniforms& params".to_string(),
            data: uniforms,
        }],
        resize_function: resize,
    })
}
