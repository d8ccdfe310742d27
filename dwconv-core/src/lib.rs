//! Depthwise 3x3 convolution for the Metal compute backend.
//!
//! This crate assembles the compute task for depthwise convolutions with a
//! 3x3 kernel, unit stride, unit dilation and channel multiplier 1: shader
//! source with linking slots, reordered filter data, a uniform block and a
//! dispatch size derived from the resolved shapes. A host simulator and a
//! naive reference convolution are provided to verify the task without a GPU.

/// Convolution attributes and output shape inference.
pub mod attributes;
/// Kernel assembly, buffers and dispatch sizing.
pub mod kernels;
/// Reference convolution and slice-packed layout conversion.
pub mod reference;
/// Tensor shapes and value ids.
pub mod shape;
/// Task descriptors and deferred resolution.
pub mod task;

pub use attributes::{DepthwiseConv2dAttributes, WeightsTensor, calculate_output_shape};
pub use kernels::{
    ActivationKind, DispatchSize, FusionFragment, KernelSimulator, Uint3,
    check_depthwise_conv3x3_stride1x1_support, depthwise_conv3x3_stride1x1, run_depthwise_conv3x3,
};
pub use reference::{depthwise_conv2d_reference, from_phwc4, synthetic_values, to_phwc4};
pub use shape::{Bhwc, Hw, Ohwi, Padding2d, ShapeMap, ValueId};
pub use task::{ComputeTaskDescriptor, ResolveError, ResolvedTask, TaskSummary};
