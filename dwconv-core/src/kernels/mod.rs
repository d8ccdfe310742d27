//! The depthwise 3x3 stride-1 kernel and the pieces it is assembled from.

pub mod depthwise_conv3x3;
pub mod dispatch;
/// Elementwise code linked into the kernel's store sites.
pub mod fusion;
pub mod shader;
/// Host replay of the kernel for verification.
pub mod simulator;
pub mod uniforms;
/// Filter and bias buffer layout.
pub mod weights;

pub use depthwise_conv3x3::{
    check_depthwise_conv3x3_stride1x1_support, depthwise_conv3x3_stride1x1, unsupported_reason,
};
pub use dispatch::{DispatchSize, Uint3, depthwise_conv3x3_dispatch, depthwise_conv3x3_grid};
pub use fusion::{ActivationKind, FusionFragment, LinkSite};
pub use shader::{depthwise_conv3x3_source, link_shader, shader_defines};
pub use simulator::{KernelSimulator, run_depthwise_conv3x3};
pub use uniforms::DepthwiseConv3x3Uniforms;
pub use weights::{decode_weights, encode_weights, reorder_weights};
