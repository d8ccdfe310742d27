use crate::attributes::DepthwiseConv2dAttributes;
use crate::shape::Bhwc;

use bytemuck::{Pod, Zeroable};

/// Host mirror of the template's `uniforms` struct.
///
/// Sixteen `int`s: source and destination `(w, h, w * h, slices)`, the
/// negated leading padding, then six alignment words. Field order and size
/// are shared with the shader and must not change on one side only.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DepthwiseConv3x3Uniforms {
    pub src_size: [i32; 4],
    pub dst_size: [i32; 4],
    pub padding: [i32; 2],
    align0: [i32; 2],
    align1: [i32; 4],
}

const _: () = assert!(std::mem::size_of::<DepthwiseConv3x3Uniforms>() == 64);

fn size_words(shape: &Bhwc) -> [i32; 4] {
    [
        shape.w as i32,
        shape.h as i32,
        shape.plane() as i32,
        shape.slices() as i32,
    ]
}

impl DepthwiseConv3x3Uniforms {
    pub fn new(src: &Bhwc, dst: &Bhwc, attr: &DepthwiseConv2dAttributes) -> Self {
        Self {
            src_size: size_words(src),
            dst_size: size_words(dst),
            padding: [
                -(attr.padding.prepended.w as i32),
                -(attr.padding.prepended.h as i32),
            ],
            ..Self::zeroed()
        }
    }

    /// The block as the sixteen integers the shader sees.
    pub fn words(&self) -> [i32; 16] {
        bytemuck::cast(*self)
    }

    /// Rebuild the block from bytes produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::bytes_of(self).to_vec()
    }
}
