//! Filter layout for the 3x3 depthwise kernel.
//!
//! For every slice of four channels the buffer holds nine taps in
//! column-major kernel order (`x` outer, `y` inner), each tap being four
//! consecutive channel values, followed by four bias values. The shader reads
//! slice `z` at `z * 10` packed vectors, so this order and the template's tap
//! indices must change together.

use crate::attributes::DepthwiseConv2dAttributes;
use crate::shape::div_round_up;

use anyhow::Result;
use dwconv_utils::Precision;
use half::f16;

pub const KERNEL_SIZE: u32 = 3;
/// Packed vectors per slice: nine taps and one bias.
pub const VECTORS_PER_SLICE: usize = (KERNEL_SIZE * KERNEL_SIZE) as usize + 1;

/// Reorder weights and bias into the per-slice layout the kernel reads.
///
/// Channels past the weight or bias extent are zero-filled.
pub fn reorder_weights(attr: &DepthwiseConv2dAttributes) -> Vec<f32> {
    let channels = attr.weights.shape.i;
    let slices = div_round_up(channels, 4);
    let mut reordered = Vec::with_capacity(VECTORS_PER_SLICE * slices as usize * 4);

    for s in 0..slices {
        for x in 0..KERNEL_SIZE {
            for y in 0..KERNEL_SIZE {
                reordered.extend((0..4).map(|i| {
                    let ch = s * 4 + i;
                    if ch < channels {
                        attr.weights.at(0, y, x, ch)
                    } else {
                        0.0
                    }
                }));
            }
        }
        reordered.extend((0..4).map(|i| attr.bias_at(s * 4 + i)));
    }

    reordered
}

/// Encode host floats into the immutable buffer representation.
pub fn encode_weights(values: &[f32], precision: Precision) -> Vec<u8> {
    match precision {
        Precision::Fp32 => bytemuck::cast_slice::<f32, u8>(values).to_vec(),
        Precision::Fp16 => {
            let halves: Vec<f16> = values.iter().copied().map(f16::from_f32).collect();
            bytemuck::cast_slice::<f16, u8>(&halves).to_vec()
        }
    }
}

/// Decode an immutable buffer produced by [`encode_weights`].
pub fn decode_weights(bytes: &[u8], precision: Precision) -> Result<Vec<f32>> {
    let scalar = precision.scalar_size();
    anyhow::ensure!(
        bytes.len() % scalar == 0,
        "{} weight buffer length {} is not a multiple of {scalar}",
        precision.as_label(),
        bytes.len()
    );
    let values = match precision {
        Precision::Fp32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Precision::Fp16 => bytes
            .chunks_exact(2)
            .map(|c| f16::from_ne_bytes([c[0], c[1]]).to_f32())
            .collect(),
    };
    Ok(values)
}
