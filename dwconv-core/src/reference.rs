//! Host-side reference math and layout conversions.
//!
//! GPU buffers hold feature maps slice-packed ("PHWC4"): for each group of
//! four channels a full `h * w` plane of 4-vectors, channels past `c` padded
//! with zeros. Host tensors are dense BHWC.

use crate::attributes::{DepthwiseConv2dAttributes, calculate_output_shape};
use crate::shape::Bhwc;

use anyhow::Result;

fn ensure_single_batch(shape: &Bhwc) -> Result<()> {
    anyhow::ensure!(
        shape.b == 1,
        "slice-packed layout holds a single batch (got {shape})"
    );
    Ok(())
}

fn ensure_len(data: &[f32], expected: usize, what: &str) -> Result<()> {
    anyhow::ensure!(
        data.len() == expected,
        "{what} expected {expected} values, got {}",
        data.len()
    );
    Ok(())
}

/// Deterministic values in `[-1, 1)` for fixtures and benchmarks.
pub fn synthetic_values(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(0x9E37_79B9) | 1;
    (0..len)
        .map(|_| {
            // xorshift32
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 8) as f32 / (1u32 << 23) as f32 - 1.0
        })
        .collect()
}

/// Number of `f32`s in the slice-packed form of `shape`.
pub fn phwc4_len(shape: &Bhwc) -> usize {
    shape.slices() as usize * shape.plane() as usize * 4
}

/// Convert a dense BHWC tensor into the slice-packed layout.
pub fn to_phwc4(data: &[f32], shape: &Bhwc) -> Result<Vec<f32>> {
    ensure_single_batch(shape)?;
    ensure_len(data, shape.elements().unwrap_or(usize::MAX), "BHWC tensor")?;
    let plane = shape.plane() as usize;
    let mut packed = vec![0.0; phwc4_len(shape)];
    for y in 0..shape.h {
        for x in 0..shape.w {
            let position = (y * shape.w + x) as usize;
            for ch in 0..shape.c {
                let slice = (ch / 4) as usize;
                let lane = (ch % 4) as usize;
                packed[(slice * plane + position) * 4 + lane] =
                    data[shape.linear_index(0, y, x, ch)];
            }
        }
    }
    Ok(packed)
}

/// Convert a slice-packed tensor back to dense BHWC, dropping padded lanes.
pub fn from_phwc4(packed: &[f32], shape: &Bhwc) -> Result<Vec<f32>> {
    ensure_single_batch(shape)?;
    ensure_len(packed, phwc4_len(shape), "slice-packed tensor")?;
    let plane = shape.plane() as usize;
    let mut data = Vec::with_capacity(shape.elements().unwrap_or(0));
    for y in 0..shape.h {
        for x in 0..shape.w {
            let position = (y * shape.w + x) as usize;
            data.extend((0..shape.c).map(|ch| {
                let slice = (ch / 4) as usize;
                packed[(slice * plane + position) * 4 + (ch % 4) as usize]
            }));
        }
    }
    Ok(data)
}

/// Straightforward depthwise convolution over a dense BHWC tensor.
///
/// Handles any kernel size, stride, dilation and channel multiplier. Output
/// channel `ic * multiplier + m` reads input channel `ic` through weights
/// `(m, ky, kx, ic)`. Returns the output tensor and its shape.
pub fn depthwise_conv2d_reference(
    input: &[f32],
    input_shape: &Bhwc,
    attr: &DepthwiseConv2dAttributes,
) -> Result<(Vec<f32>, Bhwc)> {
    let weights = &attr.weights.shape;
    anyhow::ensure!(
        weights.i == input_shape.c,
        "weights expect {} input channels, tensor has {}",
        weights.i,
        input_shape.c
    );
    ensure_len(
        input,
        input_shape.elements().unwrap_or(usize::MAX),
        "input tensor",
    )?;
    let out_shape = calculate_output_shape(input_shape, attr)?;
    let mut output = vec![0.0f32; out_shape.elements().unwrap_or(0)];

    for b in 0..out_shape.b {
        for oy in 0..out_shape.h {
            for ox in 0..out_shape.w {
                for ic in 0..weights.i {
                    for m in 0..weights.o {
                        let oc = ic * weights.o + m;
                        let mut sum = attr.bias_at(oc);
                        for ky in 0..weights.h {
                            let iy = (oy * attr.strides.h + ky * attr.dilations.h) as i64
                                - attr.padding.prepended.h as i64;
                            if iy < 0 || iy >= input_shape.h as i64 {
                                continue;
                            }
                            for kx in 0..weights.w {
                                let ix = (ox * attr.strides.w + kx * attr.dilations.w) as i64
                                    - attr.padding.prepended.w as i64;
                                if ix < 0 || ix >= input_shape.w as i64 {
                                    continue;
                                }
                                let value =
                                    input[input_shape.linear_index(b, iy as u32, ix as u32, ic)];
                                sum += value * attr.weights.at(m, ky, kx, ic);
                            }
                        }
                        output[out_shape.linear_index(b, oy, ox, oc)] = sum;
                    }
                }
            }
        }
    }

    Ok((output, out_shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::WeightsTensor;
    use crate::shape::{Hw, Ohwi, Padding2d};

    #[test]
    fn phwc4_pads_last_slice_and_round_trips() {
        let shape = Bhwc::new(1, 2, 2, 5);
        let data: Vec<f32> = (0..20).map(|v| v as f32).collect();
        let packed = to_phwc4(&data, &shape).unwrap();
        assert_eq!(packed.len(), 2 * 4 * 4);
        // position (0, 0), channels 0..4
        assert_eq!(&packed[0..4], &[0.0, 1.0, 2.0, 3.0]);
        // second slice, position (0, 1): channel 4 then padding
        assert_eq!(&packed[20..24], &[9.0, 0.0, 0.0, 0.0]);
        assert_eq!(from_phwc4(&packed, &shape).unwrap(), data);
    }

    #[test]
    fn synthetic_values_are_stable_and_bounded() {
        let a = synthetic_values(256, 7);
        assert_eq!(a, synthetic_values(256, 7));
        assert_ne!(a, synthetic_values(256, 8));
        assert!(a.iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn layout_rejects_batches_and_bad_lengths() {
        assert!(to_phwc4(&[0.0; 8], &Bhwc::new(2, 1, 1, 4)).is_err());
        assert!(to_phwc4(&[0.0; 3], &Bhwc::new(1, 1, 1, 4)).is_err());
        assert!(from_phwc4(&[0.0; 3], &Bhwc::new(1, 1, 1, 4)).is_err());
    }

    #[test]
    fn reference_sums_neighbourhood_with_ones() {
        let input_shape = Bhwc::new(1, 3, 3, 1);
        let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let shape = Ohwi::new(1, 3, 3, 1);
        let weights = WeightsTensor::new(shape, vec![1.0; 9]).unwrap();
        let attr = DepthwiseConv2dAttributes::new(weights, vec![0.5], Padding2d::symmetric(1, 1));

        let (output, out_shape) = depthwise_conv2d_reference(&input, &input_shape, &attr).unwrap();
        assert_eq!(out_shape, input_shape);
        // corner (0, 0): 1 + 2 + 4 + 5, centre: everything
        assert_eq!(output[0], 12.5);
        assert_eq!(output[4], 45.5);
    }

    #[test]
    fn reference_honours_stride_and_multiplier() {
        let input_shape = Bhwc::new(1, 4, 4, 1);
        let input: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let shape = Ohwi::new(2, 1, 1, 1);
        let weights = WeightsTensor::new(shape, vec![1.0, -1.0]).unwrap();
        let attr = DepthwiseConv2dAttributes::new(weights, Vec::new(), Padding2d::default())
            .with_strides(Hw::new(2, 2));

        let (output, out_shape) = depthwise_conv2d_reference(&input, &input_shape, &attr).unwrap();
        assert_eq!(out_shape, Bhwc::new(1, 2, 2, 2));
        assert_eq!(output, vec![0.0, -0.0, 2.0, -2.0, 8.0, -8.0, 10.0, -10.0]);
    }
}
