//! Depthwise convolution attributes and output shape inference.

use crate::shape::{Bhwc, Hw, Ohwi, Padding2d};

use anyhow::{Context, Result};

/// Convolution weights in OHWI layout.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightsTensor {
    pub shape: Ohwi,
    pub data: Vec<f32>,
}

impl WeightsTensor {
    pub fn new(shape: Ohwi, data: Vec<f32>) -> Result<Self> {
        anyhow::ensure!(
            shape.o > 0 && shape.h > 0 && shape.w > 0 && shape.i > 0,
            "weight extents must be > 0 (got {shape:?})"
        );
        anyhow::ensure!(
            data.len() == shape.elements(),
            "weights expected {} values, got {}",
            shape.elements(),
            data.len()
        );
        Ok(Self { shape, data })
    }

    /// Value at `(o, y, x, i)`.
    pub fn at(&self, o: u32, y: u32, x: u32, i: u32) -> f32 {
        self.data[self.shape.linear_index(o, y, x, i)]
    }
}

/// Attributes of a depthwise 2D convolution.
///
/// `bias` may be shorter than the number of output channels (including
/// empty); missing entries read as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthwiseConv2dAttributes {
    pub weights: WeightsTensor,
    pub bias: Vec<f32>,
    pub strides: Hw,
    pub dilations: Hw,
    pub padding: Padding2d,
}

impl DepthwiseConv2dAttributes {
    /// Unit stride, unit dilation attributes.
    pub fn new(weights: WeightsTensor, bias: Vec<f32>, padding: Padding2d) -> Self {
        Self {
            weights,
            bias,
            strides: Hw::new(1, 1),
            dilations: Hw::new(1, 1),
            padding,
        }
    }

    pub fn with_strides(mut self, strides: Hw) -> Self {
        self.strides = strides;
        self
    }

    pub fn with_dilations(mut self, dilations: Hw) -> Self {
        self.dilations = dilations;
        self
    }

    /// Bias for output channel `ch`, zero beyond the stored vector.
    pub fn bias_at(&self, ch: u32) -> f32 {
        self.bias.get(ch as usize).copied().unwrap_or(0.0)
    }
}

fn output_extent(
    input: u32,
    pre: u32,
    post: u32,
    kernel: u32,
    stride: u32,
    dilation: u32,
) -> Result<u32> {
    anyhow::ensure!(stride > 0, "stride must be > 0");
    anyhow::ensure!(dilation > 0, "dilation must be > 0");
    let dilated_kernel = (kernel - 1) * dilation + 1;
    let numerator = input
        .checked_add(pre)
        .and_then(|v| v.checked_add(post))
        .context("padding overflowed u32")?
        .checked_sub(dilated_kernel)
        .context("kernel larger than padded input")?;
    Ok(numerator / stride + 1)
}

/// Infer the output shape of a depthwise convolution applied to `input`.
pub fn calculate_output_shape(input: &Bhwc, attr: &DepthwiseConv2dAttributes) -> Result<Bhwc> {
    let kernel = &attr.weights.shape;
    let h = output_extent(
        input.h,
        attr.padding.prepended.h,
        attr.padding.appended.h,
        kernel.h,
        attr.strides.h,
        attr.dilations.h,
    )
    .context("invalid depthwise convolution height")?;
    let w = output_extent(
        input.w,
        attr.padding.prepended.w,
        attr.padding.appended.w,
        kernel.w,
        attr.strides.w,
        attr.dilations.w,
    )
    .context("invalid depthwise convolution width")?;
    Bhwc::checked(input.b, h, w, kernel.o * kernel.i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr_3x3(channels: u32, padding: Padding2d) -> DepthwiseConv2dAttributes {
        let shape = Ohwi::new(1, 3, 3, channels);
        let weights = WeightsTensor::new(shape, vec![1.0; shape.elements()]).unwrap();
        DepthwiseConv2dAttributes::new(weights, vec![0.0; channels as usize], padding)
    }

    #[test]
    fn same_padding_preserves_spatial_extent() {
        let attr = attr_3x3(8, Padding2d::symmetric(1, 1));
        let out = calculate_output_shape(&Bhwc::new(1, 7, 5, 8), &attr).unwrap();
        assert_eq!(out, Bhwc::new(1, 7, 5, 8));
    }

    #[test]
    fn valid_padding_shrinks_by_two() {
        let attr = attr_3x3(3, Padding2d::default());
        let out = calculate_output_shape(&Bhwc::new(2, 10, 6, 3), &attr).unwrap();
        assert_eq!(out, Bhwc::new(2, 8, 4, 3));
    }

    #[test]
    fn stride_and_dilation_follow_the_usual_formula() {
        let attr = attr_3x3(4, Padding2d::symmetric(2, 2))
            .with_strides(Hw::new(2, 1))
            .with_dilations(Hw::new(1, 2));
        let out = calculate_output_shape(&Bhwc::new(1, 9, 9, 4), &attr).unwrap();
        // h: (9 + 4 - 3) / 2 + 1, w: (9 + 4 - 5) / 1 + 1
        assert_eq!(out, Bhwc::new(1, 6, 9, 4));
    }

    #[test]
    fn rejects_input_smaller_than_kernel() {
        let attr = attr_3x3(4, Padding2d::default());
        let err = calculate_output_shape(&Bhwc::new(1, 2, 8, 4), &attr).unwrap_err();
        assert!(format!("{err:#}").contains("kernel larger than padded input"));
    }

    #[test]
    fn weights_length_is_validated() {
        assert!(WeightsTensor::new(Ohwi::new(1, 3, 3, 2), vec![0.0; 17]).is_err());
        assert!(WeightsTensor::new(Ohwi::new(1, 3, 0, 2), Vec::new()).is_err());
    }

    #[test]
    fn missing_bias_reads_as_zero() {
        let mut attr = attr_3x3(4, Padding2d::default());
        attr.bias = vec![0.5, 1.5];
        assert_eq!(attr.bias_at(1), 1.5);
        assert_eq!(attr.bias_at(3), 0.0);
    }
}
