//! Command-line argument definitions for dwconv-cli.

use clap::{ArgAction, Parser, ValueEnum};
use dwconv_core::{ActivationKind, Bhwc, Hw, Padding2d};
use dwconv_utils::Precision;
use std::path::PathBuf;

/// Build the depthwise 3x3 stride-1 compute task for a tensor shape and
/// print its shader, its resolved dispatch plan, or a CPU verification.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct DwconvArgs {
    /// Input tensor shape, e.g. `1x32x32x16`.
    #[arg(long, value_name = "BxHxWxC", value_parser = parse_shape)]
    pub input_shape: Bhwc,

    /// Leading padding `PH,PW`, optionally followed by trailing `AH,AW`
    /// (defaults to the leading values).
    #[arg(long, value_name = "PH,PW[,AH,AW]", default_value = "1,1", value_parser = parse_padding)]
    pub padding: Padding2d,

    /// Storage precision for weights and feature maps (defaults to settings file).
    #[arg(long, value_enum)]
    pub precision: Option<PrecisionArg>,

    /// Elementwise activation linked into the kernel's stores.
    #[arg(long, value_enum, default_value_t = FuseArg::None)]
    pub fuse: FuseArg,

    /// What to produce.
    #[arg(long, value_enum, default_value_t = EmitMode::Plan)]
    pub emit: EmitMode,

    /// Optional settings JSON.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the result to a file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Seed for the synthetic weights and input tensor.
    #[arg(long, default_value_t = 0)]
    pub seed: u32,

    /// Largest accepted difference in `verify` mode (defaults depend on precision).
    #[arg(long)]
    pub tolerance: Option<f32>,

    /// Enable telemetry timing logs (defaults to settings file).
    #[arg(long, action = ArgAction::SetTrue)]
    pub telemetry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PrecisionArg {
    Fp32,
    Fp16,
}

impl From<PrecisionArg> for Precision {
    fn from(value: PrecisionArg) -> Self {
        match value {
            PrecisionArg::Fp32 => Precision::Fp32,
            PrecisionArg::Fp16 => Precision::Fp16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FuseArg {
    None,
    Relu,
    Relu6,
    Sigmoid,
}

impl FuseArg {
    pub fn activation(self) -> Option<ActivationKind> {
        match self {
            FuseArg::None => None,
            FuseArg::Relu => Some(ActivationKind::Relu),
            FuseArg::Relu6 => Some(ActivationKind::Relu6),
            FuseArg::Sigmoid => Some(ActivationKind::Sigmoid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmitMode {
    /// Linked Metal source with type defines.
    Shader,
    /// Task summary and resolved buffers as JSON.
    Plan,
    /// Run the kernel on the CPU and compare with a reference convolution.
    Verify,
}

fn parse_u32_list(value: &str, what: &str) -> Result<Vec<u32>, String> {
    value
        .split([',', 'x', 'X'])
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid {what} component '{}'", part.trim()))
        })
        .collect()
}

/// Parse `BxHxWxC`. Three components are read as `HxWxC` with batch 1.
pub fn parse_shape(value: &str) -> Result<Bhwc, String> {
    let parts = parse_u32_list(value, "shape")?;
    let (b, h, w, c) = match parts.as_slice() {
        [b, h, w, c] => (*b, *h, *w, *c),
        [h, w, c] => (1, *h, *w, *c),
        _ => return Err(format!("expected BxHxWxC, got '{value}'")),
    };
    Bhwc::checked(b, h, w, c).map_err(|err| err.to_string())
}

/// Parse `PH,PW` or `PH,PW,AH,AW`.
pub fn parse_padding(value: &str) -> Result<Padding2d, String> {
    match parse_u32_list(value, "padding")?.as_slice() {
        [h, w] => Ok(Padding2d::symmetric(*h, *w)),
        [ph, pw, ah, aw] => Ok(Padding2d::new(Hw::new(*ph, *pw), Hw::new(*ah, *aw))),
        _ => Err(format!("expected PH,PW or PH,PW,AH,AW, got '{value}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_accepts_three_or_four_components() {
        assert_eq!(parse_shape("1x8x6x5"), Ok(Bhwc::new(1, 8, 6, 5)));
        assert_eq!(parse_shape("8X6x5"), Ok(Bhwc::new(1, 8, 6, 5)));
        assert!(parse_shape("8x6").is_err());
        assert!(parse_shape("1x0x6x5").is_err());
        assert!(parse_shape("1xax6x5").is_err());
    }

    #[test]
    fn padding_defaults_trailing_to_leading() {
        assert_eq!(parse_padding("1,2"), Ok(Padding2d::symmetric(1, 2)));
        assert_eq!(
            parse_padding("0, 1, 2, 3"),
            Ok(Padding2d::new(Hw::new(0, 1), Hw::new(2, 3)))
        );
        assert!(parse_padding("1").is_err());
    }

    #[test]
    fn cli_parses_defaults() {
        let args = DwconvArgs::try_parse_from(["dwconv-cli", "--input-shape", "1x4x4x4"]).unwrap();
        assert_eq!(args.emit, EmitMode::Plan);
        assert_eq!(args.fuse.activation(), None);
        assert_eq!(args.padding, Padding2d::symmetric(1, 1));
        assert!(args.precision.is_none());
    }
}
