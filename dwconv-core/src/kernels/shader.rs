//! Metal source for the 3x3 stride-1 depthwise kernel and its linking.

use super::fusion::{FusionFragment, LinkSite};
use dwconv_utils::{Precision, RuntimeOptions};

/// Kernel template. Each invocation produces a 2x2 tile of one output slice.
///
/// Slot `$0` takes module-level declarations, `$1` extra entry arguments and
/// `$2` the code run before each of the four stores. Filter taps are read at
/// `gid_z * 10`: nine taps followed by the bias, see
/// [`reorder_weights`](super::weights::reorder_weights).
const DEPTHWISE_CONV3X3_METAL: &str = include_str!("depthwise_conv3x3.metal");

pub const DECLARATIONS_SLOT: &str = "$0";
pub const ARGUMENTS_SLOT: &str = "$1";
pub const LINKABLE_CODE_SLOT: &str = "$2";

/// Returns the unlinked kernel template.
pub fn depthwise_conv3x3_source() -> String {
    DEPTHWISE_CONV3X3_METAL.to_string()
}

/// Substitute the three slots of `template`.
///
/// `bindings` are the task's own entry arguments, already comma-terminated;
/// the fragment's arguments follow them in `$1`.
pub fn link_shader(template: &str, bindings: &str, fragment: &FusionFragment) -> String {
    let mut arguments = bindings.to_string();
    arguments.push_str(&fragment.arguments_source());
    template
        .replace(LINKABLE_CODE_SLOT, &fragment.code(&LinkSite::DEFAULT))
        .replace(ARGUMENTS_SLOT, &arguments)
        .replace(DECLARATIONS_SLOT, fragment.declarations())
}

/// Type macros the templates are written against (`FLT4`, `ACCUM_FLT4`, ...).
pub fn shader_defines(options: &RuntimeOptions) -> String {
    let storage = scalar_type(options.storage_precision);
    let accum = scalar_type(options.accumulator_precision);
    format!(
        "#define FLT {storage}\n\
         #define FLT2 {storage}2\n\
         #define FLT4 {storage}4\n\
         #define ACCUM_FLT {accum}\n\
         #define ACCUM_FLT2 {accum}2\n\
         #define ACCUM_FLT4 {accum}4\n"
    )
}

fn scalar_type(precision: Precision) -> &'static str {
    match precision {
        Precision::Fp32 => "float",
        Precision::Fp16 => "half",
    }
}
