//! Tensor shape primitives shared by the kernel builders.
//!
//! Extents are stored unsigned but must fit the signed 32-bit integers the
//! shaders consume; constructors that take untrusted values check this.

use anyhow::{Context, Result};
use serde::Serialize;
use std::{collections::BTreeMap, fmt};

/// Largest extent representable in a shader `int`.
pub const MAX_EXTENT: u32 = i32::MAX as u32;

/// Integer division rounding toward positive infinity.
pub const fn div_round_up(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// Opaque identifier of a tensor value in the compiled graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shapes of resolved buffers keyed by value id.
pub type ShapeMap = BTreeMap<ValueId, Bhwc>;

/// Height/width pair used for strides, dilations and padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Hw {
    pub h: u32,
    pub w: u32,
}

impl Hw {
    pub const fn new(h: u32, w: u32) -> Self {
        Self { h, w }
    }
}

impl From<(u32, u32)> for Hw {
    fn from(value: (u32, u32)) -> Self {
        Self {
            h: value.0,
            w: value.1,
        }
    }
}

/// Padding added before (`prepended`) and after (`appended`) each spatial axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Padding2d {
    pub prepended: Hw,
    pub appended: Hw,
}

impl Padding2d {
    pub const fn new(prepended: Hw, appended: Hw) -> Self {
        Self {
            prepended,
            appended,
        }
    }

    /// Same amount of padding on both sides of each axis.
    pub const fn symmetric(h: u32, w: u32) -> Self {
        Self {
            prepended: Hw::new(h, w),
            appended: Hw::new(h, w),
        }
    }
}

/// Extents of a 4D feature map in batch/height/width/channel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Bhwc {
    pub b: u32,
    pub h: u32,
    pub w: u32,
    pub c: u32,
}

impl Bhwc {
    pub const fn new(b: u32, h: u32, w: u32, c: u32) -> Self {
        Self { b, h, w, c }
    }

    /// Create a shape after checking every extent is positive and shader-sized.
    pub fn checked(b: u32, h: u32, w: u32, c: u32) -> Result<Self> {
        for (name, extent) in [("batch", b), ("height", h), ("width", w), ("channels", c)] {
            anyhow::ensure!(extent > 0, "{name} must be > 0");
            anyhow::ensure!(
                extent <= MAX_EXTENT,
                "{name} ({extent}) exceeds the 32-bit shader limit"
            );
        }
        let shape = Self { b, h, w, c };
        let elements = shape.elements().context("shape element count overflows")?;
        anyhow::ensure!(
            elements <= MAX_EXTENT as usize,
            "shape {shape} holds {elements} elements, more than a shader can index"
        );
        Ok(shape)
    }

    /// Number of 4-channel slices.
    pub const fn slices(&self) -> u32 {
        div_round_up(self.c, 4)
    }

    /// Number of spatial positions in one slice.
    pub const fn plane(&self) -> u32 {
        self.h * self.w
    }

    pub fn elements(&self) -> Option<usize> {
        [self.h, self.w, self.c]
            .iter()
            .try_fold(self.b as usize, |acc, &d| acc.checked_mul(d as usize))
    }

    /// Offset of `(b, y, x, ch)` in a densely packed BHWC buffer.
    pub fn linear_index(&self, b: u32, y: u32, x: u32, ch: u32) -> usize {
        debug_assert!(b < self.b && y < self.h && x < self.w && ch < self.c);
        ((b as usize * self.h as usize + y as usize) * self.w as usize + x as usize)
            * self.c as usize
            + ch as usize
    }
}

impl fmt::Display for Bhwc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}x{}", self.b, self.h, self.w, self.c)
    }
}

/// Weight tensor extents: output multiplier, kernel height/width, input channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Ohwi {
    pub o: u32,
    pub h: u32,
    pub w: u32,
    pub i: u32,
}

impl Ohwi {
    pub const fn new(o: u32, h: u32, w: u32, i: u32) -> Self {
        Self { o, h, w, i }
    }

    pub fn elements(&self) -> usize {
        self.o as usize * self.h as usize * self.w as usize * self.i as usize
    }

    /// Offset of `(o, y, x, i)` in a densely packed OHWI buffer.
    pub fn linear_index(&self, o: u32, y: u32, x: u32, i: u32) -> usize {
        debug_assert!(o < self.o && y < self.h && x < self.w && i < self.i);
        ((o as usize * self.h as usize + y as usize) * self.w as usize + x as usize)
            * self.i as usize
            + i as usize
    }
}
