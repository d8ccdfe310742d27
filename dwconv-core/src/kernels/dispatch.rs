use crate::shape::{Bhwc, div_round_up};

use serde::Serialize;
use std::fmt;

/// Unsigned 3-component extent (thread-group size or group count).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Uint3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Uint3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn product(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl fmt::Display for Uint3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Thread-group extent and number of groups for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchSize {
    pub group_size: Uint3,
    pub groups: Uint3,
}

impl DispatchSize {
    /// Total grid extent covered by the dispatch (may overhang the work grid).
    pub fn threads(&self) -> Uint3 {
        Uint3::new(
            self.group_size.x * self.groups.x,
            self.group_size.y * self.groups.y,
            self.group_size.z * self.groups.z,
        )
    }
}

const DEFAULT_GROUP_SIZE: Uint3 = Uint3::new(8, 4, 1);
const NARROW_GRID_X: u32 = 4;

/// Work grid of the 2x2-tile kernel: one invocation per tile and slice.
pub fn depthwise_conv3x3_grid(dst: &Bhwc) -> Uint3 {
    Uint3::new(div_round_up(dst.w, 2), div_round_up(dst.h, 2), dst.slices())
}

/// Size the dispatch for a destination shape.
///
/// Groups default to 8x4x1. Narrow grids (at most four tiles across) use
/// four-wide groups and, when the slice count is even, pack two slices per
/// group.
pub fn depthwise_conv3x3_dispatch(dst: &Bhwc) -> DispatchSize {
    let grid = depthwise_conv3x3_grid(dst);
    let mut group_size = DEFAULT_GROUP_SIZE;
    if grid.x <= NARROW_GRID_X {
        group_size.x = 4;
        group_size.z = if grid.z % 2 == 0 { 2 } else { 1 };
    }
    let groups = Uint3::new(
        div_round_up(grid.x, group_size.x),
        div_round_up(grid.y, group_size.y),
        div_round_up(grid.z, group_size.z),
    );
    DispatchSize { group_size, groups }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_halves_spatial_and_packs_channels() {
        assert_eq!(depthwise_conv3x3_grid(&Bhwc::new(1, 4, 8, 4)), Uint3::new(4, 2, 1));
        assert_eq!(depthwise_conv3x3_grid(&Bhwc::new(1, 5, 9, 13)), Uint3::new(5, 3, 4));
    }

    #[test]
    fn narrow_grid_with_odd_slices_keeps_single_slice_groups() {
        let dispatch = depthwise_conv3x3_dispatch(&Bhwc::new(1, 4, 8, 4));
        assert_eq!(dispatch.group_size, Uint3::new(4, 4, 1));
        assert_eq!(dispatch.groups, Uint3::new(1, 1, 1));
    }

    #[test]
    fn narrow_grid_with_even_slices_packs_two_slices() {
        let dispatch = depthwise_conv3x3_dispatch(&Bhwc::new(1, 4, 8, 8));
        assert_eq!(dispatch.group_size, Uint3::new(4, 4, 2));
        assert_eq!(dispatch.groups, Uint3::new(1, 1, 1));

        let dispatch = depthwise_conv3x3_dispatch(&Bhwc::new(1, 16, 6, 32));
        assert_eq!(dispatch.group_size, Uint3::new(4, 4, 2));
        assert_eq!(dispatch.groups, Uint3::new(1, 2, 4));
    }

    #[test]
    fn wide_grid_uses_default_groups() {
        let dispatch = depthwise_conv3x3_dispatch(&Bhwc::new(1, 20, 10, 8));
        // grid = (5, 10, 2)
        assert_eq!(dispatch.group_size, Uint3::new(8, 4, 1));
        assert_eq!(dispatch.groups, Uint3::new(1, 3, 2));
        assert_eq!(dispatch.threads(), Uint3::new(8, 12, 2));
    }

    #[test]
    fn dispatch_covers_every_tile() {
        for (h, w, c) in [(1, 1, 1), (3, 7, 5), (17, 33, 12), (2, 9, 64), (64, 64, 3)] {
            let dst = Bhwc::new(1, h, w, c);
            let grid = depthwise_conv3x3_grid(&dst);
            let threads = depthwise_conv3x3_dispatch(&dst).threads();
            assert!(threads.x >= grid.x && threads.y >= grid.y, "{dst}");
            // The kernel has no slice guard, so z must match exactly.
            assert_eq!(threads.z, grid.z, "{dst}");
        }
    }
}
