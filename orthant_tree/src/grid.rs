// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! World-to-grid rasterization at the tree's maximum resolution.

use orthant_space::{Depth, GridId};

use crate::adapter::Adapter;
use crate::geometry::Aabb;
use crate::scalar::Scalar;

/// Maps world coordinates to integer grid ids at `2^max_depth` resolution.
///
/// Caches the per-axis extents of the space box and the rasterizer factors
/// `resolution / extent`; a flat axis rasterizes with factor 1 so every
/// coordinate lands in cell 0.
#[derive(Clone, Debug)]
pub(crate) struct GridLayout<const DIM: usize> {
    resolution: GridId,
    max_raster: GridId,
    space: Aabb<DIM>,
    sizes: [f64; DIM],
    factors: [f64; DIM],
    volume: f64,
}

impl<const DIM: usize> Default for GridLayout<DIM> {
    fn default() -> Self {
        Self::new(1, Aabb::new([0.0; DIM], [1.0; DIM]))
    }
}

impl<const DIM: usize> GridLayout<DIM> {
    pub(crate) fn new(max_depth: Depth, space: Aabb<DIM>) -> Self {
        let resolution: GridId = 1 << max_depth;
        let sub_division = resolution as f64;
        let mut sizes = [0.0; DIM];
        let mut factors = [0.0; DIM];
        for axis in 0..DIM {
            sizes[axis] = space.max[axis] - space.min[axis];
            factors[axis] = if sizes[axis] == 0.0 {
                1.0
            } else {
                sub_division / sizes[axis]
            };
        }
        Self {
            resolution,
            max_raster: resolution - 1,
            volume: space.volume(),
            space,
            sizes,
            factors,
        }
    }

    #[inline]
    pub(crate) fn space(&self) -> &Aabb<DIM> {
        &self.space
    }

    #[inline]
    pub(crate) fn sizes(&self) -> &[f64; DIM] {
        &self.sizes
    }

    #[inline]
    pub(crate) fn volume(&self) -> f64 {
        self.volume
    }

    #[inline]
    pub(crate) fn resolution(&self) -> GridId {
        self.resolution
    }

    /// Grid id of a point, clamped into the raster. Outside-the-space
    /// coordinates are a precondition violation unless `clamp_outside`.
    pub(crate) fn point_grid<A: Adapter<DIM>>(
        &self,
        point: &A::Vector,
        clamp_outside: bool,
    ) -> [GridId; DIM] {
        let mut grid = [0 as GridId; DIM];
        for (axis, g) in grid.iter_mut().enumerate() {
            let mut component = A::point_c(point, axis).to_internal() - self.space.min[axis];
            if clamp_outside {
                if component < 0.0 {
                    component = 0.0;
                }
            } else {
                debug_assert!(component >= 0.0, "point outside the space box");
            }
            let raster = (component * self.factors[axis]) as GridId;
            *g = raster.min(self.max_raster);
        }
        grid
    }

    /// Grid range `[lower, upper]` of a box, both corners inclusive.
    ///
    /// In the default mode an upper corner sitting exactly on a grid line
    /// is pulled into the lower cell so the range names only cells the box
    /// has positive overlap with. `point_like` classifies both corners the
    /// way [`point_grid`](Self::point_grid) does, clamping instead.
    pub(crate) fn box_grid_range<A: Adapter<DIM>>(
        &self,
        b: &A::Box,
        point_like: bool,
    ) -> [[GridId; DIM]; 2] {
        let mut range = [[0 as GridId; DIM]; 2];
        for axis in 0..DIM {
            let lo = A::box_min_c(b, axis).to_internal();
            let hi = A::box_max_c(b, axis).to_internal();
            debug_assert!(lo <= hi, "inverted box on axis {axis}");

            let lo_raster = (lo - self.space.min[axis]) * self.factors[axis];
            let hi_raster = (hi - self.space.min[axis]) * self.factors[axis];

            if point_like {
                range[0][axis] = (lo_raster as GridId).min(self.max_raster);
                range[1][axis] = (hi_raster as GridId).min(self.max_raster);
            } else {
                let limit = self.resolution as f64;
                range[0][axis] = lo_raster.clamp(0.0, limit) as GridId;
                range[1][axis] = hi_raster.clamp(0.0, limit) as GridId;

                let on_grid_line = hi_raster.floor() == hi_raster;
                if (range[0][axis] != range[1][axis] && on_grid_line)
                    || range[1][axis] >= self.resolution
                {
                    range[1][axis] -= 1;
                }
            }
        }
        range
    }

    /// Pair of grid ids for a point, where the lower id steps back one
    /// cell on every axis whose coordinate lies exactly on a grid line.
    /// Pick searches use this to examine the neighbouring cells too.
    pub(crate) fn edge_point_grid<A: Adapter<DIM>>(&self, point: &A::Vector) -> [[GridId; DIM]; 2] {
        let mut range = [[0 as GridId; DIM]; 2];
        for axis in 0..DIM {
            let raster = ((A::point_c(point, axis).to_internal() - self.space.min[axis])
                * self.factors[axis])
                .clamp(0.0, self.max_raster as f64);
            let id = raster as GridId;
            range[0][axis] = id;
            range[1][axis] = id;
            if id > 0 && raster.floor() == raster {
                range[0][axis] -= 1;
            }
        }
        range
    }

    /// Coordinate center of the cell `grid` seen `level` levels above the
    /// leaf resolution.
    pub(crate) fn cell_center(&self, grid: [GridId; DIM], level: Depth) -> [f64; DIM] {
        let half_grid = (1u64 << level) as f64 * 0.5;
        let mut center = [0.0; DIM];
        for (axis, c) in center.iter_mut().enumerate() {
            *c = (grid[axis] as f64 + half_grid) / self.factors[axis] + self.space.min[axis];
        }
        center
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BoxN, CartesianAdapter};

    type Ad2 = CartesianAdapter<f64, 2>;

    fn unit_grid(max_depth: Depth) -> GridLayout<2> {
        GridLayout::new(max_depth, Aabb::new([0.0, 0.0], [1.0, 1.0]))
    }

    #[test]
    fn point_grid_clamps_to_raster() {
        let grid = unit_grid(2);
        assert_eq!(grid.point_grid::<Ad2>(&[0.0, 0.0], false), [0, 0]);
        assert_eq!(grid.point_grid::<Ad2>(&[0.24, 0.26], false), [0, 1]);
        // The space's max corner belongs to the last cell.
        assert_eq!(grid.point_grid::<Ad2>(&[1.0, 1.0], false), [3, 3]);
        // Outside coordinates clamp when asked to.
        assert_eq!(grid.point_grid::<Ad2>(&[-5.0, 7.0], true), [0, 3]);
    }

    #[test]
    fn box_range_pulls_grid_line_max_down() {
        let grid = unit_grid(2);
        // Upper corner exactly on the 0.5 grid line stays in cell 1.
        let range = grid.box_grid_range::<Ad2>(&BoxN::new([0.3, 0.3], [0.5, 0.5]), false);
        assert_eq!(range, [[1, 1], [1, 1]]);

        let range = grid.box_grid_range::<Ad2>(&BoxN::new([0.3, 0.3], [0.6, 0.6]), false);
        assert_eq!(range, [[1, 1], [2, 2]]);

        // Whole space.
        let range = grid.box_grid_range::<Ad2>(&BoxN::new([0.0, 0.0], [1.0, 1.0]), false);
        assert_eq!(range, [[0, 0], [3, 3]]);
    }

    #[test]
    fn edge_points_include_lower_neighbour() {
        let grid = unit_grid(2);
        // On the 0.5 grid line: the lower cell is examined too.
        assert_eq!(
            grid.edge_point_grid::<Ad2>(&[0.5, 0.3]),
            [[1, 1], [2, 1]]
        );
        // Interior of a cell: both ids equal.
        assert_eq!(
            grid.edge_point_grid::<Ad2>(&[0.3, 0.3]),
            [[1, 1], [1, 1]]
        );
    }

    #[test]
    fn cell_centers() {
        let grid = unit_grid(2);
        assert_eq!(grid.cell_center([0, 0], 0), [0.125, 0.125]);
        assert_eq!(grid.cell_center([2, 2], 1), [0.75, 0.75]);
        assert_eq!(grid.cell_center([0, 0], 2), [0.5, 0.5]);
    }
}
