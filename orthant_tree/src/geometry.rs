// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Built-in Cartesian geometry and the internal `f64` primitives.
//!
//! Users with their own math types implement [`Adapter`]; everyone else can
//! use [`PointN`]/[`BoxN`]/[`RayN`]/[`PlaneN`] with [`CartesianAdapter`].
//!
//! The second half of the module is the internal geometry the trees compute
//! with: everything is widened to `f64` ([`Aabb`], cell centers, wall and
//! ray distances), independent of the user scalar.

use crate::adapter::{Adapter, PlaneRelation};
use crate::scalar::Scalar;

/// A point as a coordinate array.
pub type PointN<S, const DIM: usize> = [S; DIM];

/// An axis-aligned box as min/max corner arrays.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoxN<S, const DIM: usize> {
    /// Lower corner.
    pub min: [S; DIM],
    /// Upper corner.
    pub max: [S; DIM],
}

impl<S: Scalar, const DIM: usize> BoxN<S, DIM> {
    /// Create a box from its corners.
    #[inline]
    pub const fn new(min: [S; DIM], max: [S; DIM]) -> Self {
        Self { min, max }
    }
}

/// A ray as origin and direction arrays.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RayN<S, const DIM: usize> {
    /// Ray origin.
    pub origin: [S; DIM],
    /// Ray direction; need not be normalized.
    pub direction: [S; DIM],
}

/// A hyperplane `dot(normal, p) = origin_distance` with unit normal.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlaneN<S, const DIM: usize> {
    /// Unit normal.
    pub normal: [S; DIM],
    /// Signed distance of the plane from the origin.
    pub origin_distance: S,
}

/// Adapter for the built-in coordinate-array geometry.
pub struct CartesianAdapter<S, const DIM: usize>(core::marker::PhantomData<S>);

impl<S: Scalar, const DIM: usize> Adapter<DIM> for CartesianAdapter<S, DIM> {
    type Scalar = S;
    type Vector = PointN<S, DIM>;
    type Box = BoxN<S, DIM>;
    type Ray = RayN<S, DIM>;
    type Plane = PlaneN<S, DIM>;

    #[inline]
    fn point_c(point: &Self::Vector, axis: usize) -> S {
        point[axis]
    }

    #[inline]
    fn set_point_c(point: &mut Self::Vector, axis: usize, value: S) {
        point[axis] = value;
    }

    #[inline]
    fn box_min_c(b: &Self::Box, axis: usize) -> S {
        b.min[axis]
    }

    #[inline]
    fn box_max_c(b: &Self::Box, axis: usize) -> S {
        b.max[axis]
    }

    #[inline]
    fn set_box_min_c(b: &mut Self::Box, axis: usize, value: S) {
        b.min[axis] = value;
    }

    #[inline]
    fn set_box_max_c(b: &mut Self::Box, axis: usize, value: S) {
        b.max[axis] = value;
    }

    #[inline]
    fn ray_origin(ray: &Self::Ray) -> Self::Vector {
        ray.origin
    }

    #[inline]
    fn ray_direction(ray: &Self::Ray) -> Self::Vector {
        ray.direction
    }

    #[inline]
    fn plane_normal(plane: &Self::Plane) -> Self::Vector {
        plane.normal
    }

    #[inline]
    fn plane_origin_distance(plane: &Self::Plane) -> S {
        plane.origin_distance
    }
}

/// An axis-aligned box in the internal scalar. The space box and node cells
/// are this type regardless of the user geometry's scalar.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb<const DIM: usize> {
    /// Lower corner.
    pub min: [f64; DIM],
    /// Upper corner.
    pub max: [f64; DIM],
}

impl<const DIM: usize> Aabb<DIM> {
    /// An inverted box: the identity of corner-extension.
    pub const INVERTED: Self = Self {
        min: [f64::MAX; DIM],
        max: [f64::MIN; DIM],
    };

    /// Create a box from its corners.
    #[inline]
    pub const fn new(min: [f64; DIM], max: [f64; DIM]) -> Self {
        Self { min, max }
    }

    /// Coordinate center.
    #[inline]
    pub fn center(&self) -> [f64; DIM] {
        let mut c = [0.0; DIM];
        for axis in 0..DIM {
            c[axis] = (self.min[axis] + self.max[axis]) * 0.5;
        }
        c
    }

    /// Per-axis extent.
    #[inline]
    pub fn size(&self) -> [f64; DIM] {
        let mut s = [0.0; DIM];
        for axis in 0..DIM {
            s[axis] = self.max[axis] - self.min[axis];
        }
        s
    }

    /// Product of extents; zero or negative for degenerate boxes.
    #[inline]
    pub fn volume(&self) -> f64 {
        let mut v = 1.0;
        for axis in 0..DIM {
            v *= self.max[axis] - self.min[axis];
        }
        v
    }

    /// Whether the (inclusive) box contains the internal-space point.
    #[inline]
    pub fn contains(&self, p: &[f64; DIM]) -> bool {
        for axis in 0..DIM {
            if p[axis] < self.min[axis] || self.max[axis] < p[axis] {
                return false;
            }
        }
        true
    }

    /// Grow to cover `p`.
    #[inline]
    pub fn extend(&mut self, p: &[f64; DIM]) {
        for axis in 0..DIM {
            if p[axis] < self.min[axis] {
                self.min[axis] = p[axis];
            }
            if p[axis] > self.max[axis] {
                self.max[axis] = p[axis];
            }
        }
    }
}

/// Widen a user point through the adapter.
#[inline]
pub(crate) fn widen_point<A: Adapter<DIM>, const DIM: usize>(p: &A::Vector) -> [f64; DIM] {
    let mut out = [0.0; DIM];
    for (axis, c) in out.iter_mut().enumerate() {
        *c = A::point_c(p, axis).to_internal();
    }
    out
}

/// Widen a user box through the adapter.
#[inline]
pub(crate) fn widen_box<A: Adapter<DIM>, const DIM: usize>(b: &A::Box) -> Aabb<DIM> {
    let mut out = Aabb::new([0.0; DIM], [0.0; DIM]);
    for axis in 0..DIM {
        out.min[axis] = A::box_min_c(b, axis).to_internal();
        out.max[axis] = A::box_max_c(b, axis).to_internal();
    }
    out
}

/// Bounding box of a point collection.
pub(crate) fn aabb_of_points<'a, A: Adapter<DIM>, const DIM: usize>(
    points: impl Iterator<Item = &'a A::Vector>,
) -> Aabb<DIM>
where
    A::Vector: 'a,
{
    let mut out = Aabb::INVERTED;
    for p in points {
        out.extend(&widen_point::<A, DIM>(p));
    }
    out
}

/// Bounding box of a box collection.
pub(crate) fn aabb_of_boxes<'a, A: Adapter<DIM>, const DIM: usize>(
    boxes: impl Iterator<Item = &'a A::Box>,
) -> Aabb<DIM>
where
    A::Box: 'a,
{
    let mut out = Aabb::INVERTED;
    for b in boxes {
        let wide = widen_box::<A, DIM>(b);
        out.extend(&wide.min);
        out.extend(&wide.max);
    }
    out
}

/// Whether the internal box contains the user point, expanded by
/// `tolerance` (exclusive bounds when the tolerance is non-zero).
pub(crate) fn aabb_contains_user_point<A: Adapter<DIM>, const DIM: usize>(
    aabb: &Aabb<DIM>,
    p: &A::Vector,
    tolerance: f64,
) -> bool {
    debug_assert!(tolerance >= 0.0);
    for axis in 0..DIM {
        let c = A::point_c(p, axis).to_internal();
        let inside = if tolerance != 0.0 {
            aabb.min[axis] - tolerance < c && c < aabb.max[axis] + tolerance
        } else {
            aabb.min[axis] <= c && c <= aabb.max[axis]
        };
        if !inside {
            return false;
        }
    }
    true
}

/// Whether the internal box contains the user box (bounds inclusive).
pub(crate) fn aabb_contains_user_box<A: Adapter<DIM>, const DIM: usize>(
    aabb: &Aabb<DIM>,
    b: &A::Box,
) -> bool {
    for axis in 0..DIM {
        let lo = A::box_min_c(b, axis).to_internal();
        let hi = A::box_max_c(b, axis).to_internal();
        if lo < aabb.min[axis] || aabb.max[axis] < lo || hi < aabb.min[axis] || aabb.max[axis] < hi {
            return false;
        }
    }
    true
}

/// Whether the user box `range` contains the internal box (inclusive).
pub(crate) fn user_box_contains_aabb<A: Adapter<DIM>, const DIM: usize>(
    range: &A::Box,
    aabb: &Aabb<DIM>,
) -> bool {
    for axis in 0..DIM {
        let lo = A::box_min_c(range, axis).to_internal();
        let hi = A::box_max_c(range, axis).to_internal();
        if aabb.min[axis] < lo || hi < aabb.min[axis] || aabb.max[axis] < lo || hi < aabb.max[axis] {
            return false;
        }
    }
    true
}

/// Whether boxes given by centers and full sizes overlap with positive
/// measure.
#[inline]
pub(crate) fn overlap_by_center<const DIM: usize>(
    center_a: &[f64; DIM],
    center_b: &[f64; DIM],
    size_a: &[f64; DIM],
    size_b: &[f64; DIM],
) -> bool {
    for axis in 0..DIM {
        let limit = (size_a[axis] + size_b[axis]) * 0.5;
        if limit <= (center_a[axis] - center_b[axis]).abs() {
            return false;
        }
    }
    true
}

/// Distance from a user point to the nearest wall of the cell given by
/// center and half size. Inside the cell the result is the distance to the
/// nearest wall, or zero when `inside_is_zero`.
pub(crate) fn wall_distance<A: Adapter<DIM>, const DIM: usize>(
    search_point: &A::Vector,
    center: &[f64; DIM],
    half_size: &[f64; DIM],
    inside_is_zero: bool,
) -> f64 {
    let mut center_distance = [0.0; DIM];
    let mut inside = true;
    for axis in 0..DIM {
        center_distance[axis] =
            (center[axis] - A::point_c(search_point, axis).to_internal()).abs();
        inside &= center_distance[axis] <= half_size[axis];
    }

    if inside {
        if inside_is_zero {
            return 0.0;
        }
        let mut min_wall = half_size[0] - center_distance[0];
        for axis in 1..DIM {
            let wall = half_size[axis] - center_distance[axis];
            if wall < min_wall {
                min_wall = wall;
            }
        }
        min_wall
    } else {
        let mut d2 = 0.0;
        for axis in 0..DIM {
            let d = (center_distance[axis] - half_size[axis]).max(0.0);
            d2 += d * d;
        }
        d2.sqrt()
    }
}

/// Whether the cell given by center and half size contains the user point,
/// expanded by `tolerance`.
pub(crate) fn cell_contains_user_point<A: Adapter<DIM>, const DIM: usize>(
    center: &[f64; DIM],
    half_size: &[f64; DIM],
    p: &A::Vector,
    tolerance: f64,
) -> bool {
    for axis in 0..DIM {
        let d = (A::point_c(p, axis).to_internal() - center[axis]).abs();
        let inside = if tolerance != 0.0 {
            d < half_size[axis] + tolerance
        } else {
            d <= half_size[axis]
        };
        if !inside {
            return false;
        }
    }
    true
}

/// Slab-test distance from a ray to the cell given by center and half
/// size. Same contract as [`Adapter::ray_box_distance`].
pub(crate) fn ray_cell_distance<A: Adapter<DIM>, const DIM: usize>(
    center: &[f64; DIM],
    half_size: &[f64; DIM],
    origin: &A::Vector,
    direction: &A::Vector,
    tolerance: f64,
) -> Option<f64> {
    debug_assert!(tolerance >= 0.0);
    if cell_contains_user_point::<A, DIM>(center, half_size, origin, tolerance) {
        return Some(0.0);
    }

    let mut t_min = f64::NEG_INFINITY;
    let mut t_max = f64::INFINITY;
    for axis in 0..DIM {
        let o = A::point_c(origin, axis).to_internal();
        let d = A::point_c(direction, axis).to_internal();
        let lo = center[axis] - half_size[axis] - tolerance;
        let hi = center[axis] + half_size[axis] + tolerance;
        if d == 0.0 {
            let outside = if tolerance != 0.0 {
                o <= lo || hi <= o
            } else {
                o < lo || hi < o
            };
            if outside {
                return None;
            }
        } else {
            let inv = 1.0 / d;
            let mut t1 = (lo - o) * inv;
            let mut t2 = (hi - o) * inv;
            if t1 > t2 {
                core::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
        }
    }

    debug_assert!(t_max != f64::INFINITY, "ray direction is a zero vector");
    if t_min > t_max || t_max < 0.0 {
        None
    } else if t_min < 0.0 {
        Some(t_max)
    } else {
        Some(t_min)
    }
}

/// Relation of the cell given by center and half size to a hyperplane, by
/// projected radius. The normal must be unit length.
pub(crate) fn cell_plane_relation<A: Adapter<DIM>, const DIM: usize>(
    center: &[f64; DIM],
    half_size: &[f64; DIM],
    origin_distance: f64,
    normal: &A::Vector,
    tolerance: f64,
) -> PlaneRelation {
    let mut radius = tolerance;
    let mut projected = -origin_distance;
    for axis in 0..DIM {
        let n = A::point_c(normal, axis).to_internal();
        radius += half_size[axis] * n.abs();
        projected += n * center[axis];
    }

    if projected + radius < 0.0 {
        PlaneRelation::Negative
    } else if projected - radius > 0.0 {
        PlaneRelation::Positive
    } else {
        PlaneRelation::Hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Ad2 = CartesianAdapter<f64, 2>;
    type Ad3 = CartesianAdapter<f64, 3>;

    #[test]
    fn adapter_box_relations() {
        let a = BoxN::new([0.0, 0.0], [1.0, 1.0]);
        let b = BoxN::new([0.5, 0.5], [1.5, 1.5]);
        let touching = BoxN::new([1.0, 0.0], [2.0, 1.0]);
        let apart = BoxN::new([3.0, 3.0], [4.0, 4.0]);

        assert!(Ad2::boxes_overlap_strict(&a, &b));
        assert!(!Ad2::boxes_overlap_strict(&a, &touching));
        assert!(Ad2::boxes_overlap(&a, &touching, false, true));
        assert!(!Ad2::boxes_overlap(&a, &apart, false, true));
        assert!(Ad2::boxes_overlap(&a, &BoxN::new([0.2, 0.2], [0.8, 0.8]), true, false));
        assert!(!Ad2::boxes_overlap(&a, &b, true, false));
    }

    #[test]
    fn ray_box_distance_axis_aligned() {
        let b = BoxN::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let d = Ad3::ray_box_distance(&b, &[-1.0, 0.5, 0.5], &[1.0, 0.0, 0.0], 0.0);
        assert_eq!(d, Some(1.0));

        // Pointing away.
        assert_eq!(
            Ad3::ray_box_distance(&b, &[-1.0, 0.5, 0.5], &[-1.0, 0.0, 0.0], 0.0),
            None
        );

        // Origin inside.
        assert_eq!(
            Ad3::ray_box_distance(&b, &[0.5, 0.5, 0.5], &[1.0, 0.0, 0.0], 0.0),
            Some(0.0)
        );

        // Zero direction component outside the slab.
        assert_eq!(
            Ad3::ray_box_distance(&b, &[-1.0, 2.0, 0.5], &[1.0, 0.0, 0.0], 0.0),
            None
        );
    }

    #[test]
    fn wall_distance_inside_and_out() {
        let center = [0.5, 0.5];
        let half = [0.5, 0.5];
        assert_eq!(
            wall_distance::<Ad2, 2>(&[0.5, 0.5], &center, &half, true),
            0.0
        );
        assert_eq!(
            wall_distance::<Ad2, 2>(&[0.5, 0.5], &center, &half, false),
            0.5
        );
        // 3-4-5 triangle outside the corner.
        let d = wall_distance::<Ad2, 2>(&[1.3, 1.9], &center, &half, true);
        assert!((d - 0.5).abs() < 1e-12, "d={d}");
    }

    #[test]
    fn plane_relation_of_cell() {
        let center = [0.5, 0.5, 0.5];
        let half = [0.5, 0.5, 0.5];
        let normal = [1.0, 0.0, 0.0];
        assert_eq!(
            cell_plane_relation::<Ad3, 3>(&center, &half, 0.5, &normal, 0.0),
            PlaneRelation::Hit
        );
        assert_eq!(
            cell_plane_relation::<Ad3, 3>(&center, &half, 2.0, &normal, 0.0),
            PlaneRelation::Negative
        );
        assert_eq!(
            cell_plane_relation::<Ad3, 3>(&center, &half, -2.0, &normal, 0.0),
            PlaneRelation::Positive
        );
    }

    #[test]
    fn aabb_extend_and_volume() {
        let mut aabb = Aabb::<2>::INVERTED;
        aabb.extend(&[1.0, 2.0]);
        aabb.extend(&[-1.0, 0.0]);
        assert_eq!(aabb, Aabb::new([-1.0, 0.0], [1.0, 2.0]));
        assert_eq!(aabb.volume(), 4.0);
        assert!(aabb.contains(&[0.0, 1.0]));
        assert!(!aabb.contains(&[2.0, 1.0]));
    }
}
