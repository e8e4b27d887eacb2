// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The geometry adapter: how the trees read user geometry.
//!
//! The trees never own geometry and never require a particular vector/box
//! type; they reach through an [`Adapter`] that exposes per-axis components
//! of points, boxes, rays, and planes. The accessor methods are required;
//! the predicates (overlap, containment, plane relation, ray distance) have
//! default implementations written against the accessors and can be
//! overridden when the user type has faster versions.
//!
//! [`crate::geometry::CartesianAdapter`] is the built-in adapter for
//! coordinate-array points and min/max boxes.

use crate::scalar::Scalar;

/// Relation of a point or box to an oriented hyperplane.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlaneRelation {
    /// Entirely on the negative side.
    Negative,
    /// Intersecting the plane (within tolerance).
    Hit,
    /// Entirely on the positive side.
    Positive,
}

/// Adapter between the trees and user geometry in `DIM` dimensions.
///
/// All tolerances are non-negative and expressed in the internal scalar
/// (`f64`); a zero tolerance means exact comparisons.
pub trait Adapter<const DIM: usize> {
    /// Coordinate scalar of the user geometry.
    type Scalar: Scalar;
    /// Point/vector type.
    type Vector;
    /// Axis-aligned box type.
    type Box;
    /// Ray type (origin + direction).
    type Ray;
    /// Hyperplane type (unit normal + signed origin distance).
    type Plane;

    /// Component of a point on `axis`.
    fn point_c(point: &Self::Vector, axis: usize) -> Self::Scalar;

    /// Set the component of a point on `axis`.
    fn set_point_c(point: &mut Self::Vector, axis: usize, value: Self::Scalar);

    /// Lower bound of a box on `axis`.
    fn box_min_c(b: &Self::Box, axis: usize) -> Self::Scalar;

    /// Upper bound of a box on `axis`.
    fn box_max_c(b: &Self::Box, axis: usize) -> Self::Scalar;

    /// Set the lower bound of a box on `axis`.
    fn set_box_min_c(b: &mut Self::Box, axis: usize, value: Self::Scalar);

    /// Set the upper bound of a box on `axis`.
    fn set_box_max_c(b: &mut Self::Box, axis: usize, value: Self::Scalar);

    /// Origin point of a ray.
    fn ray_origin(ray: &Self::Ray) -> Self::Vector;

    /// Direction vector of a ray.
    fn ray_direction(ray: &Self::Ray) -> Self::Vector;

    /// Unit normal of a plane.
    fn plane_normal(plane: &Self::Plane) -> Self::Vector;

    /// Signed distance of the plane from the origin
    /// (`dot(normal, p) = distance` on the plane).
    fn plane_origin_distance(plane: &Self::Plane) -> Self::Scalar;

    /// Whether `b` contains `point`, expanded by `tolerance` (exclusive
    /// bounds when the tolerance is non-zero, inclusive when it is zero).
    fn box_contains_point(b: &Self::Box, point: &Self::Vector, tolerance: f64) -> bool {
        debug_assert!(tolerance >= 0.0);
        for axis in 0..DIM {
            let p = Self::point_c(point, axis).to_internal();
            let lo = Self::box_min_c(b, axis).to_internal();
            let hi = Self::box_max_c(b, axis).to_internal();
            let inside = if tolerance != 0.0 {
                lo - tolerance < p && p < hi + tolerance
            } else {
                lo <= p && p <= hi
            };
            if !inside {
                return false;
            }
        }
        true
    }

    /// Whether two points coincide within `tolerance` on every axis.
    fn points_equal(a: &Self::Vector, b: &Self::Vector, tolerance: f64) -> bool {
        debug_assert!(tolerance >= 0.0);
        for axis in 0..DIM {
            let d = Self::point_c(a, axis).to_internal() - Self::point_c(b, axis).to_internal();
            if d.abs() > tolerance {
                return false;
            }
        }
        true
    }

    /// Euclidean distance between two points.
    fn point_distance(a: &Self::Vector, b: &Self::Vector) -> f64 {
        let mut d2 = 0.0;
        for axis in 0..DIM {
            let d = Self::point_c(a, axis).to_internal() - Self::point_c(b, axis).to_internal();
            d2 += d * d;
        }
        d2.sqrt()
    }

    /// Whether `a` and `b` overlap. With `a_must_contain_b`, `b` must lie
    /// inside `a` (bounds inclusive). Otherwise a positive-measure overlap
    /// is required unless `touch_allowed` also accepts shared faces.
    fn boxes_overlap(a: &Self::Box, b: &Self::Box, a_must_contain_b: bool, touch_allowed: bool) -> bool {
        if a_must_contain_b {
            for axis in 0..DIM {
                let a_min = Self::box_min_c(a, axis);
                let a_max = Self::box_max_c(a, axis);
                if a_min > Self::box_min_c(b, axis) || Self::box_min_c(b, axis) > a_max {
                    return false;
                }
                if a_min > Self::box_max_c(b, axis) || Self::box_max_c(b, axis) > a_max {
                    return false;
                }
            }
            true
        } else {
            match Self::box_relation(a, b) {
                BoxRelation::Overlapped => true,
                BoxRelation::Adjacent => touch_allowed,
                BoxRelation::Separated => false,
            }
        }
    }

    /// Whether `a` and `b` overlap with positive measure (shared faces do
    /// not count).
    fn boxes_overlap_strict(a: &Self::Box, b: &Self::Box) -> bool {
        Self::box_relation(a, b) == BoxRelation::Overlapped
    }

    /// Classify the relation of two boxes per axis.
    fn box_relation(a: &Self::Box, b: &Self::Box) -> BoxRelation {
        let mut any_adjacent = false;
        for axis in 0..DIM {
            let a_min = Self::box_min_c(a, axis);
            let a_max = Self::box_max_c(a, axis);
            let b_min = Self::box_min_c(b, axis);
            let b_max = Self::box_max_c(b, axis);
            if a_min < b_max && a_max > b_min {
                // overlap on this axis
            } else if a_min == b_max || a_max == b_min {
                any_adjacent = true;
            } else {
                return BoxRelation::Separated;
            }
        }
        if any_adjacent {
            BoxRelation::Adjacent
        } else {
            BoxRelation::Overlapped
        }
    }

    /// Relation of a point to the hyperplane `dot(normal, p) = origin
    /// distance`. The normal must be unit length.
    fn point_plane_relation(
        point: &Self::Vector,
        origin_distance: f64,
        normal: &Self::Vector,
        tolerance: f64,
    ) -> PlaneRelation {
        let mut projected = 0.0;
        for axis in 0..DIM {
            projected +=
                Self::point_c(normal, axis).to_internal() * Self::point_c(point, axis).to_internal();
        }
        if projected < origin_distance - tolerance {
            PlaneRelation::Negative
        } else if projected > origin_distance + tolerance {
            PlaneRelation::Positive
        } else {
            PlaneRelation::Hit
        }
    }

    /// Slab-test distance from a ray to a box, with `tolerance` expanding
    /// each slab. `None` when the ray misses; `0` when the origin is inside.
    /// Axes with zero direction require the origin within the slab.
    fn ray_box_distance(
        b: &Self::Box,
        origin: &Self::Vector,
        direction: &Self::Vector,
        tolerance: f64,
    ) -> Option<f64> {
        debug_assert!(tolerance >= 0.0);
        if Self::box_contains_point(b, origin, tolerance) {
            return Some(0.0);
        }

        let mut t_min = f64::NEG_INFINITY;
        let mut t_max = f64::INFINITY;
        for axis in 0..DIM {
            let o = Self::point_c(origin, axis).to_internal();
            let d = Self::point_c(direction, axis).to_internal();
            let lo = Self::box_min_c(b, axis).to_internal() - tolerance;
            let hi = Self::box_max_c(b, axis).to_internal() + tolerance;
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

    /// Whether the vector has unit length within a loose epsilon. Used in
    /// debug assertions on plane inputs.
    fn is_normalized(v: &Self::Vector) -> bool {
        let mut len2 = 0.0;
        for axis in 0..DIM {
            let c = Self::point_c(v, axis).to_internal();
            len2 += c * c;
        }
        (len2 - 1.0).abs() < 1e-6
    }
}

/// Per-axis classification of two boxes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BoxRelation {
    /// Positive-measure intersection on every axis.
    Overlapped,
    /// Touching on at least one axis, no separation.
    Adjacent,
    /// Disjoint on at least one axis.
    Separated,
}
