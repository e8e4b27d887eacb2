// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Adapter impls for glam vector types, behind the `glam` feature.

use glam::{Vec2, Vec3};

use crate::adapter::Adapter;
use crate::boxtree::BoxTree;
use crate::point::PointTree;

/// Min/max box over [`Vec2`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GlamBox2 {
    /// Lower corner.
    pub min: Vec2,
    /// Upper corner.
    pub max: Vec2,
}

/// Min/max box over [`Vec3`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GlamBox3 {
    /// Lower corner.
    pub min: Vec3,
    /// Upper corner.
    pub max: Vec3,
}

/// Ray over [`Vec2`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GlamRay2 {
    /// Ray origin.
    pub origin: Vec2,
    /// Ray direction.
    pub direction: Vec2,
}

/// Ray over [`Vec3`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GlamRay3 {
    /// Ray origin.
    pub origin: Vec3,
    /// Ray direction.
    pub direction: Vec3,
}

/// Plane over [`Vec2`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GlamPlane2 {
    /// Unit normal.
    pub normal: Vec2,
    /// Signed distance of the plane from the origin.
    pub origin_distance: f32,
}

/// Plane over [`Vec3`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GlamPlane3 {
    /// Unit normal.
    pub normal: Vec3,
    /// Signed distance of the plane from the origin.
    pub origin_distance: f32,
}

/// Adapter for glam 2-D geometry.
pub struct GlamAdapter2;

/// Adapter for glam 3-D geometry.
pub struct GlamAdapter3;

impl Adapter<2> for GlamAdapter2 {
    type Scalar = f32;
    type Vector = Vec2;
    type Box = GlamBox2;
    type Ray = GlamRay2;
    type Plane = GlamPlane2;

    #[inline]
    fn point_c(point: &Vec2, axis: usize) -> f32 {
        point[axis]
    }

    #[inline]
    fn set_point_c(point: &mut Vec2, axis: usize, value: f32) {
        point[axis] = value;
    }

    #[inline]
    fn box_min_c(b: &GlamBox2, axis: usize) -> f32 {
        b.min[axis]
    }

    #[inline]
    fn box_max_c(b: &GlamBox2, axis: usize) -> f32 {
        b.max[axis]
    }

    #[inline]
    fn set_box_min_c(b: &mut GlamBox2, axis: usize, value: f32) {
        b.min[axis] = value;
    }

    #[inline]
    fn set_box_max_c(b: &mut GlamBox2, axis: usize, value: f32) {
        b.max[axis] = value;
    }

    #[inline]
    fn ray_origin(ray: &GlamRay2) -> Vec2 {
        ray.origin
    }

    #[inline]
    fn ray_direction(ray: &GlamRay2) -> Vec2 {
        ray.direction
    }

    #[inline]
    fn plane_normal(plane: &GlamPlane2) -> Vec2 {
        plane.normal
    }

    #[inline]
    fn plane_origin_distance(plane: &GlamPlane2) -> f32 {
        plane.origin_distance
    }
}

impl Adapter<3> for GlamAdapter3 {
    type Scalar = f32;
    type Vector = Vec3;
    type Box = GlamBox3;
    type Ray = GlamRay3;
    type Plane = GlamPlane3;

    #[inline]
    fn point_c(point: &Vec3, axis: usize) -> f32 {
        point[axis]
    }

    #[inline]
    fn set_point_c(point: &mut Vec3, axis: usize, value: f32) {
        point[axis] = value;
    }

    #[inline]
    fn box_min_c(b: &GlamBox3, axis: usize) -> f32 {
        b.min[axis]
    }

    #[inline]
    fn box_max_c(b: &GlamBox3, axis: usize) -> f32 {
        b.max[axis]
    }

    #[inline]
    fn set_box_min_c(b: &mut GlamBox3, axis: usize, value: f32) {
        b.min[axis] = value;
    }

    #[inline]
    fn set_box_max_c(b: &mut GlamBox3, axis: usize, value: f32) {
        b.max[axis] = value;
    }

    #[inline]
    fn ray_origin(ray: &GlamRay3) -> Vec3 {
        ray.origin
    }

    #[inline]
    fn ray_direction(ray: &GlamRay3) -> Vec3 {
        ray.direction
    }

    #[inline]
    fn plane_normal(plane: &GlamPlane3) -> Vec3 {
        plane.normal
    }

    #[inline]
    fn plane_origin_distance(plane: &GlamPlane3) -> f32 {
        plane.origin_distance
    }
}

/// Quadtree over glam [`Vec2`] points.
pub type GlamQuadtree = PointTree<2, u32, GlamAdapter2, usize>;

/// Octree over glam [`Vec3`] points.
pub type GlamOctree = PointTree<3, u32, GlamAdapter3, usize>;

/// Box quadtree over [`GlamBox2`] entities.
pub type GlamQuadtreeBox = BoxTree<2, u32, GlamAdapter2, usize, true>;

/// Box octree over [`GlamBox3`] entities.
pub type GlamOctreeBox = BoxTree<3, u32, GlamAdapter3, usize, true>;
