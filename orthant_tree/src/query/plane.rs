// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hyperplane intersection, positive-side segmentation, and frustum
//! culling.

use orthant_space::NodeKey;

use crate::adapter::{Adapter, PlaneRelation};
use crate::boxtree::BoxTree;
use crate::tree::{Si, TreeCore};
use crate::entities::EntitySet;
use crate::geometry::{cell_plane_relation, widen_box};
use crate::point::PointTree;
use crate::scalar::{EntityId, Scalar};
use crate::store::NodeStoreCode;

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> TreeCore<DIM, L, A, I> {
    /// Depth-first plane walk. `keep_positive` selects segmentation
    /// (prune only fully-negative subtrees) over intersection (descend
    /// only into hit cells).
    pub(crate) fn plane_walk(
        &self,
        origin_distance: f64,
        normal: &A::Vector,
        tolerance: f64,
        keep_positive: bool,
        entity_relation: &impl Fn(I) -> PlaneRelation,
        found: &mut Vec<I>,
    ) {
        debug_assert!(A::is_normalized(normal), "plane normal must be unit length");

        let mut selector = |key: NodeKey<L>, node: &crate::node::Node<L, DIM>| {
            let relation = cell_plane_relation::<A, DIM>(
                node.center(),
                self.node_half_size(Si::<DIM, L>::depth_of(key)),
                origin_distance,
                normal,
                tolerance,
            );
            if keep_positive {
                relation != PlaneRelation::Negative
            } else {
                relation == PlaneRelation::Hit
            }
        };
        let mut procedure = |_: NodeKey<L>, node: &crate::node::Node<L, DIM>| {
            for &id in self.store.slice(node.entities()) {
                let relation = entity_relation(id);
                let keep = if keep_positive {
                    relation != PlaneRelation::Negative
                } else {
                    relation == PlaneRelation::Hit
                };
                if keep && !found.contains(&id) {
                    found.push(id);
                }
            }
        };
        self.visit_dfs(Si::<DIM, L>::root_key(), &mut selector, &mut procedure);
    }

    /// Depth-first frustum walk over a set of boundary planes.
    pub(crate) fn frustum_walk(
        &self,
        planes: &[A::Plane],
        tolerance: f64,
        entity_relation: &impl Fn(I, &A::Plane) -> PlaneRelation,
        found: &mut Vec<I>,
    ) {
        if planes.is_empty() {
            return;
        }

        let mut selector = |key: NodeKey<L>, node: &crate::node::Node<L, DIM>| {
            let half = self.node_half_size(Si::<DIM, L>::depth_of(key));
            for plane in planes {
                let normal = A::plane_normal(plane);
                let relation = cell_plane_relation::<A, DIM>(
                    node.center(),
                    half,
                    A::plane_origin_distance(plane).to_internal(),
                    &normal,
                    tolerance,
                );
                if relation == PlaneRelation::Hit {
                    return true;
                }
                if relation == PlaneRelation::Negative {
                    return false;
                }
            }
            true
        };
        let mut procedure = |_: NodeKey<L>, node: &crate::node::Node<L, DIM>| {
            for &id in self.store.slice(node.entities()) {
                let mut relation = PlaneRelation::Negative;
                for plane in planes {
                    relation = entity_relation(id, plane);
                    if relation != PlaneRelation::Positive {
                        break;
                    }
                }
                if relation == PlaneRelation::Negative {
                    continue;
                }
                if !found.contains(&id) {
                    found.push(id);
                }
            }
        };
        self.visit_dfs(Si::<DIM, L>::root_key(), &mut selector, &mut procedure);
    }
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> PointTree<DIM, L, A, I> {
    /// Ids of points on the plane, within `tolerance`.
    pub fn plane_search<C>(&self, plane: &A::Plane, tolerance: A::Scalar, points: &C) -> Vec<I>
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        let normal = A::plane_normal(plane);
        let distance = A::plane_origin_distance(plane).to_internal();
        self.plane_search_at(distance, &normal, tolerance, points)
    }

    /// Ids of points on the plane `dot(normal, p) = origin_distance`,
    /// within `tolerance`.
    pub fn plane_search_at<C>(
        &self,
        origin_distance: f64,
        normal: &A::Vector,
        tolerance: A::Scalar,
        points: &C,
    ) -> Vec<I>
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        let tolerance = TreeCore::<DIM, L, A, I>::internal_tolerance(tolerance);
        let mut found = Vec::new();
        self.core.plane_walk(
            origin_distance,
            normal,
            tolerance,
            false,
            &|id| A::point_plane_relation(points.at(id), origin_distance, normal, tolerance),
            &mut found,
        );
        found
    }

    /// Ids of points on the positive side of the plane or on it.
    pub fn plane_positive_segmentation<C>(
        &self,
        plane: &A::Plane,
        tolerance: A::Scalar,
        points: &C,
    ) -> Vec<I>
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        let normal = A::plane_normal(plane);
        let origin_distance = A::plane_origin_distance(plane).to_internal();
        let tolerance = TreeCore::<DIM, L, A, I>::internal_tolerance(tolerance);
        let mut found = Vec::new();
        self.core.plane_walk(
            origin_distance,
            &normal,
            tolerance,
            true,
            &|id| A::point_plane_relation(points.at(id), origin_distance, &normal, tolerance),
            &mut found,
        );
        found
    }

    /// Ids of points inside or on the boundary of the frustum given by
    /// `planes` (normals pointing inward-positive).
    pub fn frustum_culling<C>(&self, planes: &[A::Plane], tolerance: A::Scalar, points: &C) -> Vec<I>
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        let tolerance = TreeCore::<DIM, L, A, I>::internal_tolerance(tolerance);
        let mut found = Vec::new();
        self.core.frustum_walk(
            planes,
            tolerance,
            &|id, plane| {
                let normal = A::plane_normal(plane);
                A::point_plane_relation(
                    points.at(id),
                    A::plane_origin_distance(plane).to_internal(),
                    &normal,
                    tolerance,
                )
            },
            &mut found,
        );
        found
    }
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId, const SPLIT: bool>
    BoxTree<DIM, L, A, I, SPLIT>
{
    /// Ids of boxes intersected by the plane, within `tolerance`.
    pub fn plane_search<C>(&self, plane: &A::Plane, tolerance: A::Scalar, boxes: &C) -> Vec<I>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let normal = A::plane_normal(plane);
        let origin_distance = A::plane_origin_distance(plane).to_internal();
        let tolerance = TreeCore::<DIM, L, A, I>::internal_tolerance(tolerance);
        let mut found = Vec::new();
        self.core.plane_walk(
            origin_distance,
            &normal,
            tolerance,
            false,
            &|id| box_plane_relation::<A, DIM>(boxes.at(id), origin_distance, &normal, tolerance),
            &mut found,
        );
        found
    }

    /// Ids of boxes on the positive side of the plane or intersecting it.
    pub fn plane_positive_segmentation<C>(
        &self,
        plane: &A::Plane,
        tolerance: A::Scalar,
        boxes: &C,
    ) -> Vec<I>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let normal = A::plane_normal(plane);
        let origin_distance = A::plane_origin_distance(plane).to_internal();
        let tolerance = TreeCore::<DIM, L, A, I>::internal_tolerance(tolerance);
        let mut found = Vec::new();
        self.core.plane_walk(
            origin_distance,
            &normal,
            tolerance,
            true,
            &|id| box_plane_relation::<A, DIM>(boxes.at(id), origin_distance, &normal, tolerance),
            &mut found,
        );
        found
    }

    /// Ids of boxes inside or intersecting the frustum given by `planes`.
    pub fn frustum_culling<C>(&self, planes: &[A::Plane], tolerance: A::Scalar, boxes: &C) -> Vec<I>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let tolerance = TreeCore::<DIM, L, A, I>::internal_tolerance(tolerance);
        let mut found = Vec::new();
        self.core.frustum_walk(
            planes,
            tolerance,
            &|id, plane| {
                let normal = A::plane_normal(plane);
                box_plane_relation::<A, DIM>(
                    boxes.at(id),
                    A::plane_origin_distance(plane).to_internal(),
                    &normal,
                    tolerance,
                )
            },
            &mut found,
        );
        found
    }
}

/// Relation of a user box to a plane, via its center and half size.
fn box_plane_relation<A: Adapter<DIM>, const DIM: usize>(
    b: &A::Box,
    origin_distance: f64,
    normal: &A::Vector,
    tolerance: f64,
) -> PlaneRelation {
    let wide = widen_box::<A, DIM>(b);
    let center = wide.center();
    let mut half = [0.0; DIM];
    for axis in 0..DIM {
        half[axis] = (wide.max[axis] - wide.min[axis]) * 0.5;
    }
    cell_plane_relation::<A, DIM>(&center, &half, origin_distance, normal, tolerance)
}

#[cfg(test)]
mod tests {
    use crate::geometry::{BoxN, PlaneN};
    use crate::{Octree, QuadtreeBox, TreeSetup};

    fn cube_tree() -> (Vec<[f64; 3]>, Octree) {
        let points = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
        ];
        let tree = Octree::build(
            &points,
            TreeSetup {
                max_depth: Some(2),
                bounding_box: Some(BoxN::new([0.0; 3], [1.0; 3])),
                max_elements_per_node: 2,
                parallel: false,
            },
        );
        (points, tree)
    }

    #[test]
    fn plane_search_and_segmentation() {
        let (points, tree) = cube_tree();
        let plane = PlaneN {
            normal: [1.0, 0.0, 0.0],
            origin_distance: 0.5,
        };

        // No point lies exactly on x = 0.5.
        assert!(tree.plane_search(&plane, 0.0, &points).is_empty());

        let mut positive = tree.plane_positive_segmentation(&plane, 0.0, &points);
        positive.sort_unstable();
        assert_eq!(positive, vec![1, 4]);

        // With tolerance 0.5 every x in {0, 1} counts as on-plane.
        let mut hits = tree.plane_search(&plane, 0.5, &points);
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn box_plane_search_hits_straddlers() {
        let boxes = vec![
            BoxN::new([0.0, 0.0], [1.0, 1.0]),
            BoxN::new([2.0, 2.0], [3.0, 3.0]),
        ];
        let tree = QuadtreeBox::build(
            &boxes,
            TreeSetup {
                max_depth: Some(2),
                bounding_box: Some(BoxN::new([0.0, 0.0], [4.0, 4.0])),
                max_elements_per_node: 1,
                parallel: false,
            },
        );
        let plane = PlaneN {
            normal: [0.0, 1.0],
            origin_distance: 0.5,
        };
        assert_eq!(tree.plane_search(&plane, 0.0, &boxes), vec![0]);
        let mut positive = tree.plane_positive_segmentation(&plane, 0.0, &boxes);
        positive.sort_unstable();
        assert_eq!(positive, vec![0, 1]);
    }

    #[test]
    fn frustum_culling_filters_by_all_planes() {
        let (points, tree) = cube_tree();
        // Two half-spaces: x >= 0.5 and y >= 0.5.
        let planes = [
            PlaneN {
                normal: [1.0, 0.0, 0.0],
                origin_distance: 0.5,
            },
            PlaneN {
                normal: [0.0, 1.0, 0.0],
                origin_distance: 0.5,
            },
        ];
        let inside = tree.frustum_culling(&planes, 0.0, &points);
        assert_eq!(inside, vec![4]);
    }
}
