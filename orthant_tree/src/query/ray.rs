// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ray intersection queries on box trees.
//!
//! Both queries prune on the slab test against node cells. The all-hits
//! walk visits every surviving cell; the first-hit walk orders children
//! by cell entry distance and stops descending once the best hit cannot
//! be beaten.

use orthant_space::{Depth, NodeKey};
use smallvec::SmallVec;

use crate::adapter::Adapter;
use crate::boxtree::BoxTree;
use crate::tree::TreeCore;
use crate::entities::EntitySet;
use crate::geometry::ray_cell_distance;
use crate::node::Node;
use crate::query::EntityDistance;
use crate::scalar::EntityId;
use crate::store::NodeStoreCode;

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId, const SPLIT: bool>
    BoxTree<DIM, L, A, I, SPLIT>
{
    /// Ids of every box the ray hits, ordered by ascending hit distance.
    /// `max_distance` (internal scalar) caps the accepted hit distance.
    pub fn ray_intersected_all<C>(
        &self,
        origin: &A::Vector,
        direction: &A::Vector,
        boxes: &C,
        tolerance: A::Scalar,
        max_distance: Option<f64>,
    ) -> Vec<I>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let tolerance = TreeCore::<DIM, L, A, I>::internal_tolerance(tolerance);
        let mut found: Vec<EntityDistance<I>> = Vec::with_capacity(20);
        self.ray_all_descend(
            0,
            crate::tree::Si::<DIM, L>::root_key(),
            boxes,
            origin,
            direction,
            tolerance,
            max_distance,
            &mut found,
        );

        found.sort_unstable();
        let mut ids = Vec::with_capacity(found.len());
        if SPLIT {
            // Split copies hit at the same distance; keep the first.
            for entry in found {
                if !ids.contains(&entry.id) {
                    ids.push(entry.id);
                }
            }
        } else {
            ids.extend(found.into_iter().map(|entry| entry.id));
        }
        ids
    }

    /// All-hits query taking the adapter's ray type.
    pub fn ray_intersected_all_by<C>(
        &self,
        ray: &A::Ray,
        boxes: &C,
        tolerance: A::Scalar,
        max_distance: Option<f64>,
    ) -> Vec<I>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        self.ray_intersected_all(
            &A::ray_origin(ray),
            &A::ray_direction(ray),
            boxes,
            tolerance,
            max_distance,
        )
    }

    /// The box realizing the smallest hit distance, if any.
    pub fn ray_intersected_first<C>(
        &self,
        origin: &A::Vector,
        direction: &A::Vector,
        boxes: &C,
        tolerance: A::Scalar,
    ) -> Option<I>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let tolerance = TreeCore::<DIM, L, A, I>::internal_tolerance(tolerance);
        let root_key = crate::tree::Si::<DIM, L>::root_key();
        let root = self.core.expect_node(root_key);
        ray_cell_distance::<A, DIM>(
            root.center(),
            self.core.node_half_size(0),
            origin,
            direction,
            tolerance,
        )?;

        let mut best: Option<(f64, I)> = None;
        self.ray_first_descend(0, root, boxes, origin, direction, tolerance, &mut best);
        best.map(|(_, id)| id)
    }

    /// First-hit query taking the adapter's ray type.
    pub fn ray_intersected_first_by<C>(&self, ray: &A::Ray, boxes: &C, tolerance: A::Scalar) -> Option<I>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        self.ray_intersected_first(&A::ray_origin(ray), &A::ray_direction(ray), boxes, tolerance)
    }

    #[allow(clippy::too_many_arguments)]
    fn ray_all_descend<C>(
        &self,
        depth: Depth,
        key: NodeKey<L>,
        boxes: &C,
        origin: &A::Vector,
        direction: &A::Vector,
        tolerance: f64,
        max_distance: Option<f64>,
        found: &mut Vec<EntityDistance<I>>,
    ) where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let node = self.core.expect_node(key);
        if ray_cell_distance::<A, DIM>(
            node.center(),
            self.core.node_half_size(depth),
            origin,
            direction,
            tolerance,
        )
        .is_none()
        {
            return;
        }

        for &id in self.core.store.slice(node.entities()) {
            if let Some(distance) = A::ray_box_distance(boxes.at(id), origin, direction, tolerance)
                && max_distance.is_none_or(|limit| distance <= limit)
            {
                found.push(EntityDistance {
                    distance,
                    order: found.len() as u32,
                    id,
                });
            }
        }

        for child_key in node.child_keys() {
            self.ray_all_descend(
                depth + 1,
                child_key,
                boxes,
                origin,
                direction,
                tolerance,
                max_distance,
                found,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn ray_first_descend<C>(
        &self,
        depth: Depth,
        node: &Node<L, DIM>,
        boxes: &C,
        origin: &A::Vector,
        direction: &A::Vector,
        tolerance: f64,
        best: &mut Option<(f64, I)>,
    ) where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        for &id in self.core.store.slice(node.entities()) {
            let Some(distance) = A::ray_box_distance(boxes.at(id), origin, direction, tolerance)
            else {
                continue;
            };
            if best.is_none_or(|(best_distance, _)| best_distance > distance) {
                *best = Some((distance, id));
            }
        }

        // Children ordered by entry distance; a child cannot improve on
        // the best hit once its entry lies beyond it.
        let child_half = self.core.node_half_size(depth + 1);
        let mut ordered: SmallVec<[(f64, NodeKey<L>); 16]> = SmallVec::new();
        for child_key in node.child_keys() {
            let child = self.core.expect_node(child_key);
            let Some(entry) =
                ray_cell_distance::<A, DIM>(child.center(), child_half, origin, direction, tolerance)
            else {
                continue;
            };
            if let Some((best_distance, _)) = best
                && entry > *best_distance
            {
                continue;
            }
            ordered.push((entry, child_key));
        }
        ordered.sort_by(|(a, _), (b, _)| a.total_cmp(b));

        for (entry, child_key) in ordered {
            if let Some((best_distance, _)) = best
                && entry - tolerance >= *best_distance
            {
                break;
            }
            let child = self.core.expect_node(child_key);
            self.ray_first_descend(depth + 1, child, boxes, origin, direction, tolerance, best);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::geometry::{BoxN, RayN};
    use crate::{OctreeBox, QuadtreeBox, TreeSetup};

    #[test]
    fn axis_ray_hits_the_unit_cube() {
        let boxes = vec![BoxN::new([0.0; 3], [1.0; 3])];
        let tree = OctreeBox::build(
            &boxes,
            TreeSetup {
                max_depth: Some(2),
                bounding_box: Some(BoxN::new([0.0; 3], [1.0; 3])),
                max_elements_per_node: 2,
                parallel: false,
            },
        );

        let hit = tree.ray_intersected_first(&[-1.0, 0.5, 0.5], &[1.0, 0.0, 0.0], &boxes, 0.0);
        assert_eq!(hit, Some(0));

        // The hit distance is 1, visible through the all-hits ceiling.
        assert!(
            tree.ray_intersected_all(&[-1.0, 0.5, 0.5], &[1.0, 0.0, 0.0], &boxes, 0.0, Some(0.9))
                .is_empty()
        );
        assert_eq!(
            tree.ray_intersected_all(&[-1.0, 0.5, 0.5], &[1.0, 0.0, 0.0], &boxes, 0.0, Some(1.1)),
            vec![0]
        );
    }

    #[test]
    fn all_hits_come_back_distance_ordered_and_unique() {
        let boxes = vec![
            BoxN::new([3.0, 0.0], [4.0, 1.0]),
            BoxN::new([1.0, 0.0], [2.0, 1.0]),
            BoxN::new([5.0, 0.0], [6.0, 1.0]),
            BoxN::new([0.0, 3.0], [1.0, 4.0]),
        ];
        let tree = QuadtreeBox::build(
            &boxes,
            TreeSetup {
                max_depth: Some(3),
                bounding_box: Some(BoxN::new([0.0, 0.0], [8.0, 8.0])),
                max_elements_per_node: 1,
                parallel: false,
            },
        );

        let hits =
            tree.ray_intersected_all(&[0.0, 0.5], &[1.0, 0.0], &boxes, 0.0, None);
        assert_eq!(hits, vec![1, 0, 2]);

        let first = tree.ray_intersected_first(&[0.0, 0.5], &[1.0, 0.0], &boxes, 0.0);
        assert_eq!(first, Some(1));

        let ray = RayN {
            origin: [0.0, 0.5],
            direction: [1.0, 0.0],
        };
        assert_eq!(tree.ray_intersected_first_by(&ray, &boxes, 0.0), Some(1));
    }

    #[test]
    fn missing_ray_returns_nothing() {
        let boxes = vec![BoxN::new([0.0, 0.0], [1.0, 1.0])];
        let tree = QuadtreeBox::build(&boxes, TreeSetup::default());
        assert_eq!(
            tree.ray_intersected_first(&[2.0, 2.0], &[1.0, 0.0], &boxes, 0.0),
            None
        );
        assert!(
            tree.ray_intersected_all(&[2.0, 2.0], &[1.0, 0.0], &boxes, 0.0, None)
                .is_empty()
        );
    }

    #[test]
    fn tolerance_widens_the_slabs() {
        let boxes = vec![BoxN::new([0.0, 0.0], [1.0, 1.0])];
        let tree = QuadtreeBox::build(
            &boxes,
            TreeSetup {
                bounding_box: Some(BoxN::new([0.0, 0.0], [2.0, 2.0])),
                ..TreeSetup::default()
            },
        );
        // Passing just above the box: only the widened slab catches it.
        assert_eq!(
            tree.ray_intersected_first(&[-1.0, 1.05], &[1.0, 0.0], &boxes, 0.0),
            None
        );
        assert_eq!(
            tree.ray_intersected_first(&[-1.0, 1.05], &[1.0, 0.0], &boxes, 0.1),
            Some(0)
        );
    }
}
