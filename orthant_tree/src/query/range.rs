// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Range search with dimension-masked descent, and the box-tree pick
//! search.

use orthant_space::{ChildId, Depth, NodeKey};

use crate::adapter::Adapter;
use crate::boxtree::BoxTree;
use crate::tree::{Si, TreeCore, sort_and_unique};
use crate::entities::EntitySet;
use crate::geometry::{user_box_contains_aabb, widen_box};
use crate::point::PointTree;
use crate::scalar::EntityId;
use crate::store::NodeStoreCode;

/// Per-axis relation of a query range to a cell center: bit set in `min`
/// (`max`) iff the center is at or below the range's lower (upper) bound
/// on that axis.
fn relative_min_max_masks<A: Adapter<DIM>, const DIM: usize>(
    center: &[f64; DIM],
    range: &A::Box,
) -> (ChildId, ChildId) {
    use crate::scalar::Scalar;

    let mut min_mask: ChildId = 0;
    let mut max_mask: ChildId = 0;
    for axis in 0..DIM {
        let bit = 1 << axis;
        if center[axis] <= A::box_min_c(range, axis).to_internal() {
            min_mask |= bit;
        }
        if center[axis] <= A::box_max_c(range, axis).to_internal() {
            max_mask |= bit;
        }
    }
    (min_mask, max_mask)
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> TreeCore<DIM, L, A, I> {
    /// Dimension-masked descent from `key`: on axes where the range does
    /// not straddle the node center, only children on the range's side
    /// are visited. Node cells fully inside the range flush their whole
    /// subtree without further entity tests.
    fn range_search_descend(
        &self,
        range: &A::Box,
        depth: Depth,
        key: NodeKey<L>,
        test_entity: &impl Fn(I) -> bool,
        found: &mut Vec<I>,
    ) {
        let node = self.expect_node(key);
        if !node.has_any_child() {
            self.copy_matching(node.entities(), test_entity, found);
            return;
        }

        let center = node.center();
        let (min_mask, max_mask) = relative_min_max_masks::<A, DIM>(center, range);

        // A differing min/max bit means the range straddles the center on
        // that axis and both sides must be walked.
        let limited = !(min_mask ^ max_mask) & Si::<DIM, L>::CHILD_MASK;

        if limited == 0 && user_box_contains_aabb::<A, DIM>(range, &self.node_box(depth, center)) {
            let mut subtree = Vec::new();
            self.collect_subtree_ids(node, &mut subtree);
            found.append(&mut subtree);
            return;
        }

        self.copy_matching(node.entities(), test_entity, found);

        // On the non-straddled axes a child must sit on the range's side.
        let boundaries = (min_mask & max_mask) & limited;
        for child_key in node.child_keys() {
            if Si::<DIM, L>::child_id_of(child_key) & limited == boundaries {
                self.range_search_descend(range, depth + 1, child_key, test_entity, found);
            }
        }
    }

    fn copy_matching(
        &self,
        handle: crate::segments::SegmentHandle,
        test_entity: &impl Fn(I) -> bool,
        found: &mut Vec<I>,
    ) {
        for &id in self.store.slice(handle) {
            if test_entity(id) {
                found.push(id);
            }
        }
    }

    /// Common root of every range search: whole-space fast path, smallest
    /// enclosing node, descent, then the ancestors that may hold stuck
    /// entities.
    pub(crate) fn range_search_root(
        &self,
        range: &A::Box,
        entity_count: usize,
        range_key_point_like: bool,
        test_entity: &impl Fn(I) -> bool,
        all_ids: &impl Fn(&mut Vec<I>),
        found: &mut Vec<I>,
    ) {
        if user_box_contains_aabb::<A, DIM>(range, self.space_box()) {
            all_ids(found);
            return;
        }

        // A degenerate range can stick to any cell wall; nothing overlaps
        // it with positive measure.
        let range_volume = widen_box::<A, DIM>(range).volume();
        if range_volume <= 0.0 {
            return;
        }

        let range_key = self.box_node_key(range, range_key_point_like);
        let smallest = self.find_smallest_key(range_key);
        if !Si::<DIM, L>::is_valid(smallest) {
            return;
        }

        let estimate = if self.grid.volume() < 0.01 {
            10
        } else {
            ((range_volume * entity_count as f64) / self.grid.volume()) as usize
        };
        found.reserve(estimate);

        self.range_search_descend(
            range,
            Si::<DIM, L>::depth_of(smallest),
            smallest,
            test_entity,
            found,
        );

        // Entities stuck above the smallest enclosing node.
        let mut walk = Si::<DIM, L>::parent(smallest);
        while Si::<DIM, L>::is_valid(walk) {
            if let Some(node) = self.node(walk) {
                self.copy_matching(node.entities(), test_entity, found);
            }
            walk = Si::<DIM, L>::parent(walk);
        }
    }
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> PointTree<DIM, L, A, I> {
    /// Ids of every point inside `range` (bounds inclusive).
    pub fn range_search<C>(&self, range: &A::Box, points: &C) -> Vec<I>
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        let mut found = Vec::new();
        self.core.range_search_root(
            range,
            points.len(),
            true,
            &|id| A::box_contains_point(range, points.at(id), 0.0),
            &|out| out.extend(points.iter().map(|(id, _)| id)),
            &mut found,
        );
        found
    }
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId, const SPLIT: bool>
    BoxTree<DIM, L, A, I, SPLIT>
{
    /// Ids of every box overlapping `range` with positive measure.
    pub fn range_search<C>(&self, range: &A::Box, boxes: &C) -> Vec<I>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let mut found = Vec::new();
        self.core.range_search_root(
            range,
            boxes.len(),
            false,
            &|id| A::boxes_overlap_strict(range, boxes.at(id)),
            &|out| out.extend(boxes.iter().map(|(id, _)| id)),
            &mut found,
        );
        if SPLIT {
            sort_and_unique(&mut found);
        }
        found
    }

    /// Ids of every box fully contained in `range` (bounds inclusive).
    pub fn range_search_inside<C>(&self, range: &A::Box, boxes: &C) -> Vec<I>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let mut found = Vec::new();
        self.core.range_search_root(
            range,
            boxes.len(),
            false,
            &|id| A::boxes_overlap(range, boxes.at(id), true, false),
            &|out| out.extend(boxes.iter().map(|(id, _)| id)),
            &mut found,
        );
        if SPLIT {
            sort_and_unique(&mut found);
        }
        found
    }

    /// Ids of every box containing `point`. A pick exactly on a grid
    /// line also examines the neighbouring cells.
    pub fn pick_search<C>(&self, point: &A::Vector, boxes: &C) -> Vec<I>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let mut found = Vec::new();
        if !self.core.space_contains_point(point) {
            return found;
        }

        let grid_range = self.core.grid.edge_point_grid::<A>(point);
        let lower_location = Si::<DIM, L>::encode(grid_range[0]);
        let upper_location = Si::<DIM, L>::encode(grid_range[1]);

        let mut walk = Si::<DIM, L>::key_at_depth(
            upper_location,
            self.core.max_depth,
            self.core.max_depth,
        );
        if lower_location != upper_location {
            // The pick sits on a cell boundary: descend below the common
            // ancestor of the touched cells as well.
            let placed =
                Si::<DIM, L>::range_location(self.core.max_depth, lower_location, upper_location);
            let range_key = Si::<DIM, L>::key_of_range(&placed, self.core.max_depth);
            walk = self.core.find_smallest_key(range_key);
            if self.core.node(walk).is_some() {
                self.pick_search_descend(point, boxes, walk, &mut found);
            }
            walk = Si::<DIM, L>::parent(walk);
        }

        while Si::<DIM, L>::is_valid(walk) {
            if let Some(node) = self.core.node(walk) {
                for &id in self.core.store.slice(node.entities()) {
                    if A::box_contains_point(boxes.at(id), point, 0.0) {
                        found.push(id);
                    }
                }
            }
            walk = Si::<DIM, L>::parent(walk);
        }

        if SPLIT {
            sort_and_unique(&mut found);
        }
        found
    }

    fn pick_search_descend<C>(&self, point: &A::Vector, boxes: &C, key: NodeKey<L>, found: &mut Vec<I>)
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        use crate::scalar::Scalar;

        let node = self.core.expect_node(key);
        for &id in self.core.store.slice(node.entities()) {
            if A::box_contains_point(boxes.at(id), point, 0.0) {
                found.push(id);
            }
        }

        let center = node.center();
        for child_key in node.child_keys() {
            // Visit children whose segment lies on the pick's side of the
            // center on every axis; a pick on the center visits them all.
            let child = Si::<DIM, L>::child_id_of(child_key);
            let mut overlaps = true;
            for axis in 0..DIM {
                let p = A::point_c(point, axis).to_internal();
                let on_greater_side = Si::<DIM, L>::is_in_greater_segment(child, axis);
                if (on_greater_side && center[axis] > p) || (!on_greater_side && center[axis] < p) {
                    overlaps = false;
                    break;
                }
            }
            if overlaps {
                self.pick_search_descend(point, boxes, child_key, found);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::geometry::BoxN;
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
    fn corner_range_finds_far_corner_only() {
        let (points, tree) = cube_tree();
        let hits = tree.range_search(&BoxN::new([0.4; 3], [1.0; 3]), &points);
        assert_eq!(hits, vec![4]);
    }

    #[test]
    fn whole_space_range_returns_everything() {
        let (points, tree) = cube_tree();
        let mut hits = tree.range_search(&BoxN::new([-1.0; 3], [2.0; 3]), &points);
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn degenerate_range_is_empty() {
        let (points, tree) = cube_tree();
        let hits = tree.range_search(&BoxN::new([0.0; 3], [0.0, 1.0, 1.0]), &points);
        assert!(hits.is_empty());
    }

    #[test]
    fn erase_then_range_search_drops_the_id() {
        let (points, mut tree) = cube_tree();
        assert!(tree.erase(2, &[0.0, 1.0, 0.0], false));
        let mut hits = tree.range_search(&BoxN::new([0.0; 3], [1.0; 3]), &points);
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 1, 3, 4]);
    }

    fn overlapping_boxes() -> Vec<BoxN<f64, 2>> {
        vec![
            BoxN::new([0.0, 0.0], [1.0, 1.0]),
            BoxN::new([0.5, 0.5], [1.5, 1.5]),
            BoxN::new([2.0, 2.0], [3.0, 3.0]),
        ]
    }

    #[test]
    fn box_range_search_modes_and_dedup() {
        let boxes = overlapping_boxes();
        let tree = QuadtreeBox::build(
            &boxes,
            TreeSetup {
                max_depth: Some(3),
                bounding_box: Some(BoxN::new([0.0, 0.0], [3.0, 3.0])),
                max_elements_per_node: 1,
                parallel: false,
            },
        );

        let hits = tree.range_search(&BoxN::new([0.4, 0.4], [1.2, 1.2]), &boxes);
        assert_eq!(hits, vec![0, 1]);

        let inside = tree.range_search_inside(&BoxN::new([0.4, 0.4], [1.6, 1.6]), &boxes);
        assert_eq!(inside, vec![1]);

        // Touching box 0's face only: no positive-measure overlap.
        let touching = tree.range_search(&BoxN::new([1.0, 0.0], [1.4, 0.4]), &boxes);
        assert!(touching.is_empty());
    }

    #[test]
    fn pick_search_on_boundary_examines_neighbours() {
        let boxes = overlapping_boxes();
        let tree = QuadtreeBox::build(
            &boxes,
            TreeSetup {
                max_depth: Some(2),
                bounding_box: Some(BoxN::new([0.0, 0.0], [3.0, 3.0])),
                max_elements_per_node: 1,
                parallel: false,
            },
        );

        assert_eq!(tree.pick_search(&[0.75, 0.75], &boxes), vec![0, 1]);
        assert_eq!(tree.pick_search(&[2.5, 2.5], &boxes), vec![2]);
        // On the shared corner of boxes 0 and 1.
        assert_eq!(tree.pick_search(&[1.0, 1.0], &boxes), vec![0, 1]);
        assert!(tree.pick_search(&[1.7, 0.2], &boxes).is_empty());
    }
}
