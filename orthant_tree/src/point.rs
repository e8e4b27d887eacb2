// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The point tree: bulk build and incremental edit for point entities.

use orthant_space::{Depth, NodeKey, RangeLocation};

use crate::adapter::Adapter;
use crate::tree::{Si, TreeCore, TreeSetup, partition_in_place};
use crate::entities::EntitySet;
use crate::geometry::{Aabb, aabb_of_points, widen_box};
use crate::scalar::EntityId;
use crate::segments::SegmentHandle;
use crate::store::{NodeMap, NodeStoreCode};

/// A non-owning spatial index over point entities.
///
/// The tree stores entity ids only; geometry is read through the adapter
/// from the collection the caller passes to every build, edit, and query.
///
/// # Example
///
/// ```rust
/// use orthant_tree::{Octree, TreeSetup};
///
/// let points = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 1.0]];
/// let tree = Octree::build(&points, TreeSetup::default());
///
/// let hits = tree.range_search(
///     &orthant_tree::BoxN::new([0.5, -0.5, -0.5], [1.5, 0.5, 0.5]),
///     &points,
/// );
/// assert_eq!(hits, vec![1]);
/// ```
pub struct PointTree<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId = usize> {
    pub(crate) core: TreeCore<DIM, L, A, I>,
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> Default
    for PointTree<DIM, L, A, I>
{
    fn default() -> Self {
        Self {
            core: TreeCore::default_empty(),
        }
    }
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> PointTree<DIM, L, A, I> {
    /// An empty tree over `space`, for incremental insertion.
    pub fn empty(space: &A::Box, max_depth: Depth, max_elements_per_node: usize) -> Self {
        Self {
            core: TreeCore::new(
                widen_box::<A, DIM>(space),
                max_depth,
                max_elements_per_node,
                crate::segments::DEFAULT_PAGE_SIZE,
            ),
        }
    }

    /// Bulk-build from a collection of points.
    pub fn build<C>(points: &C, setup: TreeSetup<A::Box>) -> Self
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        let space = match &setup.bounding_box {
            Some(b) => widen_box::<A, DIM>(b),
            None => aabb_of_points::<A, DIM>(points.iter().map(|(_, p)| p)),
        };
        let n = points.len();
        let max_depth = match setup.max_depth {
            Some(depth) if depth > 0 => depth,
            _ => TreeCore::<DIM, L, A, I>::estimate_max_depth(n, setup.max_elements_per_node),
        };

        let mut core =
            TreeCore::<DIM, L, A, I>::new(space, max_depth, setup.max_elements_per_node, n);
        if n == 0 {
            return Self { core };
        }

        core.nodes
            .reserve(TreeCore::<DIM, L, A, I>::estimate_node_number(
                n,
                max_depth,
                setup.max_elements_per_node,
            ));

        let mut locations: Vec<(L, I)> = points
            .iter()
            .map(|(id, p)| (core.point_location(p, false), id))
            .collect();

        // The parallel path sorts; the sequential path partitions lazily
        // during the descent.
        let sorted = setup.parallel;
        if sorted {
            sort_locations(&mut locations);
        }

        // One main-page run for all ids; nodes seat sub-spans of it.
        let main = core.store.allocate(n as u32);
        debug_assert_eq!(main, SegmentHandle::main(0, n as u32));

        let root = Si::<DIM, L>::root_key();
        let root_center = *core.expect_node(root).center();
        core.nodes.clear();
        build_subtree(&mut core, root, root_center, 0, &mut locations, 0, sorted);

        Self { core }
    }

    /// Insert a point entity, locally rebalancing overfull nodes.
    /// Returns `false` without mutation when the point is outside the
    /// space box.
    pub fn insert_with_rebalancing<C>(&mut self, id: I, point: &A::Vector, points: &C) -> bool
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        if !self.core.space_contains_point(point) {
            return false;
        }

        let location = self.point_range_location(point);
        let entity_key = Si::<DIM, L>::key_of_range(&location, self.core.max_depth);
        let (parent_key, parent_depth) = self.core.find_smallest_key_with_depth(entity_key);
        if !Si::<DIM, L>::is_valid(parent_key) {
            return false;
        }

        let inserted = self.core.insert_with_rebalancing(
            parent_key,
            parent_depth,
            false,
            location,
            id,
            &|core, seated| {
                RangeLocation {
                    depth: core.max_depth,
                    loc: core.point_location(points.at(seated), false),
                    touched: 0,
                    lower_segment: 0,
                }
            },
        );
        debug_assert!(self.core.is_every_entity_unique(), "duplicate entity id");
        inserted
    }

    /// Insert a point entity without rebalancing. The id lands in the
    /// smallest existing node on its path, or in a newly created leaf
    /// when `to_leaf`.
    pub fn insert(&mut self, id: I, point: &A::Vector, to_leaf: bool) -> bool {
        if !self.core.space_contains_point(point) {
            return false;
        }

        let entity_key = self.core.point_node_key(point, false);
        let smallest = self.core.find_smallest_key(entity_key);
        if !Si::<DIM, L>::is_valid(smallest) {
            return false;
        }

        let inserted = self
            .core
            .insert_without_rebalancing(smallest, entity_key, id, to_leaf);
        debug_assert!(self.core.is_every_entity_unique(), "duplicate entity id");
        inserted
    }

    /// Erase an entity, locating its node by the point it was inserted
    /// with. `renumber` keeps dense ids contiguous by decrementing every
    /// id greater than the erased one.
    pub fn erase(&mut self, id: I, point: &A::Vector, renumber: bool) -> bool {
        let Some(node_key) = self.find_smallest_node(point) else {
            return false;
        };
        if !self.core.remove_entity(node_key, id) {
            return false;
        }
        if renumber {
            self.core.decrement_ids_above(id);
        }
        self.core.remove_node_if_possible(node_key);
        true
    }

    /// Erase an entity by scanning every node for its id.
    pub fn erase_id(&mut self, id: I, renumber: bool) -> bool {
        let Some(node_key) = self.core.node_key_by_entity(id) else {
            return false;
        };
        self.core.remove_entity(node_key, id);
        self.core.remove_node_if_possible(node_key);
        if renumber {
            self.core.decrement_ids_above(id);
        }
        true
    }

    /// Move an entity to new geometry: erase + insert with rebalancing.
    ///
    /// Best-effort: on `false` the entity may have been removed without
    /// being re-inserted (the new point lies outside the space box).
    pub fn update<C>(&mut self, id: I, new_point: &A::Vector, points: &C) -> bool
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        if !self.core.space_contains_point(new_point) {
            return false;
        }
        if !self.erase_id(id, false) {
            return false;
        }
        self.insert_with_rebalancing(id, new_point, points)
    }

    /// Move an entity, locating the erase by its old geometry. Same
    /// best-effort contract as [`update`](Self::update).
    pub fn update_from<C>(
        &mut self,
        id: I,
        old_point: &A::Vector,
        new_point: &A::Vector,
        points: &C,
    ) -> bool
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        if !self.core.space_contains_point(new_point) {
            return false;
        }
        if !self.erase(id, old_point, false) {
            return false;
        }
        self.insert_with_rebalancing(id, new_point, points)
    }

    /// Whether some stored entity coincides with `point` within
    /// `tolerance`.
    pub fn contains<C>(&self, point: &A::Vector, points: &C, tolerance: A::Scalar) -> bool
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        let tolerance = TreeCore::<DIM, L, A, I>::internal_tolerance(tolerance);
        let Some(node_key) = self.find_smallest_node(point) else {
            return false;
        };
        let node = self.core.expect_node(node_key);
        self.core
            .store
            .slice(node.entities())
            .iter()
            .any(|&seated| A::points_equal(point, points.at(seated), tolerance))
    }

    /// Key of the smallest existing node whose cell contains `point`.
    pub fn find_smallest_node(&self, point: &A::Vector) -> Option<NodeKey<L>> {
        if !self.core.space_contains_point(point) {
            return None;
        }
        let key = self
            .core
            .find_smallest_key(self.core.point_node_key(point, false));
        Si::<DIM, L>::is_valid(key).then_some(key)
    }

    /// Node key currently holding `id`, by exhaustive scan.
    pub fn find(&self, id: I) -> Option<NodeKey<L>> {
        self.core.node_key_by_entity(id)
    }

    /// Every stored id, depth-first from the root.
    pub fn collect_all_ids(&self) -> Vec<I> {
        let mut out = Vec::new();
        self.core
            .collect_subtree_ids(self.core.expect_node(Si::<DIM, L>::root_key()), &mut out);
        out
    }

    /// Rewrite stored ids through a map; `None` erases an id.
    pub fn update_indexes(&mut self, updates: &std::collections::HashMap<I, Option<I>>) {
        self.core.update_indexes(updates);
    }

    /// Remove every entity and node except the root.
    pub fn clear(&mut self) {
        self.core.clear();
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.core.node_count()
    }

    /// Depth of the deepest possible node.
    pub fn max_depth(&self) -> Depth {
        self.core.max_depth
    }

    /// Max entities seated in one node before it subdivides.
    pub fn max_elements_per_node(&self) -> usize {
        self.core.max_elements
    }

    /// The indexed space in internal coordinates.
    pub fn space_box(&self) -> &Aabb<DIM> {
        self.core.space_box()
    }

    /// The node at `key`, if present.
    pub fn node(&self, key: NodeKey<L>) -> Option<&crate::node::Node<L, DIM>> {
        self.core.node(key)
    }

    /// Entity ids seated in the node at `key`.
    pub fn node_entities(&self, key: NodeKey<L>) -> Option<&[I]> {
        self.core
            .node(key)
            .map(|node| self.core.store.slice(node.entities()))
    }

    /// Center of the cell named by `key`, whether or not a node exists
    /// there.
    pub fn node_center(&self, key: NodeKey<L>) -> [f64; DIM] {
        match self.core.node(key) {
            Some(node) => *node.center(),
            None => self.core.node_center_by_key(key),
        }
    }

    /// Cell box of the node named by `key`.
    pub fn node_box(&self, key: NodeKey<L>) -> Aabb<DIM> {
        let depth = Si::<DIM, L>::depth_of(key);
        self.core.node_box(depth, &self.node_center(key))
    }

    /// Visit nodes breadth-first from the root; return `false` from
    /// `selector` to prune a subtree.
    pub fn visit_nodes(
        &self,
        selector: impl FnMut(NodeKey<L>, &crate::node::Node<L, DIM>) -> bool,
        procedure: impl FnMut(NodeKey<L>, &crate::node::Node<L, DIM>),
    ) {
        self.core
            .visit_nodes(Si::<DIM, L>::root_key(), selector, procedure);
    }

    pub(crate) fn point_range_location(&self, point: &A::Vector) -> RangeLocation<L> {
        RangeLocation {
            depth: self.core.max_depth,
            loc: self.core.point_location(point, false),
            touched: 0,
            lower_segment: 0,
        }
    }
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> Clone
    for PointTree<DIM, L, A, I>
where
    TreeCore<DIM, L, A, I>: Clone,
{
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

/// Sort zipped `(location, id)` pairs by location, on the rayon pool when
/// the `parallel` feature is enabled.
fn sort_locations<L: NodeStoreCode, I: EntityId>(locations: &mut [(L, I)]) {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        locations.par_sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
    }
    #[cfg(not(feature = "parallel"))]
    locations.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
}

/// Depth-first build: seat small or max-depth slices as leaves, else
/// partition by child segment and recurse. Ids land in the pre-allocated
/// main run at the same offsets as their slice, so seating is zero-copy.
fn build_subtree<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId>(
    core: &mut TreeCore<DIM, L, A, I>,
    key: NodeKey<L>,
    center: [f64; DIM],
    depth: Depth,
    locations: &mut [(L, I)],
    base: u32,
    sorted: bool,
) {
    let n = locations.len();
    let mut node = crate::node::Node::new(key, center);

    if n <= core.max_elements || depth == core.max_depth {
        if n > 0 {
            let handle = SegmentHandle::main(base, n as u32);
            for (slot, (_, id)) in core.store.slice_mut(handle).iter_mut().zip(locations.iter()) {
                *slot = *id;
            }
            node.replace_entities(handle);
        }
        core.nodes.insert(key, node);
        return;
    }

    let examined_level = core.max_depth - (depth + 1);
    let mut begin = 0usize;
    while begin < n {
        let checker = Si::<DIM, L>::child_checker(examined_level, locations[begin].0);
        let group_len = if sorted {
            locations[begin..].partition_point(|(location, _)| checker.test(*location))
        } else {
            partition_in_place(&mut locations[begin..], |(location, _)| {
                checker.test(*location)
            })
        };
        debug_assert!(group_len > 0);

        let child = checker.child_id();
        let child_key = Si::<DIM, L>::child_keys(key).key_of(child);
        let child_center = core.child_center(&center, child_key);
        node.add_child(child);
        build_subtree(
            core,
            child_key,
            child_center,
            depth + 1,
            &mut locations[begin..begin + group_len],
            base + begin as u32,
            sorted,
        );
        begin += group_len;
    }

    core.nodes.insert(key, node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Octree;
    use crate::store::NodeMap;

    fn cube_points() -> Vec<[f64; 3]> {
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
        ]
    }

    fn cube_setup() -> TreeSetup<crate::BoxN<f64, 3>> {
        TreeSetup {
            max_depth: Some(2),
            bounding_box: Some(crate::BoxN::new([0.0; 3], [1.0; 3])),
            max_elements_per_node: 2,
            parallel: false,
        }
    }

    #[test]
    fn build_seats_every_entity_once() {
        let points = cube_points();
        let tree = Octree::build(&points, cube_setup());

        let mut ids = tree.collect_all_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert!(tree.core.is_every_entity_unique());
    }

    #[test]
    fn build_sorted_matches_unsorted() {
        let points = cube_points();
        let unsorted = Octree::build(&points, cube_setup());
        let sorted = Octree::build(
            &points,
            TreeSetup {
                parallel: true,
                ..cube_setup()
            },
        );

        let mut a = unsorted.collect_all_ids();
        let mut b = sorted.collect_all_ids();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
        assert_eq!(unsorted.node_count(), sorted.node_count());
    }

    #[test]
    fn nodes_satisfy_existence_invariant() {
        let points = cube_points();
        let tree = Octree::build(&points, cube_setup());
        for (key, node) in tree.core.nodes.iter() {
            if key != 1 {
                assert!(
                    node.has_any_child() || !node.is_entities_empty(),
                    "empty non-root node {key:#x}"
                );
                assert!(
                    tree.core.nodes.contains(orthant_space::SpaceIndex::<3, u32>::parent(key)),
                    "orphan node {key:#x}"
                );
            }
        }
    }

    #[test]
    fn insert_and_erase_round_trip() {
        let mut points = cube_points();
        let mut tree = Octree::build(&points, cube_setup());

        let keys_before: Vec<u32> = tree.core.nodes.iter().map(|(k, _)| k).collect();

        points.push([0.4, 0.6, 0.2]);
        assert!(tree.insert_with_rebalancing(5, &points[5], &points));
        assert!(tree.collect_all_ids().contains(&5));

        assert!(tree.erase(5, &[0.4, 0.6, 0.2], false));
        let mut keys_after: Vec<u32> = tree.core.nodes.iter().map(|(k, _)| k).collect();
        let mut keys_before = keys_before;
        keys_before.sort_unstable();
        keys_after.sort_unstable();
        assert_eq!(keys_before, keys_after);
    }

    #[test]
    fn erase_renumbers_dense_ids() {
        let points = cube_points();
        let mut tree = Octree::build(&points, cube_setup());

        assert!(tree.erase(2, &[0.0, 1.0, 0.0], true));
        let mut ids = tree.collect_all_ids();
        ids.sort_unstable();
        // Ids above 2 slid down by one.
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn out_of_space_edits_return_false() {
        let points = cube_points();
        let mut tree = Octree::build(&points, cube_setup());
        assert!(!tree.insert(9, &[2.0, 0.0, 0.0], false));
        assert!(!tree.update(0, &[-1.0, 0.0, 0.0], &points));
    }

    #[test]
    fn contains_finds_exact_points() {
        let points = cube_points();
        let tree = Octree::build(&points, cube_setup());
        assert!(tree.contains(&[1.0, 1.0, 1.0], &points, 0.0));
        assert!(!tree.contains(&[0.5, 0.5, 0.5], &points, 0.0));
    }

    #[test]
    fn rebalancing_keeps_nodes_within_capacity() {
        let mut points: Vec<[f64; 2]> = Vec::new();
        let mut rng = 0x2545_f491_4f6c_dd1du64;
        for _ in 0..200 {
            rng ^= rng << 13;
            rng ^= rng >> 7;
            rng ^= rng << 17;
            let x = (rng >> 11) as f64 / (1u64 << 53) as f64;
            rng ^= rng << 13;
            rng ^= rng >> 7;
            rng ^= rng << 17;
            let y = (rng >> 11) as f64 / (1u64 << 53) as f64;
            points.push([x, y]);
        }

        let mut tree = crate::Quadtree::empty(&crate::BoxN::new([0.0; 2], [1.0; 2]), 5, 4);
        for (id, p) in points.as_slice().iter().enumerate() {
            assert!(tree.insert_with_rebalancing(id, p, &points));
        }

        let mut ids = tree.collect_all_ids();
        ids.sort_unstable();
        assert_eq!(ids, (0..200).collect::<Vec<_>>());
    }
}
