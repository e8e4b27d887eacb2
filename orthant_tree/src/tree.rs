// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared machinery of the point and box trees: the node map, the segment
//! store, depth/size caches, and the insert/erase/visit primitives both
//! tree kinds build on.

use core::marker::PhantomData;
use std::collections::HashMap;

use orthant_space::{ChildId, Depth, NodeKey, RangeLocation, SpaceIndex};
use smallvec::SmallVec;

use crate::adapter::Adapter;
use crate::geometry::{Aabb, widen_point};
use crate::grid::GridLayout;
use crate::node::Node;
use crate::scalar::{EntityId, Scalar};
use crate::segments::{DEFAULT_PAGE_SIZE, SegmentStore};
use crate::store::{NodeMap, NodeStoreCode};

/// Default cap on entities seated in one node.
pub const DEFAULT_MAX_ELEMENTS_PER_NODE: usize = 20;

/// Build/init configuration for both tree kinds.
///
/// `max_depth` and `bounding_box` default to being derived from the input;
/// `parallel` asks the bulk build to sort locations with the parallel path
/// (identical results, only speed changes; it falls back to the sequential
/// sort without the `parallel` feature).
#[derive(Clone, Debug)]
pub struct TreeSetup<B> {
    /// Tree depth; estimated from the entity count when `None`.
    pub max_depth: Option<Depth>,
    /// The indexed space; the entities' bounding box when `None`.
    pub bounding_box: Option<B>,
    /// Max entities seated in one node before it subdivides.
    pub max_elements_per_node: usize,
    /// Use the parallel bulk-build path.
    pub parallel: bool,
}

impl<B> Default for TreeSetup<B> {
    fn default() -> Self {
        Self {
            max_depth: None,
            bounding_box: None,
            max_elements_per_node: DEFAULT_MAX_ELEMENTS_PER_NODE,
            parallel: false,
        }
    }
}

/// Sort and deduplicate, used by every query that may collect an id twice.
pub(crate) fn sort_and_unique<T: Ord>(values: &mut Vec<T>) {
    values.sort_unstable();
    values.dedup();
}

/// Partition `slice` so predicate-true elements come first; returns the
/// boundary. Order within the halves is not preserved.
pub(crate) fn partition_in_place<T>(slice: &mut [T], mut pred: impl FnMut(&T) -> bool) -> usize {
    let mut first = 0;
    let mut last = slice.len();
    while first < last {
        if pred(&slice[first]) {
            first += 1;
        } else {
            last -= 1;
            slice.swap(first, last);
        }
    }
    first
}

/// The node map, allocator, and caches shared by [`crate::PointTree`] and
/// [`crate::BoxTree`].
pub struct TreeCore<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> {
    pub(crate) nodes: L::Map<Node<L, DIM>>,
    pub(crate) store: SegmentStore<I>,
    pub(crate) grid: GridLayout<DIM>,
    pub(crate) max_depth: Depth,
    pub(crate) max_elements: usize,
    /// Full cell extent per depth, with spare entries below the leaves so
    /// a child half-size can be asked for at `max_depth`.
    pub(crate) node_sizes: Vec<[f64; DIM]>,
    adapter: PhantomData<fn() -> A>,
}

/// The space-index algebra of a tree core.
pub(crate) type Si<const DIM: usize, L> = SpaceIndex<DIM, L>;

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> TreeCore<DIM, L, A, I> {
    /// Set up an empty tree over `space` with only the root node.
    pub(crate) fn new(
        space: Aabb<DIM>,
        max_depth: Depth,
        max_elements: usize,
        estimated_entities: usize,
    ) -> Self {
        assert!(max_depth >= 1, "max_depth must be at least 1");
        assert!(
            max_depth <= Si::<DIM, L>::MAX_DEPTH,
            "max_depth exceeds what the location code can address in {DIM} dimensions"
        );
        assert!((max_depth as u32) < 32, "grid ids cap the depth below 32");
        assert!(max_elements >= 1, "max_elements_per_node must be at least 1");

        let grid = GridLayout::new(max_depth, space);

        // A fictive child half-size below the leaves can be asked for
        // prematurely; keep a few extra entries.
        let depth_count = max_depth as usize + 3;
        let mut node_sizes = vec![[0.0; DIM]; depth_count];
        let mut factor = 1.0;
        for depth in 0..depth_count {
            for axis in 0..DIM {
                node_sizes[depth][axis] = grid.sizes()[axis] * factor;
            }
            factor *= 0.5;
        }

        let mut nodes = L::Map::<Node<L, DIM>>::default();
        let root_center = space.center();
        nodes.insert(
            Si::<DIM, L>::root_key(),
            Node::new(Si::<DIM, L>::root_key(), root_center),
        );

        let mut store = SegmentStore::default();
        store.init(estimated_entities.max(1));

        Self {
            nodes,
            store,
            grid,
            max_depth,
            max_elements,
            node_sizes,
            adapter: PhantomData,
        }
    }

    pub(crate) fn default_empty() -> Self {
        Self::new(
            Aabb::new([0.0; DIM], [1.0; DIM]),
            2,
            DEFAULT_MAX_ELEMENTS_PER_NODE,
            DEFAULT_PAGE_SIZE,
        )
    }

    // Sizing estimators, used by every constructor.

    /// Estimated depth for `n` entities at `max_elements` per node.
    pub fn estimate_max_depth(n: usize, max_elements: usize) -> Depth {
        if n <= max_elements {
            return 2;
        }
        let leaves = (n / max_elements) as f64;
        let estimate = (leaves.log2() / DIM as f64) as Depth;
        estimate.clamp(2, Si::<DIM, L>::MAX_DEPTH)
    }

    /// Non-shrinking node-count estimate used to pre-size the node map.
    pub fn estimate_node_number(n: usize, max_depth: Depth, max_elements: usize) -> usize {
        assert!(max_elements > 0);
        assert!(max_depth > 0);

        if n < 10 {
            return 10;
        }

        if (max_depth as u32 + 1) * (DIM as u32) < 64 {
            let max_children = 1usize << (max_depth as u32 * DIM as u32);
            if n / max_children > max_elements / 2 {
                return max_children;
            }
        }

        let per_node_avg = n as f64 / max_elements as f64;
        let estimated_depth =
            (((per_node_avg.log2() + 1.0) / DIM as f64).ceil().max(0.0) as Depth).min(max_depth);
        let exponent = estimated_depth as u32 * (DIM as u32).min(6);
        if exponent < 64 {
            return (1.05 * (1u64 << exponent) as f64) as usize;
        }

        (1.5 * per_node_avg) as usize
    }

    // Getters.

    /// Number of nodes in the map.
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The indexed space in internal coordinates.
    pub(crate) fn space_box(&self) -> &Aabb<DIM> {
        self.grid.space()
    }

    pub(crate) fn node(&self, key: NodeKey<L>) -> Option<&Node<L, DIM>> {
        self.nodes.get(key)
    }

    pub(crate) fn expect_node(&self, key: NodeKey<L>) -> &Node<L, DIM> {
        self.nodes.get(key).expect("node key resolved from the map")
    }

    /// Full cell extent at `depth`.
    #[inline]
    pub(crate) fn node_size(&self, depth: Depth) -> &[f64; DIM] {
        &self.node_sizes[depth as usize]
    }

    /// Half extent of a cell at `depth` (the full extent one level down).
    #[inline]
    pub(crate) fn node_half_size(&self, depth: Depth) -> &[f64; DIM] {
        &self.node_sizes[depth as usize + 1]
    }

    /// Recompute a cell center from its key, for keys without a node.
    pub(crate) fn node_center_by_key(&self, key: NodeKey<L>) -> [f64; DIM] {
        let grid = Si::<DIM, L>::decode(key, self.max_depth);
        self.grid
            .cell_center(grid, self.max_depth - Si::<DIM, L>::depth_of(key))
    }

    /// Cell box of a node at `depth` with the given center.
    pub(crate) fn node_box(&self, depth: Depth, center: &[f64; DIM]) -> Aabb<DIM> {
        let half = self.node_half_size(depth);
        let mut cell = Aabb::new(*center, *center);
        for axis in 0..DIM {
            cell.min[axis] -= half[axis];
            cell.max[axis] += half[axis];
        }
        cell
    }

    // Location helpers.

    #[inline]
    pub(crate) fn point_location(&self, point: &A::Vector, clamp_outside: bool) -> L {
        Si::<DIM, L>::encode(self.grid.point_grid::<A>(point, clamp_outside))
    }

    #[inline]
    pub(crate) fn point_node_key(&self, point: &A::Vector, clamp_outside: bool) -> NodeKey<L> {
        Si::<DIM, L>::key_at_depth(
            self.point_location(point, clamp_outside),
            self.max_depth,
            self.max_depth,
        )
    }

    #[inline]
    pub(crate) fn box_location(&self, b: &A::Box, point_like: bool) -> RangeLocation<L> {
        let range = self.grid.box_grid_range::<A>(b, point_like);
        Si::<DIM, L>::range_location_of_grid(self.max_depth, range[0], range[1])
    }

    #[inline]
    pub(crate) fn box_node_key(&self, b: &A::Box, point_like: bool) -> NodeKey<L> {
        Si::<DIM, L>::key_of_range(&self.box_location(b, point_like), self.max_depth)
    }

    /// Walk ancestors of `search` until a key exists in the map.
    pub(crate) fn find_smallest_key(&self, mut search: NodeKey<L>) -> NodeKey<L> {
        while Si::<DIM, L>::is_valid(search) {
            if self.nodes.contains(search) {
                return search;
            }
            search = Si::<DIM, L>::parent(search);
        }
        Si::<DIM, L>::none_key()
    }

    pub(crate) fn find_smallest_key_with_depth(
        &self,
        mut search: NodeKey<L>,
    ) -> (NodeKey<L>, Depth) {
        let mut depth = Si::<DIM, L>::depth_of(search);
        while Si::<DIM, L>::is_valid(search) {
            if self.nodes.contains(search) {
                return (search, depth);
            }
            search = Si::<DIM, L>::parent(search);
            depth = depth.wrapping_sub(1);
        }
        (Si::<DIM, L>::none_key(), 0)
    }

    // Node protocols.

    /// Center of a child cell, derived from the parent's center.
    pub(crate) fn child_center(
        &self,
        parent_center: &[f64; DIM],
        child_key: NodeKey<L>,
    ) -> [f64; DIM] {
        let depth = Si::<DIM, L>::depth_of(child_key);
        let half = self.node_half_size(depth);
        let child_id = Si::<DIM, L>::child_id_of(child_key);

        let mut center = [0.0; DIM];
        for axis in 0..DIM {
            let sign = if Si::<DIM, L>::is_in_greater_segment(child_id, axis) {
                1.0
            } else {
                -1.0
            };
            center[axis] = parent_center[axis] + sign * half[axis];
        }
        center
    }

    /// A child node with its center derived from the parent's.
    pub(crate) fn create_child(
        &self,
        parent_center: &[f64; DIM],
        child_key: NodeKey<L>,
    ) -> Node<L, DIM> {
        Node::new(child_key, self.child_center(parent_center, child_key))
    }

    /// Link a fresh child under `parent_key` and return its key.
    pub(crate) fn link_new_child(&mut self, parent_key: NodeKey<L>, child: ChildId) -> NodeKey<L> {
        let child_key = Si::<DIM, L>::child_keys(parent_key).key_of(child);
        let parent = self
            .nodes
            .get_mut(parent_key)
            .expect("parent exists when linking a child");
        parent.add_child(child);
        let parent_center = *parent.center();
        let node = self.create_child(&parent_center, child_key);
        self.nodes.insert(child_key, node);
        child_key
    }

    /// Append an entity id to a node's run.
    pub(crate) fn add_entity(&mut self, key: NodeKey<L>, id: I) {
        let node = self
            .nodes
            .get_mut(key)
            .expect("entity target node exists");
        self.store.push(node.entities_mut(), id);
    }

    /// Remove an entity id from a node's run.
    pub(crate) fn remove_entity(&mut self, key: NodeKey<L>, id: I) -> bool {
        let node = self
            .nodes
            .get_mut(key)
            .expect("entity source node exists");
        self.store.remove_id(node.entities_mut(), id)
    }

    /// Shrink a node's run to `new_len` ids.
    pub(crate) fn resize_entities(&mut self, key: NodeKey<L>, new_len: usize) {
        let node = self.nodes.get_mut(key).expect("resized node exists");
        let current = node.entity_count();
        debug_assert!(new_len <= current);
        self.store
            .decrease(node.entities_mut(), (current - new_len) as u32);
    }

    /// Erase a node that has neither children nor entities (never the
    /// root), unlinking it from its parent.
    pub(crate) fn remove_node_if_possible(&mut self, key: NodeKey<L>) {
        if key == Si::<DIM, L>::root_key() {
            return;
        }
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        if node.has_any_child() || !node.is_entities_empty() {
            return;
        }

        let handle = node.entities();
        self.store.deallocate(handle);
        let parent_key = Si::<DIM, L>::parent(key);
        if let Some(parent) = self.nodes.get_mut(parent_key) {
            parent.remove_child(Si::<DIM, L>::child_id_of(key));
        }
        self.nodes.remove(key);
    }

    // Visits.

    /// Visit nodes breadth-first; `selector` prunes subtrees.
    pub(crate) fn visit_nodes(
        &self,
        root: NodeKey<L>,
        mut selector: impl FnMut(NodeKey<L>, &Node<L, DIM>) -> bool,
        mut procedure: impl FnMut(NodeKey<L>, &Node<L, DIM>),
    ) {
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(root);
        while let Some(key) = queue.pop_front() {
            let node = self.expect_node(key);
            if !selector(key, node) {
                continue;
            }
            procedure(key, node);
            for child_key in node.child_keys() {
                queue.push_back(child_key);
            }
        }
    }

    /// Visit nodes depth-first pre-order; `selector` prunes subtrees.
    pub(crate) fn visit_dfs(
        &self,
        key: NodeKey<L>,
        selector: &mut impl FnMut(NodeKey<L>, &Node<L, DIM>) -> bool,
        procedure: &mut impl FnMut(NodeKey<L>, &Node<L, DIM>),
    ) {
        let node = self.expect_node(key);
        if !selector(key, node) {
            return;
        }
        procedure(key, node);
        for child_key in node.child_keys() {
            self.visit_dfs(child_key, selector, procedure);
        }
    }

    /// Ids of every entity in the subtree under `node`, depth-first.
    pub(crate) fn collect_subtree_ids(&self, node: &Node<L, DIM>, out: &mut Vec<I>) {
        out.extend_from_slice(self.store.slice(node.entities()));
        let mut stack: SmallVec<[NodeKey<L>; 32]> = node.child_keys().collect();
        while let Some(key) = stack.pop() {
            let node = self.expect_node(key);
            out.extend_from_slice(self.store.slice(node.entities()));
            stack.extend(node.child_keys());
        }
    }

    /// The node holding `id`, by exhaustive scan.
    pub(crate) fn node_key_by_entity(&self, id: I) -> Option<NodeKey<L>> {
        self.nodes
            .iter()
            .find(|(_, node)| self.store.slice(node.entities()).contains(&id))
            .map(|(key, _)| key)
    }

    /// Whether no id is seated twice (split box trees excepted).
    pub(crate) fn is_every_entity_unique(&self) -> bool {
        let mut ids = Vec::new();
        for (_, node) in self.nodes.iter() {
            ids.extend_from_slice(self.store.slice(node.entities()));
        }
        let before = ids.len();
        sort_and_unique(&mut ids);
        before == ids.len()
    }

    /// Renumber dense ids after `removed` was erased from the collection.
    pub(crate) fn decrement_ids_above(&mut self, removed: I) {
        let store = &mut self.store;
        for node in self.nodes.values_mut() {
            for id in store.slice_mut(node.entities()) {
                if removed < *id {
                    *id = id.decrement();
                }
            }
        }
    }

    /// Rewrite every seated id through `updates`; `None` erases the id.
    /// With the `parallel` feature the per-run rewrite happens on the
    /// rayon pool; results are identical either way.
    #[cfg(not(feature = "parallel"))]
    pub(crate) fn update_indexes(&mut self, updates: &HashMap<I, Option<I>>) {
        let mut shrunk: Vec<(NodeKey<L>, usize)> = Vec::new();
        for (key, node) in self.nodes.iter() {
            let run = self.store.slice(node.entities());
            let keep = rewrite_run_count(run, updates);
            if keep != run.len() {
                shrunk.push((key, keep));
            }
        }
        for node in self.nodes.values_mut() {
            rewrite_run(self.store.slice_mut(node.entities()), updates);
        }
        for (key, keep) in shrunk {
            self.resize_entities(key, keep);
        }
    }

    /// Rewrite every seated id through `updates`; `None` erases the id.
    /// The per-run rewrite happens on the rayon pool; results are
    /// identical to the sequential path.
    #[cfg(feature = "parallel")]
    pub(crate) fn update_indexes(&mut self, updates: &HashMap<I, Option<I>>) {
        use rayon::prelude::*;

        let mut staged: Vec<(NodeKey<L>, Vec<I>)> = self
            .nodes
            .iter()
            .map(|(key, node)| (key, self.store.slice(node.entities()).to_vec()))
            .collect();
        staged.par_iter_mut().for_each(|(_, run)| {
            run.retain_mut(|id| match updates.get(id) {
                Some(Some(new_id)) => {
                    *id = *new_id;
                    true
                }
                Some(None) => false,
                None => true,
            });
        });

        for (key, run) in staged {
            let node = self.nodes.get_mut(key).expect("staged node exists");
            let handle = *node.entities_mut();
            self.store.slice_mut(handle)[..run.len()].copy_from_slice(&run);
            let shrink = handle.len() - run.len() as u32;
            self.store.decrease(node.entities_mut(), shrink);
        }
    }

    /// Remove every node but the root and reset the root's content.
    pub(crate) fn clear(&mut self) {
        let root = Si::<DIM, L>::root_key();
        self.nodes.retain(|key, _| key == root);
        if let Some(node) = self.nodes.get_mut(root) {
            node.clear();
        }
        self.store.init(DEFAULT_PAGE_SIZE);
    }

    /// Whether the space box contains a user point (no tolerance).
    pub(crate) fn space_contains_point(&self, point: &A::Vector) -> bool {
        self.space_box().contains(&widen_point::<A, DIM>(point))
    }

    /// Whether the space box contains a user box.
    pub(crate) fn space_contains_box(&self, b: &A::Box) -> bool {
        crate::geometry::aabb_contains_user_box::<A, DIM>(self.space_box(), b)
    }

    /// Convert a user scalar tolerance to the internal scalar, asserting
    /// non-negativity.
    pub(crate) fn internal_tolerance(tolerance: A::Scalar) -> f64 {
        let t = tolerance.to_internal();
        debug_assert!(t >= 0.0, "tolerance cannot be negative");
        t
    }
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> TreeCore<DIM, L, A, I> {
    /// Insert `id` under the smallest existing node on its path, keeping
    /// nodes within `max_elements` by locally redistributing.
    ///
    /// `locate` resolves an already-seated entity's range location during
    /// a redistribution. `do_split` is the box-tree duplication policy;
    /// point trees pass `false`.
    pub(crate) fn insert_with_rebalancing(
        &mut self,
        parent_key: NodeKey<L>,
        parent_depth: Depth,
        do_split: bool,
        location: RangeLocation<L>,
        id: I,
        locate: &impl Fn(&Self, I) -> RangeLocation<L>,
    ) -> bool {
        let is_split = do_split && !Si::<DIM, L>::is_all_touched(location.touched);
        let entity_key = Si::<DIM, L>::key_of_range(&location, self.max_depth);
        // When the entity's own node key differs from the parent, that
        // node does not exist yet.
        let in_parent = entity_key == parent_key || (is_split && location.depth < parent_depth);

        let parent = self.expect_node(parent_key);
        let parent_has_children = parent.has_any_child();
        let parent_entity_count = parent.entity_count();

        if parent_depth == self.max_depth {
            self.add_entity(parent_key, id);
        } else if parent_has_children && is_split && location.depth == parent_depth {
            self.insert_split_children(parent_key, parent_depth, location, id, locate);
        } else if parent_has_children && !in_parent {
            // Entities belong in leaves where possible: open exactly the
            // one child on the straddle-free path.
            let child = Si::<DIM, L>::child_id_at(location.loc, self.max_depth - parent_depth);
            debug_assert!(child < Si::<DIM, L>::CHILD_COUNT);
            let child_key = self.link_new_child(parent_key, child);
            self.add_entity(child_key, id);
        } else if parent_entity_count + 1 >= self.max_elements {
            self.rebalance_node(parent_key, parent_depth, do_split, id, locate);
        } else {
            self.add_entity(parent_key, id);
        }
        true
    }

    /// Re-examine every entity in an overfull node (plus the incoming
    /// one); each either stays stuck, splits into children, or moves one
    /// level down. The node's run is compacted in place.
    fn rebalance_node(
        &mut self,
        parent_key: NodeKey<L>,
        parent_depth: Depth,
        do_split: bool,
        id: I,
        locate: &impl Fn(&Self, I) -> RangeLocation<L>,
    ) {
        self.add_entity(parent_key, id);

        let mut count = self.expect_node(parent_key).entity_count();
        let mut index = 0;
        while index < count {
            let seated = self.store.slice(self.expect_node(parent_key).entities())[index];
            let location = locate(self, seated);
            let is_split = do_split && !Si::<DIM, L>::is_all_touched(location.touched);

            if location.depth + Depth::from(is_split) <= parent_depth {
                // Stuck at this depth.
                index += 1;
                continue;
            }

            if is_split && location.depth == parent_depth {
                self.insert_split_children(parent_key, parent_depth, location, seated, locate);
            } else {
                let child = Si::<DIM, L>::child_id_at(location.loc, self.max_depth - parent_depth);
                debug_assert!(child < Si::<DIM, L>::CHILD_COUNT);
                if self.expect_node(parent_key).has_child(child) {
                    // The child subtree exists; descend to the smallest
                    // existing node on the entity's path.
                    let entity_key = Si::<DIM, L>::key_of_range(&location, self.max_depth);
                    let (smallest, smallest_depth) = self.find_smallest_key_with_depth(entity_key);
                    self.insert_with_rebalancing(
                        smallest,
                        smallest_depth,
                        do_split,
                        location,
                        seated,
                        locate,
                    );
                } else {
                    let child_key = self.link_new_child(parent_key, child);
                    self.add_entity(child_key, seated);
                }
            }

            // The entity moved out of the parent: swap-remove its slot.
            count -= 1;
            let node = self
                .nodes
                .get_mut(parent_key)
                .expect("rebalanced node exists");
            let run = self.store.slice_mut(node.entities());
            run[index] = run[count];
        }

        self.resize_entities(parent_key, count);
    }

    /// Duplicate a straddling entity into every child its touched-axis
    /// subsets name, creating the missing children.
    pub(crate) fn insert_split_children(
        &mut self,
        parent_key: NodeKey<L>,
        parent_depth: Depth,
        location: RangeLocation<L>,
        id: I,
        locate: &impl Fn(&Self, I) -> RangeLocation<L>,
    ) {
        debug_assert_eq!(
            parent_key,
            Si::<DIM, L>::key_of_range(&location, self.max_depth)
        );
        for child in Si::<DIM, L>::touched_segments(location.touched, location.lower_segment) {
            if self.expect_node(parent_key).has_child(child) {
                let child_key = Si::<DIM, L>::child_keys(parent_key).key_of(child);
                self.insert_with_rebalancing(
                    child_key,
                    parent_depth + 1,
                    true,
                    location,
                    id,
                    locate,
                );
            } else {
                let child_key = self.link_new_child(parent_key, child);
                self.add_entity(child_key, id);
            }
        }
    }

    /// Insert without redistribution: append to the smallest existing
    /// node on the path, or create the path down to the entity's own
    /// node when `to_leaf`.
    pub(crate) fn insert_without_rebalancing(
        &mut self,
        existing_key: NodeKey<L>,
        entity_key: NodeKey<L>,
        id: I,
        to_leaf: bool,
    ) -> bool {
        if entity_key == existing_key {
            self.add_entity(entity_key, id);
            return true;
        }

        if to_leaf {
            // Create every missing node from the existing ancestor down.
            let mut missing: SmallVec<[NodeKey<L>; 16]> = SmallVec::new();
            let mut walk = entity_key;
            while walk != existing_key && !self.nodes.contains(walk) {
                missing.push(walk);
                walk = Si::<DIM, L>::parent(walk);
            }
            let mut bottom = walk;
            while let Some(new_key) = missing.pop() {
                bottom = self.link_new_child(bottom, Si::<DIM, L>::child_id_of(new_key));
                debug_assert_eq!(bottom, new_key);
            }
            self.add_entity(bottom, id);
        } else {
            let parent = self.expect_node(existing_key);
            if parent.has_any_child() {
                let parent_depth = Si::<DIM, L>::depth_of(existing_key);
                let entity_depth = Si::<DIM, L>::depth_of(entity_key);
                let child = Si::<DIM, L>::child_id_at(entity_key, entity_depth - parent_depth);
                let child_key = self.link_new_child(existing_key, child);
                self.add_entity(child_key, id);
            } else {
                self.add_entity(existing_key, id);
            }
        }
        true
    }
}

/// Ids remaining after the rewrite, without mutating.
#[cfg(not(feature = "parallel"))]
fn rewrite_run_count<I: EntityId>(run: &[I], updates: &HashMap<I, Option<I>>) -> usize {
    run.iter()
        .filter(|id| !matches!(updates.get(id), Some(None)))
        .count()
}

/// Compact `run` through the update map; the tail beyond the kept prefix
/// is garbage the caller shrinks away.
#[cfg(not(feature = "parallel"))]
fn rewrite_run<I: EntityId>(run: &mut [I], updates: &HashMap<I, Option<I>>) {
    let mut keep = 0;
    for index in 0..run.len() {
        match updates.get(&run[index]) {
            Some(Some(new_id)) => {
                run[keep] = *new_id;
                keep += 1;
            }
            Some(None) => {}
            None => {
                run[keep] = run[index];
                keep += 1;
            }
        }
    }
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> Clone
    for TreeCore<DIM, L, A, I>
where
    L::Map<Node<L, DIM>>: Clone,
{
    fn clone(&self) -> Self {
        let mut nodes = self.nodes.clone();
        let mut store = SegmentStore::default();
        let handles: Vec<_> = nodes.values_mut().map(Node::entities_mut).collect();
        self.store.clone_into(&mut store, handles);
        Self {
            nodes,
            store,
            grid: self.grid.clone(),
            max_depth: self.max_depth,
            max_elements: self.max_elements,
            node_sizes: self.node_sizes.clone(),
            adapter: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CartesianAdapter;

    type Core3 = TreeCore<3, u32, CartesianAdapter<f64, 3>, usize>;

    #[test]
    fn estimators_are_sane() {
        assert_eq!(Core3::estimate_max_depth(10, 20), 2);
        let d = Core3::estimate_max_depth(100_000, 20);
        assert!(d >= 2 && d <= SpaceIndex::<3, u32>::MAX_DEPTH);

        assert_eq!(Core3::estimate_node_number(5, 3, 20), 10);
        let n = Core3::estimate_node_number(100_000, 5, 20);
        assert!(n >= 100_000 / 20 / 8);
    }

    #[test]
    fn node_sizes_halve_per_depth() {
        let core = Core3::new(Aabb::new([0.0; 3], [8.0; 3]), 3, 4, 16);
        assert_eq!(core.node_size(0), &[8.0; 3]);
        assert_eq!(core.node_size(1), &[4.0; 3]);
        assert_eq!(core.node_size(3), &[1.0; 3]);
        assert_eq!(core.node_half_size(3), &[0.5; 3]);
    }

    #[test]
    fn child_center_offsets_by_segment_bits() {
        let core = Core3::new(Aabb::new([0.0; 3], [8.0; 3]), 3, 4, 16);
        let root = SpaceIndex::<3, u32>::root_key();
        let child_key = SpaceIndex::<3, u32>::child_keys(root).key_of(0b101);
        // Child 0b101 is greater on x and z, lower on y.
        assert_eq!(core.child_center(&[4.0; 3], child_key), [6.0, 2.0, 6.0]);
    }

    #[test]
    fn smallest_key_walks_to_root() {
        let core = Core3::new(Aabb::new([0.0; 3], [1.0; 3]), 3, 4, 16);
        let leaf_key = core.point_node_key(&[0.1, 0.1, 0.1], false);
        assert_eq!(core.find_smallest_key(leaf_key), 1);
        let (key, depth) = core.find_smallest_key_with_depth(leaf_key);
        assert_eq!(key, 1);
        assert_eq!(depth, 0);
    }

    fn grid_points() -> Vec<[f64; 2]> {
        let mut points = Vec::new();
        for y in 0..8 {
            for x in 0..8 {
                points.push([x as f64 + 0.5, y as f64 + 0.5]);
            }
        }
        points
    }

    fn grid_tree() -> crate::Quadtree {
        crate::Quadtree::build(
            &grid_points(),
            TreeSetup {
                max_depth: Some(3),
                bounding_box: Some(crate::BoxN::new([0.0, 0.0], [8.0, 8.0])),
                max_elements_per_node: 4,
                parallel: false,
            },
        )
    }

    #[test]
    fn update_indexes_rewrites_and_erases() {
        let mut tree = grid_tree();

        let mut updates: HashMap<usize, Option<usize>> = HashMap::new();
        updates.insert(0, Some(1000));
        updates.insert(7, None);
        tree.update_indexes(&updates);

        let mut ids = tree.collect_all_ids();
        ids.sort_unstable();
        assert_eq!(ids.len(), 63);
        assert!(ids.contains(&1000));
        assert!(!ids.contains(&0));
        assert!(!ids.contains(&7));
    }

    #[test]
    fn clone_relocates_segments_into_one_page() {
        let points = grid_points();
        let tree = grid_tree();
        let copy = tree.clone();

        assert_eq!(tree.node_count(), copy.node_count());
        let mut original = tree.collect_all_ids();
        let mut cloned = copy.collect_all_ids();
        original.sort_unstable();
        cloned.sort_unstable();
        assert_eq!(original, cloned);

        // The clone answers queries independently.
        let hits = copy.range_search(&crate::BoxN::new([0.0, 0.0], [2.0, 2.0]), &points);
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn clear_keeps_only_an_empty_root() {
        let mut tree = grid_tree();
        tree.clear();
        assert_eq!(tree.node_count(), 1);
        assert!(tree.collect_all_ids().is_empty());

        // The tree is usable again afterwards.
        let points = grid_points();
        for (id, p) in points.iter().enumerate().take(10) {
            assert!(tree.insert_with_rebalancing(id, p, &points));
        }
        assert_eq!(tree.collect_all_ids().len(), 10);
    }

    #[test]
    fn wide_code_tree_in_twenty_dimensions() {
        let mut points: Vec<[f64; 20]> = Vec::new();
        for i in 0..40 {
            let mut p = [0.0; 20];
            for (axis, c) in p.iter_mut().enumerate() {
                *c = ((i * 7 + axis * 3) % 16) as f64;
            }
            points.push(p);
        }

        let tree = crate::PointTreeWide::<20>::build(
            &points,
            TreeSetup {
                max_depth: Some(3),
                bounding_box: Some(crate::BoxN::new([0.0; 20], [16.0; 20])),
                max_elements_per_node: 4,
                parallel: false,
            },
        );

        let mut ids = tree.collect_all_ids();
        ids.sort_unstable();
        assert_eq!(ids, (0..40).collect::<Vec<_>>());

        let q = points[11];
        let nearest = tree.nearest_neighbors(&q, 1, &points);
        assert_eq!(nearest[0].0, 11);
        assert_eq!(nearest[0].1, 0.0);
    }
}
