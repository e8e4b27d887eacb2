// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The box tree: bulk build and incremental edit for box entities.
//!
//! A box entity straddling a node's mid-planes either sticks at that node
//! (`SPLIT = false`: the entity lives at the deepest node whose cell fully
//! contains it) or is duplicated into every child it touches
//! (`SPLIT = true`). Splitting keeps entities in small deep cells at the
//! price of duplicate ids, which every query deduplicates on the way out.

use orthant_space::{ChildId, Depth, NodeKey, RangeLocation};
use smallvec::SmallVec;

use crate::adapter::Adapter;
use crate::tree::{Si, TreeCore, TreeSetup, partition_in_place};
use crate::entities::EntitySet;
use crate::geometry::{Aabb, aabb_of_boxes, widen_box};
use crate::node::Node;
use crate::scalar::EntityId;
use crate::segments::SegmentHandle;
use crate::store::{NodeMap, NodeStoreCode};

/// A non-owning spatial index over axis-aligned box entities.
///
/// `SPLIT` selects the duplication policy for straddling entities; see the
/// module docs.
///
/// # Example
///
/// ```rust
/// use orthant_tree::{BoxN, QuadtreeBox, TreeSetup};
///
/// let boxes = vec![
///     BoxN::new([0.0, 0.0], [1.0, 1.0]),
///     BoxN::new([0.5, 0.5], [1.5, 1.5]),
///     BoxN::new([2.0, 2.0], [3.0, 3.0]),
/// ];
/// let tree = QuadtreeBox::build(&boxes, TreeSetup::default());
///
/// let pairs = tree.collision_detection(&boxes, None);
/// assert_eq!(pairs, vec![(0, 1)]);
/// ```
pub struct BoxTree<
    const DIM: usize,
    L: NodeStoreCode,
    A: Adapter<DIM>,
    I: EntityId = usize,
    const SPLIT: bool = true,
> {
    pub(crate) core: TreeCore<DIM, L, A, I>,
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId, const SPLIT: bool> Default
    for BoxTree<DIM, L, A, I, SPLIT>
{
    fn default() -> Self {
        Self {
            core: TreeCore::default_empty(),
        }
    }
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId, const SPLIT: bool>
    BoxTree<DIM, L, A, I, SPLIT>
{
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

    /// Bulk-build from a collection of boxes.
    pub fn build<C>(boxes: &C, setup: TreeSetup<A::Box>) -> Self
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let space = match &setup.bounding_box {
            Some(b) => widen_box::<A, DIM>(b),
            None => aabb_of_boxes::<A, DIM>(boxes.iter().map(|(_, b)| b)),
        };
        let n = boxes.len();
        let max_depth = match setup.max_depth {
            Some(depth) if depth > 0 => depth,
            _ => TreeCore::<DIM, L, A, I>::estimate_max_depth(n, setup.max_elements_per_node),
        };

        // Split duplication grows the stored id count.
        let estimated = if SPLIT { n + n / 3 } else { n };
        let mut core = TreeCore::<DIM, L, A, I>::new(
            space,
            max_depth,
            setup.max_elements_per_node,
            estimated.max(1),
        );
        if n == 0 {
            return Self { core };
        }

        core.nodes
            .reserve(TreeCore::<DIM, L, A, I>::estimate_node_number(
                n,
                max_depth,
                setup.max_elements_per_node,
            ));

        let mut locations: Vec<(RangeLocation<L>, I)> = boxes
            .iter()
            .map(|(id, b)| (core.box_location(b, false), id))
            .collect();

        let sorted = setup.parallel;
        if sorted {
            sort_box_locations(&mut locations);
        }

        if !SPLIT {
            // One main-page run for all ids; nodes seat sub-spans of it.
            let main = core.store.allocate(n as u32);
            debug_assert_eq!(main, SegmentHandle::main(0, n as u32));
        }

        let root = Si::<DIM, L>::root_key();
        let root_center = *core.expect_node(root).center();
        core.nodes.clear();
        build_box_subtree::<DIM, L, A, I, SPLIT>(
            &mut core,
            root,
            root_center,
            0,
            &mut locations,
            &[],
            0,
            sorted,
        );

        Self { core }
    }

    /// Insert a box entity, locally rebalancing overfull nodes. Returns
    /// `false` without mutation when the box is outside the space box.
    pub fn insert_with_rebalancing<C>(&mut self, id: I, b: &A::Box, boxes: &C) -> bool
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        if !self.core.space_contains_box(b) {
            return false;
        }

        let location = self.core.box_location(b, false);
        let entity_key = Si::<DIM, L>::key_of_range(&location, self.core.max_depth);
        let (parent_key, parent_depth) = self.core.find_smallest_key_with_depth(entity_key);
        if !Si::<DIM, L>::is_valid(parent_key) {
            return false;
        }

        let inserted = self.core.insert_with_rebalancing(
            parent_key,
            parent_depth,
            SPLIT,
            location,
            id,
            &|core, seated| core.box_location(boxes.at(seated), false),
        );
        if !SPLIT {
            debug_assert!(self.core.is_every_entity_unique(), "duplicate entity id");
        }
        inserted
    }

    /// Insert a box entity without rebalancing. With `to_leaf` the path
    /// down to the entity's own node is created; under the splitting
    /// policy a straddling entity is then placed into every touched
    /// child.
    pub fn insert(&mut self, id: I, b: &A::Box, to_leaf: bool) -> bool {
        if !self.core.space_contains_box(b) {
            return false;
        }

        let location = self.core.box_location(b, false);
        let entity_key = Si::<DIM, L>::key_of_range(&location, self.core.max_depth);
        let smallest = self.core.find_smallest_key(entity_key);
        if !Si::<DIM, L>::is_valid(smallest) {
            return false;
        }

        if SPLIT && to_leaf && location.depth != self.core.max_depth {
            let children = Si::<DIM, L>::child_keys(entity_key);
            for segment in
                Si::<DIM, L>::touched_segments(location.touched, location.lower_segment)
            {
                if !self.core.insert_without_rebalancing(
                    smallest,
                    children.key_of(segment),
                    id,
                    true,
                ) {
                    return false;
                }
            }
            true
        } else {
            self.core
                .insert_without_rebalancing(smallest, entity_key, id, to_leaf)
        }
    }

    /// Erase an entity, locating its node(s) by the box it was inserted
    /// with. `renumber` keeps dense ids contiguous.
    pub fn erase(&mut self, id: I, b: &A::Box, renumber: bool) -> bool {
        let Some(smallest) = self.find_smallest_node(b) else {
            return false;
        };

        let mut any = self.core.remove_entity(smallest, id);
        if SPLIT {
            // Split copies live one level below the entity's own node.
            let child_keys: SmallVec<[NodeKey<L>; 16]> =
                self.core.expect_node(smallest).child_keys().collect();
            for child_key in child_keys {
                if self.core.remove_entity(child_key, id) {
                    any = true;
                }
                self.core.remove_node_if_possible(child_key);
            }
        }
        self.core.remove_node_if_possible(smallest);

        if !any {
            return false;
        }
        if renumber {
            self.core.decrement_ids_above(id);
        }
        true
    }

    /// Erase an entity by scanning every node for its id.
    pub fn erase_id(&mut self, id: I, renumber: bool) -> bool {
        let keys: Vec<NodeKey<L>> = self.core.nodes.iter().map(|(key, _)| key).collect();
        let mut touched: SmallVec<[NodeKey<L>; 8]> = SmallVec::new();
        for key in keys {
            if self.core.remove_entity(key, id) {
                touched.push(key);
                if !SPLIT {
                    break;
                }
            }
        }
        if touched.is_empty() {
            return false;
        }
        for key in touched {
            self.core.remove_node_if_possible(key);
        }
        if renumber {
            self.core.decrement_ids_above(id);
        }
        true
    }

    /// Move an entity to a new box: erase + insert with rebalancing.
    ///
    /// Best-effort: on `false` the entity may have been removed without
    /// being re-inserted (the new box lies outside the space box).
    pub fn update<C>(&mut self, id: I, new_box: &A::Box, boxes: &C) -> bool
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        if !self.core.space_contains_box(new_box) {
            return false;
        }
        if !self.erase_id(id, false) {
            return false;
        }
        self.insert_with_rebalancing(id, new_box, boxes)
    }

    /// Move an entity, locating the erase by its old box. Same
    /// best-effort contract as [`update`](Self::update).
    pub fn update_from<C>(&mut self, id: I, old_box: &A::Box, new_box: &A::Box, boxes: &C) -> bool
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        if !self.core.space_contains_box(new_box) {
            return false;
        }
        if !SPLIT && self.find_smallest_node(old_box) == self.find_smallest_node(new_box) {
            return true;
        }
        if !self.erase(id, old_box, false) {
            return false;
        }
        self.insert_with_rebalancing(id, new_box, boxes)
    }

    /// Key of the smallest existing node whose cell contains `b`.
    pub fn find_smallest_node(&self, b: &A::Box) -> Option<NodeKey<L>> {
        if !self.core.space_contains_box(b) {
            return None;
        }
        let key = self.core.find_smallest_key(self.core.box_node_key(b, false));
        Si::<DIM, L>::is_valid(key).then_some(key)
    }

    /// Node keys currently holding `id` (several under the splitting
    /// policy), by exhaustive scan.
    pub fn find(&self, id: I) -> Option<NodeKey<L>> {
        self.core.node_key_by_entity(id)
    }

    /// Every stored id, depth-first from the root. Under the splitting
    /// policy duplicates are kept.
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
    pub fn node(&self, key: NodeKey<L>) -> Option<&Node<L, DIM>> {
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
        selector: impl FnMut(NodeKey<L>, &Node<L, DIM>) -> bool,
        procedure: impl FnMut(NodeKey<L>, &Node<L, DIM>),
    ) {
        self.core
            .visit_nodes(Si::<DIM, L>::root_key(), selector, procedure);
    }
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId, const SPLIT: bool> Clone
    for BoxTree<DIM, L, A, I, SPLIT>
where
    TreeCore<DIM, L, A, I>: Clone,
{
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

/// Sort zipped `(range location, id)` pairs by location then depth.
fn sort_box_locations<L: NodeStoreCode, I: EntityId>(locations: &mut [(RangeLocation<L>, I)]) {
    let key = |l: &RangeLocation<L>| (l.loc, l.depth);
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        locations.par_sort_unstable_by(|(a, _), (b, _)| key(a).cmp(&key(b)));
    }
    #[cfg(not(feature = "parallel"))]
    locations.sort_unstable_by(|(a, _), (b, _)| key(a).cmp(&key(b)));
}

/// Pull the ids expanded for `segment` out of the segment-sorted list.
fn take_segment<I: EntityId>(list: &mut Vec<(ChildId, I)>, segment: ChildId) -> Vec<I> {
    let start = list.partition_point(|(s, _)| *s < segment);
    let end = list.partition_point(|(s, _)| *s <= segment);
    list.drain(start..end).map(|(_, id)| id).collect()
}

/// Depth-first box build.
///
/// At every non-leaf node, entities located at this depth are *stuck*:
/// those straddling every axis seat here; under the splitting policy the
/// rest expand into per-child copies. Deeper entities partition into
/// child groups; children created only by split copies get an empty
/// location group.
#[allow(clippy::too_many_arguments)]
fn build_box_subtree<
    const DIM: usize,
    L: NodeStoreCode,
    A: Adapter<DIM>,
    I: EntityId,
    const SPLIT: bool,
>(
    core: &mut TreeCore<DIM, L, A, I>,
    key: NodeKey<L>,
    center: [f64; DIM],
    depth: Depth,
    locations: &mut [(RangeLocation<L>, I)],
    from_parent: &[I],
    base: u32,
    sorted: bool,
) {
    let n = locations.len();
    let mut node = Node::new(key, center);

    let subtree_count = n + from_parent.len();
    let is_leaf = depth == core.max_depth || subtree_count <= core.max_elements;

    let (seat_end, stuck_end) = if is_leaf {
        (n, n)
    } else {
        let stuck_end = if sorted {
            locations.partition_point(|(location, _)| location.depth == depth)
        } else {
            partition_in_place(locations, |(location, _)| location.depth == depth)
        };
        if SPLIT {
            // Entities touching every axis cannot usefully split.
            let seat_end = partition_in_place(&mut locations[..stuck_end], |(location, _)| {
                Si::<DIM, L>::is_all_touched(location.touched)
            });
            (seat_end, stuck_end)
        } else {
            (stuck_end, stuck_end)
        }
    };

    // Seat this node's run.
    if SPLIT {
        let count = from_parent.len() + seat_end;
        if count > 0 {
            let handle = core.store.allocate(count as u32);
            let run = core.store.slice_mut(handle);
            run[..from_parent.len()].copy_from_slice(from_parent);
            for (slot, (_, id)) in run[from_parent.len()..]
                .iter_mut()
                .zip(locations[..seat_end].iter())
            {
                *slot = *id;
            }
            node.replace_entities(handle);
        }
    } else if seat_end > 0 {
        let handle = SegmentHandle::main(base, seat_end as u32);
        for (slot, (_, id)) in core
            .store
            .slice_mut(handle)
            .iter_mut()
            .zip(locations[..seat_end].iter())
        {
            *slot = *id;
        }
        node.replace_entities(handle);
    }

    if is_leaf {
        core.nodes.insert(key, node);
        return;
    }

    // Expand splittable stuck entities into per-segment copies; the
    // stable sort keeps insertion order within a segment.
    let mut split_list: Vec<(ChildId, I)> = Vec::new();
    if SPLIT {
        for (location, id) in &locations[seat_end..stuck_end] {
            for segment in
                Si::<DIM, L>::touched_segments(location.touched, location.lower_segment)
            {
                split_list.push((segment, *id));
            }
        }
        split_list.sort_by_key(|(segment, _)| *segment);
    }

    let examined_level = core.max_depth - (depth + 1);
    let mut begin = stuck_end;
    while begin < n {
        let checker = Si::<DIM, L>::child_checker(examined_level, locations[begin].0.loc);
        let group_len = if sorted {
            locations[begin..].partition_point(|(location, _)| checker.test(location.loc))
        } else {
            partition_in_place(&mut locations[begin..], |(location, _)| {
                checker.test(location.loc)
            })
        };
        debug_assert!(group_len > 0);

        let child = checker.child_id();
        let split_ids = take_segment(&mut split_list, child);
        let child_key = Si::<DIM, L>::child_keys(key).key_of(child);
        let child_center = core.child_center(&center, child_key);
        node.add_child(child);
        build_box_subtree::<DIM, L, A, I, SPLIT>(
            core,
            child_key,
            child_center,
            depth + 1,
            &mut locations[begin..begin + group_len],
            &split_ids,
            base + begin as u32,
            sorted,
        );
        begin += group_len;
    }

    // Children fed only by split copies.
    while let Some(&(child, _)) = split_list.first() {
        let split_ids = take_segment(&mut split_list, child);
        let child_key = Si::<DIM, L>::child_keys(key).key_of(child);
        let child_center = core.child_center(&center, child_key);
        node.add_child(child);
        build_box_subtree::<DIM, L, A, I, SPLIT>(
            core,
            child_key,
            child_center,
            depth + 1,
            &mut [],
            &split_ids,
            0,
            sorted,
        );
    }

    core.nodes.insert(key, node);
}
