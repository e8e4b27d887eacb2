// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Broad-phase collision detection on box trees.
//!
//! The self-tree walk builds one context per depth on the way down (cell
//! box, center, entity ids sorted by min-x) and checks each node against
//! itself and its ancestors with sweep-and-prune on the x axis. Under the
//! splitting policy, duplicated entities are lifted back into their own
//! node's context first so no pair is counted twice. The two-tree variant
//! runs a synchronized breadth-first descent over both trees.

use ahash::AHashMap;
use orthant_space::{Depth, NodeKey};

use crate::adapter::Adapter;
use crate::boxtree::BoxTree;
use crate::tree::{Si, sort_and_unique};
use crate::entities::EntitySet;
use crate::geometry::{Aabb, overlap_by_center, widen_box};
use crate::scalar::{EntityId, Scalar};
use crate::store::NodeStoreCode;

/// Optional caller filter applied to a pair after AABB overlap.
pub type CollisionFilter<'a, I> = Option<&'a dyn Fn(I, I) -> bool>;

/// Per-node state of the bottom-up self-collision walk.
#[derive(Clone)]
struct CollisionContext<const DIM: usize, I> {
    center: [f64; DIM],
    cell: Aabb<DIM>,
    ids: Vec<I>,
}

impl<const DIM: usize, I> Default for CollisionContext<DIM, I> {
    fn default() -> Self {
        Self {
            center: [0.0; DIM],
            cell: Aabb::new([0.0; DIM], [0.0; DIM]),
            ids: Vec::new(),
        }
    }
}

#[inline]
fn min_x<A: Adapter<DIM>, const DIM: usize>(b: &A::Box) -> f64 {
    A::box_min_c(b, 0).to_internal()
}

#[inline]
fn max_x<A: Adapter<DIM>, const DIM: usize>(b: &A::Box) -> f64 {
    A::box_max_c(b, 0).to_internal()
}

/// Sort ids by the x interval start, ties by id for determinism.
fn sort_by_min_x<A: Adapter<DIM>, const DIM: usize, C, I: EntityId>(ids: &mut [I], boxes: &C)
where
    C: EntitySet<A::Box, Id = I> + ?Sized,
{
    ids.sort_unstable_by(|&a, &b| {
        min_x::<A, DIM>(boxes.at(a))
            .total_cmp(&min_x::<A, DIM>(boxes.at(b)))
            .then(a.cmp(&b))
    });
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId, const SPLIT: bool>
    BoxTree<DIM, L, A, I, SPLIT>
{
    /// All overlapping pairs among the stored boxes, each unordered pair
    /// at most once. `filter` runs after the AABB overlap test.
    pub fn collision_detection<C>(&self, boxes: &C, filter: CollisionFilter<'_, I>) -> Vec<(I, I)>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let mut pairs = Vec::with_capacity((boxes.len() / 10).max(16));
        let mut contexts: Vec<CollisionContext<DIM, I>> =
            vec![CollisionContext::default(); self.core.max_depth as usize + 1];
        self.collide_subtree(
            boxes,
            0,
            Si::<DIM, L>::root_key(),
            &mut contexts,
            &mut pairs,
            filter,
            None,
        );
        finish_self_pairs::<I, SPLIT>(&mut pairs);
        pairs
    }

    /// Parallel self-collision: a frontier of roughly `2 * threads`
    /// subtrees fans out to the rayon pool; the short path above the
    /// frontier is processed sequentially afterwards. Results equal the
    /// sequential walk up to pair order.
    #[cfg(feature = "parallel")]
    pub fn collision_detection_parallel<C>(
        &self,
        boxes: &C,
        filter: Option<&(dyn Fn(I, I) -> bool + Sync)>,
    ) -> Vec<(I, I)>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized + Sync,
    {
        use rayon::prelude::*;

        let plain_filter: CollisionFilter<'_, I> = filter.map(|f| f as &dyn Fn(I, I) -> bool);
        let threads = rayon::current_num_threads();
        let node_count = crate::store::NodeMap::len(&self.core.nodes);
        if threads < 3 || node_count < threads * 3 {
            return self.collision_detection(boxes, plain_filter);
        }

        // Breadth-first frontier of subtree roots; everything before it
        // gets its context prepared sequentially.
        let mut queue: Vec<NodeKey<L>> = vec![Si::<DIM, L>::root_key()];
        let mut contexts: AHashMap<NodeKey<L>, CollisionContext<DIM, I>> = AHashMap::new();
        let mut pending = 1usize;
        let mut index = 0usize;
        while pending > 0 && pending < threads - 2 {
            let key = queue[index];
            let node = self.core.expect_node(key);
            for child_key in node.child_keys() {
                queue.push(child_key);
                pending += 1;
            }

            let depth = Si::<DIM, L>::depth_of(key);
            let mut context = CollisionContext::default();
            self.fill_context(key, depth, &mut context);
            if index > 0 {
                let parent = contexts
                    .get_mut(&Si::<DIM, L>::parent(key))
                    .expect("parent context prepared first");
                self.lift_split_entities(boxes, depth, &mut context, parent, None);
            }
            sort_by_min_x::<A, DIM, C, I>(&mut context.ids, boxes);
            contexts.insert(key, context);

            pending -= 1;
            index += 1;
        }

        if pending == 0 {
            return self.collision_detection(boxes, plain_filter);
        }

        let frontier = &queue[queue.len() - pending..];
        let prepared = &queue[..queue.len() - pending];

        let tasks: Vec<(NodeKey<L>, Vec<(I, I)>, Vec<I>)> = frontier
            .par_iter()
            .map(|&task_key| {
                let depth = Si::<DIM, L>::depth_of(task_key);
                let mut stack: Vec<CollisionContext<DIM, I>> =
                    vec![CollisionContext::default(); self.core.max_depth as usize + 1];
                let mut ancestor = Si::<DIM, L>::parent(task_key);
                let mut ancestor_depth = depth;
                while Si::<DIM, L>::is_valid(ancestor) {
                    ancestor_depth -= 1;
                    stack[ancestor_depth as usize] = contexts
                        .get(&ancestor)
                        .expect("ancestor context prepared")
                        .clone();
                    ancestor = Si::<DIM, L>::parent(ancestor);
                }

                let mut task_pairs = Vec::new();
                let mut lifted = Vec::new();
                self.collide_subtree(
                    boxes,
                    depth,
                    task_key,
                    &mut stack,
                    &mut task_pairs,
                    filter.map(|f| f as &dyn Fn(I, I) -> bool),
                    Some(&mut lifted),
                );
                (task_key, task_pairs, lifted)
            })
            .collect();

        // Absorb the lifted entities into the frontier parents' contexts.
        for (task_key, _, lifted) in &tasks {
            if lifted.is_empty() {
                continue;
            }
            let parent_key = Si::<DIM, L>::parent(*task_key);
            let parent = contexts
                .get_mut(&parent_key)
                .expect("frontier parent context prepared");
            parent.ids.extend_from_slice(lifted);
            sort_by_min_x::<A, DIM, C, I>(&mut parent.ids, boxes);
            parent.ids.dedup();
        }

        // The short path above the frontier, sequentially.
        let mut pairs = Vec::new();
        for &key in prepared {
            let depth = Si::<DIM, L>::depth_of(key) as usize;
            let mut stack: Vec<CollisionContext<DIM, I>> = Vec::with_capacity(depth + 1);
            let mut walk = key;
            for _ in 0..=depth {
                stack.push(contexts.get(&walk).expect("prepared context").clone());
                walk = Si::<DIM, L>::parent(walk);
            }
            stack.reverse();

            self.collide_within(boxes, &stack[depth], &mut pairs, plain_filter);
            for ancestor_depth in 0..depth {
                self.collide_with_ancestor(
                    boxes,
                    &stack[ancestor_depth],
                    &stack[depth],
                    depth as Depth,
                    &mut pairs,
                    plain_filter,
                );
            }
        }

        for (_, task_pairs, _) in tasks {
            pairs.extend(task_pairs);
        }
        finish_self_pairs::<I, SPLIT>(&mut pairs);
        pairs
    }

    /// All overlapping pairs between this tree's boxes and another
    /// tree's, as `(this id, other id)`.
    pub fn collision_detection_with<C>(
        &self,
        boxes: &C,
        other: &Self,
        other_boxes: &C,
    ) -> Vec<(I, I)>
    where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let mut pairs = Vec::with_capacity((boxes.len() / 10).max(16));

        let mut left_cache: AHashMap<NodeKey<L>, Vec<I>> = AHashMap::new();
        let mut right_cache: AHashMap<NodeKey<L>, Vec<I>> = AHashMap::new();

        // (key, already-traversed) per side; a traversed entry is the
        // parent re-enqueued to meet the opposing subtree's descendants.
        let mut queue: std::collections::VecDeque<(NodeKey<L>, bool, NodeKey<L>, bool)> =
            std::collections::VecDeque::new();
        queue.push_back((
            Si::<DIM, L>::root_key(),
            false,
            Si::<DIM, L>::root_key(),
            false,
        ));

        while let Some((left_key, left_done, right_key, right_done)) = queue.pop_front() {
            {
                let left_ids = sorted_node_ids(&mut left_cache, self, boxes, left_key);
                let right_ids = sorted_node_ids(&mut right_cache, other, other_boxes, right_key);

                let mut right_begin = 0usize;
                for &left_id in &left_ids {
                    let left_box = boxes.at(left_id);
                    while right_begin < right_ids.len()
                        && max_x::<A, DIM>(other_boxes.at(right_ids[right_begin]))
                            < min_x::<A, DIM>(left_box)
                    {
                        right_begin += 1;
                    }
                    for &right_id in &right_ids[right_begin..] {
                        let right_box = other_boxes.at(right_id);
                        if max_x::<A, DIM>(left_box) < min_x::<A, DIM>(right_box) {
                            break;
                        }
                        if A::boxes_overlap(left_box, right_box, false, false) {
                            pairs.push((left_id, right_id));
                        }
                    }
                }
            }

            let left_node = self.core.expect_node(left_key);
            let right_node = other.core.expect_node(right_key);

            let mut left_children: Vec<(NodeKey<L>, bool)> = if left_done {
                Vec::new()
            } else {
                left_node.child_keys().map(|k| (k, false)).collect()
            };
            let mut right_children: Vec<(NodeKey<L>, bool)> = if right_done {
                Vec::new()
            } else {
                right_node.child_keys().map(|k| (k, false)).collect()
            };

            if left_children.is_empty() && right_children.is_empty() {
                continue;
            }

            // The parent keeps interacting with the opposing descendants
            // while it still holds entities.
            if !left_node.is_entities_empty() {
                left_children.push((left_key, true));
            }
            if !right_node.is_entities_empty() {
                right_children.push((right_key, true));
            }

            for &(lk, lt) in &left_children {
                for &(rk, rt) in &right_children {
                    if lk == left_key && lt && rk == right_key && rt {
                        continue;
                    }
                    let left_center = self.core.expect_node(lk).center();
                    let right_center = other.core.expect_node(rk).center();
                    let left_size = self.core.node_size(Si::<DIM, L>::depth_of(lk));
                    let right_size = other.core.node_size(Si::<DIM, L>::depth_of(rk));
                    if overlap_by_center(left_center, right_center, left_size, right_size) {
                        queue.push_back((lk, lt, rk, rt));
                    }
                }
            }
        }

        if SPLIT {
            sort_and_unique(&mut pairs);
        }
        pairs
    }

    fn fill_context(&self, key: NodeKey<L>, depth: Depth, context: &mut CollisionContext<DIM, I>) {
        let node = self.core.expect_node(key);
        context.ids.clear();
        context
            .ids
            .extend_from_slice(self.core.store.slice(node.entities()));
        context.center = *node.center();
        context.cell = self.core.node_box(depth, node.center());
    }

    /// Move entities whose own node is above `depth` from `context` into
    /// the parent context, recording them in `lifted` when the parent
    /// lives outside the current walk (parallel frontier roots).
    fn lift_split_entities<C>(
        &self,
        boxes: &C,
        depth: Depth,
        context: &mut CollisionContext<DIM, I>,
        parent: &mut CollisionContext<DIM, I>,
        mut lifted: Option<&mut Vec<I>>,
    ) where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        if !SPLIT {
            return;
        }
        let mut index = 0;
        while index < context.ids.len() {
            let id = context.ids[index];
            let location = self.core.box_location(boxes.at(id), false);
            if location.depth >= depth {
                index += 1;
                continue;
            }
            parent.ids.push(id);
            if let Some(out) = lifted.as_deref_mut() {
                out.push(id);
            }
            context.ids.swap_remove(index);
        }
        sort_by_min_x::<A, DIM, C, I>(&mut parent.ids, boxes);
        parent.ids.dedup();
    }

    #[allow(clippy::too_many_arguments)]
    fn collide_subtree<C>(
        &self,
        boxes: &C,
        depth: Depth,
        key: NodeKey<L>,
        contexts: &mut [CollisionContext<DIM, I>],
        pairs: &mut Vec<(I, I)>,
        filter: CollisionFilter<'_, I>,
        lifted: Option<&mut Vec<I>>,
    ) where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let depth_index = depth as usize;
        {
            let (ancestors, rest) = contexts.split_at_mut(depth_index);
            let context = &mut rest[0];
            self.fill_context(key, depth, context);
            if depth > 0 {
                self.lift_split_entities(
                    boxes,
                    depth,
                    context,
                    &mut ancestors[depth_index - 1],
                    lifted,
                );
            }
            sort_by_min_x::<A, DIM, C, I>(&mut context.ids, boxes);
        }

        let child_keys: smallvec::SmallVec<[NodeKey<L>; 16]> =
            self.core.expect_node(key).child_keys().collect();
        for child_key in child_keys {
            self.collide_subtree(boxes, depth + 1, child_key, contexts, pairs, filter, None);
        }

        self.collide_within(boxes, &contexts[depth_index], pairs, filter);
        for ancestor_depth in 0..depth_index {
            self.collide_with_ancestor(
                boxes,
                &contexts[ancestor_depth],
                &contexts[depth_index],
                depth,
                pairs,
                filter,
            );
        }
    }

    /// Sweep-and-prune among the entities of one context.
    fn collide_within<C>(
        &self,
        boxes: &C,
        context: &CollisionContext<DIM, I>,
        pairs: &mut Vec<(I, I)>,
        filter: CollisionFilter<'_, I>,
    ) where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let ids = &context.ids;
        for i in 0..ids.len() {
            let a = ids[i];
            let box_a = boxes.at(a);
            for &b in &ids[i + 1..] {
                let box_b = boxes.at(b);
                if max_x::<A, DIM>(box_a) < min_x::<A, DIM>(box_b) {
                    break;
                }
                if A::boxes_overlap_strict(box_a, box_b) && filter.map_or(true, |f| f(a, b)) {
                    pairs.push((a, b));
                }
            }
        }
    }

    /// Sweep-and-prune of a node's entities against one ancestor's,
    /// gated by the ancestor entity overlapping the node's cell.
    #[allow(clippy::too_many_arguments)]
    fn collide_with_ancestor<C>(
        &self,
        boxes: &C,
        ancestor: &CollisionContext<DIM, I>,
        context: &CollisionContext<DIM, I>,
        depth: Depth,
        pairs: &mut Vec<(I, I)>,
        filter: CollisionFilter<'_, I>,
    ) where
        C: EntitySet<A::Box, Id = I> + ?Sized,
    {
        let node_size = self.core.node_size(depth);
        let ids = &context.ids;
        let mut begin = 0usize;

        for &ancestor_id in &ancestor.ids {
            let ancestor_box = boxes.at(ancestor_id);
            if min_x::<A, DIM>(ancestor_box) > context.cell.max[0] {
                break;
            }

            let wide = widen_box::<A, DIM>(ancestor_box);
            if !overlap_by_center(&context.center, &wide.center(), node_size, &wide.size()) {
                continue;
            }

            while begin < ids.len()
                && max_x::<A, DIM>(boxes.at(ids[begin])) < min_x::<A, DIM>(ancestor_box)
            {
                begin += 1;
            }
            for &id in &ids[begin..] {
                let entity_box = boxes.at(id);
                if max_x::<A, DIM>(ancestor_box) < min_x::<A, DIM>(entity_box) {
                    break;
                }
                if A::boxes_overlap_strict(entity_box, ancestor_box)
                    && filter.map_or(true, |f| f(id, ancestor_id))
                {
                    pairs.push((id, ancestor_id));
                }
            }
        }
    }
}

/// Fetch (or build) a node's min-x-sorted id list in a per-tree cache.
fn sorted_node_ids<
    const DIM: usize,
    L: NodeStoreCode,
    A: Adapter<DIM>,
    I: EntityId,
    C,
    const SPLIT: bool,
>(
    cache: &mut AHashMap<NodeKey<L>, Vec<I>>,
    tree: &BoxTree<DIM, L, A, I, SPLIT>,
    boxes: &C,
    key: NodeKey<L>,
) -> Vec<I>
where
    C: EntitySet<A::Box, Id = I> + ?Sized,
{
    if let Some(ids) = cache.get(&key) {
        return ids.clone();
    }
    let node = tree.core.expect_node(key);
    let mut ids: Vec<I> = tree.core.store.slice(node.entities()).to_vec();
    sort_by_min_x::<A, DIM, C, I>(&mut ids, boxes);
    cache.insert(key, ids.clone());
    ids
}

/// Orient self-collision pairs id-ascending; deduplicate the split
/// policy's repeated discoveries.
fn finish_self_pairs<I: EntityId, const SPLIT: bool>(pairs: &mut Vec<(I, I)>) {
    for pair in pairs.iter_mut() {
        if pair.1 < pair.0 {
            *pair = (pair.1, pair.0);
        }
    }
    if SPLIT {
        sort_and_unique(pairs);
    }
}

#[cfg(test)]
mod tests {
    use crate::geometry::BoxN;
    use crate::{QuadtreeBox, QuadtreeBoxNoSplit, TreeSetup};

    fn abc_boxes() -> Vec<BoxN<f64, 2>> {
        vec![
            BoxN::new([0.0, 0.0], [1.0, 1.0]),
            BoxN::new([0.5, 0.5], [1.5, 1.5]),
            BoxN::new([2.0, 2.0], [3.0, 3.0]),
        ]
    }

    #[test]
    fn self_collision_finds_the_one_overlap() {
        let boxes = abc_boxes();
        let tree = QuadtreeBox::build(&boxes, TreeSetup::default());
        assert_eq!(tree.collision_detection(&boxes, None), vec![(0, 1)]);

        let no_split = QuadtreeBoxNoSplit::build(&boxes, TreeSetup::default());
        assert_eq!(no_split.collision_detection(&boxes, None), vec![(0, 1)]);
    }

    #[test]
    fn collision_matches_brute_force() {
        // Deterministic xorshift boxes.
        let mut rng = 0xfeed_beef_dead_cafeu64;
        let mut next = move || {
            rng ^= rng << 13;
            rng ^= rng >> 7;
            rng ^= rng << 17;
            (rng >> 11) as f64 / (1u64 << 53) as f64
        };

        let boxes: Vec<BoxN<f64, 2>> = (0..120)
            .map(|_| {
                let x = next() * 9.0;
                let y = next() * 9.0;
                let w = next() * 0.8 + 0.05;
                let h = next() * 0.8 + 0.05;
                BoxN::new([x, y], [x + w, y + h])
            })
            .collect();

        let tree = QuadtreeBox::build(
            &boxes,
            TreeSetup {
                max_depth: Some(4),
                bounding_box: Some(BoxN::new([0.0, 0.0], [10.0, 10.0])),
                max_elements_per_node: 4,
                parallel: false,
            },
        );

        let mut found = tree.collision_detection(&boxes, None);
        found.sort_unstable();

        type Ad2 = crate::geometry::CartesianAdapter<f64, 2>;
        use crate::adapter::Adapter;

        let mut expected = Vec::new();
        for a in 0..boxes.len() {
            for b in a + 1..boxes.len() {
                if <Ad2 as Adapter<2>>::boxes_overlap_strict(&boxes[a], &boxes[b]) {
                    expected.push((a, b));
                }
            }
        }
        assert_eq!(found, expected);
    }

    #[test]
    fn filter_drops_pairs_after_overlap() {
        let boxes = abc_boxes();
        let tree = QuadtreeBox::build(&boxes, TreeSetup::default());
        let none = tree.collision_detection(&boxes, Some(&|_, _| false));
        assert!(none.is_empty());
    }

    #[test]
    fn two_tree_collision_pairs_across_trees() {
        let left = vec![
            BoxN::new([0.0, 0.0], [1.0, 1.0]),
            BoxN::new([4.0, 4.0], [5.0, 5.0]),
        ];
        let right = vec![
            BoxN::new([0.5, 0.5], [1.5, 1.5]),
            BoxN::new([8.0, 8.0], [9.0, 9.0]),
        ];
        let space = BoxN::new([0.0, 0.0], [10.0, 10.0]);
        let setup = TreeSetup {
            max_depth: Some(3),
            bounding_box: Some(space),
            max_elements_per_node: 1,
            parallel: false,
        };
        let left_tree = QuadtreeBox::build(&left, setup.clone());
        let right_tree = QuadtreeBox::build(&right, setup);

        let pairs = left_tree.collision_detection_with(&left, &right_tree, &right);
        assert_eq!(pairs, vec![(0, 0)]);
    }
}
