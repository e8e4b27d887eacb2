// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! k-nearest-neighbor search with wall-distance ordering.
//!
//! The search keeps a bounded max-heap of the best `k` candidates. It
//! first charges the ancestors of the smallest node containing the query
//! point, then sweeps that node's subtree and, walking upward, each
//! sibling subtree in ascending wall-distance order, pruning cells whose
//! nearest wall is farther than the current k-th distance.

use std::collections::BinaryHeap;

use orthant_space::{Depth, NodeKey};
use smallvec::SmallVec;

use crate::adapter::Adapter;
use crate::entities::EntitySet;
use crate::tree::Si;
use crate::geometry::wall_distance;
use crate::point::PointTree;
use crate::query::EntityDistance;
use crate::scalar::EntityId;
use crate::store::NodeStoreCode;

struct KnnState<I> {
    heap: BinaryHeap<EntityDistance<I>>,
    /// Current pruning distance: the caller's ceiling until the heap
    /// holds `k` candidates, the k-th distance after.
    farthest: f64,
    k: usize,
    order: u32,
}

impl<I: EntityId> KnnState<I> {
    fn consider(&mut self, id: I, distance: f64) {
        if distance >= self.farthest {
            return;
        }
        self.heap.push(EntityDistance {
            distance,
            order: self.order,
            id,
        });
        self.order += 1;
        if self.heap.len() > self.k {
            self.heap.pop();
        }
        if self.heap.len() == self.k {
            self.farthest = self
                .heap
                .peek()
                .expect("heap holds k candidates")
                .distance;
        }
    }
}

impl<const DIM: usize, L: NodeStoreCode, A: Adapter<DIM>, I: EntityId> PointTree<DIM, L, A, I> {
    /// The `k` entities nearest to `point`, as `(id, distance)` pairs in
    /// ascending distance order. Ties keep their discovery order.
    pub fn nearest_neighbors<C>(&self, point: &A::Vector, k: usize, points: &C) -> Vec<(I, f64)>
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        self.nearest_neighbors_within(point, k, f64::MAX, points)
    }

    /// Like [`nearest_neighbors`](Self::nearest_neighbors), considering
    /// only entities strictly closer than `max_distance`.
    pub fn nearest_neighbors_within<C>(
        &self,
        point: &A::Vector,
        k: usize,
        max_distance: f64,
        points: &C,
    ) -> Vec<(I, f64)>
    where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        if k == 0 {
            return Vec::new();
        }

        let mut state = KnnState {
            heap: BinaryHeap::with_capacity(k + 1),
            farthest: max_distance,
            k,
            order: 0,
        };

        // The query point may be outside the space: clamp its cell.
        let mut smallest = self
            .core
            .find_smallest_key(self.core.point_node_key(point, true));
        if !Si::<DIM, L>::is_valid(smallest) {
            smallest = Si::<DIM, L>::root_key();
        }

        // Ancestors usually hold nothing, but charge what they do hold.
        let mut walk = smallest;
        while Si::<DIM, L>::is_valid(walk) {
            self.charge_node_entities(walk, point, points, &mut state);
            walk = Si::<DIM, L>::parent(walk);
        }

        // Sweep the containing subtree, then each sibling subtree on the
        // way up, nearest cells first.
        let mut prev = Si::<DIM, L>::none_key();
        let mut node_key = smallest;
        while Si::<DIM, L>::is_valid(node_key) {
            let depth = Si::<DIM, L>::depth_of(node_key);
            let node = self.core.expect_node(node_key);
            let wall = wall_distance::<A, DIM>(
                point,
                node.center(),
                self.core.node_half_size(depth),
                false,
            );

            self.knn_descend(node_key, depth, prev, true, point, points, &mut state);

            if state.farthest < wall {
                break;
            }
            prev = node_key;
            node_key = Si::<DIM, L>::parent(node_key);
        }

        let mut kept: Vec<EntityDistance<I>> = state.heap.into_vec();
        kept.sort_unstable();
        kept.into_iter().map(|e| (e.id, e.distance)).collect()
    }

    fn charge_node_entities<C>(
        &self,
        key: NodeKey<L>,
        point: &A::Vector,
        points: &C,
        state: &mut KnnState<I>,
    ) where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        let node = self.core.expect_node(key);
        for &id in self.core.store.slice(node.entities()) {
            state.consider(id, A::point_distance(point, points.at(id)));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn knn_descend<C>(
        &self,
        key: NodeKey<L>,
        depth: Depth,
        prev: NodeKey<L>,
        already_charged: bool,
        point: &A::Vector,
        points: &C,
        state: &mut KnnState<I>,
    ) where
        C: EntitySet<A::Vector, Id = I> + ?Sized,
    {
        if key == prev {
            // This subtree was swept in a previous upward step.
            return;
        }
        if !already_charged {
            self.charge_node_entities(key, point, points, state);
        }

        let node = self.core.expect_node(key);
        let mut children: SmallVec<[(f64, NodeKey<L>); 16]> = SmallVec::new();
        for child_key in node.child_keys() {
            let child = self.core.expect_node(child_key);
            let wall = wall_distance::<A, DIM>(
                point,
                child.center(),
                self.core.node_half_size(depth + 1),
                true,
            );
            if wall > state.farthest {
                continue;
            }
            children.push((wall, child_key));
        }
        children.sort_unstable_by(|(a, _), (b, _)| a.total_cmp(b));

        for (wall, child_key) in children {
            // The pruning distance may have shrunk since the sort.
            if wall > state.farthest {
                continue;
            }
            self.knn_descend(child_key, depth + 1, prev, false, point, points, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::geometry::BoxN;
    use crate::{LineTree, Octree, TreeSetup};

    #[test]
    fn corner_query_orders_by_distance() {
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

        let found = tree.nearest_neighbors(&[0.9, 0.9, 0.9], 2, &points);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, 4);
        assert!(found[0].1 < found[1].1);
        // The runner-up is one of the axis corners, all equidistant.
        assert!([1, 2, 3].contains(&found[1].0));
    }

    #[test]
    fn max_distance_is_a_strict_ceiling() {
        let points = vec![[0.0, 0.0], [3.0, 0.0], [0.0, 4.0]];
        let tree = crate::Quadtree::build(&points, TreeSetup::default());

        let found = tree.nearest_neighbors_within(&[0.0, 0.0], 3, 3.5, &points);
        let ids: Vec<usize> = found.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 1]);

        // Distance exactly at the ceiling is excluded.
        let found = tree.nearest_neighbors_within(&[0.0, 0.0], 3, 3.0, &points);
        let ids: Vec<usize> = found.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn matches_brute_force_in_one_dimension() {
        // Deterministic xorshift data.
        let mut rng = 0x0123_4567_89ab_cdefu64;
        let mut next = move || {
            rng ^= rng << 13;
            rng ^= rng >> 7;
            rng ^= rng << 17;
            (rng >> 11) as f64 / (1u64 << 53) as f64
        };

        let points: Vec<[f64; 1]> = (0..10_000).map(|_| [next() * 100.0]).collect();
        let tree = LineTree::build(
            &points,
            TreeSetup {
                max_elements_per_node: 20,
                ..TreeSetup::default()
            },
        );

        for _ in 0..32 {
            let q = [next() * 100.0];
            let found: Vec<usize> = tree
                .nearest_neighbors(&q, 10, &points)
                .into_iter()
                .map(|(id, _)| id)
                .collect();

            let mut brute: Vec<(f64, usize)> = points
                .iter()
                .enumerate()
                .map(|(id, p)| ((p[0] - q[0]).abs(), id))
                .collect();
            brute.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            let expected: Vec<usize> = brute.iter().take(10).map(|(_, id)| *id).collect();

            let mut found_sorted = found.clone();
            found_sorted.sort_unstable();
            let mut expected_sorted = expected.clone();
            expected_sorted.sort_unstable();
            assert_eq!(found_sorted, expected_sorted, "query at {q:?}");
        }
    }

    #[test]
    fn query_outside_the_space_still_works() {
        let points = vec![[0.25, 0.25], [0.75, 0.75]];
        let tree = crate::Quadtree::build(
            &points,
            TreeSetup {
                bounding_box: Some(BoxN::new([0.0, 0.0], [1.0, 1.0])),
                ..TreeSetup::default()
            },
        );
        let found = tree.nearest_neighbors(&[2.0, 2.0], 1, &points);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 1);
    }
}
