// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! One tree cell.
//!
//! A node owns its child set, the handle of its entity-id run, and a
//! cached cell center. The child set is a packed bitmap when `2^DIM` fits
//! one machine word and a sorted small-vector of segment ids otherwise;
//! iteration hides the representation and yields fully composed child
//! keys in segment-id order.

use orthant_space::{ChildId, MortonCode, SpaceIndex};
use smallvec::SmallVec;

use crate::segments::SegmentHandle;

#[derive(Clone, Debug)]
enum Children {
    Mask(u64),
    List(SmallVec<[ChildId; 4]>),
}

/// A tree cell: child set, entity run, cached center.
#[derive(Clone, Debug)]
pub struct Node<L: MortonCode, const DIM: usize> {
    key: L,
    children: Children,
    entities: SegmentHandle,
    center: [f64; DIM],
}

impl<L: MortonCode, const DIM: usize> Node<L, DIM> {
    pub(crate) fn new(key: L, center: [f64; DIM]) -> Self {
        let children = if DIM <= 6 {
            Children::Mask(0)
        } else {
            Children::List(SmallVec::new())
        };
        Self {
            key,
            children,
            entities: SegmentHandle::default(),
            center,
        }
    }

    /// The node's key.
    #[inline]
    pub fn key(&self) -> L {
        self.key
    }

    /// Cached coordinate center of the node's cell.
    #[inline]
    pub fn center(&self) -> &[f64; DIM] {
        &self.center
    }

    /// Handle of the node's entity run.
    #[inline]
    pub fn entities(&self) -> SegmentHandle {
        self.entities
    }

    #[inline]
    pub(crate) fn entities_mut(&mut self) -> &mut SegmentHandle {
        &mut self.entities
    }

    /// Reseat the node's entity run.
    #[inline]
    pub(crate) fn replace_entities(&mut self, handle: SegmentHandle) {
        self.entities = handle;
    }

    /// Number of entities seated in this node.
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.len() as usize
    }

    /// Whether the node holds no entities.
    #[inline]
    pub fn is_entities_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub(crate) fn add_child(&mut self, child: ChildId) {
        match &mut self.children {
            Children::Mask(mask) => {
                debug_assert!(*mask & (1 << child) == 0, "child added twice");
                *mask |= 1 << child;
            }
            Children::List(list) => match list.binary_search(&child) {
                Ok(_) => debug_assert!(false, "child added twice"),
                Err(position) => list.insert(position, child),
            },
        }
    }

    pub(crate) fn remove_child(&mut self, child: ChildId) {
        match &mut self.children {
            Children::Mask(mask) => *mask &= !(1 << child),
            Children::List(list) => {
                if let Ok(position) = list.binary_search(&child) {
                    list.remove(position);
                }
            }
        }
    }

    /// Whether the child in segment `child` exists.
    #[inline]
    pub fn has_child(&self, child: ChildId) -> bool {
        match &self.children {
            Children::Mask(mask) => mask & (1 << child) != 0,
            Children::List(list) => list.binary_search(&child).is_ok(),
        }
    }

    /// Whether any child exists.
    #[inline]
    pub fn has_any_child(&self) -> bool {
        match &self.children {
            Children::Mask(mask) => *mask != 0,
            Children::List(list) => !list.is_empty(),
        }
    }

    /// Number of children.
    #[inline]
    pub fn child_count(&self) -> usize {
        match &self.children {
            Children::Mask(mask) => mask.count_ones() as usize,
            Children::List(list) => list.len(),
        }
    }

    /// Child-segment ids in ascending order.
    pub fn child_ids(&self) -> impl Iterator<Item = ChildId> + '_ {
        let (mask, list) = match &self.children {
            Children::Mask(mask) => (*mask, None),
            Children::List(list) => (0, Some(list.as_slice())),
        };
        let mut remaining = mask;
        core::iter::from_fn(move || {
            if remaining != 0 {
                let child = remaining.trailing_zeros() as ChildId;
                remaining &= remaining - 1;
                Some(child)
            } else {
                None
            }
        })
        .chain(list.into_iter().flatten().copied())
    }

    /// Fully composed keys of the existing children, in segment order.
    pub fn child_keys(&self) -> impl Iterator<Item = L> + '_ {
        let generator = SpaceIndex::<DIM, L>::child_keys(self.key);
        self.child_ids().map(move |child| generator.key_of(child))
    }

    /// Drop children and entity handle, keeping key and center.
    pub(crate) fn clear(&mut self) {
        self.entities = SegmentHandle::default();
        self.children = if DIM <= 6 {
            Children::Mask(0)
        } else {
            Children::List(SmallVec::new())
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_children_iterate_in_segment_order() {
        let mut node: Node<u32, 3> = Node::new(1, [0.0; 3]);
        assert!(!node.has_any_child());

        node.add_child(5);
        node.add_child(0);
        node.add_child(7);
        assert!(node.has_child(5));
        assert!(!node.has_child(2));
        assert_eq!(node.child_count(), 3);
        assert_eq!(node.child_ids().collect::<Vec<_>>(), vec![0, 5, 7]);

        // Keys of root children are (1 << 3) | id.
        assert_eq!(
            node.child_keys().collect::<Vec<_>>(),
            vec![0b1000, 0b1101, 0b1111]
        );

        node.remove_child(5);
        assert_eq!(node.child_ids().collect::<Vec<_>>(), vec![0, 7]);
    }

    #[test]
    fn list_children_stay_sorted() {
        let mut node: Node<orthant_space::WideCode<2>, 8> =
            Node::new(orthant_space::WideCode::ONE, [0.0; 8]);
        node.add_child(200);
        node.add_child(3);
        node.add_child(90);
        assert_eq!(node.child_ids().collect::<Vec<_>>(), vec![3, 90, 200]);
        assert!(node.has_child(90));
        node.remove_child(90);
        assert!(!node.has_child(90));
    }
}
