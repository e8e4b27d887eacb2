// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node-key algebra over location codes.
//!
//! A node key is a prefix of a location code tagged with one extra high
//! *sentinel* bit, so that the same integer names both a grid path and its
//! depth. The root key is `1` (sentinel only); key `0` is reserved as the
//! "none" marker; `parent` is a right shift by `DIM` and the low `DIM` bits
//! of a key are the child-segment id within its parent.

use core::marker::PhantomData;

use crate::morton::{ChildId, Depth, GridId, MortonCode};

/// A depth-tagged node key. Shares representation with its location code.
pub type NodeKey<L> = L;

/// Placement of an axis-aligned grid range in the tree.
///
/// Identifies the deepest node whose cell fully contains the range:
/// `depth` and `loc` (the location code cleared below the containing
/// level), plus the axes on which the range straddles that node's
/// mid-planes (`touched`) and the child segment on the lower side of every
/// touched axis (`lower_segment`). A point has `touched == 0`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RangeLocation<L> {
    /// Depth of the deepest containing node.
    pub depth: Depth,
    /// Location code of the containing node, cleared below its level.
    pub loc: L,
    /// Axis mask of straddled mid-planes at `depth + 1`.
    pub touched: ChildId,
    /// Child segment at the lower side of every touched axis.
    pub lower_segment: ChildId,
}

/// Composes full child keys from a parent key. See
/// [`SpaceIndex::child_keys`].
#[derive(Copy, Clone, Debug)]
pub struct ChildKeys<L> {
    shifted_parent: L,
}

impl<L: MortonCode> ChildKeys<L> {
    /// The key of the child in segment `child`.
    #[inline]
    pub fn key_of(&self, child: ChildId) -> NodeKey<L> {
        self.shifted_parent | L::from_child(child)
    }
}

/// Tests whether location codes share a `DIM`-bit chunk at a fixed level.
/// See [`SpaceIndex::child_checker`].
#[derive(Copy, Clone, Debug)]
pub struct ChildChecker<L> {
    mask: L,
    flag: L,
    shift: u32,
    child_mask: ChildId,
}

impl<L: MortonCode> ChildChecker<L> {
    /// Whether `location` falls in the same child segment as the reference
    /// location at the prepared level.
    #[inline]
    pub fn test(&self, location: L) -> bool {
        location & self.mask == self.flag
    }

    /// The reference location's child-segment id at the prepared level.
    #[inline]
    pub fn child_id(&self) -> ChildId {
        (self.flag >> self.shift).to_child() & self.child_mask
    }
}

/// Enumerates the child segments an entity with a touched-axis mask
/// overlaps: every subset of `touched`, OR-ed onto `lower_segment`, in
/// ascending segment order. Yields `2^popcount(touched)` ids.
#[derive(Copy, Clone, Debug)]
pub struct TouchedSegments {
    touched: ChildId,
    lower: ChildId,
    subset: Option<ChildId>,
}

impl Iterator for TouchedSegments {
    type Item = ChildId;

    #[inline]
    fn next(&mut self) -> Option<ChildId> {
        let subset = self.subset?;
        self.subset = if subset == self.touched {
            None
        } else {
            Some(subset.wrapping_sub(self.touched) & self.touched)
        };
        Some(self.lower | subset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = match self.subset {
            Some(_) => 1usize << self.touched.count_ones(),
            None => 0,
        };
        (n, Some(n))
    }
}

/// The space-indexing algebra for a `DIM`-dimensional tree over location
/// code `L`.
///
/// Stateless; every operation is an associated function, mirroring how the
/// tree crates use it (`SpaceIndex::<DIM, L>::parent(key)` and so on).
pub struct SpaceIndex<const DIM: usize, L: MortonCode>(PhantomData<L>);

impl<const DIM: usize, L: MortonCode> SpaceIndex<DIM, L> {
    const DIM_OK: () = assert!(DIM >= 1 && DIM <= 63, "supported dimensions are 1..=63");

    /// Number of children of a node, `2^DIM`.
    pub const CHILD_COUNT: ChildId = {
        #[allow(clippy::let_unit_value)]
        let _ = Self::DIM_OK;
        1 << DIM
    };

    /// Mask of the low `DIM` bits of a key: the child-segment id.
    pub const CHILD_MASK: ChildId = Self::CHILD_COUNT - 1;

    /// Deepest depth the code type can address, leaving the sentinel bit.
    pub const MAX_DEPTH: Depth = ((L::BITS - 1) / DIM as u32) as Depth;

    /// Interleave a grid coordinate into a location code.
    #[inline]
    pub fn encode(grid: [GridId; DIM]) -> L {
        L::interleave(grid)
    }

    /// Grid coordinate of a node's lower corner at maximum resolution.
    #[inline]
    pub fn decode(key: NodeKey<L>, max_depth: Depth) -> [GridId; DIM] {
        let depth = Self::depth_of(key);
        debug_assert!(depth <= max_depth);
        let location = Self::strip_sentinel(key) << ((max_depth - depth) as u32 * DIM as u32);
        location.deinterleave()
    }

    /// The root node key.
    #[inline]
    pub fn root_key() -> NodeKey<L> {
        L::ONE
    }

    /// The reserved "none" key.
    #[inline]
    pub fn none_key() -> NodeKey<L> {
        L::ZERO
    }

    /// Whether `key` names a node (anything but the "none" key).
    #[inline]
    pub fn is_valid(key: NodeKey<L>) -> bool {
        !key.is_zero()
    }

    /// The parent's key. The root's parent is the "none" key.
    #[inline]
    pub fn parent(key: NodeKey<L>) -> NodeKey<L> {
        key >> DIM as u32
    }

    /// Depth encoded by the sentinel bit. The root has depth 0.
    #[inline]
    pub fn depth_of(key: NodeKey<L>) -> Depth {
        debug_assert!(Self::is_valid(key));
        ((key.bit_width() - 1) / DIM as u32) as Depth
    }

    /// Remove the sentinel bit, leaving the bare location prefix.
    #[inline]
    pub fn strip_sentinel(key: NodeKey<L>) -> L {
        key ^ (L::ONE << (key.bit_width() - 1))
    }

    /// Key of the node at `depth` containing the max-resolution `location`.
    #[inline]
    pub fn key_at_depth(location: L, depth: Depth, max_depth: Depth) -> NodeKey<L> {
        debug_assert!(depth <= max_depth);
        (L::ONE << (depth as u32 * DIM as u32))
            | (location >> ((max_depth - depth) as u32 * DIM as u32))
    }

    /// Key composed from a depth and a location prefix already shifted to
    /// that depth.
    #[inline]
    pub fn key_from_location(depth: Depth, location: L) -> NodeKey<L> {
        (L::ONE << (depth as u32 * DIM as u32)) | location
    }

    /// Key of the deepest node fully containing a located range.
    #[inline]
    pub fn key_of_range(location: &RangeLocation<L>, max_depth: Depth) -> NodeKey<L> {
        Self::key_at_depth(location.loc, location.depth, max_depth)
    }

    /// The child-segment id of `key` within its parent.
    #[inline]
    pub fn child_id_of(key: NodeKey<L>) -> ChildId {
        (key & L::from_child(Self::CHILD_MASK)).to_child() & Self::CHILD_MASK
    }

    /// The child-segment id of a descendant key relative to the ancestor
    /// `level_diff` levels above it.
    #[inline]
    pub fn child_id_at(key: NodeKey<L>, level_diff: Depth) -> ChildId {
        debug_assert!(level_diff >= 1);
        Self::child_id_of(key >> ((level_diff as u32 - 1) * DIM as u32))
    }

    /// A composer of the `2^DIM` child keys of `parent`.
    #[inline]
    pub fn child_keys(parent: NodeKey<L>) -> ChildKeys<L> {
        ChildKeys {
            shifted_parent: parent << DIM as u32,
        }
    }

    /// A checker for "same child segment at `level`" against a reference
    /// location.
    #[inline]
    pub fn child_checker(level: Depth, location: L) -> ChildChecker<L> {
        let shift = level as u32 * DIM as u32;
        let mask = L::from_child(Self::CHILD_MASK) << shift;
        ChildChecker {
            mask,
            flag: location & mask,
            shift,
            child_mask: Self::CHILD_MASK,
        }
    }

    /// Whether a touched-axis mask straddles every axis.
    #[inline]
    pub fn is_all_touched(touched: ChildId) -> bool {
        touched == Self::CHILD_MASK
    }

    /// Whether child segment `child` lies on the greater side of `axis`.
    #[inline]
    pub fn is_in_greater_segment(child: ChildId, axis: usize) -> bool {
        (child >> axis) & 1 != 0
    }

    /// Enumerate the child segments overlapped by an entity with the given
    /// touched-axis mask and lower segment.
    #[inline]
    pub fn touched_segments(touched: ChildId, lower_segment: ChildId) -> TouchedSegments {
        TouchedSegments {
            touched,
            lower: lower_segment,
            subset: Some(0),
        }
    }

    /// Place the grid range `[lo, hi]` (both corners at maximum
    /// resolution, inclusive) at the deepest node whose cell fully
    /// contains it.
    pub fn range_location(max_depth: Depth, lo: L, hi: L) -> RangeLocation<L> {
        let mut placed = RangeLocation {
            depth: max_depth,
            loc: lo,
            touched: 0,
            lower_segment: 0,
        };
        if lo == hi {
            return placed;
        }

        let difference = lo ^ hi;
        let level = difference.bit_width().div_ceil(DIM as u32);
        if level > 0 {
            let shift = (level - 1) * DIM as u32;
            let child_mask = L::from_child(Self::CHILD_MASK);
            placed.touched = ((difference >> shift) & child_mask).to_child();
            let mut loc = placed.loc >> shift;
            placed.lower_segment = (loc & child_mask).to_child();
            loc = loc >> DIM as u32;
            placed.loc = loc << (shift + DIM as u32);
            placed.depth = max_depth - level as Depth;
        }
        placed
    }

    /// Grid range location from raw per-dimension corner coordinates.
    #[inline]
    pub fn range_location_of_grid(
        max_depth: Depth,
        lo: [GridId; DIM],
        hi: [GridId; DIM],
    ) -> RangeLocation<L> {
        Self::range_location(max_depth, Self::encode(lo), Self::encode(hi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wide::WideCode;

    type Si2 = SpaceIndex<2, u32>;
    type Si3 = SpaceIndex<3, u64>;

    #[test]
    fn root_and_none() {
        assert_eq!(Si3::root_key(), 1);
        assert!(Si3::is_valid(Si3::root_key()));
        assert!(!Si3::is_valid(Si3::none_key()));
        assert_eq!(Si3::depth_of(Si3::root_key()), 0);
        assert_eq!(Si3::parent(Si3::root_key()), Si3::none_key());
    }

    #[test]
    fn key_depth_and_parent() {
        // Depth 2 key in 3D: sentinel at bit 6.
        let location = Si3::encode([5, 3, 1]);
        let key = Si3::key_at_depth(location, 2, 3);
        assert_eq!(Si3::depth_of(key), 2);

        let parent = Si3::parent(key);
        assert_eq!(Si3::depth_of(parent), 1);
        assert_eq!(parent, Si3::key_at_depth(location, 1, 3));
    }

    #[test]
    fn key_bijection_small_depths() {
        // decode(encode(g)↑, d) == g for all grid tuples of depth d.
        let max_depth: Depth = 3;
        for depth in 0..=max_depth {
            let side = 1u32 << depth;
            for x in 0..side {
                for y in 0..side {
                    let pad = (max_depth - depth) as u32;
                    let grid_max = [x << pad, y << pad];
                    let key = Si2::key_at_depth(Si2::encode(grid_max), depth, max_depth);
                    assert_eq!(Si2::decode(key, max_depth), grid_max);
                }
            }
        }
    }

    #[test]
    fn child_keys_compose() {
        let parent = Si3::root_key();
        let children = Si3::child_keys(parent);
        for child in 0..Si3::CHILD_COUNT {
            let key = children.key_of(child);
            assert_eq!(Si3::parent(key), parent);
            assert_eq!(Si3::child_id_of(key), child);
            assert_eq!(Si3::depth_of(key), 1);
        }
    }

    #[test]
    fn child_checker_matches_segment() {
        let location = Si2::encode([0b1011, 0b0110]);
        let checker = Si2::child_checker(2, location);
        assert!(checker.test(location));
        // Flip a bit inside the checked chunk: no longer the same segment.
        assert!(!checker.test(location ^ (1 << 4)));
        // Flip a bit below the checked chunk: same segment.
        assert!(checker.test(location ^ 1));
    }

    #[test]
    fn point_range_location_is_leaf() {
        let loc = Si2::encode([9, 4]);
        let placed = Si2::range_location(4, loc, loc);
        assert_eq!(placed.depth, 4);
        assert_eq!(placed.loc, loc);
        assert_eq!(placed.touched, 0);
    }

    #[test]
    fn straddling_range_stops_above() {
        // A range crossing the space's mid-plane on x only.
        let lo = Si2::encode([7, 2]);
        let hi = Si2::encode([8, 3]);
        let placed = Si2::range_location(4, lo, hi);
        assert_eq!(placed.depth, 0);
        assert_eq!(placed.touched, 0b01);
        assert!(placed.loc.is_zero());
        // Lower segment is the child holding the low corner.
        assert_eq!(placed.lower_segment & 0b01, 0);
    }

    #[test]
    fn contained_range_descends() {
        // Both corners inside the same depth-1 cell, straddling at depth 2.
        let lo = Si2::encode([1, 1]);
        let hi = Si2::encode([2, 2]);
        let placed = Si2::range_location(2, lo, hi);
        assert_eq!(placed.depth, 0);
        assert_eq!(placed.touched, 0b11);

        let lo = Si2::encode([0, 0]);
        let hi = Si2::encode([1, 1]);
        let placed = Si2::range_location(2, lo, hi);
        assert_eq!(placed.depth, 1);
        assert_eq!(placed.touched, 0b11);
        assert_eq!(placed.lower_segment, 0);
    }

    #[test]
    fn touched_segments_enumerates_subsets() {
        let segments: std::vec::Vec<ChildId> = Si3::touched_segments(0b101, 0b010).collect();
        assert_eq!(segments, &[0b010, 0b011, 0b110, 0b111]);

        let single: std::vec::Vec<ChildId> = Si3::touched_segments(0, 0b100).collect();
        assert_eq!(single, &[0b100]);
    }

    #[test]
    fn wide_code_key_algebra() {
        type SiW = SpaceIndex<20, WideCode<2>>;

        let mut grid = [0 as GridId; 20];
        for (i, g) in grid.iter_mut().enumerate() {
            *g = (i % 4) as GridId;
        }
        let location = SiW::encode(grid);
        let max_depth = SiW::MAX_DEPTH;
        let key = SiW::key_at_depth(location, 2, max_depth);
        assert_eq!(SiW::depth_of(key), 2);
        assert_eq!(SiW::depth_of(SiW::parent(key)), 1);

        let children = SiW::child_keys(key);
        let child_key = children.key_of(5);
        assert_eq!(SiW::parent(child_key), key);
        assert_eq!(SiW::child_id_of(child_key), 5);
    }
}
