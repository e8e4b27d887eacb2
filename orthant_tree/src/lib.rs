// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Orthant Tree: N-dimensional linear orthotrees (generalized quadtrees,
//! octrees, and hypertrees).
//!
//! An orthotree here is a *non-owning* spatial index: it stores entity ids
//! organized into a hash-addressed node hierarchy keyed by Morton (Z-order)
//! codes, and reads geometry through an [`Adapter`] from the collection the
//! caller passes to every operation. Point entities and axis-aligned box
//! entities get separate tree kinds ([`PointTree`], [`BoxTree`]); both
//! support bulk construction, incremental edits with local rebalancing, and
//! a family of spatial queries: range search, plane and frustum tests,
//! k-nearest-neighbor, ray casting, and broad-phase collision detection.
//!
//! - Dimensions are compile-time (`const DIM`); trees up to 3 dimensions
//!   use 32-bit location codes, up to 15 use 64-bit, and higher dimensions
//!   switch to bitset codes with an ordered node store
//!   (see [`orthant_space`]).
//! - Nodes store their entity ids in a paged segment allocator, so bulk
//!   builds seat id runs without copies and edits relocate at most one run.
//! - The `parallel` feature gates the rayon paths (bulk-build sort, bulk
//!   index updates, collision frontier fan-out); results are identical
//!   either way.
//! - The `glam` feature provides adapters for glam vector types.
//!
//! # Example
//!
//! ```rust
//! use orthant_tree::{BoxN, Octree, TreeSetup};
//!
//! let points = vec![
//!     [0.0, 0.0, 0.0],
//!     [1.0, 0.0, 0.0],
//!     [0.0, 1.0, 0.0],
//!     [1.0, 1.0, 1.0],
//! ];
//!
//! let tree = Octree::build(
//!     &points,
//!     TreeSetup {
//!         bounding_box: Some(BoxN::new([0.0; 3], [1.0; 3])),
//!         ..TreeSetup::default()
//!     },
//! );
//!
//! // Who is in the upper corner region?
//! let found = tree.range_search(&BoxN::new([0.5; 3], [1.0; 3]), &points);
//! assert_eq!(found, vec![3]);
//!
//! // Who is nearest to the center?
//! let nearest = tree.nearest_neighbors(&[0.4, 0.4, 0.4], 1, &points);
//! assert_eq!(nearest[0].0, 0);
//! ```

pub mod adapter;
pub mod boxtree;
pub mod entities;
pub mod geometry;
pub mod node;
pub mod point;
pub mod scalar;
pub mod segments;
pub mod store;
pub mod tree;

mod grid;
mod query;

#[cfg(feature = "glam")]
mod impl_glam;

#[cfg(feature = "glam")]
pub use impl_glam::{
    GlamAdapter2, GlamAdapter3, GlamBox2, GlamBox3, GlamOctree, GlamOctreeBox, GlamPlane2,
    GlamPlane3, GlamQuadtree, GlamQuadtreeBox, GlamRay2, GlamRay3,
};

pub use adapter::{Adapter, BoxRelation, PlaneRelation};
pub use boxtree::BoxTree;
pub use entities::EntitySet;
pub use geometry::{Aabb, BoxN, CartesianAdapter, PlaneN, PointN, RayN};
pub use node::Node;
pub use orthant_space::{ChildId, Depth, GridId, MortonCode, NodeKey, SpaceIndex, WideCode};
pub use point::PointTree;
pub use scalar::{EntityId, Scalar};
pub use segments::SegmentHandle;
pub use store::{NodeMap, NodeStoreCode};
pub use tree::{DEFAULT_MAX_ELEMENTS_PER_NODE, TreeSetup};

/// 1-D point tree over `[S; 1]` coordinates.
pub type LineTree<S = f64> = PointTree<1, u32, CartesianAdapter<S, 1>, usize>;

/// 2-D point tree (quadtree) over `[S; 2]` coordinates.
pub type Quadtree<S = f64> = PointTree<2, u32, CartesianAdapter<S, 2>, usize>;

/// 3-D point tree (octree) over `[S; 3]` coordinates.
pub type Octree<S = f64> = PointTree<3, u32, CartesianAdapter<S, 3>, usize>;

/// N-dimensional point tree with 64-bit location codes (up to 15
/// dimensions at useful depths).
pub type PointTreeN<const DIM: usize, S = f64> = PointTree<DIM, u64, CartesianAdapter<S, DIM>, usize>;

/// N-dimensional point tree with bitset location codes and an ordered node
/// store, for dimensions past the 64-bit range.
pub type PointTreeWide<const DIM: usize, S = f64> =
    PointTree<DIM, WideCode<2>, CartesianAdapter<S, DIM>, usize>;

/// 2-D box tree with straddling entities split into children.
pub type QuadtreeBox<S = f64> = BoxTree<2, u32, CartesianAdapter<S, 2>, usize, true>;

/// 2-D box tree keeping straddling entities at their deepest container.
pub type QuadtreeBoxNoSplit<S = f64> = BoxTree<2, u32, CartesianAdapter<S, 2>, usize, false>;

/// 3-D box tree with straddling entities split into children.
pub type OctreeBox<S = f64> = BoxTree<3, u32, CartesianAdapter<S, 3>, usize, true>;

/// 3-D box tree keeping straddling entities at their deepest container.
pub type OctreeBoxNoSplit<S = f64> = BoxTree<3, u32, CartesianAdapter<S, 3>, usize, false>;

/// N-dimensional box tree with 64-bit location codes.
pub type BoxTreeN<const DIM: usize, S = f64> =
    BoxTree<DIM, u64, CartesianAdapter<S, DIM>, usize, true>;
