// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Orthant Space: Morton (Z-order) indexing for N-dimensional orthotrees.
//!
//! This crate is the integer-algebra layer under the Orthant tree crates.
//! It knows nothing about geometry; it maps between per-dimension grid
//! coordinates, interleaved *location codes*, and depth-tagged *node keys*.
//!
//! - [`MortonCode`]: the location-code abstraction, implemented for `u32`,
//!   `u64`, and `u128` (linear trees, hashable keys) and for [`WideCode`]
//!   (bitset-backed codes for high dimensions, ordered keys).
//! - [`SpaceIndex`]: the per-dimension algebra over a code type: encode,
//!   decode, node-key composition, child enumeration, and the
//!   [`RangeLocation`] metadata that places an axis-aligned range at the
//!   deepest node whose cell fully contains it.
//!
//! # Example
//!
//! ```rust
//! use orthant_space::SpaceIndex;
//!
//! type Si = SpaceIndex<2, u32>;
//!
//! // Interleave a 2D grid coordinate and address the containing node.
//! let location = Si::encode([3, 5]);
//! let key = Si::key_at_depth(location, 3, 3);
//! assert_eq!(Si::depth_of(key), 3);
//! assert_eq!(Si::parent(key), Si::key_at_depth(location, 2, 3));
//! ```
//!
//! Node keys are plain location codes with one extra high sentinel bit, so
//! `parent` is a shift and `depth_of` is a bit-width division. Key `0` is
//! reserved as the "none" marker and the root key is `1`.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod key;
pub mod morton;
pub mod wide;

pub use key::{ChildChecker, ChildKeys, NodeKey, RangeLocation, SpaceIndex, TouchedSegments};
pub use morton::{ChildId, Depth, GridId, MortonCode};
pub use wide::WideCode;
