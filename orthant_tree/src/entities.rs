// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The entity-collection contract.
//!
//! The trees are non-owning: they store entity ids and read geometry
//! through this trait on every build and query call. Two collection shapes
//! are supported out of the box: contiguous sequences (ids are zero-based
//! ordinals) and associative maps (ids are the map's keys).

use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::scalar::EntityId;

/// An indexable collection of entity geometry.
///
/// `G` is the geometry type: the adapter's `Vector` for point trees, its
/// `Box` for box trees.
pub trait EntitySet<G> {
    /// Id type handed out and stored by the trees.
    type Id: EntityId;

    /// Whether ids are dense zero-based ordinals. Dense collections get
    /// id renumbering on erase so ids stay aligned after the caller
    /// removes the entity.
    const CONTIGUOUS: bool;

    /// Number of entities.
    fn len(&self) -> usize;

    /// Whether the collection is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Geometry of `id`, if present.
    fn get(&self, id: Self::Id) -> Option<&G>;

    /// Geometry of `id`.
    ///
    /// # Panics
    ///
    /// Panics when `id` is not in the collection; the trees only pass ids
    /// that were handed to them.
    fn at(&self, id: Self::Id) -> &G;

    /// All `(id, geometry)` pairs.
    fn iter<'a>(&'a self) -> impl Iterator<Item = (Self::Id, &'a G)> + 'a
    where
        G: 'a;
}

impl<G> EntitySet<G> for [G] {
    type Id = usize;

    const CONTIGUOUS: bool = true;

    #[inline]
    fn len(&self) -> usize {
        <[G]>::len(self)
    }

    #[inline]
    fn get(&self, id: usize) -> Option<&G> {
        <[G]>::get(self, id)
    }

    #[inline]
    fn at(&self, id: usize) -> &G {
        &self[id]
    }

    #[inline]
    fn iter<'a>(&'a self) -> impl Iterator<Item = (usize, &'a G)> + 'a
    where
        G: 'a,
    {
        <[G]>::iter(self).enumerate()
    }
}

impl<G> EntitySet<G> for Vec<G> {
    type Id = usize;

    const CONTIGUOUS: bool = true;

    #[inline]
    fn len(&self) -> usize {
        Vec::len(self)
    }

    #[inline]
    fn get(&self, id: usize) -> Option<&G> {
        self.as_slice().get(id)
    }

    #[inline]
    fn at(&self, id: usize) -> &G {
        &self[id]
    }

    #[inline]
    fn iter<'a>(&'a self) -> impl Iterator<Item = (usize, &'a G)> + 'a
    where
        G: 'a,
    {
        self.as_slice().iter().enumerate()
    }
}

impl<K: EntityId, G, S: BuildHasher> EntitySet<G> for HashMap<K, G, S> {
    type Id = K;

    const CONTIGUOUS: bool = false;

    #[inline]
    fn len(&self) -> usize {
        HashMap::len(self)
    }

    #[inline]
    fn get(&self, id: K) -> Option<&G> {
        HashMap::get(self, &id)
    }

    #[inline]
    fn at(&self, id: K) -> &G {
        &self[&id]
    }

    #[inline]
    fn iter<'a>(&'a self) -> impl Iterator<Item = (K, &'a G)> + 'a
    where
        G: 'a,
    {
        HashMap::iter(self).map(|(k, g)| (*k, g))
    }
}
