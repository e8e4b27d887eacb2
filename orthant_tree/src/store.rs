// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node-store selection: hash map for integer keys, ordered map for wide
//! keys.
//!
//! Linear trees key nodes by plain integers and use an `ahash` hash map;
//! bitset-keyed trees cannot hash cheaply and use a `BTreeMap` under the
//! most-significant-bit-first order their code type defines. The choice is
//! made at compile time through [`NodeStoreCode::Map`], so neither variant
//! pays for the other.

use std::collections::BTreeMap;

use ahash::AHashMap;
use orthant_space::{MortonCode, WideCode};

/// Map operations the tree core needs from its node store.
pub trait NodeMap<L, N>: Default {
    /// Number of nodes.
    fn len(&self) -> usize;

    /// Whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pre-size for about `n` nodes, when the representation supports it.
    fn reserve(&mut self, n: usize);

    /// Whether `key` is present.
    fn contains(&self, key: L) -> bool;

    /// Node at `key`.
    fn get(&self, key: L) -> Option<&N>;

    /// Mutable node at `key`.
    fn get_mut(&mut self, key: L) -> Option<&mut N>;

    /// Insert a node, returning the previous occupant.
    fn insert(&mut self, key: L, node: N) -> Option<N>;

    /// Remove and return the node at `key`.
    fn remove(&mut self, key: L) -> Option<N>;

    /// Drop every node.
    fn clear(&mut self);

    /// All `(key, node)` pairs. Iteration order is representation-defined.
    fn iter<'a>(&'a self) -> impl Iterator<Item = (L, &'a N)> + 'a
    where
        N: 'a;

    /// All nodes, mutably.
    fn values_mut<'a>(&'a mut self) -> impl Iterator<Item = &'a mut N> + 'a
    where
        N: 'a;

    /// Keep only the pairs the predicate accepts.
    fn retain(&mut self, keep: impl FnMut(L, &mut N) -> bool);
}

// The trait methods share names with the map's own API, so the impl
// reaches the underlying `HashMap` through explicit reborrows; plain
// method syntax would resolve back to the trait.
type AHashInner<L, N> = std::collections::HashMap<L, N, ahash::RandomState>;

impl<L: MortonCode, N> NodeMap<L, N> for AHashMap<L, N> {
    #[inline]
    fn len(&self) -> usize {
        let inner: &AHashInner<L, N> = self;
        inner.len()
    }

    #[inline]
    fn reserve(&mut self, n: usize) {
        let inner: &mut AHashInner<L, N> = self;
        inner.reserve(n);
    }

    #[inline]
    fn contains(&self, key: L) -> bool {
        let inner: &AHashInner<L, N> = self;
        inner.contains_key(&key)
    }

    #[inline]
    fn get(&self, key: L) -> Option<&N> {
        let inner: &AHashInner<L, N> = self;
        inner.get(&key)
    }

    #[inline]
    fn get_mut(&mut self, key: L) -> Option<&mut N> {
        let inner: &mut AHashInner<L, N> = self;
        inner.get_mut(&key)
    }

    #[inline]
    fn insert(&mut self, key: L, node: N) -> Option<N> {
        let inner: &mut AHashInner<L, N> = self;
        inner.insert(key, node)
    }

    #[inline]
    fn remove(&mut self, key: L) -> Option<N> {
        let inner: &mut AHashInner<L, N> = self;
        inner.remove(&key)
    }

    #[inline]
    fn clear(&mut self) {
        let inner: &mut AHashInner<L, N> = self;
        inner.clear();
    }

    #[inline]
    fn iter<'a>(&'a self) -> impl Iterator<Item = (L, &'a N)> + 'a
    where
        N: 'a,
    {
        let inner: &AHashInner<L, N> = self;
        inner.iter().map(|(k, n)| (*k, n))
    }

    #[inline]
    fn values_mut<'a>(&'a mut self) -> impl Iterator<Item = &'a mut N> + 'a
    where
        N: 'a,
    {
        let inner: &mut AHashInner<L, N> = self;
        inner.values_mut()
    }

    #[inline]
    fn retain(&mut self, mut keep: impl FnMut(L, &mut N) -> bool) {
        let inner: &mut AHashInner<L, N> = self;
        inner.retain(|k, n| keep(*k, n));
    }
}

impl<L: MortonCode, N> NodeMap<L, N> for BTreeMap<L, N> {
    #[inline]
    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    #[inline]
    fn reserve(&mut self, _n: usize) {
        // B-trees grow node by node; nothing to pre-size.
    }

    #[inline]
    fn contains(&self, key: L) -> bool {
        self.contains_key(&key)
    }

    #[inline]
    fn get(&self, key: L) -> Option<&N> {
        BTreeMap::get(self, &key)
    }

    #[inline]
    fn get_mut(&mut self, key: L) -> Option<&mut N> {
        BTreeMap::get_mut(self, &key)
    }

    #[inline]
    fn insert(&mut self, key: L, node: N) -> Option<N> {
        BTreeMap::insert(self, key, node)
    }

    #[inline]
    fn remove(&mut self, key: L) -> Option<N> {
        BTreeMap::remove(self, &key)
    }

    #[inline]
    fn clear(&mut self) {
        BTreeMap::clear(self);
    }

    #[inline]
    fn iter<'a>(&'a self) -> impl Iterator<Item = (L, &'a N)> + 'a
    where
        N: 'a,
    {
        BTreeMap::iter(self).map(|(k, n)| (*k, n))
    }

    #[inline]
    fn values_mut<'a>(&'a mut self) -> impl Iterator<Item = &'a mut N> + 'a
    where
        N: 'a,
    {
        BTreeMap::values_mut(self)
    }

    #[inline]
    fn retain(&mut self, mut keep: impl FnMut(L, &mut N) -> bool) {
        BTreeMap::retain(self, |k, n| keep(*k, n));
    }
}

/// A location code that knows its node-store representation.
pub trait NodeStoreCode: MortonCode {
    /// The node map for this code type.
    type Map<N>: NodeMap<Self, N>;
}

impl NodeStoreCode for u32 {
    type Map<N> = AHashMap<u32, N>;
}

impl NodeStoreCode for u64 {
    type Map<N> = AHashMap<u64, N>;
}

impl NodeStoreCode for u128 {
    type Map<N> = AHashMap<u128, N>;
}

impl<const W: usize> NodeStoreCode for WideCode<W> {
    type Map<N> = BTreeMap<WideCode<W>, N>;
}
