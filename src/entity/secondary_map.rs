//! Side tables for entities owned elsewhere.

use alloc::vec::Vec;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};

use super::EntityRef;

/// Extra per-entity data for references allocated by some [`PrimaryMap`].
///
/// The table must be sized with [`SecondaryMap::clear_and_resize`] before use.
/// Accessing an entity outside of that size panics.
///
/// [`PrimaryMap`]: super::PrimaryMap
#[derive(Clone)]
pub struct SecondaryMap<K: EntityRef, V> {
    elems: Vec<V>,
    marker: PhantomData<K>,
}

impl<K: EntityRef, V> SecondaryMap<K, V> {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            elems: Vec::new(),
            marker: PhantomData,
        }
    }

    /// Resets every entry to its default and sizes the table for `len`
    /// entities.
    #[inline]
    pub fn clear_and_resize(&mut self, len: usize)
    where
        V: Default,
    {
        self.elems.clear();
        self.elems.resize_with(len, V::default);
    }
}

impl<K: EntityRef, V> Default for SecondaryMap<K, V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityRef, V> Index<K> for SecondaryMap<K, V> {
    type Output = V;

    #[inline]
    #[track_caller]
    fn index(&self, k: K) -> &V {
        &self.elems[k.index()]
    }
}

impl<K: EntityRef, V> IndexMut<K> for SecondaryMap<K, V> {
    #[inline]
    #[track_caller]
    fn index_mut(&mut self, k: K) -> &mut V {
        &mut self.elems[k.index()]
    }
}
