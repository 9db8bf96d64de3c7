//! Owning tables which allocate entity references.

use alloc::vec::Vec;
use core::iter::Enumerate;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut, Range};
use core::slice;

use super::EntityRef;

/// Owns the data of every entity of type `K`.
///
/// References are allocated in increasing order by [`PrimaryMap::push`] and
/// are never freed.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrimaryMap<K: EntityRef, V> {
    elems: Vec<V>,
    marker: PhantomData<K>,
}

impl<K: EntityRef, V> PrimaryMap<K, V> {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            elems: Vec::new(),
            marker: PhantomData,
        }
    }

    /// Number of references allocated so far.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Returns `true` if no reference has been allocated.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Stores `v` under a fresh reference.
    #[inline]
    pub fn push(&mut self, v: V) -> K {
        let k = K::new(self.elems.len());
        self.elems.push(v);
        k
    }

    /// All allocated references, in allocation order.
    #[inline]
    #[must_use]
    pub fn keys(&self) -> Keys<K> {
        Keys {
            range: 0..self.elems.len(),
            marker: PhantomData,
        }
    }

    /// All entries, in allocation order.
    #[inline]
    #[must_use]
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.elems.iter().enumerate(),
            marker: PhantomData,
        }
    }
}

impl<K: EntityRef, V> Default for PrimaryMap<K, V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityRef, V> Index<K> for PrimaryMap<K, V> {
    type Output = V;

    #[inline]
    #[track_caller]
    fn index(&self, k: K) -> &V {
        &self.elems[k.index()]
    }
}

impl<K: EntityRef, V> IndexMut<K> for PrimaryMap<K, V> {
    #[inline]
    #[track_caller]
    fn index_mut(&mut self, k: K) -> &mut V {
        &mut self.elems[k.index()]
    }
}

/// Iterator over the references of a [`PrimaryMap`].
#[derive(Clone)]
pub struct Keys<K: EntityRef> {
    range: Range<usize>,
    marker: PhantomData<K>,
}

impl<K: EntityRef> Iterator for Keys<K> {
    type Item = K;

    #[inline]
    fn next(&mut self) -> Option<K> {
        self.range.next().map(K::new)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.range.size_hint()
    }
}

impl<K: EntityRef> DoubleEndedIterator for Keys<K> {
    #[inline]
    fn next_back(&mut self) -> Option<K> {
        self.range.next_back().map(K::new)
    }
}

impl<K: EntityRef> ExactSizeIterator for Keys<K> {}

/// Iterator over the entries of a [`PrimaryMap`].
pub struct Iter<'a, K: EntityRef, V> {
    inner: Enumerate<slice::Iter<'a, V>>,
    marker: PhantomData<K>,
}

impl<'a, K: EntityRef, V> Iterator for Iter<'a, K, V> {
    type Item = (K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(i, v)| (K::new(i), v))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K: EntityRef, V> ExactSizeIterator for Iter<'_, K, V> {}
