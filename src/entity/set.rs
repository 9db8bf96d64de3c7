//! Bitsets over entities.

use alloc::vec::Vec;
use core::marker::PhantomData;

use super::EntityRef;

type Word = usize;

/// A set of entities stored as one bit per entity.
///
/// Like [`SecondaryMap`], the set must be sized with
/// [`EntitySet::clear_and_resize`] before use.
///
/// [`SecondaryMap`]: super::SecondaryMap
#[derive(Clone)]
pub struct EntitySet<T: EntityRef> {
    words: Vec<Word>,
    marker: PhantomData<T>,
}

impl<T: EntityRef> Default for EntitySet<T> {
    #[inline]
    fn default() -> Self {
        Self {
            words: Vec::new(),
            marker: PhantomData,
        }
    }
}

impl<T: EntityRef> EntitySet<T> {
    #[inline]
    fn locate(entity: T) -> (usize, Word) {
        let bits = Word::BITS as usize;
        (entity.index() / bits, 1 << (entity.index() % bits))
    }

    /// Empties the set and sizes it for `len` entities.
    #[inline]
    pub fn clear_and_resize(&mut self, len: usize) {
        self.words.clear();
        self.words.resize(len.div_ceil(Word::BITS as usize), 0);
    }

    /// Returns whether `entity` is in the set.
    #[inline]
    #[track_caller]
    pub fn contains(&self, entity: T) -> bool {
        let (word, mask) = Self::locate(entity);
        self.words[word] & mask != 0
    }

    /// Adds `entity` to the set. Returns `false` if it was already present.
    #[inline]
    #[track_caller]
    pub fn insert(&mut self, entity: T) -> bool {
        let (word, mask) = Self::locate(entity);
        let old = self.words[word];
        self.words[word] = old | mask;
        old & mask == 0
    }

    /// Removes `entity` from the set.
    #[inline]
    #[track_caller]
    pub fn remove(&mut self, entity: T) {
        let (word, mask) = Self::locate(entity);
        self.words[word] &= !mask;
    }
}
