//! The [`EntityRef`] trait and the macro used to define entity types.

use super::packed_option::ReservedValue;

/// A typed wrapper around a dense index.
///
/// All entity maps are keyed by types implementing this trait.
pub trait EntityRef: Copy + Eq + ReservedValue {
    /// Wraps a raw index.
    fn new(index: usize) -> Self;

    /// Unwraps the raw index.
    fn index(self) -> usize;
}

/// Defines entity types backed by an integer.
///
/// Each entity is displayed as its prefix followed by its index, e.g.
/// `block3` or `%12`. The maximum integer value is reserved so that the type
/// can be stored in a [`PackedOption`].
///
/// [`PackedOption`]: crate::entity::PackedOption
macro_rules! entity_def {
    ($($(#[$attr:meta])* $vis:vis entity $name:ident($int:ident, $prefix:expr);)*) => {
        $(
            $(#[$attr])*
            #[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
            #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
            $vis struct $name($int);

            impl $name {
                /// Wraps a raw index.
                #[inline]
                #[allow(dead_code)]
                $vis const fn new(index: usize) -> Self {
                    debug_assert!(index < ($int::MAX as usize));
                    Self(index as $int)
                }

                /// Unwraps the raw index.
                #[inline]
                #[allow(dead_code)]
                $vis const fn index(self) -> usize {
                    self.0 as usize
                }
            }

            impl $crate::entity::EntityRef for $name {
                #[inline]
                fn new(index: usize) -> Self {
                    Self::new(index)
                }

                #[inline]
                fn index(self) -> usize {
                    self.index()
                }
            }

            impl $crate::entity::ReservedValue for $name {
                #[inline]
                fn reserved_value() -> Self {
                    Self($int::MAX)
                }

                #[inline]
                fn is_reserved_value(&self) -> bool {
                    self.0 == $int::MAX
                }
            }

            impl core::fmt::Display for $name {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    write!(f, concat!($prefix, "{}"), self.0)
                }
            }

            impl core::fmt::Debug for $name {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    core::fmt::Display::fmt(self, f)
                }
            }
        )*
    };
}
