//! Optional entity references without a separate discriminant.

use core::mem;

/// Types with one value set aside to mean "none".
pub trait ReservedValue {
    /// The value standing for "none".
    fn reserved_value() -> Self;

    /// Returns whether `self` is the value standing for "none".
    fn is_reserved_value(&self) -> bool;
}

/// An `Option<T>` the same size as `T`.
///
/// Used for the schedule links of a [`Function`] and in the per-block tables
/// built by the analyses.
///
/// [`Function`]: crate::function::Function
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct PackedOption<T: ReservedValue>(T);

impl<T: ReservedValue> PackedOption<T> {
    /// Returns `true` if no value is stored.
    #[inline]
    pub fn is_none(&self) -> bool {
        self.0.is_reserved_value()
    }

    /// Converts to a regular `Option`.
    #[inline]
    pub fn expand(self) -> Option<T> {
        if self.is_none() { None } else { Some(self.0) }
    }

    /// Moves the value out, leaving none behind.
    #[inline]
    pub fn take(&mut self) -> Option<T> {
        mem::take(self).expand()
    }
}

impl<T: ReservedValue> Default for PackedOption<T> {
    #[inline]
    fn default() -> Self {
        Self(T::reserved_value())
    }
}

impl<T: ReservedValue> From<T> for PackedOption<T> {
    #[inline]
    fn from(t: T) -> Self {
        debug_assert!(!t.is_reserved_value(), "reserved value stored as some");
        Self(t)
    }
}

impl<T: ReservedValue> From<Option<T>> for PackedOption<T> {
    #[inline]
    fn from(opt: Option<T>) -> Self {
        opt.map_or_else(Self::default, Self::from)
    }
}
