//! Typed indices and the tables keyed by them.
//!
//! Blocks, values and register classes of a [`Function`] are all referred to
//! by small integer newtypes implementing [`EntityRef`]:
//!
//! - [`PrimaryMap`] owns the per-entity data and hands out new references.
//! - [`SecondaryMap`] is a side table sized for the entities of a function.
//! - [`EntitySet`] is a bitset over entities.
//! - [`PackedOption`] is an optional entity reference without a
//!   discriminant.
//!
//! [`Function`]: crate::function::Function

#[macro_use]
mod base;
mod packed_option;
mod primary_map;
mod secondary_map;
mod set;

pub use base::EntityRef;
pub use packed_option::{PackedOption, ReservedValue};
pub use primary_map::{Iter, Keys, PrimaryMap};
pub use secondary_map::SecondaryMap;
pub use set::EntitySet;
