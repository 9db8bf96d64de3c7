//! Utility functions and types for debugging the spiller.
//!
//! These are not needed for normal compilation, but are useful during
//! development of both the spiller itself and of register allocators built on
//! top of it.

mod display;
#[cfg(feature = "parse")]
mod parse;
mod spill_costs;
mod validate;

pub use display::*;
pub use spill_costs::*;
pub use validate::*;
