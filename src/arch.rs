//! Architecture-specific hooks used by the spiller.
//!
//! The spiller itself doesn't know anything about the target instruction set.
//! It relies on an [`ArchInfo`] implementation to provide the relative costs of
//! memory operations and to construct the spill and reload operations for a
//! value.
//!
//! The default implementations of the factory methods build generic
//! [`Opcode::Spill`] and [`Opcode::Reload`] operations which address the spill
//! slot relative to the frame pointer:
//!
//! ```text
//! %s:mem = spill %fp, %value
//! %r:class0 = reload %fp, %s
//! ```

use crate::function::{Function, Opcode, Value, ValueFlags, ValueType};

/// Description of the target architecture, as far as spilling is concerned.
pub trait ArchInfo {
    /// Cost of storing a value to a spill slot, at a block frequency of 1.
    fn spill_cost(&self) -> u32;

    /// Cost of loading a value from a spill slot, at a block frequency of 1.
    fn reload_cost(&self) -> u32;

    /// Estimated cost of executing the operation defining `value` once.
    ///
    /// This is compared against the spill and reload costs when deciding
    /// whether to recompute a value instead of reloading it.
    fn op_estimated_cost(&self, func: &Function, value: Value) -> u32 {
        func.value_cost(value)
    }

    /// Creates an operation storing `value` to memory and schedules it
    /// immediately after `after`.
    ///
    /// The returned operation must produce a [`ValueType::Memory`] value.
    fn new_spill(&self, func: &mut Function, value: Value, after: Value) -> Value {
        let fp = func.frame_pointer();
        let spill = func.create_value(
            func.value_block(after),
            Opcode::Spill,
            ValueType::Memory,
            &[fp, value],
        );
        func.insert_after(spill, after);
        spill
    }

    /// Creates an operation loading `value` back from `spill` and schedules
    /// it immediately before `before`.
    ///
    /// The returned operation must produce a value of the same type as
    /// `value`.
    fn new_reload(&self, func: &mut Function, value: Value, spill: Value, before: Value) -> Value {
        let fp = func.frame_pointer();
        let reload = func.create_value(
            func.value_block(before),
            Opcode::Reload,
            func.value_type(value),
            &[fp, spill],
        );
        func.insert_before(reload, before);
        reload
    }

    /// Marks `value` as a rematerialized copy of another operation.
    fn mark_remat(&self, func: &mut Function, value: Value) {
        func.add_flags(value, ValueFlags::REMAT_CLONE);
    }
}

/// Table-driven [`ArchInfo`] implementation with fixed costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GenericArchInfo {
    /// Cost of a spill, see [`ArchInfo::spill_cost`].
    pub spill_cost: u32,

    /// Cost of a reload, see [`ArchInfo::reload_cost`].
    pub reload_cost: u32,
}

impl GenericArchInfo {
    /// Creates a `GenericArchInfo` with the given costs.
    #[must_use]
    pub fn new(spill_cost: u32, reload_cost: u32) -> Self {
        Self {
            spill_cost,
            reload_cost,
        }
    }
}

impl Default for GenericArchInfo {
    fn default() -> Self {
        Self::new(7, 5)
    }
}

impl ArchInfo for GenericArchInfo {
    fn spill_cost(&self) -> u32 {
        self.spill_cost
    }

    fn reload_cost(&self) -> u32 {
        self.reload_cost
    }
}
