//! Spill, reload and rematerialization costs.
//!
//! Costs of operations are given by the [`ArchInfo`] and scaled by the
//! execution frequency of the block they are placed in.

use smallvec::smallvec;

use super::{Spill, SpillEnv, SpillInfoRef};
use crate::SpillError;
use crate::arch::ArchInfo;
use crate::function::{Block, Opcode, Value, ValueFlags};

impl<A: ArchInfo> SpillEnv<'_, A> {
    /// Returns the cost of spilling `value` with the currently registered
    /// spill points.
    ///
    /// The cost is computed once and then fixed: later calls return the same
    /// value even if more spill points are registered.
    pub fn spill_cost(&mut self, value: Value) -> f32 {
        let info = self.info(value);
        self.determine_spill_costs(info)
    }

    /// Computes the spill cost of a ledger entry and settles its spill points.
    ///
    /// If the registered spill points are executed less often in total than
    /// the definition of the value, they are kept. Otherwise they are replaced
    /// with a single spill right after the definition.
    pub(super) fn determine_spill_costs(&mut self, info: SpillInfoRef) -> f32 {
        if let Some(cost) = self.infos[info].spill_cost {
            return cost;
        }
        stat!(self.stats, spill_cost_computations);
        let value = self.infos[info].value;
        let spill_cost = self.arch.spill_cost() as f32;

        // Values that are never scheduled are available everywhere and don't
        // need to be stored anywhere.
        if !self.func.is_scheduled(value) {
            let no_mem = self.func.no_mem();
            let info = &mut self.infos[info];
            info.spills = smallvec![Spill {
                after: None,
                spill: Some(no_mem),
            }];
            info.spill_cost = Some(0.0);
            trace!("Spill cost of {value}: 0 (not scheduled)");
            return 0.0;
        }

        let def_freq = self.func.block_frequency(self.func.value_block(value));
        if self.infos[info].spilled_phi {
            let cost = def_freq * spill_cost;
            self.infos[info].spill_cost = Some(cost);
            trace!("Spill cost of {value}: {cost} (spilled phi)");
            return cost;
        }

        if !self.infos[info].spills.is_empty() {
            let spills_freq: f32 = self.infos[info]
                .spills
                .iter()
                .map(|spill| {
                    let block = match spill.after {
                        Some(after) => self.func.value_block(after),
                        None => self.func.value_block(value),
                    };
                    self.func.block_frequency(block)
                })
                .sum();
            if spills_freq < def_freq {
                let cost = spills_freq * spill_cost;
                self.infos[info].spill_cost = Some(cost);
                trace!("Spill cost of {value}: {cost} (late spills)");
                return cost;
            }
        }

        let after = self.spill_point(value);
        let cost = def_freq * spill_cost;
        let info = &mut self.infos[info];
        info.spills = smallvec![Spill {
            after: Some(after),
            spill: None,
        }];
        info.spill_cost = Some(cost);
        trace!("Spill cost of {value}: {cost} (spill after {after})");
        cost
    }

    /// Returns the point after which a spill of `value` at its definition is
    /// placed: the definition itself, skipping any following phis and
    /// keep-alives.
    pub(super) fn spill_point(&self, value: Value) -> Value {
        let mut point = value;
        while let Some(next) = self.func.sched_next(point) {
            if !matches!(self.func.opcode(next), Opcode::Phi | Opcode::Keep) {
                break;
            }
            point = next;
        }
        point
    }

    /// Whether `value` can be used anywhere without being rematerialized.
    pub(super) fn is_value_available(&self, value: Value) -> bool {
        match self.func.opcode(value) {
            Opcode::Unknown | Opcode::NoMem | Opcode::FramePointer => true,
            Opcode::Spill | Opcode::Reload => true,
            _ => self.func.value_flags(value).contains(ValueFlags::IGNORE),
        }
    }

    /// Returns the cost of recomputing `value` before `before`, not weighted
    /// by block frequency.
    ///
    /// Returns `None` if `value` can't be rematerialized there, or if doing so
    /// would cost at least as much as spilling and reloading it.
    ///
    /// At most one operand which is not available everywhere may be
    /// recomputed along with the value. This limits the increase in register
    /// pressure.
    #[must_use]
    pub fn remat_cost(&self, value: Value, before: Value) -> Option<u32> {
        self.remat_cost_within(value, before, 0)
    }

    fn remat_cost_within(&self, value: Value, before: Value, parent_cost: u32) -> Option<u32> {
        let flags = self.func.value_flags(value);
        if !flags.contains(ValueFlags::REMATERIALIZABLE) {
            trace!("Can't remat {value} before {before}: not rematerializable");
            return None;
        }
        if flags.contains(ValueFlags::MODIFIES_FLAGS) {
            trace!("Can't remat {value} before {before}: modifies flags");
            return None;
        }

        let limit = self.arch.spill_cost().saturating_add(self.arch.reload_cost());
        let mut cost = self.arch.op_estimated_cost(&*self.func, value);
        if parent_cost.saturating_add(cost) >= limit {
            trace!("Can't remat {value} before {before}: too expensive");
            return None;
        }

        let mut unavailable = 0;
        for &operand in self.func.value_operands(value) {
            if self.is_value_available(operand) {
                continue;
            }
            unavailable += 1;
            if unavailable > 1 {
                trace!("Can't remat {value} before {before}: too many unavailable operands");
                return None;
            }
            let operand_cost =
                self.remat_cost_within(operand, before, parent_cost.saturating_add(cost))?;
            cost = cost.saturating_add(operand_cost);
            if parent_cost.saturating_add(cost) >= limit {
                trace!("Can't remat {value} before {before}: operands too expensive");
                return None;
            }
        }
        Some(cost)
    }

    /// Returns the cost of making `value` available before `before`, weighted
    /// by the frequency of the block containing `before`.
    ///
    /// This is the cheaper of a reload and, if enabled, rematerialization.
    #[must_use]
    pub fn reload_cost(&self, value: Value, before: Value) -> f32 {
        let freq = self.func.block_frequency(self.func.value_block(before));
        self.reload_cost_unweighted(value, before) as f32 * freq
    }

    /// Same as [`SpillEnv::reload_cost`] but without frequency weighting.
    #[must_use]
    pub fn reload_cost_unweighted(&self, value: Value, before: Value) -> u32 {
        let reload_cost = self.arch.reload_cost();
        if self.options.rematerialize {
            if let Some(cost) = self.remat_cost(value, before) {
                return cost.min(reload_cost);
            }
        }
        reload_cost
    }

    /// Returns the cost of making `value` available on the edge into `block`
    /// from its `pos`-th predecessor.
    pub fn reload_cost_on_edge(
        &self,
        value: Value,
        block: Block,
        pos: usize,
    ) -> Result<f32, SpillError> {
        let before = self.block_insertion_point(block, pos)?;
        Ok(self.reload_cost(value, before))
    }

    /// Whether `value` can be recomputed before `before` more cheaply than
    /// spilling and reloading it.
    #[must_use]
    pub fn is_rematerializable(&self, value: Value, before: Value) -> bool {
        self.remat_cost(value, before).is_some()
    }
}
