//! Emission of spill, reload and rematerialization operations.

use alloc::vec::Vec;
use core::mem;

use smallvec::{SmallVec, smallvec};

use super::{Spill, SpillEnv, SpillInfoRef};
use crate::arch::ArchInfo;
use crate::debug_utils::DisplayFunction;
use crate::function::{Opcode, Value, ValueFlags, ValueType};
use crate::ssa::SsaBuilder;
use crate::{SpillError, Stats};

impl<A: ArchInfo> SpillEnv<'_, A> {
    /// Inserts all the spills, reloads and rematerializations requested so far
    /// into the function and restores SSA form.
    ///
    /// For each reload request, the value is either recomputed (if that is
    /// cheaper than a reload) or loaded from a spill slot. If recomputing the
    /// value at every reload request is cheaper overall than spilling it at
    /// all, then no spill is emitted for that value.
    ///
    /// Returns the statistics collected over the lifetime of the `SpillEnv`.
    pub fn insert_spills_reloads(mut self) -> Result<Stats, SpillError> {
        trace!("Input function:\n{}", DisplayFunction(self.func));

        // Memory phis come first so that reloads of spilled phis find them.
        // Operands are wired in a second pass since a spilled phi may use
        // another spilled phi.
        for i in 0..self.mem_phis.len() {
            let info = self.mem_phis[i];
            self.create_mem_phi(info);
        }
        for i in 0..self.mem_phis.len() {
            let info = self.mem_phis[i];
            self.wire_mem_phi(info);
        }

        let mut ssa = SsaBuilder::new();
        let mut copies = Vec::new();
        for info in self.infos.keys() {
            let value = self.infos[info].value;
            trace!("Handling reloads of {value}");
            let spill_cost = self.determine_spill_costs(info);
            let force_remat = self.options.rematerialize && self.should_force_remat(info, spill_cost);

            copies.clear();
            let reloaders = mem::take(&mut self.infos[info].reloaders);
            for reloader in &reloaders {
                let copy = if let Some(copy) = reloader.forced_copy {
                    self.func.insert_before(copy, reloader.before);
                    self.created.push(copy);
                    copy
                } else if self.options.rematerialize
                    && (force_remat || reloader.remat_cost_delta < 0.0)
                {
                    stat!(self.stats, remats);
                    self.materialize_remat(value, reloader.before)
                } else {
                    self.spill_node(info);
                    let Some(spill) = self.infos[info].spills[0].spill else {
                        unreachable!();
                    };
                    let reload = self.arch.new_reload(self.func, value, spill, reloader.before);
                    trace!("Reloaded {value} from {spill} as {reload} before {}", reloader.before);
                    stat!(self.stats, reloads);
                    self.created.push(reload);
                    reload
                };
                copies.push(copy);
            }

            if !copies.is_empty() {
                ssa.reset(self.func, self.func.value_type(value));
                ssa.add_def(self.func, value);
                for &copy in &copies {
                    ssa.add_def(self.func, copy);
                }
                ssa.fix_users(self.func, value, &mut self.stats)?;
                self.created.extend_from_slice(ssa.inserted_phis());
            }

            // Reloads all refer to the first spill. With several spills these
            // uses need the same treatment as uses of the value itself.
            let spills: SmallVec<[Value; 2]> = self.infos[info]
                .spills
                .iter()
                .filter_map(|spill| spill.spill)
                .collect();
            if spills.len() > 1 {
                ssa.reset(self.func, ValueType::Memory);
                for &spill in &spills {
                    ssa.add_def(self.func, spill);
                }
                ssa.fix_users(self.func, spills[0], &mut self.stats)?;
                self.created.extend_from_slice(ssa.inserted_phis());
            }
        }

        if self.options.prune_dead_copies {
            self.prune_dead_copies();
        }

        trace!("Output function:\n{}", DisplayFunction(self.func));
        trace!("{}", self.stats);
        Ok(self.stats)
    }

    /// Computes the rematerialization cost of each reloader and returns
    /// whether rematerializing at all of them is cheaper than spilling.
    fn should_force_remat(&mut self, info: SpillInfoRef, spill_cost: f32) -> bool {
        let value = self.infos[info].value;
        let reloaders = &self.infos[info].reloaders;
        if reloaders.iter().all(|reloader| reloader.forced_copy.is_some()) {
            return false;
        }
        let reload_cost = self.arch.reload_cost() as f32;
        let mut all_remat_costs = 0.0f32;
        for i in 0..self.infos[info].reloaders.len() {
            let reloader = self.infos[info].reloaders[i];
            if reloader.forced_copy.is_some() {
                continue;
            }
            if reloader.remat_cost_delta == f32::INFINITY {
                all_remat_costs = f32::INFINITY;
                continue;
            }
            let Some(remat_cost) = self.remat_cost(value, reloader.before) else {
                self.infos[info].reloaders[i].remat_cost_delta = f32::INFINITY;
                all_remat_costs = f32::INFINITY;
                continue;
            };
            let delta = remat_cost as f32 - reload_cost;
            self.infos[info].reloaders[i].remat_cost_delta = delta;
            let freq = self.func.block_frequency(self.func.value_block(reloader.before));
            all_remat_costs += delta * freq;
        }

        if all_remat_costs == f32::INFINITY {
            return false;
        }
        let force = all_remat_costs - spill_cost < 0.0;
        if force {
            trace!("Remat of {value} at all reloads ({all_remat_costs}) is cheaper than spilling ({spill_cost})");
            stat!(self.stats, forced_remats);
        }
        force
    }

    /// Creates the spill operations for all the spill points of a value that
    /// don't have one yet.
    fn spill_node(&mut self, info: SpillInfoRef) {
        let value = self.infos[info].value;
        for i in 0..self.infos[info].spills.len() {
            let spill = self.infos[info].spills[i];
            if spill.spill.is_some() {
                continue;
            }
            let new = match spill.after {
                Some(after) => {
                    let new = self.arch.new_spill(self.func, value, after);
                    trace!("Spilled {value} after {after} as {new}");
                    stat!(self.stats, spills);
                    self.created.push(new);
                    new
                }
                None => self.func.no_mem(),
            };
            self.infos[info].spills[i].spill = Some(new);
        }
    }

    /// Recomputes `value` immediately before `before`, along with its operand
    /// which is not available there, if any.
    fn materialize_remat(&mut self, value: Value, before: Value) -> Value {
        let block = self.func.value_block(before);
        let copy = self.func.clone_value(value, block);
        for index in 0..self.func.value_operands(copy).len() {
            let operand = self.func.value_operands(copy)[index];
            if !self.is_value_available(operand) {
                let operand_copy = self.materialize_remat(operand, before);
                self.func.set_operand(copy, index, operand_copy);
            }
        }
        self.func.insert_before(copy, before);
        self.arch.mark_remat(self.func, copy);
        self.created.push(copy);
        trace!("Rematerialized {value} as {copy} before {before}");
        copy
    }

    /// Creates the memory phi replacing a spilled phi, with placeholder
    /// operands.
    fn create_mem_phi(&mut self, info: SpillInfoRef) {
        let phi = self.infos[info].value;
        let block = self.func.value_block(phi);
        let arity = self.func.value_operands(phi).len();

        let unknown = self.func.unknown();
        let placeholders: SmallVec<[Value; 4]> = smallvec![unknown; arity];
        let mem_phi = self
            .func
            .create_value(block, Opcode::Phi, ValueType::Memory, &placeholders);
        self.func.insert_at_block_start(mem_phi, block);
        self.created.push(mem_phi);
        trace!("Spilled {phi} as memory phi {mem_phi}");
        stat!(self.stats, spilled_phis);

        let after = self.spill_point(phi);
        self.infos[info].spills = smallvec![Spill {
            after: Some(after),
            spill: Some(mem_phi),
        }];
    }

    /// Points each operand of a memory phi at the spill of the corresponding
    /// operand of the original phi.
    fn wire_mem_phi(&mut self, info: SpillInfoRef) {
        let phi = self.infos[info].value;
        let Some(mem_phi) = self.infos[info].spills[0].spill else {
            unreachable!();
        };
        for index in 0..self.func.value_operands(phi).len() {
            let operand = self.func.value_operands(phi)[index];
            let operand_info = self.info(operand);
            self.determine_spill_costs(operand_info);
            self.spill_node(operand_info);
            let Some(spill) = self.infos[operand_info].spills[0].spill else {
                unreachable!();
            };
            self.func.set_operand(mem_phi, index, spill);
        }
    }

    /// Removes operations which became dead as a result of spilling.
    fn prune_dead_copies(&mut self) {
        let mut worklist: Vec<Value> = mem::take(&mut self.created);
        worklist.extend(self.infos.iter().map(|(_, info)| info.value));
        while let Some(value) = worklist.pop() {
            if !self.func.is_scheduled(value)
                || !self.func.value_users(value).is_empty()
                || !self.is_prunable(value)
            {
                continue;
            }
            trace!("Removing dead {value}");
            let operands: SmallVec<[Value; 4]> = self.func.value_operands(value).into();
            self.func.remove_from_schedule(value);
            stat!(self.stats, dead_copies_pruned);
            worklist.extend(operands);
        }
    }

    /// Whether `value` can be removed from the schedule once it has no users.
    fn is_prunable(&self, value: Value) -> bool {
        match self.func.opcode(value) {
            Opcode::Phi | Opcode::Spill | Opcode::Reload => true,
            Opcode::Inst => self
                .func
                .value_flags(value)
                .intersects(ValueFlags::REMATERIALIZABLE | ValueFlags::REMAT_CLONE),
            _ => false,
        }
    }
}
