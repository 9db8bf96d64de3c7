//! Spill and reload placement.
//!
//! A [`SpillEnv`] is a ledger of spill and reload requests for a single
//! function. Requests are recorded per value in a `SpillInfo`:
//!
//! - A set of spill points, each a program point after which a copy of the
//!   value must exist in memory. No spill point dominates another one: a new
//!   request dominated by an existing point is dropped, and existing points
//!   dominated by a new request are removed.
//! - A list of reloaders, each a program point before which the value must be
//!   available in a register again.
//!
//! Once all requests are recorded, [`SpillEnv::insert_spills_reloads`] decides
//! for each reloader whether to reload the value or recompute it, emits the
//! operations and restores SSA form.
//!
//! All program points are identified by the scheduled operation at that
//! point: spills are placed after an operation and reloads are placed before
//! one.

use alloc::vec::Vec;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::{SmallVec, smallvec};

use crate::arch::ArchInfo;
use crate::cfg::DominatorTree;
use crate::entity::PrimaryMap;
use crate::function::{Block, Function, Opcode, RegClass, Value, ValueFlags};
use crate::{Options, SpillError, Stats};

mod cost;
mod dominate;
mod materialize;

entity_def! {
    /// Index of a `SpillInfo` in the ledger.
    entity SpillInfoRef(u32, "spillinfo");
}

/// Request for a copy of a value to exist in memory after a program point.
#[derive(Clone, Copy, Debug)]
struct Spill {
    /// Point after which the spill is placed.
    ///
    /// This is `None` for values that are never scheduled: these don't need a
    /// spill slot.
    after: Option<Value>,

    /// The spill operation, once it has been created.
    spill: Option<Value>,
}

/// Request for a value to be available in a register before a program point.
#[derive(Clone, Copy, Debug)]
struct Reloader {
    /// Point before which the value is needed.
    before: Value,

    /// Copy of the value that has already been built by the caller. It is
    /// scheduled before `before` and used instead of a reload.
    forced_copy: Option<Value>,

    /// Cost of rematerializing instead of reloading, relative to a reload.
    ///
    /// Starts at 0, or infinity if rematerialization was disallowed, and is
    /// filled in by the driver.
    remat_cost_delta: f32,
}

/// Ledger entry for one spilled value.
#[derive(Clone, Debug)]
struct SpillInfo {
    value: Value,
    spills: SmallVec<[Spill; 2]>,
    reloaders: Vec<Reloader>,

    /// Cost of the spills of this value, once computed.
    spill_cost: Option<f32>,

    /// Register class all reloads must produce.
    reload_class: Option<RegClass>,

    /// Whether the value is a phi which is spilled as a whole.
    spilled_phi: bool,
}

/// Spill and reload requests for a function.
///
/// The control flow graph of the function must not be changed while the
/// `SpillEnv` exists: the dominator tree is computed once on creation.
pub struct SpillEnv<'a, A: ArchInfo> {
    func: &'a mut Function,
    arch: &'a A,
    options: Options,
    domtree: DominatorTree,
    infos: PrimaryMap<SpillInfoRef, SpillInfo>,
    info_map: HashMap<Value, SpillInfoRef, FxBuildHasher>,

    /// Infos of phis spilled as a whole, in registration order.
    mem_phis: Vec<SpillInfoRef>,

    /// Operations created by the spiller, candidates for dead code removal.
    created: Vec<Value>,

    stats: Stats,
}

impl<'a, A: ArchInfo> SpillEnv<'a, A> {
    /// Creates an empty ledger for `func`.
    pub fn new(func: &'a mut Function, arch: &'a A, options: &Options) -> Self {
        let domtree = DominatorTree::for_function(func);
        Self {
            func,
            arch,
            options: *options,
            domtree,
            infos: PrimaryMap::new(),
            info_map: HashMap::default(),
            mem_phis: Vec::new(),
            created: Vec::new(),
            stats: Stats::default(),
        }
    }

    /// The function being spilled.
    #[must_use]
    pub fn function(&self) -> &Function {
        &*self.func
    }

    /// Dominator tree of the function.
    #[must_use]
    pub fn dominator_tree(&self) -> &DominatorTree {
        &self.domtree
    }

    /// Statistics collected so far.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Current spill points of `value`.
    ///
    /// This is empty for values without spill requests.
    pub fn spill_points(&self, value: Value) -> impl Iterator<Item = Value> + '_ {
        self.info_map
            .get(&value)
            .into_iter()
            .flat_map(move |&info| self.infos[info].spills.iter().filter_map(|spill| spill.after))
    }

    /// Number of reload requests recorded for `value`.
    #[must_use]
    pub fn num_reloaders(&self, value: Value) -> usize {
        self.info_map
            .get(&value)
            .map_or(0, |&info| self.infos[info].reloaders.len())
    }

    /// Returns the ledger entry for `value`, creating it if necessary.
    fn info(&mut self, value: Value) -> SpillInfoRef {
        if let Some(&info) = self.info_map.get(&value) {
            return info;
        }
        let info = self.infos.push(SpillInfo {
            value,
            spills: SmallVec::new(),
            reloaders: Vec::new(),
            spill_cost: None,
            reload_class: None,
            spilled_phi: false,
        });
        self.info_map.insert(value, info);
        info
    }

    /// Requests that `value` be stored to memory after `after`.
    ///
    /// `after` must not be immediately followed by a phi.
    pub fn register_spill(&mut self, value: Value, after: Value) -> Result<(), SpillError> {
        self.check_spillable(value)?;
        if let Some(next) = self.func.sched_next(after) {
            if self.func.is_phi(next) {
                return Err(SpillError::SpillBeforePhi { value, after });
            }
        }
        self.add_spill(value, Some(after));
        Ok(())
    }

    fn check_spillable(&self, value: Value) -> Result<(), SpillError> {
        if self.func.value_flags(value).contains(ValueFlags::DONT_SPILL) {
            return Err(SpillError::DontSpill(value));
        }
        Ok(())
    }

    /// Adds a spill point while keeping the spill points of `value` free of
    /// dominance relations.
    fn add_spill(&mut self, value: Value, after: Option<Value>) {
        let info = self.info(value);
        stat!(self.stats, spill_requests);

        let Some(after) = after else {
            // Unscheduled points are available everywhere.
            self.infos[info].spills = smallvec![Spill { after: None, spill: None }];
            return;
        };
        let func = &*self.func;
        let domtree = &self.domtree;
        let spills = &mut self.infos[info].spills;
        let covered = spills.iter().any(|spill| match spill.after {
            Some(existing) => domtree.value_dominates(func, existing, after),
            None => true,
        });
        if covered {
            trace!("Spill of {value} after {after} is already covered");
            return;
        }
        spills.retain(|spill| match spill.after {
            Some(existing) => !domtree.value_dominates(func, after, existing),
            None => true,
        });
        trace!("Registered spill of {value} after {after}");
        spills.push(Spill {
            after: Some(after),
            spill: None,
        });
    }

    /// Requests that `value` be available in a register of class `class`
    /// before `before`.
    ///
    /// If `allow_remat` is false then the value will always be reloaded from
    /// memory rather than recomputed.
    pub fn register_reload(
        &mut self,
        value: Value,
        before: Value,
        class: RegClass,
        allow_remat: bool,
    ) -> Result<(), SpillError> {
        self.check_spillable(value)?;
        if matches!(self.func.opcode(before), Opcode::Spill | Opcode::Keep) {
            return Err(SpillError::InvalidReloadPoint { value, before });
        }
        let remat_cost_delta = if allow_remat { 0.0 } else { f32::INFINITY };
        self.add_reloader(value, class, Reloader {
            before,
            forced_copy: None,
            remat_cost_delta,
        })
    }

    /// Requests that `value` be available in a register on the control-flow
    /// edge into `block` from its predecessor `pos`.
    pub fn register_reload_on_edge(
        &mut self,
        value: Value,
        block: Block,
        pos: usize,
        class: RegClass,
        allow_remat: bool,
    ) -> Result<(), SpillError> {
        let before = self.block_insertion_point(block, pos)?;
        self.register_reload(value, before, class, allow_remat)
    }

    /// Requests that `value` be available in a register at the end of
    /// `block`, before its terminator.
    pub fn register_reload_at_end(
        &mut self,
        value: Value,
        block: Block,
        class: RegClass,
        allow_remat: bool,
    ) -> Result<(), SpillError> {
        let before = self.end_of_block_insertion_point(block)?;
        self.register_reload(value, before, class, allow_remat)
    }

    /// Registers `rematted`, an unscheduled copy of `value` built by the
    /// caller, to be used before `before` instead of a reload.
    ///
    /// The copy is scheduled immediately before `before` when the spills and
    /// reloads are inserted.
    pub fn register_remat(
        &mut self,
        value: Value,
        before: Value,
        rematted: Value,
    ) -> Result<(), SpillError> {
        debug_assert!(!self.func.is_scheduled(rematted));
        let class = self.func.value_class(rematted).or(self.func.value_class(value));
        let reloader = Reloader {
            before,
            forced_copy: Some(rematted),
            remat_cost_delta: 0.0,
        };
        match class {
            Some(class) => self.add_reloader(value, class, reloader),
            None => {
                let info = self.info(value);
                self.infos[info].reloaders.push(reloader);
                Ok(())
            }
        }
    }

    fn add_reloader(
        &mut self,
        value: Value,
        class: RegClass,
        reloader: Reloader,
    ) -> Result<(), SpillError> {
        // Make sure the operands of a phi have ledger entries so that the
        // phi can later be spilled as a whole.
        if self.func.is_phi(value) {
            for i in 0..self.func.value_operands(value).len() {
                let operand = self.func.value_operands(value)[i];
                self.info(operand);
            }
        }

        let info = self.info(value);
        match self.infos[info].reload_class {
            Some(expected) if expected != class => {
                return Err(SpillError::ReloadClassMismatch {
                    value,
                    expected,
                    found: class,
                });
            }
            Some(_) => {}
            None => self.infos[info].reload_class = Some(class),
        }
        trace!("Registered reload of {value} before {}", reloader.before);
        stat!(self.stats, reload_requests);
        self.infos[info].reloaders.push(reloader);
        Ok(())
    }

    /// Requests that the phi `phi` be replaced by a phi of memory values.
    ///
    /// Each operand of the phi is spilled right after its definition and the
    /// memory phi joins these spills. Reloads of `phi` then load from the
    /// memory phi.
    pub fn spill_phi(&mut self, phi: Value) -> Result<(), SpillError> {
        debug_assert!(self.func.is_phi(phi));
        self.check_spillable(phi)?;
        for &operand in self.func.value_operands(phi) {
            self.check_spillable(operand)?;
        }
        let info = self.info(phi);
        if self.infos[info].spilled_phi {
            return Ok(());
        }
        self.infos[info].spilled_phi = true;
        self.mem_phis.push(info);
        trace!("Spilling {phi} as a whole");

        let block = self.func.value_block(phi);
        for index in 0..self.func.value_operands(phi).len() {
            let operand = self.func.value_operands(phi)[index];
            let after = if self.func.is_scheduled(operand) {
                Some(self.spill_point(operand))
            } else {
                let pred = self.func.block_preds(block)[index];
                let end = self.end_of_block_insertion_point(pred)?;
                self.func.sched_prev(end)
            };
            self.add_spill(operand, after);
        }
        Ok(())
    }

    /// Returns the operation before which code can be inserted at the end of
    /// `block`.
    ///
    /// This is the block terminator, skipping over any keep-alive operations
    /// following it.
    pub fn end_of_block_insertion_point(&self, block: Block) -> Result<Value, SpillError> {
        let mut cursor = self.func.sched_last(block);
        while let Some(inst) = cursor {
            match self.func.opcode(inst) {
                Opcode::Keep => cursor = self.func.sched_prev(inst),
                opcode if opcode.is_terminator() => return Ok(inst),
                _ => break,
            }
        }
        Err(SpillError::MissingTerminator(block))
    }

    /// Returns the operation before which code executed on the edge from the
    /// `pos`-th predecessor of `block` can be inserted.
    ///
    /// For a block with a single predecessor this is the start of the block,
    /// otherwise it is the end of the predecessor.
    pub fn block_insertion_point(&self, block: Block, pos: usize) -> Result<Value, SpillError> {
        let preds = self.func.block_preds(block);
        if preds.len() == 1 {
            let first = self
                .func
                .sched_first(block)
                .ok_or(SpillError::MissingTerminator(block))?;
            debug_assert!(!self.func.is_phi(first));
            return Ok(first);
        }
        self.end_of_block_insertion_point(preds[pos])
    }
}
