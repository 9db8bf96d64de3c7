//! SSA reconstruction.
//!
//! After spilling, a value may have several definitions: the original one and
//! any number of reloaded or rematerialized copies. [`SsaBuilder`] rewrites the
//! uses of the original value so that each use refers to the definition which
//! reaches it, inserting phis at control-flow merge points where different
//! definitions meet.
//!
//! The search for a reaching definition walks backwards from each use: first
//! within the block of the use, then through predecessor blocks. Results are
//! cached per block, so the total work is linear in the number of blocks
//! visited. Phis are only created in blocks with multiple predecessors, and a
//! phi is cached before its operands are resolved so that loops terminate.
//! Phis which turn out to merge a single definition are removed once all uses
//! have been rewritten.

use alloc::vec::Vec;

use hashbrown::HashSet;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::Stats;
use crate::SpillError;
use crate::entity::{EntitySet, PackedOption, SecondaryMap};
use crate::function::{Block, Function, Opcode, Use, Value, ValueType};

/// Rewrites uses of a value which has been given multiple definitions.
#[derive(Default)]
pub struct SsaBuilder {
    /// Value whose uses are being rewritten.
    value: PackedOption<Value>,

    /// Type of the phis to create.
    ty: ValueType,

    /// All definitions, including phis created during reconstruction.
    defs: HashSet<Value, FxBuildHasher>,

    /// Blocks containing at least one definition.
    def_blocks: EntitySet<Block>,

    /// Definition reaching the start of each block.
    begin: SecondaryMap<Block, PackedOption<Value>>,

    /// Definition reaching the end of each block.
    end: SecondaryMap<Block, PackedOption<Value>>,

    /// Blocks currently being resolved through their single predecessor.
    ///
    /// Revisiting one of these means that we are going around a cycle with
    /// no merge point, which can only happen in unreachable code.
    visiting: EntitySet<Block>,

    /// Phis created so far.
    phis: Vec<Value>,
}

impl SsaBuilder {
    /// Creates an empty `SsaBuilder`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares for a new reconstruction of a value of type `ty`.
    pub fn reset(&mut self, func: &Function, ty: ValueType) {
        self.value = None.into();
        self.ty = ty;
        self.defs.clear();
        self.def_blocks.clear_and_resize(func.num_blocks());
        self.begin.clear_and_resize(func.num_blocks());
        self.end.clear_and_resize(func.num_blocks());
        self.visiting.clear_and_resize(func.num_blocks());
        self.phis.clear();
    }

    /// Registers a scheduled definition of the value.
    pub fn add_def(&mut self, func: &Function, def: Value) {
        debug_assert!(func.is_scheduled(def) || func.opcode(def).is_unscheduled());
        self.defs.insert(def);
        if func.is_scheduled(def) {
            self.def_blocks.insert(func.value_block(def));
        }
    }

    /// Phis inserted since the last reset.
    #[must_use]
    pub fn inserted_phis(&self) -> &[Value] {
        &self.phis
    }

    /// Rewrites every use of `value` to refer to the definition reaching it.
    ///
    /// Each use edge is handled independently, so an operation using `value`
    /// several times gets all of its operands rewritten. Uses by keep-alive
    /// operations are left untouched.
    pub fn fix_users(
        &mut self,
        func: &mut Function,
        value: Value,
        stats: &mut Stats,
    ) -> Result<(), SpillError> {
        self.value = value.into();
        let first_phi = self.phis.len();
        let users: SmallVec<[Use; 8]> = func.value_users(value).into();
        for u in users {
            if func.opcode(u.user) == Opcode::Keep {
                continue;
            }
            let def = if func.is_phi(u.user) {
                let pred = func.block_preds(func.value_block(u.user))[u.index];
                self.def_at_end(func, pred)?
            } else {
                self.def_before(func, u.user)?
            };
            if def != value {
                trace!("Rewriting use {} of {value} in {} to {def}", u.index, u.user);
                func.set_operand(u.user, u.index, def);
                stat!(stats, rewritten_uses);
            }
        }

        self.remove_trivial_phis(func, first_phi);
        stat!(stats, ssa_phis, self.phis.len() - first_phi);
        Ok(())
    }

    /// Removes the phis inserted from `first` onwards whose operands, apart
    /// from the phi itself, are all the same definition. Uses of such a phi
    /// are redirected to that definition.
    ///
    /// The per-block caches may refer to removed phis afterwards, so this must
    /// only run once all uses are rewritten.
    fn remove_trivial_phis(&mut self, func: &mut Function, first: usize) {
        let mut worklist: SmallVec<[Value; 8]> = self.phis[first..].iter().copied().collect();
        while let Some(phi) = worklist.pop() {
            if !func.is_scheduled(phi) {
                continue;
            }
            let mut same = None;
            let mut trivial = true;
            for &operand in func.value_operands(phi) {
                if operand == phi || Some(operand) == same {
                    continue;
                }
                if same.is_some() {
                    trivial = false;
                    break;
                }
                same = Some(operand);
            }
            let (true, Some(same)) = (trivial, same) else {
                continue;
            };

            trace!("Removing trivial {phi}, replaced with {same}");
            // Removing this phi may make phis using it trivial too.
            for u in func.value_users(phi) {
                if u.user != phi && self.phis[first..].contains(&u.user) {
                    worklist.push(u.user);
                }
            }
            func.replace_all_uses(phi, same);
            func.remove_from_schedule(phi);
            self.defs.remove(&phi);
        }
        self.phis.retain(|&phi| func.is_scheduled(phi));
    }

    /// Definition reaching `user`, which is not a phi.
    fn def_before(&mut self, func: &mut Function, user: Value) -> Result<Value, SpillError> {
        let block = func.value_block(user);
        if self.def_blocks.contains(block) {
            let mut cursor = func.sched_prev(user);
            while let Some(inst) = cursor {
                if self.defs.contains(&inst) {
                    return Ok(inst);
                }
                cursor = func.sched_prev(inst);
            }
        }
        self.def_at_begin(func, block)
    }

    /// Definition reaching the end of `block`.
    fn def_at_end(&mut self, func: &mut Function, block: Block) -> Result<Value, SpillError> {
        if let Some(def) = self.end[block].expand() {
            return Ok(def);
        }
        let mut found = None;
        if self.def_blocks.contains(block) {
            let mut cursor = func.sched_last(block);
            while let Some(inst) = cursor {
                if self.defs.contains(&inst) {
                    found = Some(inst);
                    break;
                }
                cursor = func.sched_prev(inst);
            }
        }
        let def = match found {
            Some(def) => def,
            None => self.def_at_begin(func, block)?,
        };
        self.end[block] = def.into();
        Ok(def)
    }

    /// Definition reaching the start of `block`, creating a phi if the block
    /// is a merge point.
    fn def_at_begin(&mut self, func: &mut Function, block: Block) -> Result<Value, SpillError> {
        if let Some(def) = self.begin[block].expand() {
            return Ok(def);
        }
        let value = self.value.expand().expect("no value being reconstructed");
        let num_preds = func.block_preds(block).len();
        let def = match num_preds {
            // Values which are never scheduled are available everywhere.
            0 if func.opcode(value).is_unscheduled() => value,
            0 => return Err(SpillError::NoReachingDefinition { value, block }),
            1 => {
                if !self.visiting.insert(block) {
                    return Err(SpillError::NoReachingDefinition { value, block });
                }
                let pred = func.block_preds(block)[0];
                let def = self.def_at_end(func, pred);
                self.visiting.remove(block);
                def?
            }
            _ => {
                let unknown = func.unknown();
                let placeholders: SmallVec<[Value; 4]> = (0..num_preds).map(|_| unknown).collect();
                let phi = func.create_value(block, Opcode::Phi, self.ty, &placeholders);
                func.insert_at_block_start(phi, block);
                trace!("Inserted {phi} in {block} for {value}");
                self.phis.push(phi);
                self.defs.insert(phi);
                self.def_blocks.insert(block);
                self.begin[block] = phi.into();

                for index in 0..num_preds {
                    let pred = func.block_preds(block)[index];
                    let incoming = self.def_at_end(func, pred)?;
                    func.set_operand(phi, index, incoming);
                }
                phi
            }
        };
        self.begin[block] = def.into();
        Ok(def)
    }
}
