//! The [`Function`] type which describes the program being spilled.
//!
//! # Control flow graph
//!
//! A function is a set of basic blocks connected by control-flow edges. Each
//! block has an ordered list of predecessors and successors, and an estimated
//! execution frequency which is used to weight the cost of spill, reload and
//! rematerialization code placed in that block.
//!
//! The first block created is the entry block. It may not have any
//! predecessors.
//!
//! # Values and the schedule
//!
//! Every operation in the function is identified by a [`Value`]: the operation
//! produces at most one result and that result is referred to by the same
//! handle. Operations without a result (terminators, keep-alives) have a
//! [`ValueType::None`] type.
//!
//! Operations inside a block are totally ordered by the block's schedule, which
//! is an intrusive doubly-linked list. [`Opcode::Phi`] operations must come
//! first in a block and have exactly one operand per predecessor, in
//! predecessor order. Terminators come last, optionally followed by
//! [`Opcode::Keep`] operations which only exist to keep values alive.
//!
//! A few special values are never scheduled: the frame pointer, the "no
//! memory" value used as the spill of values which don't need to be stored,
//! and an "unknown" placeholder. These are considered to be available
//! everywhere.
//!
//! # SSA form
//!
//! The function must be in SSA form: every value is defined exactly once and
//! its definition dominates all of its uses. The users of each value are
//! tracked explicitly so that uses can be rewritten efficiently.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;
use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::entity::{Keys, PackedOption, PrimaryMap};

entity_def! {
    /// An opaque reference to a basic block in the function.
    pub entity Block(u32, "block");

    /// An operation in the function, and the value it produces.
    pub entity Value(u32, "%");

    /// A register class which values can be assigned to.
    ///
    /// Register classes are opaque to the spiller: they are only compared for
    /// equality and passed on to the architecture hooks.
    pub entity RegClass(u32, "class");

    /// An interned operation name, e.g. `add` or `const`.
    pub entity Mnemonic(u32, "mnemonic");
}

impl Block {
    /// The entry block is always the first block created.
    pub const ENTRY_BLOCK: Block = Block(0);
}

/// Result type of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueType {
    /// The operation doesn't produce a value.
    #[default]
    None,

    /// The operation produces a value in a register of the given class.
    Reg(RegClass),

    /// The operation produces a memory value, e.g. a spill slot.
    Memory,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ValueType::None => write!(f, "none"),
            ValueType::Reg(class) => write!(f, "{class}"),
            ValueType::Memory => write!(f, "mem"),
        }
    }
}

/// Kind of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Opcode {
    /// A generic operation, described by its mnemonic and flags.
    Inst,

    /// Join of one incoming value per predecessor block.
    Phi,

    /// Stores its second operand to a spill slot, producing a memory value.
    Spill,

    /// Loads a value from the spill slot given by its second operand.
    Reload,

    /// Keeps its operands alive until the end of the block.
    Keep,

    /// Unconditional jump to the only successor.
    Jump,

    /// Conditional branch to one of the successors.
    Branch,

    /// Return from the function.
    Return,

    /// The frame pointer. Never scheduled.
    FramePointer,

    /// Memory value for values which don't need a spill slot. Never scheduled.
    NoMem,

    /// Placeholder for a value that isn't known. Never scheduled.
    Unknown,
}

impl Opcode {
    /// Whether this operation transfers control flow and must end a block.
    #[inline]
    #[must_use]
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Branch | Opcode::Return)
    }

    /// Whether this is one of the special values that are never scheduled.
    #[inline]
    #[must_use]
    pub fn is_unscheduled(self) -> bool {
        matches!(
            self,
            Opcode::FramePointer | Opcode::NoMem | Opcode::Unknown
        )
    }

    /// Textual name of the opcode, as used by the text format.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Inst => "inst",
            Opcode::Phi => "phi",
            Opcode::Spill => "spill",
            Opcode::Reload => "reload",
            Opcode::Keep => "keep",
            Opcode::Jump => "jump",
            Opcode::Branch => "branch",
            Opcode::Return => "ret",
            Opcode::FramePointer => "frame",
            Opcode::NoMem => "nomem",
            Opcode::Unknown => "unknown",
        }
    }
}

bitflags! {
    /// Properties of an operation which are relevant for spilling.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ValueFlags: u8 {
        /// The operation can be recomputed instead of being reloaded.
        const REMATERIALIZABLE = 1 << 0;

        /// The operation clobbers the machine flags.
        const MODIFIES_FLAGS = 1 << 1;

        /// The value must never be spilled.
        const DONT_SPILL = 1 << 2;

        /// The value lives in a pinned register which is always available.
        const IGNORE = 1 << 3;

        /// The operation is a copy created by rematerialization.
        const REMAT_CLONE = 1 << 4;
    }
}

/// A use of a value: operand `index` of the operation `user`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Use {
    /// The operation using the value.
    pub user: Value,

    /// Index of the operand in `user`.
    pub index: usize,
}

/// Description of a new generic operation for [`Function::append_inst`].
#[derive(Clone, Copy, Debug)]
pub struct InstDesc<'a> {
    /// Mnemonic of the operation.
    pub name: &'a str,

    /// Result type of the operation.
    pub ty: ValueType,

    /// Operands of the operation.
    pub operands: &'a [Value],

    /// Spill-related properties.
    pub flags: ValueFlags,

    /// Estimated cost of executing the operation once, used when comparing
    /// rematerialization against reloading.
    pub cost: u32,
}

impl<'a> InstDesc<'a> {
    /// Creates a description of an operation with no result, no operands and
    /// a cost of 1.
    #[must_use]
    pub fn new(name: &'a str) -> Self {
        Self {
            name,
            ty: ValueType::None,
            operands: &[],
            flags: ValueFlags::empty(),
            cost: 1,
        }
    }

    /// Sets the result type to a register of `class`.
    #[must_use]
    pub fn class(mut self, class: RegClass) -> Self {
        self.ty = ValueType::Reg(class);
        self
    }

    /// Sets the result type.
    #[must_use]
    pub fn ty(mut self, ty: ValueType) -> Self {
        self.ty = ty;
        self
    }

    /// Sets the operands.
    #[must_use]
    pub fn operands(mut self, operands: &'a [Value]) -> Self {
        self.operands = operands;
        self
    }

    /// Sets the flags.
    #[must_use]
    pub fn flags(mut self, flags: ValueFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the estimated cost.
    #[must_use]
    pub fn cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }
}

#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct BlockData {
    preds: SmallVec<[Block; 4]>,
    succs: SmallVec<[Block; 2]>,
    frequency: f32,
    first: PackedOption<Value>,
    last: PackedOption<Value>,
}

#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct ValueData {
    opcode: Opcode,
    mnemonic: PackedOption<Mnemonic>,
    ty: ValueType,
    block: Block,
    operands: SmallVec<[Value; 4]>,
    users: Vec<Use>,
    flags: ValueFlags,
    cost: u32,
    scheduled: bool,
    prev: PackedOption<Value>,
    next: PackedOption<Value>,
}

/// A function in SSA form with an explicit schedule for each block.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    blocks: PrimaryMap<Block, BlockData>,
    values: PrimaryMap<Value, ValueData>,
    mnemonics: PrimaryMap<Mnemonic, String>,
    mnemonic_map: HashMap<String, Mnemonic, FxBuildHasher>,
    frame_pointer: PackedOption<Value>,
    no_mem: PackedOption<Value>,
    unknown: PackedOption<Value>,
}

impl Default for Function {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&crate::debug_utils::DisplayFunction(self), f)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&crate::debug_utils::DisplayFunction(self), f)
    }
}

/// Iterator over the scheduled operations of a block.
pub struct BlockInsts<'a> {
    func: &'a Function,
    next: Option<Value>,
}

impl Iterator for BlockInsts<'_> {
    type Item = Value;

    #[inline]
    fn next(&mut self) -> Option<Value> {
        let value = self.next?;
        self.next = self.func.sched_next(value);
        Some(value)
    }
}

impl Function {
    /// Creates an empty function.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: PrimaryMap::new(),
            values: PrimaryMap::new(),
            mnemonics: PrimaryMap::new(),
            mnemonic_map: HashMap::default(),
            frame_pointer: None.into(),
            no_mem: None.into(),
            unknown: None.into(),
        }
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Adds a new empty block with the given execution frequency.
    pub fn add_block(&mut self, frequency: f32) -> Block {
        debug_assert!(frequency >= 0.0);
        self.blocks.push(BlockData {
            preds: SmallVec::new(),
            succs: SmallVec::new(),
            frequency,
            first: None.into(),
            last: None.into(),
        })
    }

    /// Adds a control-flow edge from `from` to `to`.
    ///
    /// The edge becomes the last predecessor of `to`, which determines the
    /// operand index used by phis in `to`.
    pub fn add_edge(&mut self, from: Block, to: Block) {
        assert_ne!(to, Block::ENTRY_BLOCK, "the entry block can't have predecessors");
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    /// Returns the interned mnemonic for `name`.
    pub fn intern(&mut self, name: &str) -> Mnemonic {
        if let Some(&mnemonic) = self.mnemonic_map.get(name) {
            return mnemonic;
        }
        let mnemonic = self.mnemonics.push(name.into());
        self.mnemonic_map.insert(name.into(), mnemonic);
        mnemonic
    }

    /// Appends a generic operation at the end of `block`.
    pub fn append_inst(&mut self, block: Block, desc: InstDesc<'_>) -> Value {
        let mnemonic = self.intern(desc.name);
        let value = self.create_value(block, Opcode::Inst, desc.ty, desc.operands);
        let data = &mut self.values[value];
        data.mnemonic = mnemonic.into();
        data.flags = desc.flags;
        data.cost = desc.cost;
        self.append(block, value);
        value
    }

    /// Appends an operation with the given opcode at the end of `block`.
    ///
    /// Phis are inserted after the existing phis of the block instead.
    pub fn append_op(
        &mut self,
        block: Block,
        opcode: Opcode,
        ty: ValueType,
        operands: &[Value],
    ) -> Value {
        assert!(!opcode.is_unscheduled(), "{} can't be scheduled", opcode.name());
        let value = self.create_value(block, opcode, ty, operands);
        if opcode == Opcode::Phi {
            self.insert_at_block_start(value, block);
        } else {
            self.append(block, value);
        }
        value
    }

    /// Appends a phi at the start of `block`, after any existing phis.
    pub fn append_phi(&mut self, block: Block, ty: ValueType, operands: &[Value]) -> Value {
        self.append_op(block, Opcode::Phi, ty, operands)
    }

    /// Appends a keep-alive of `operands` at the end of `block`.
    pub fn append_keep(&mut self, block: Block, operands: &[Value]) -> Value {
        self.append_op(block, Opcode::Keep, ValueType::None, operands)
    }

    /// Appends an unconditional jump at the end of `block`.
    pub fn append_jump(&mut self, block: Block) -> Value {
        self.append_op(block, Opcode::Jump, ValueType::None, &[])
    }

    /// Appends a conditional branch on `operands` at the end of `block`.
    pub fn append_branch(&mut self, block: Block, operands: &[Value]) -> Value {
        self.append_op(block, Opcode::Branch, ValueType::None, operands)
    }

    /// Appends a return of `operands` at the end of `block`.
    pub fn append_return(&mut self, block: Block, operands: &[Value]) -> Value {
        self.append_op(block, Opcode::Return, ValueType::None, operands)
    }

    /// Returns the frame pointer, creating it if necessary.
    pub fn frame_pointer(&mut self) -> Value {
        if let Some(value) = self.frame_pointer.expand() {
            return value;
        }
        let value = self.create_value(
            Block::ENTRY_BLOCK,
            Opcode::FramePointer,
            ValueType::None,
            &[],
        );
        self.frame_pointer = value.into();
        value
    }

    /// Returns the "no memory" value, creating it if necessary.
    pub fn no_mem(&mut self) -> Value {
        if let Some(value) = self.no_mem.expand() {
            return value;
        }
        let value = self.create_value(Block::ENTRY_BLOCK, Opcode::NoMem, ValueType::Memory, &[]);
        self.no_mem = value.into();
        value
    }

    /// Returns the "unknown" placeholder value, creating it if necessary.
    pub fn unknown(&mut self) -> Value {
        if let Some(value) = self.unknown.expand() {
            return value;
        }
        let value = self.create_value(Block::ENTRY_BLOCK, Opcode::Unknown, ValueType::None, &[]);
        self.unknown = value.into();
        value
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Number of blocks in the function.
    #[inline]
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of values ever created in the function, including ones that
    /// have since been removed from the schedule.
    #[inline]
    #[must_use]
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Iterates over all blocks.
    #[inline]
    #[must_use]
    pub fn blocks(&self) -> Keys<Block> {
        self.blocks.keys()
    }

    /// Iterates over all values.
    #[inline]
    #[must_use]
    pub fn values(&self) -> Keys<Value> {
        self.values.keys()
    }

    /// Predecessors of `block`, in phi operand order.
    #[inline]
    #[must_use]
    pub fn block_preds(&self, block: Block) -> &[Block] {
        &self.blocks[block].preds
    }

    /// Successors of `block`.
    #[inline]
    #[must_use]
    pub fn block_succs(&self, block: Block) -> &[Block] {
        &self.blocks[block].succs
    }

    /// Estimated execution frequency of `block`.
    #[inline]
    #[must_use]
    pub fn block_frequency(&self, block: Block) -> f32 {
        self.blocks[block].frequency
    }

    /// Operations scheduled in `block`, in order.
    #[inline]
    #[must_use]
    pub fn block_insts(&self, block: Block) -> BlockInsts<'_> {
        BlockInsts {
            func: self,
            next: self.blocks[block].first.expand(),
        }
    }

    /// Opcode of the operation defining `value`.
    #[inline]
    #[must_use]
    pub fn opcode(&self, value: Value) -> Opcode {
        self.values[value].opcode
    }

    /// Mnemonic of a generic operation.
    #[inline]
    #[must_use]
    pub fn mnemonic(&self, value: Value) -> Option<&str> {
        let mnemonic = self.values[value].mnemonic.expand()?;
        Some(&self.mnemonics[mnemonic])
    }

    /// Result type of `value`.
    #[inline]
    #[must_use]
    pub fn value_type(&self, value: Value) -> ValueType {
        self.values[value].ty
    }

    /// Register class of `value`, if it is a register value.
    #[inline]
    #[must_use]
    pub fn value_class(&self, value: Value) -> Option<RegClass> {
        match self.values[value].ty {
            ValueType::Reg(class) => Some(class),
            ValueType::None | ValueType::Memory => None,
        }
    }

    /// Block containing the definition of `value`.
    ///
    /// Unscheduled special values are considered to be in the entry block.
    #[inline]
    #[must_use]
    pub fn value_block(&self, value: Value) -> Block {
        self.values[value].block
    }

    /// Operands of `value`.
    #[inline]
    #[must_use]
    pub fn value_operands(&self, value: Value) -> &[Value] {
        &self.values[value].operands
    }

    /// All uses of `value`.
    #[inline]
    #[must_use]
    pub fn value_users(&self, value: Value) -> &[Use] {
        &self.values[value].users
    }

    /// Spill-related properties of `value`.
    #[inline]
    #[must_use]
    pub fn value_flags(&self, value: Value) -> ValueFlags {
        self.values[value].flags
    }

    /// Estimated cost of computing `value`.
    #[inline]
    #[must_use]
    pub fn value_cost(&self, value: Value) -> u32 {
        self.values[value].cost
    }

    /// Whether `value` is a phi.
    #[inline]
    #[must_use]
    pub fn is_phi(&self, value: Value) -> bool {
        self.values[value].opcode == Opcode::Phi
    }

    /// Whether `value` is a keep-alive.
    #[inline]
    #[must_use]
    pub fn is_keep(&self, value: Value) -> bool {
        self.values[value].opcode == Opcode::Keep
    }

    /// Whether `value` is currently part of a block schedule.
    #[inline]
    #[must_use]
    pub fn is_scheduled(&self, value: Value) -> bool {
        self.values[value].scheduled
    }

    /// First operation in the schedule of `block`.
    #[inline]
    #[must_use]
    pub fn sched_first(&self, block: Block) -> Option<Value> {
        self.blocks[block].first.expand()
    }

    /// Last operation in the schedule of `block`.
    #[inline]
    #[must_use]
    pub fn sched_last(&self, block: Block) -> Option<Value> {
        self.blocks[block].last.expand()
    }

    /// Operation scheduled after `value` in the same block.
    #[inline]
    #[must_use]
    pub fn sched_next(&self, value: Value) -> Option<Value> {
        self.values[value].next.expand()
    }

    /// Operation scheduled before `value` in the same block.
    #[inline]
    #[must_use]
    pub fn sched_prev(&self, value: Value) -> Option<Value> {
        self.values[value].prev.expand()
    }

    /// Returns whether `a` is scheduled before `b`, or is `b`.
    ///
    /// Both values must be scheduled in the same block.
    #[must_use]
    pub fn sched_before_or_eq(&self, a: Value, b: Value) -> bool {
        debug_assert_eq!(self.value_block(a), self.value_block(b));
        let mut cursor = Some(a);
        while let Some(value) = cursor {
            if value == b {
                return true;
            }
            cursor = self.sched_next(value);
        }
        false
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Creates a new operation in `block` which is not yet scheduled.
    ///
    /// Use [`Function::insert_after`], [`Function::insert_before`] or
    /// [`Function::insert_at_block_start`] to place it in the schedule.
    pub fn create_value(
        &mut self,
        block: Block,
        opcode: Opcode,
        ty: ValueType,
        operands: &[Value],
    ) -> Value {
        let value = self.values.push(ValueData {
            opcode,
            mnemonic: None.into(),
            ty,
            block,
            operands: operands.into(),
            users: Vec::new(),
            flags: ValueFlags::empty(),
            cost: 1,
            scheduled: false,
            prev: None.into(),
            next: None.into(),
        });
        for (index, &operand) in operands.iter().enumerate() {
            self.values[operand].users.push(Use { user: value, index });
        }
        value
    }

    /// Creates an unscheduled copy of `value` in `block`, with the same
    /// operands.
    pub fn clone_value(&mut self, value: Value, block: Block) -> Value {
        let data = &self.values[value];
        let (opcode, mnemonic, ty, flags, cost) =
            (data.opcode, data.mnemonic, data.ty, data.flags, data.cost);
        let operands: SmallVec<[Value; 4]> = data.operands.clone();
        let copy = self.create_value(block, opcode, ty, &operands);
        let data = &mut self.values[copy];
        data.mnemonic = mnemonic;
        data.flags = flags;
        data.cost = cost;
        copy
    }

    /// Adds `flags` to the flags of `value`.
    pub fn add_flags(&mut self, value: Value, flags: ValueFlags) {
        self.values[value].flags |= flags;
    }

    /// Schedules the unscheduled `value` immediately after `after`.
    pub fn insert_after(&mut self, value: Value, after: Value) {
        debug_assert!(!self.values[value].scheduled);
        debug_assert!(self.values[after].scheduled);
        let block = self.values[after].block;
        let next = self.values[after].next;
        {
            let data = &mut self.values[value];
            data.block = block;
            data.scheduled = true;
            data.prev = after.into();
            data.next = next;
        }
        self.values[after].next = value.into();
        match next.expand() {
            Some(next) => self.values[next].prev = value.into(),
            None => self.blocks[block].last = value.into(),
        }
    }

    /// Schedules the unscheduled `value` immediately before `before`.
    pub fn insert_before(&mut self, value: Value, before: Value) {
        debug_assert!(!self.values[value].scheduled);
        debug_assert!(self.values[before].scheduled);
        match self.values[before].prev.expand() {
            Some(prev) => self.insert_after(value, prev),
            None => {
                let block = self.values[before].block;
                let data = &mut self.values[value];
                data.block = block;
                data.scheduled = true;
                data.prev = None.into();
                data.next = before.into();
                self.values[before].prev = value.into();
                self.blocks[block].first = value.into();
            }
        }
    }

    /// Schedules the unscheduled `value` at the start of `block`, after any
    /// phis already there.
    pub fn insert_at_block_start(&mut self, value: Value, block: Block) {
        let mut last_phi = None;
        let mut cursor = self.sched_first(block);
        while let Some(inst) = cursor {
            if !self.is_phi(inst) {
                break;
            }
            last_phi = Some(inst);
            cursor = self.sched_next(inst);
        }
        match (last_phi, self.sched_first(block)) {
            (Some(phi), _) => self.insert_after(value, phi),
            (None, Some(first)) => self.insert_before(value, first),
            (None, None) => {
                let data = &mut self.values[value];
                data.block = block;
                data.scheduled = true;
                data.prev = None.into();
                data.next = None.into();
                self.blocks[block].first = value.into();
                self.blocks[block].last = value.into();
            }
        }
    }

    /// Replaces operand `index` of `user` with `new`.
    pub fn set_operand(&mut self, user: Value, index: usize, new: Value) {
        let old = self.values[user].operands[index];
        if old == new {
            return;
        }
        self.remove_use(old, Use { user, index });
        self.values[user].operands[index] = new;
        self.values[new].users.push(Use { user, index });
    }

    /// Replaces all operands of `user`.
    pub fn set_operands(&mut self, user: Value, operands: &[Value]) {
        let old = core::mem::take(&mut self.values[user].operands);
        for (index, &operand) in old.iter().enumerate() {
            self.remove_use(operand, Use { user, index });
        }
        for (index, &operand) in operands.iter().enumerate() {
            self.values[operand].users.push(Use { user, index });
        }
        self.values[user].operands = operands.into();
    }

    /// Rewrites every use of `old` to use `new` instead.
    pub fn replace_all_uses(&mut self, old: Value, new: Value) {
        if old == new {
            return;
        }
        let users = core::mem::take(&mut self.values[old].users);
        for u in &users {
            self.values[u.user].operands[u.index] = new;
        }
        self.values[new].users.extend(users);
    }

    /// Removes `value` from its block schedule and drops its operands.
    ///
    /// `value` must not have any remaining users.
    pub fn remove_from_schedule(&mut self, value: Value) {
        debug_assert!(self.values[value].users.is_empty(), "{value} still has users");
        if self.values[value].scheduled {
            let block = self.values[value].block;
            let prev = self.values[value].prev.take();
            let next = self.values[value].next.take();
            match prev {
                Some(prev) => self.values[prev].next = next.into(),
                None => self.blocks[block].first = next.into(),
            }
            match next {
                Some(next) => self.values[next].prev = prev.into(),
                None => self.blocks[block].last = prev.into(),
            }
            self.values[value].scheduled = false;
        }
        self.set_operands(value, &[]);
    }

    fn append(&mut self, block: Block, value: Value) {
        match self.sched_last(block) {
            Some(last) => self.insert_after(value, last),
            None => self.insert_at_block_start(value, block),
        }
    }

    fn remove_use(&mut self, value: Value, u: Use) {
        let users = &mut self.values[value].users;
        let pos = users
            .iter()
            .position(|&x| x == u)
            .expect("use list out of sync with operands");
        users.swap_remove(pos);
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    #[test]
    fn schedule_editing() {
        let mut func = Function::new();
        let b0 = func.add_block(1.0);
        let class = RegClass::new(0);
        let a = func.append_inst(b0, InstDesc::new("a").class(class));
        let phi = func.append_phi(b0, ValueType::Reg(class), &[]);
        let ret = func.append_return(b0, &[a]);
        assert_eq!(func.block_insts(b0).collect::<Vec<_>>(), vec![phi, a, ret]);

        let b = func.create_value(b0, Opcode::Inst, ValueType::Reg(class), &[a]);
        assert!(!func.is_scheduled(b));
        func.insert_at_block_start(b, b0);
        assert_eq!(func.block_insts(b0).collect::<Vec<_>>(), vec![phi, b, a, ret]);
        assert!(func.sched_before_or_eq(phi, a));
        assert!(!func.sched_before_or_eq(ret, a));

        func.remove_from_schedule(b);
        assert!(!func.is_scheduled(b));
        assert!(func.value_operands(b).is_empty());
        assert_eq!(func.value_users(a), &[Use { user: ret, index: 0 }]);
        assert_eq!(func.block_insts(b0).collect::<Vec<_>>(), vec![phi, a, ret]);
        assert_eq!(func.sched_first(b0), Some(phi));
        assert_eq!(func.sched_last(b0), Some(ret));
    }

    #[test]
    fn operand_rewriting() {
        let mut func = Function::new();
        let b0 = func.add_block(1.0);
        let a = func.append_inst(b0, InstDesc::new("a").cost(4).flags(ValueFlags::REMATERIALIZABLE));
        let user = func.append_inst(b0, InstDesc::new("add").operands(&[a, a]));
        func.append_return(b0, &[user]);

        let copy = func.clone_value(a, b0);
        assert_eq!(func.mnemonic(copy), Some("a"));
        assert_eq!(func.value_cost(copy), 4);
        assert_eq!(func.value_flags(copy), ValueFlags::REMATERIALIZABLE);

        func.set_operand(user, 1, copy);
        assert_eq!(func.value_operands(user), &[a, copy]);
        assert_eq!(func.value_users(copy), &[Use { user, index: 1 }]);

        func.replace_all_uses(a, copy);
        assert_eq!(func.value_operands(user), &[copy, copy]);
        assert!(func.value_users(a).is_empty());
        assert_eq!(func.value_users(copy).len(), 2);
    }

    #[test]
    fn special_values() {
        let mut func = Function::new();
        func.add_block(1.0);
        let fp = func.frame_pointer();
        assert_eq!(func.frame_pointer(), fp);
        assert_eq!(func.opcode(fp), Opcode::FramePointer);
        assert!(!func.is_scheduled(fp));
        let no_mem = func.no_mem();
        assert_eq!(func.value_type(no_mem), ValueType::Memory);
        assert_ne!(func.unknown(), fp);
        assert_eq!(func.num_values(), 3);
    }
}
