//! Function validation.

use anyhow::{Result, bail, ensure};

use crate::cfg::{DominatorTree, PostOrder};
use crate::function::{Block, Function, Opcode, Use, Value};

/// Checks that `func` is well-formed and in strict SSA form.
///
/// This verifies the structural invariants that the spiller relies on:
///
/// - The schedule links of each block are consistent.
/// - Phis come first in a block and have one operand per predecessor.
/// - Each block ends with exactly one terminator, optionally followed by
///   keep-alive operations.
/// - Predecessor and successor lists mirror each other.
/// - Operand and user lists mirror each other.
/// - Every operand of a reachable operation dominates it. For phis, each
///   operand must dominate the end of the corresponding predecessor.
///
/// Keep-alive operations are exempt from the dominance check.
pub fn validate_ssa(func: &Function) -> Result<()> {
    let postorder = PostOrder::for_function(func);
    let mut domtree = DominatorTree::new();
    domtree.compute(func, &postorder);
    let ctx = Context {
        func,
        postorder,
        domtree,
    };
    ctx.check_function()
}

struct Context<'a> {
    func: &'a Function,
    postorder: PostOrder,
    domtree: DominatorTree,
}

impl Context<'_> {
    fn check_function(&self) -> Result<()> {
        ensure!(self.func.num_blocks() != 0, "Function has no blocks");
        ensure!(
            self.func.block_preds(Block::ENTRY_BLOCK).is_empty(),
            "{}: Entry block cannot have predecessors",
            Block::ENTRY_BLOCK
        );

        for block in self.func.blocks() {
            self.check_edges(block)?;
            self.check_schedule(block)?;
        }

        for value in self.func.values() {
            self.check_users(value)?;
            if !self.func.is_scheduled(value) {
                ensure!(
                    self.func.opcode(value).is_unscheduled()
                        || self.func.value_users(value).is_empty(),
                    "{value}: Unscheduled operation is still used"
                );
                continue;
            }
            self.check_operands(value)?;
        }

        Ok(())
    }

    /// Checks that the predecessor and successor lists agree.
    fn check_edges(&self, block: Block) -> Result<()> {
        let count = |list: &[Block], block: Block| list.iter().filter(|&&b| b == block).count();
        for &succ in self.func.block_succs(block) {
            ensure!(
                count(self.func.block_preds(succ), block)
                    == count(self.func.block_succs(block), succ),
                "{block}: Edge to {succ} is missing from its predecessor list"
            );
        }
        for &pred in self.func.block_preds(block) {
            ensure!(
                count(self.func.block_succs(pred), block)
                    == count(self.func.block_preds(block), pred),
                "{block}: Edge from {pred} is missing from its successor list"
            );
        }
        Ok(())
    }

    /// Checks the layout of the operations in a block.
    fn check_schedule(&self, block: Block) -> Result<()> {
        let mut prev = None;
        let mut seen_non_phi = false;
        let mut terminator = None;
        let mut cursor = self.func.sched_first(block);
        while let Some(value) = cursor {
            ensure!(
                self.func.is_scheduled(value),
                "{block}: {value} is linked into the schedule but not marked as scheduled"
            );
            ensure!(
                self.func.value_block(value) == block,
                "{block}: {value} is scheduled in {}",
                self.func.value_block(value)
            );
            ensure!(
                self.func.sched_prev(value) == prev,
                "{block}: Broken schedule links at {value}"
            );

            let opcode = self.func.opcode(value);
            ensure!(
                !opcode.is_unscheduled(),
                "{value}: {} cannot be scheduled",
                opcode.name()
            );
            if opcode == Opcode::Phi {
                ensure!(!seen_non_phi, "{value}: Phi after non-phi operation in {block}");
            } else {
                seen_non_phi = true;
            }
            if let Some(terminator) = terminator {
                ensure!(
                    opcode == Opcode::Keep,
                    "{value}: Operation after terminator {terminator} in {block}"
                );
            }
            if opcode.is_terminator() {
                terminator = Some(value);
            }

            prev = Some(value);
            cursor = self.func.sched_next(value);
        }
        ensure!(
            self.func.sched_last(block) == prev,
            "{block}: Last operation is out of sync with the schedule"
        );
        let Some(terminator) = terminator else {
            bail!("{block}: Block doesn't end with a terminator");
        };
        match self.func.opcode(terminator) {
            Opcode::Return => ensure!(
                self.func.block_succs(block).is_empty(),
                "{terminator}: Return from a block with successors"
            ),
            _ => ensure!(
                !self.func.block_succs(block).is_empty(),
                "{terminator}: Branch from a block without successors"
            ),
        }
        Ok(())
    }

    /// Checks that the user list of `value` matches the operand lists of its
    /// users.
    fn check_users(&self, value: Value) -> Result<()> {
        for &Use { user, index } in self.func.value_users(value) {
            ensure!(
                self.func.value_operands(user).get(index) == Some(&value),
                "{value}: Stale use by operand {index} of {user}"
            );
        }
        for (index, &operand) in self.func.value_operands(value).iter().enumerate() {
            ensure!(
                self.func
                    .value_users(operand)
                    .contains(&Use { user: value, index }),
                "{value}: Operand {index} is missing from the users of {operand}"
            );
        }
        Ok(())
    }

    /// Checks that each operand of a scheduled operation reaches it.
    fn check_operands(&self, value: Value) -> Result<()> {
        let block = self.func.value_block(value);
        let operands = self.func.value_operands(value);
        for &operand in operands {
            ensure!(
                self.func.is_scheduled(operand) || self.func.opcode(operand).is_unscheduled(),
                "{value}: Operand {operand} is not scheduled"
            );
        }

        if !self.postorder.is_reachable(block) {
            return Ok(());
        }
        match self.func.opcode(value) {
            Opcode::Keep => {}
            Opcode::Phi => {
                let preds = self.func.block_preds(block);
                ensure!(
                    operands.len() == preds.len(),
                    "{value}: Phi has {} operands but {block} has {} predecessors",
                    operands.len(),
                    preds.len()
                );
                for (&operand, &pred) in operands.iter().zip(preds) {
                    let ty = self.func.value_type(operand);
                    ensure!(
                        self.func.opcode(operand) == Opcode::Unknown
                            || ty == self.func.value_type(value),
                        "{value}: Phi operand {operand} has type {ty}"
                    );
                    if !self.postorder.is_reachable(pred) || !self.func.is_scheduled(operand) {
                        continue;
                    }
                    ensure!(
                        self.domtree
                            .dominates(self.func.value_block(operand), pred),
                        "{value}: Operand {operand} doesn't dominate the end of {pred}"
                    );
                }
            }
            _ => {
                for &operand in operands {
                    ensure!(operand != value, "{value}: Operation uses itself");
                    ensure!(
                        self.domtree.value_dominates(self.func, operand, value),
                        "{value}: Operand {operand} doesn't dominate its use"
                    );
                }
            }
        }
        Ok(())
    }
}
