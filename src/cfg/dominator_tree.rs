//! Dominator tree.
//!
//! Immediate dominators are computed with the iterative algorithm from
//! "A Simple, Fast Dominance Algorithm" by Cooper, Harvey and Kennedy. The
//! tree is then numbered in pre-order so that dominance queries become a
//! range check.

use alloc::vec::Vec;
use core::cmp::Ordering;
use core::mem;
use core::ops::RangeInclusive;

use super::postorder::PostOrder;
use crate::entity::{PackedOption, SecondaryMap};
use crate::function::{Block, Function, Value};

#[derive(Default, Clone)]
struct Node {
    /// Immediate dominator.
    idom: PackedOption<Block>,

    /// First child in the dominator tree.
    child: PackedOption<Block>,

    /// Next sibling in the dominator tree.
    sibling: PackedOption<Block>,

    /// Pre-order number of this node, starting at 1. Unreachable blocks keep
    /// 0.
    pre_number: u32,

    /// Largest pre-order number in the subtree rooted at this node.
    pre_max: u32,
}

/// Dominator tree of the control flow graph.
#[derive(Default)]
pub struct DominatorTree {
    nodes: SecondaryMap<Block, Node>,
    stack: Vec<Block>,
}

impl DominatorTree {
    /// Creates an empty `DominatorTree`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the dominator tree of `func`.
    #[must_use]
    pub fn for_function(func: &Function) -> Self {
        let mut domtree = Self::new();
        domtree.compute(func, &PostOrder::for_function(func));
        domtree
    }

    /// Recomputes the dominator tree from a post-order of the same function.
    pub fn compute(&mut self, func: &Function, po: &PostOrder) {
        self.nodes.clear_and_resize(func.num_blocks());
        if func.num_blocks() == 0 {
            return;
        }

        self.compute_idoms(func, po);

        // Link each node into the child list of its immediate dominator.
        for block in po.cfg_postorder() {
            if let Some(idom) = self.nodes[block].idom.expand() {
                let sibling = mem::replace(&mut self.nodes[idom].child, block.into());
                self.nodes[block].sibling = sibling;
            }
        }

        // Number the tree in pre-order.
        self.stack.clear();
        self.stack.push(Block::ENTRY_BLOCK);
        let mut n = 0;
        while let Some(block) = self.stack.pop() {
            n += 1;
            let node = &mut self.nodes[block];
            node.pre_number = n;
            node.pre_max = n;
            if let Some(sibling) = node.sibling.expand() {
                self.stack.push(sibling);
            }
            if let Some(child) = node.child.expand() {
                self.stack.push(child);
            }
        }

        // A block comes after all of the blocks it dominates in the CFG
        // post-order, so subtree maxima can be propagated in a single pass.
        for block in po.cfg_postorder() {
            if let Some(idom) = self.nodes[block].idom.expand() {
                let pre_max = self.nodes[block].pre_max;
                let parent = &mut self.nodes[idom];
                parent.pre_max = parent.pre_max.max(pre_max);
            }
        }
    }

    /// Returns the immediate dominator of `block`.
    ///
    /// Returns `None` for the entry block and unreachable blocks.
    #[must_use]
    pub fn immediate_dominator(&self, block: Block) -> Option<Block> {
        self.nodes[block].idom.expand()
    }

    /// Returns the range of pre-order numbers covered by the dominator
    /// subtree rooted at `block`.
    ///
    /// The first number in the range is the number of `block` itself. A block
    /// `b` is dominated by `block` iff `b`'s number is within this range.
    #[must_use]
    pub fn preorder_range(&self, block: Block) -> RangeInclusive<u32> {
        let node = &self.nodes[block];
        node.pre_number..=node.pre_max
    }

    /// Returns the pre-order number of `block` in the dominator tree.
    ///
    /// This is 0 for unreachable blocks.
    #[must_use]
    pub fn preorder_number(&self, block: Block) -> u32 {
        self.nodes[block].pre_number
    }

    /// Whether `a` dominates `b`. Every block dominates itself.
    ///
    /// Both blocks must be reachable from the entry block.
    #[must_use]
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        let na = &self.nodes[a];
        let nb = &self.nodes[b];
        na.pre_number <= nb.pre_number && nb.pre_number <= na.pre_max
    }

    /// Whether the program point just after `a` dominates the one just after
    /// `b`.
    ///
    /// Within a block this follows the schedule. Unscheduled values are
    /// available everywhere and therefore dominate every point.
    #[must_use]
    pub fn value_dominates(&self, func: &Function, a: Value, b: Value) -> bool {
        if !func.is_scheduled(a) {
            return true;
        }
        if !func.is_scheduled(b) {
            return false;
        }
        let block_a = func.value_block(a);
        let block_b = func.value_block(b);
        if block_a == block_b {
            func.sched_before_or_eq(a, b)
        } else {
            self.dominates(block_a, block_b)
        }
    }

    fn compute_idoms(&mut self, func: &Function, po: &PostOrder) {
        // Temporarily make the entry block its own dominator so that it counts
        // as processed when looking at predecessors.
        self.nodes[Block::ENTRY_BLOCK].idom = Block::ENTRY_BLOCK.into();

        let mut changed = true;
        while changed {
            changed = false;
            for block in po.cfg_postorder().rev().skip(1) {
                let mut new_idom = None;
                for &pred in func.block_preds(block) {
                    if self.nodes[pred].idom.is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(idom) => self.common_dominator(po, pred, idom),
                    });
                }

                // In reverse post-order at least one predecessor has already
                // been processed.
                let Some(new_idom) = new_idom else {
                    unreachable!("{block} has no processed predecessor");
                };
                if self.nodes[block].idom.expand() != Some(new_idom) {
                    self.nodes[block].idom = new_idom.into();
                    changed = true;
                }
            }
        }

        self.nodes[Block::ENTRY_BLOCK].idom = None.into();
    }

    fn common_dominator(&self, po: &PostOrder, mut a: Block, mut b: Block) -> Block {
        loop {
            match po.rpo_cmp(a, b) {
                Ordering::Less => b = self.nodes[b].idom.expand().expect("unreachable block"),
                Ordering::Greater => a = self.nodes[a].idom.expand().expect("unreachable block"),
                Ordering::Equal => return a,
            }
        }
    }
}
