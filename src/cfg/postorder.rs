//! Post-order traversal of the control-flow graph.

use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::entity::SecondaryMap;
use crate::function::{Block, Function};

/// Post-order traversal of the blocks reachable from the entry block.
///
/// This also serves as a reachability check: blocks which are not visited by
/// the traversal are unreachable.
#[derive(Default)]
pub struct PostOrder {
    /// DFS work list. The flag is set once the successors of the block have
    /// been pushed.
    stack: Vec<(Block, bool)>,

    /// Reachable blocks in post-order.
    postorder: Vec<Block>,

    /// Position of each block in the post-order, offset by `FIRST_NUMBER`.
    ///
    /// Holds `UNVISITED` for unreachable blocks and `PENDING` while a block's
    /// successors are still being traversed.
    po_number: SecondaryMap<Block, u32>,
}

const UNVISITED: u32 = 0;
const PENDING: u32 = 1;
const FIRST_NUMBER: u32 = 2;

impl PostOrder {
    /// Creates an empty `PostOrder`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the post-order of `func`.
    #[must_use]
    pub fn for_function(func: &Function) -> Self {
        let mut postorder = Self::new();
        postorder.compute(func);
        postorder
    }

    /// Whether `block` is reachable from the entry block.
    #[inline]
    #[must_use]
    pub fn is_reachable(&self, block: Block) -> bool {
        self.po_number[block] >= FIRST_NUMBER
    }

    /// Reachable blocks in post-order.
    ///
    /// Use `rev` on the returned iterator for a reverse post-order.
    pub fn cfg_postorder(&self) -> impl DoubleEndedIterator<Item = Block> + ExactSizeIterator + '_ {
        self.postorder.iter().copied()
    }

    /// Compares the position of two reachable blocks in reverse post-order.
    #[must_use]
    pub fn rpo_cmp(&self, a: Block, b: Block) -> Ordering {
        self.po_number[b].cmp(&self.po_number[a])
    }

    /// Recomputes the post-order of `func`.
    pub fn compute(&mut self, func: &Function) {
        self.stack.clear();
        self.postorder.clear();
        self.postorder.reserve(func.num_blocks());
        self.po_number.clear_and_resize(func.num_blocks());
        if func.num_blocks() == 0 {
            return;
        }

        self.stack.push((Block::ENTRY_BLOCK, false));
        while let Some((block, expanded)) = self.stack.pop() {
            if expanded {
                self.postorder.push(block);
                self.po_number[block] = FIRST_NUMBER + self.postorder.len() as u32;
                continue;
            }
            if self.po_number[block] != UNVISITED {
                continue;
            }
            self.po_number[block] = PENDING;
            self.stack.push((block, true));

            // The first successor is pushed first so that it is visited last
            // and ends up earliest in the reverse post-order of its siblings.
            for &succ in func.block_succs(block) {
                if self.po_number[succ] == UNVISITED {
                    self.stack.push((succ, false));
                }
            }
        }
    }
}
