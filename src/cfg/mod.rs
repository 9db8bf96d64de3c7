//! Control-flow graph analyses used by the spiller.

mod dominator_tree;
mod postorder;

pub use dominator_tree::DominatorTree;
pub use postorder::PostOrder;
