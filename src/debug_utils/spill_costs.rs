use crate::arch::ArchInfo;
use crate::function::{Function, Opcode, ValueFlags};

/// Frequency-weighted summary of the spill code present in a function.
///
/// This is useful to compare the quality of the spill placement under
/// different [`Options`] or cost parameters.
///
/// [`Options`]: crate::Options
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpillCosts {
    /// Number of spill operations.
    pub spills: usize,

    /// Number of reload operations.
    pub reloads: usize,

    /// Number of rematerialized operations.
    pub remats: usize,

    /// Sum of the spill cost weighted by block frequency.
    pub spill_cost: f32,

    /// Sum of the reload cost weighted by block frequency.
    pub reload_cost: f32,

    /// Sum of the cost of rematerialized operations weighted by block
    /// frequency.
    pub remat_cost: f32,
}

impl SpillCosts {
    /// Combined weighted cost of all spill code.
    #[must_use]
    pub fn total(&self) -> f32 {
        self.spill_cost + self.reload_cost + self.remat_cost
    }
}

/// Evaluates the cost of the spill code in `func`.
///
/// The returned value is approximately indicative of the execution time added
/// by spilling, based on the block frequencies provided.
#[must_use]
pub fn total_spill_costs(func: &Function, arch: &impl ArchInfo) -> SpillCosts {
    let mut costs = SpillCosts::default();
    for block in func.blocks() {
        let freq = func.block_frequency(block);
        for value in func.block_insts(block) {
            match func.opcode(value) {
                Opcode::Spill => {
                    costs.spills += 1;
                    costs.spill_cost += arch.spill_cost() as f32 * freq;
                }
                Opcode::Reload => {
                    costs.reloads += 1;
                    costs.reload_cost += arch.reload_cost() as f32 * freq;
                }
                Opcode::Inst if func.value_flags(value).contains(ValueFlags::REMAT_CLONE) => {
                    costs.remats += 1;
                    costs.remat_cost += arch.op_estimated_cost(func, value) as f32 * freq;
                }
                _ => {}
            }
        }
    }
    costs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::GenericArchInfo;
    use crate::function::{Block, InstDesc, RegClass, ValueType};

    #[test]
    fn weighted_by_frequency() {
        let mut func = Function::new();
        let b0 = func.add_block(1.0);
        let b1 = func.add_block(4.0);
        func.add_edge(b0, b1);
        let x = func.append_inst(b0, InstDesc::new("def").class(RegClass::new(0)));
        func.append_jump(b0);
        let fp = func.frame_pointer();
        let spill = func.append_op(b1, Opcode::Spill, ValueType::Memory, &[fp, x]);
        func.append_op(
            b1,
            Opcode::Reload,
            ValueType::Reg(RegClass::new(0)),
            &[fp, spill],
        );
        let remat = func.append_inst(b1, InstDesc::new("def").class(RegClass::new(0)).cost(2));
        func.add_flags(remat, ValueFlags::REMAT_CLONE);
        func.append_return(b1, &[]);
        assert_eq!(func.value_block(x), Block::ENTRY_BLOCK);

        let costs = total_spill_costs(&func, &GenericArchInfo::new(3, 5));
        assert_eq!(costs.spills, 1);
        assert_eq!(costs.reloads, 1);
        assert_eq!(costs.remats, 1);
        assert_eq!(costs.spill_cost, 12.0);
        assert_eq!(costs.reload_cost, 20.0);
        assert_eq!(costs.remat_cost, 8.0);
        assert_eq!(costs.total(), 40.0);
    }
}
