//! Making spills dominate their reloads.

use smallvec::SmallVec;

use super::SpillEnv;
use crate::arch::ArchInfo;
use crate::function::Value;

impl<A: ArchInfo> SpillEnv<'_, A> {
    /// Ensures that every reload of `value` is dominated by at least one of
    /// its spill points.
    ///
    /// If some reload is in a block which isn't dominated by the block of any
    /// existing spill point, a spill is added right after the definition of
    /// `value`. That spill dominates every other spill point, which are then
    /// dropped.
    pub fn ensure_dominating_spill(&mut self, value: Value) {
        if !self.func.is_scheduled(value) {
            return;
        }
        let info = self.info(value);

        let mut uncovered: SmallVec<[u32; 8]> = self.infos[info]
            .reloaders
            .iter()
            .map(|reloader| {
                let block = self.func.value_block(reloader.before);
                self.domtree.preorder_number(block)
            })
            .collect();
        for spill in &self.infos[info].spills {
            let Some(after) = spill.after else {
                return;
            };
            let range = self.domtree.preorder_range(self.func.value_block(after));
            uncovered.retain(|&mut number| !range.contains(&number));
        }

        if !uncovered.is_empty() {
            trace!("Spills of {value} don't dominate all reloads, spilling at definition");
            stat!(self.stats, dominating_spills_added);
            let after = self.spill_point(value);
            self.add_spill(value, Some(after));
        }
    }
}
