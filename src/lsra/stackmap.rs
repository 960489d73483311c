/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Safepoint location records: for every safepoint instruction,
//! report where each live reference-typed value can be found, so the
//! client can build stack maps.

use super::data::Env;
use crate::{Function, Inst, ProgPoint};

impl<'a, F: Function> Env<'a, F> {
    pub fn compute_safepoints(&mut self) {
        let func = self.func;
        let reftypes = func.reftype_vregs();
        if reftypes.is_empty() {
            return;
        }
        for inst in 0..func.num_insts() {
            let i = Inst::new(inst);
            if !func.is_safepoint(i) {
                continue;
            }
            let pos = ProgPoint::before(i);
            for &v in reftypes {
                let list = &self.vreg_intervals[v.vreg()];
                let idx = list.partition_point(|&it| self.intervals[it].from() <= pos);
                if idx == 0 {
                    continue;
                }
                let it = &self.intervals[list[idx - 1]];
                if it.covers(pos) {
                    trace!("safepoint {:?}: {} at {}", i, v, it.allocation);
                    self.safepoint_locations.push((pos, it.allocation));
                    self.stats.num_safepoint_records += 1;
                }
            }
        }
        self.safepoint_locations
            .sort_by_key(|&(pos, alloc)| (pos.to_index(), alloc.bits()));
    }
}
