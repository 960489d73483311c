/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Lifetime analysis: per-block liveness by bitset fixpoint, then
//! construction of lifetime intervals in one backward pass.

use super::data::Env;
use crate::bitset::BitSet;
use crate::{
    Block, Function, OperandConstraint, OperandKind, ProgPoint, RegAllocError,
};

impl<'a, F: Function> Env<'a, F> {
    /// Compute per-block live-in/live-out sets. Liveness is a
    /// backward data-flow problem:
    ///
    ///   liveout(b) = union of livein(s) for each successor s
    ///   livein(b)  = (liveout(b) - def(b)) | use(b)
    ///
    /// where use(b) is the set of vregs read in b above any def in b.
    /// Block parameters are defs at the top of their block;
    /// branch blockparam args are uses in the predecessor.
    pub fn compute_liveness(&mut self) -> Result<(), RegAllocError> {
        let num_blocks = self.func.num_blocks();
        let num_vregs = self.func.num_vregs();

        let mut uses = vec![BitSet::with_capacity(num_vregs); num_blocks];
        let mut defs = vec![BitSet::with_capacity(num_vregs); num_blocks];

        for block in 0..num_blocks {
            let b = Block::new(block);
            for &param in self.func.block_params(b) {
                self.vregs[param.vreg()] = param;
                defs[block].insert(param.vreg());
            }
            for inst in self.func.block_insns(b).iter() {
                for op in self.func.inst_operands(inst) {
                    let v = op.vreg();
                    self.vregs[v.vreg()] = v;
                    match op.kind() {
                        OperandKind::Use => {
                            if !defs[block].contains(v.vreg()) {
                                uses[block].insert(v.vreg());
                            }
                        }
                        OperandKind::Def | OperandKind::Temp => {
                            defs[block].insert(v.vreg());
                        }
                    }
                }
                if self.func.is_branch(inst) {
                    for succ_idx in 0..self.func.block_succs(b).len() {
                        for &arg in self.func.branch_blockparams(b, inst, succ_idx) {
                            self.vregs[arg.vreg()] = arg;
                            if !defs[block].contains(arg.vreg()) {
                                uses[block].insert(arg.vreg());
                            }
                        }
                    }
                }
            }
        }

        self.liveins = vec![BitSet::with_capacity(num_vregs); num_blocks];
        self.liveouts = vec![BitSet::with_capacity(num_vregs); num_blocks];

        // Iterate to a fixpoint. Processing in postorder visits
        // successors first, so most functions converge in one or two
        // passes; only loops need more.
        let postorder = self.cfginfo.postorder.clone();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in &postorder {
                let b = block.index();
                let mut liveout = BitSet::with_capacity(num_vregs);
                for &succ in self.func.block_succs(block) {
                    liveout.union_with(&self.liveins[succ.index()]);
                }

                let mut livein = liveout.clone();
                for v in defs[b].iter().collect::<Vec<_>>() {
                    livein.remove(v);
                }
                livein.union_with(&uses[b]);

                self.liveouts[b] = liveout;
                changed |= self.liveins[b].union_with(&livein);
            }
        }

        if !self.liveins[self.func.entry_block().index()].is_empty() {
            trace!(
                "vregs live into entry: {:?}",
                self.liveins[self.func.entry_block().index()]
                    .iter()
                    .collect::<Vec<_>>()
            );
            return Err(RegAllocError::EntryLivein);
        }

        Ok(())
    }

    /// Build lifetime intervals for all vregs and pin intervals for
    /// all fixed-register mentions, in a single backward pass over
    /// the program. Ranges and uses accumulate in descending order
    /// and are normalized at the end.
    pub fn build_intervals(&mut self) {
        for block in (0..self.func.num_blocks()).rev() {
            let b = Block::new(block);
            let insns = self.func.block_insns(b);
            let entry = self.cfginfo.block_entry[block];
            let exit = self.cfginfo.block_exit[block];

            let mut live = self.liveouts[block].clone();

            // Values live out of the block need a range across all of
            // it; defs below will trim the range start.
            for vidx in live.iter().collect::<Vec<_>>() {
                let v = self.vregs[vidx];
                let it = self.vreg_interval(v);
                self.intervals[it].add_range(entry, exit.next());
            }

            for inst in insns.iter().rev() {
                let before = ProgPoint::before(inst);
                let after = ProgPoint::after(inst);

                // Clobbers pin their register across the whole
                // instruction.
                for &preg in self.func.inst_clobbers(inst) {
                    let fi = self.fixed_interval(preg);
                    self.intervals[fi].add_range(before, after.next());
                }

                let operands = self.func.inst_operands(inst);

                // Defs end lifetimes: the value exists from the write
                // at the After point. A def with no range so far is
                // dead; it still needs a location for the write.
                for op in operands.iter().filter(|op| op.kind() == OperandKind::Def) {
                    let it = self.vreg_interval(op.vreg());
                    if self.intervals[it].ranges.is_empty() {
                        self.intervals[it].add_range(after, after.next());
                    } else {
                        self.intervals[it].set_from(after);
                    }
                    self.intervals[it].add_use(after, op.constraint());
                    if let OperandConstraint::FixedReg(p) = op.constraint() {
                        let fi = self.fixed_interval(p);
                        self.intervals[fi].add_range(before, after.next());
                    }
                    live.remove(op.vreg().vreg());
                }

                // Temps are live across the instruction and conflict
                // with both its inputs and outputs.
                for op in operands.iter().filter(|op| op.kind() == OperandKind::Temp) {
                    let it = self.vreg_interval(op.vreg());
                    self.intervals[it].add_range(before, after.next());
                    self.intervals[it].add_use(before, op.constraint());
                    if let OperandConstraint::FixedReg(p) = op.constraint() {
                        let fi = self.fixed_interval(p);
                        self.intervals[fi].add_range(before, after.next());
                    }
                }

                // Uses extend lifetimes up to their reading point; if
                // the def is above in the same block, `set_from` will
                // trim the provisional block-entry start.
                for op in operands.iter().filter(|op| op.kind() == OperandKind::Use) {
                    let it = self.vreg_interval(op.vreg());
                    self.intervals[it].add_range(entry, after);
                    self.intervals[it].add_use(before, op.constraint());
                    if let OperandConstraint::FixedReg(p) = op.constraint() {
                        let fi = self.fixed_interval(p);
                        self.intervals[fi].add_range(before, after);
                        self.intervals[it].hint = p;
                    }
                    live.insert(op.vreg().vreg());
                }

                // Branch blockparam args are reads at the branch.
                if self.func.is_branch(inst) {
                    for succ_idx in 0..self.func.block_succs(b).len() {
                        for &arg in self.func.branch_blockparams(b, inst, succ_idx) {
                            let it = self.vreg_interval(arg);
                            self.intervals[it].add_range(entry, after);
                            self.intervals[it].add_use(before, OperandConstraint::Any);
                            live.insert(arg.vreg());
                        }
                    }
                }
            }

            // Block parameters are defined at the block entry.
            for &param in self.func.block_params(b) {
                let it = self.vreg_interval(param);
                if self.intervals[it].ranges.is_empty() {
                    self.intervals[it].add_range(entry, entry.next());
                } else {
                    self.intervals[it].set_from(entry);
                }
                live.remove(param.vreg());
            }
        }

        for it in self.intervals.iter_mut() {
            it.normalize();
        }

        if trace_enabled!() {
            for (i, it) in self.intervals.iter().enumerate() {
                trace!(
                    "interval {}: vreg {:?} preg {:?} ranges {:?} uses {:?}",
                    i,
                    it.vreg,
                    it.preg,
                    it.ranges,
                    it.uses
                );
            }
        }
    }
}
