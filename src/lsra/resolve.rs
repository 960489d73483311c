/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Post-walk resolution: final operand allocations, moves connecting
//! split interval siblings, SSA data-flow reconciliation at block
//! edges, and scheduling of all recorded moves into the edit list.

use super::data::{Env, MovePrio};
use crate::moves::{MoveVec, ParallelMoves, ScratchResolver};
use crate::{
    Allocation, Block, EdgeMoves, Edit, Function, OperandConstraint, OperandKind, ProgPoint,
    RegAllocError, RegClass, SpillSlot, VReg,
};
use smallvec::smallvec;

impl<'a, F: Function> Env<'a, F> {
    /// Fill in the per-operand allocation table, and record the
    /// fix-up moves that shuttle values between their homes and
    /// fixed-constraint registers.
    pub fn assign_allocations(&mut self) {
        let func = self.func;
        self.inst_alloc_offsets = Vec::with_capacity(func.num_insts());
        for inst in 0..func.num_insts() {
            let i = crate::Inst::new(inst);
            self.inst_alloc_offsets.push(self.allocs.len() as u32);
            let before = ProgPoint::before(i);
            let after = ProgPoint::after(i);
            for op in func.inst_operands(i) {
                // Defs are written at the After point; uses and temps
                // are read at the Before point.
                let pos = match op.kind() {
                    OperandKind::Def => after,
                    OperandKind::Use | OperandKind::Temp => before,
                };
                let alloc = match op.constraint() {
                    OperandConstraint::FixedReg(p) => {
                        let fixed = Allocation::reg(p);
                        let home = self.alloc_at(op.vreg(), pos);
                        match op.kind() {
                            OperandKind::Use => {
                                self.insert_move(before, MovePrio::FixedUse, home, fixed, op.vreg());
                            }
                            OperandKind::Def => {
                                self.insert_move(after, MovePrio::FixedDef, fixed, home, op.vreg());
                            }
                            // A fixed temp needs no data movement:
                            // there is no value coming in or out.
                            OperandKind::Temp => {}
                        }
                        fixed
                    }
                    constraint => {
                        let alloc = self.alloc_at(op.vreg(), pos);
                        debug_assert!(
                            constraint != OperandConstraint::Reg || alloc.is_reg(),
                            "reg-constrained operand {:?} at {:?} got {}",
                            op,
                            pos,
                            alloc
                        );
                        alloc
                    }
                };
                self.allocs.push(alloc);
            }
        }
    }

    /// Connect adjacent sibling intervals of each split vreg with a
    /// move from the old location to the new one. Transitions at a
    /// block entry are skipped here: `resolve_data_flow` routes
    /// values across block boundaries.
    pub fn insert_split_moves(&mut self) {
        for v in 0..self.func.num_vregs() {
            if self.vreg_intervals[v].len() < 2 {
                continue;
            }
            for i in 1..self.vreg_intervals[v].len() {
                let prev = self.vreg_intervals[v][i - 1];
                let cur = self.vreg_intervals[v][i];
                let pos = self.intervals[cur].from();
                if self.intervals[prev].to() != pos {
                    // A lifetime hole between siblings always spans a
                    // block boundary; the resolver reconnects them.
                    continue;
                }
                let block = self.cfginfo.insn_block[pos.inst().index()];
                if pos == self.cfginfo.block_entry[block.index()] {
                    continue;
                }
                let from = self.intervals[prev].allocation;
                let to = self.intervals[cur].allocation;
                let vreg = self.intervals[cur].vreg;
                self.insert_move(pos, MovePrio::Regular, from, to, vreg);
            }
        }
    }

    /// Reconcile locations across CFG edges: live-through values that
    /// changed location between the blocks, and blockparam arguments
    /// flowing into their parameters. Moves are hosted at the end of
    /// the predecessor when it has a single successor, at the start
    /// of the successor when it has a single predecessor, and
    /// reported as `EdgeMoves` on critical edges.
    pub fn resolve_data_flow(&mut self) -> Result<(), RegAllocError> {
        let func = self.func;
        for block in 0..func.num_blocks() {
            let b = Block::new(block);
            let branch = func.block_insns(b).last();
            if !func.is_branch(branch) {
                debug_assert!(func.block_succs(b).is_empty());
                continue;
            }
            let out_pos = ProgPoint::before(branch);
            let num_succs = func.block_succs(b).len();
            for succ_idx in 0..num_succs {
                let s = func.block_succs(b)[succ_idx];
                let s_entry = self.cfginfo.block_entry[s.index()];

                let mut moves: MoveVec<VReg> = smallvec![];
                for vidx in self.liveins[s.index()].iter() {
                    let v = self.vregs[vidx];
                    let src = self.alloc_at(v, out_pos);
                    let dst = self.alloc_at(v, s_entry);
                    if src != dst {
                        moves.push((src, dst, v));
                    }
                }
                let params = func.block_params(s);
                let args = func.branch_blockparams(b, branch, succ_idx);
                debug_assert_eq!(params.len(), args.len());
                for (&param, &arg) in params.iter().zip(args.iter()) {
                    let src = self.alloc_at(arg, out_pos);
                    let dst = self.alloc_at(param, s_entry);
                    if src != dst {
                        moves.push((src, dst, param));
                    }
                }
                if moves.is_empty() {
                    continue;
                }

                if num_succs == 1 {
                    for (src, dst, v) in moves {
                        self.insert_move(out_pos, MovePrio::OutEdge, src, dst, v);
                    }
                } else if func.block_preds(s).len() == 1 {
                    for (src, dst, v) in moves {
                        self.insert_move(s_entry, MovePrio::InEdge, src, dst, v);
                    }
                } else {
                    // Critical edge: neither endpoint can host the
                    // moves. Resolve them here and hand them to the
                    // client to place on the split edge.
                    let mut edits: Vec<Edit> = vec![];
                    for &class in &[RegClass::Int, RegClass::Float] {
                        let class_moves: MoveVec<VReg> = moves
                            .iter()
                            .filter(|(_, _, v)| v.class() == class)
                            .copied()
                            .collect();
                        if class_moves.is_empty() {
                            continue;
                        }
                        let seq = self.resolve_move_batch(class_moves, class)?;
                        edits.extend(
                            seq.into_iter()
                                .map(|(from, to, vreg)| Edit::Move { from, to, vreg }),
                        );
                    }
                    self.edge_moves.push(EdgeMoves {
                        from: b,
                        to: s,
                        moves: edits,
                    });
                }
            }
        }
        self.edge_moves.sort_by_key(|em| (em.from, em.to));
        Ok(())
    }

    /// Order all recorded moves into the final edit list. Moves at
    /// one program point execute in priority order; moves within one
    /// (point, priority, class) group are a parallel-move set and go
    /// through cycle breaking and stack-to-stack expansion.
    pub fn schedule_inserted_moves(&mut self) -> Result<(), RegAllocError> {
        let mut moves = core::mem::take(&mut self.inserted_moves);
        moves.sort_by_key(|m| (m.pos.to_index(), m.prio));

        let mut i = 0;
        while i < moves.len() {
            let mut j = i + 1;
            while j < moves.len() && moves[j].pos == moves[i].pos && moves[j].prio == moves[i].prio
            {
                j += 1;
            }
            let pos = moves[i].pos;
            for &class in &[RegClass::Int, RegClass::Float] {
                let class_moves: MoveVec<VReg> = moves[i..j]
                    .iter()
                    .filter(|m| m.to_vreg.class() == class)
                    .map(|m| (m.from, m.to, m.to_vreg))
                    .collect();
                if class_moves.is_empty() {
                    continue;
                }
                let seq = self.resolve_move_batch(class_moves, class)?;
                for (from, to, vreg) in seq {
                    self.edits.push((pos, Edit::Move { from, to, vreg }));
                }
            }
            i = j;
        }
        Ok(())
    }

    /// Resolve one parallel-move set of a single class into a
    /// sequence of simple moves: break cycles through the class
    /// scratch register (or an extra stackslot), and expand any
    /// stack-to-stack moves through a register.
    fn resolve_move_batch(
        &mut self,
        batch: MoveVec<VReg>,
        class: RegClass,
    ) -> Result<MoveVec<VReg>, RegAllocError> {
        let mut parallel = ParallelMoves::new();
        for &(from, to, vreg) in &batch {
            parallel.add(from, to, vreg);
        }
        let resolved = parallel.resolve();

        let scratch = self.scratch_for(class);
        let victim = self.victim_for(class);
        let size = self.func.spillslot_size(class);
        let mut num_spillslots = self.num_spillslots;
        let mut extra = core::mem::take(&mut self.extra_spillslots_by_class[class as usize]);
        let mut next_extra = 0;

        let result = {
            // The dedicated scratch register is never allocatable, so
            // it is always free; hand it out at most once.
            let mut scratch_iter = scratch.into_iter();
            let find_free_reg = || scratch_iter.next().map(Allocation::reg);
            // Extra stackslots are scratch-only and reusable across
            // batches; allocate more only when a batch needs them.
            let get_stackslot = || {
                if next_extra < extra.len() {
                    let a = extra[next_extra];
                    next_extra += 1;
                    a
                } else {
                    let offset = (num_spillslots + size - 1) / size * size;
                    num_spillslots = offset + size;
                    let a = Allocation::stack(SpillSlot::new(offset));
                    extra.push(a);
                    next_extra += 1;
                    a
                }
            };
            ScratchResolver::new(
                find_free_reg,
                get_stackslot,
                |a: Allocation| a.is_stack(),
                victim,
                class,
            )
            .compute(resolved)
        };

        self.extra_spillslots_by_class[class as usize] = extra;
        self.num_spillslots = num_spillslots;
        result
    }
}
