/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Redundant-move elimination over the final edit list. Tracks which
//! locations are known to hold copies of the same value and drops
//! moves whose source and destination already agree, most importantly
//! reloads from a spill slot into a register that still holds the
//! value, and re-stores of an unchanged value.

use super::data::Env;
use crate::{Allocation, Edit, FxHashMap, Function, Inst, OperandKind, ProgPoint};
use smallvec::SmallVec;

/// Tracks, per location, the canonical location of the value it
/// holds. A location with no entry is its own canonical. The map is
/// kept one level deep: entries always point directly at a location
/// that still holds the original value.
#[derive(Default)]
struct CopyTracker {
    canon: FxHashMap<Allocation, Allocation>,
    copies: FxHashMap<Allocation, SmallVec<[Allocation; 4]>>,
}

impl CopyTracker {
    fn clear(&mut self) {
        self.canon.clear();
        self.copies.clear();
    }

    fn resolve(&self, a: Allocation) -> Allocation {
        self.canon.get(&a).copied().unwrap_or(a)
    }

    /// The value in `a` is about to change: forget what `a` holds,
    /// and orphan any locations that named `a` as their canonical.
    fn clear_alloc(&mut self, a: Allocation) {
        if let Some(c) = self.canon.remove(&a) {
            if let Some(deps) = self.copies.get_mut(&c) {
                deps.retain(|&mut d| d != a);
            }
        }
        if let Some(deps) = self.copies.remove(&a) {
            for d in deps {
                self.canon.remove(&d);
            }
        }
    }

    /// Record a move; returns true when it is redundant.
    fn process_move(&mut self, from: Allocation, to: Allocation) -> bool {
        let c = self.resolve(from);
        if c == self.resolve(to) {
            return true;
        }
        self.clear_alloc(to);
        self.canon.insert(to, c);
        self.copies.entry(c).or_default().push(to);
        false
    }
}

impl<'a, F: Function> Env<'a, F> {
    /// Walk the edit list in program order, interleaving the register
    /// writes of the instructions themselves (defs, temps, clobbers),
    /// and drop moves that provably copy a value onto itself.
    pub fn eliminate_spill_moves(&mut self) {
        let func = self.func;
        let mut tracker = CopyTracker::default();
        let edits = core::mem::take(&mut self.edits);
        let mut kept: Vec<(ProgPoint, Edit)> = Vec::with_capacity(edits.len());

        let mut last_pos = ProgPoint::before(Inst::new(0));
        for (pos, edit) in edits {
            let block = self.cfginfo.insn_block[pos.inst().index()];
            if block != self.cfginfo.insn_block[last_pos.inst().index()] {
                // Values may arrive from other predecessors; known
                // copies do not survive a block boundary.
                tracker.clear();
                last_pos = self.cfginfo.block_entry[block.index()];
            }

            // Apply the writes of every instruction the program has
            // passed since the previous edit, i.e. those whose After
            // point lies in (last_pos, pos].
            let mut i = last_pos.inst();
            loop {
                let after = ProgPoint::after(i);
                if after > pos {
                    break;
                }
                if after > last_pos {
                    if func.is_safepoint(i) {
                        // A collector may relocate references here.
                        tracker.clear();
                    } else {
                        let offset = self.inst_alloc_offsets[i.index()] as usize;
                        for (k, op) in func.inst_operands(i).iter().enumerate() {
                            match op.kind() {
                                OperandKind::Def | OperandKind::Temp => {
                                    tracker.clear_alloc(self.allocs[offset + k]);
                                }
                                OperandKind::Use => {}
                            }
                        }
                        for &p in func.inst_clobbers(i) {
                            tracker.clear_alloc(Allocation::reg(p));
                        }
                    }
                }
                i = i.next();
            }
            last_pos = pos;

            let Edit::Move { from, to, vreg } = edit;
            if tracker.process_move(from, to) {
                trace!("elide: {:?} {} -> {}", pos, from, to);
                self.stats.moves_elided += 1;
            } else {
                kept.push((pos, Edit::Move { from, to, vreg }));
            }
        }
        self.edits = kept;

        // Edge-move lists execute on a fresh edge block; each gets
        // its own clean tracking state.
        let mut edge_moves = core::mem::take(&mut self.edge_moves);
        for em in &mut edge_moves {
            tracker.clear();
            let mut kept: Vec<Edit> = Vec::with_capacity(em.moves.len());
            for edit in em.moves.drain(..) {
                let Edit::Move { from, to, vreg } = edit;
                if tracker.process_move(from, to) {
                    self.stats.moves_elided += 1;
                } else {
                    kept.push(Edit::Move { from, to, vreg });
                }
            }
            em.moves = kept;
        }
        self.edge_moves = edge_moves;
    }
}
