/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! The linear-scan walk: process intervals in start order, keeping
//! working sets of active and inactive intervals, allocating free
//! registers where possible and splitting/spilling under pressure.

use super::data::{Env, IntervalIndex};
use crate::{
    Allocation, Function, InstPosition, OperandConstraint, PReg, ProgPoint, RegAllocError,
};
use smallvec::SmallVec;

impl<'a, F: Function> Env<'a, F> {
    pub fn walk_intervals(&mut self) -> Result<(), RegAllocError> {
        // Seed the worklist with all root virtual intervals, and the
        // working sets with the fixed pin intervals.
        for v in 0..self.func.num_vregs() {
            if let Some(&root) = self.vreg_intervals[v].first() {
                if !self.intervals[root].ranges.is_empty() {
                    self.enqueue(root);
                }
            }
        }
        for pi in 0..PReg::MAX_INDEX {
            let fi = self.fixed_intervals[pi];
            if fi.is_valid() {
                self.inactive.push(fi);
            }
        }

        while let Some(cur) = self.pop_unhandled() {
            let pos = self.intervals[cur].from();
            trace!(
                "walk: processing {:?} ({}) at {:?}",
                cur,
                self.intervals[cur].vreg,
                pos
            );
            self.advance_to(pos);
            if !self.try_allocate_free_reg(cur) {
                self.allocate_blocked_reg(cur)?;
            }
        }
        Ok(())
    }

    /// Update the active/inactive working sets for the new scan
    /// position: expired intervals leave, intervals in a lifetime
    /// hole become inactive, resuming intervals become active.
    fn advance_to(&mut self, pos: ProgPoint) {
        let mut i = 0;
        while i < self.active.len() {
            let it = &self.intervals[self.active[i]];
            if it.to() <= pos {
                self.active.swap_remove(i);
            } else if !it.covers(pos) {
                let idx = self.active.swap_remove(i);
                self.inactive.push(idx);
            } else {
                i += 1;
            }
        }
        let mut i = 0;
        while i < self.inactive.len() {
            let it = &self.intervals[self.inactive[i]];
            if it.to() <= pos {
                self.inactive.swap_remove(i);
            } else if it.covers(pos) {
                let idx = self.inactive.swap_remove(i);
                self.active.push(idx);
            } else {
                i += 1;
            }
        }
    }

    fn assign(&mut self, idx: IntervalIndex, preg: PReg) {
        trace!("assign: {:?} ({}) -> {}", idx, self.intervals[idx].vreg, preg);
        self.intervals[idx].preg = preg;
        self.intervals[idx].allocation = Allocation::reg(preg);
        self.active.push(idx);
    }

    /// Try to place `cur` in a register that is free for its whole
    /// lifetime, or free long enough that splitting at the point the
    /// register becomes busy is worthwhile.
    fn try_allocate_free_reg(&mut self, cur: IntervalIndex) -> bool {
        let class = self.intervals[cur].class();
        let regs = &self.allocatable_by_class[class as usize];
        if regs.is_empty() {
            return false;
        }

        // For each register: the position at which it stops being
        // free, from the scan position onward.
        let mut free_until = [u32::MAX; PReg::MAX_INDEX];
        for &idx in &self.active {
            let it = &self.intervals[idx];
            if it.class() == class && it.preg.is_valid() {
                free_until[it.preg.index()] = 0;
            }
        }
        for &idx in &self.inactive {
            let it = &self.intervals[idx];
            if it.class() != class || it.preg.is_invalid() {
                continue;
            }
            if let Some(isect) = self.intervals[cur].first_intersection(it) {
                let fu = &mut free_until[it.preg.index()];
                *fu = (*fu).min(isect.to_index());
            }
        }

        let cur_from = self.intervals[cur].from().to_index();
        let cur_to = self.intervals[cur].to().to_index();

        // Pick the register free the longest; ties go to the earliest
        // register in probe order. The hint register wins outright if
        // it can hold the whole interval.
        let mut best: Option<PReg> = None;
        let mut best_free = 0;
        for &p in regs {
            let fu = free_until[p.index()];
            if fu > best_free {
                best_free = fu;
                best = Some(p);
            }
        }
        let hint = self.intervals[cur].hint;
        if hint.is_valid()
            && free_until[hint.index()] >= cur_to
            && self.allocatable_by_class[class as usize].contains(&hint)
        {
            best = Some(hint);
            best_free = free_until[hint.index()];
        }

        let p = match best {
            Some(p) => p,
            None => return false,
        };

        if best_free >= cur_to {
            // Free for the whole lifetime.
            self.assign(cur, p);
            return true;
        }
        if best_free > cur_from {
            // Free for a useful prefix: take it and split at the
            // point the register becomes busy.
            let split_pos = ProgPoint::from_index(best_free);
            debug_assert_eq!(split_pos.pos(), InstPosition::Before);
            let child = self.split_interval(cur, split_pos);
            self.enqueue(child);
            self.assign(cur, p);
            return true;
        }
        false
    }

    /// All registers are busy at the interval's start: either spill
    /// `cur` until its first register-requiring use, or evict the
    /// holder whose next register-requiring use is furthest away.
    fn allocate_blocked_reg(&mut self, cur: IntervalIndex) -> Result<(), RegAllocError> {
        let class = self.intervals[cur].class();
        let regs: SmallVec<[PReg; 8]> = self.allocatable_by_class[class as usize]
            .iter()
            .copied()
            .collect();
        let cur_from = self.intervals[cur].from();
        let cur_to = self.intervals[cur].to();
        let first_must = self.intervals[cur].next_use_on_or_after(cur_from, OperandConstraint::Reg);

        // use_pos: the next position at which each register is
        // *needed* in a register by its current holder(s).
        // block_pos: the position at which each register is pinned by
        // a fixed interval and cannot be taken past at all.
        let mut use_pos = [u32::MAX; PReg::MAX_INDEX];
        let mut block_pos = [u32::MAX; PReg::MAX_INDEX];
        for &idx in &self.active {
            let it = &self.intervals[idx];
            if it.class() != class || it.preg.is_invalid() {
                continue;
            }
            let p = it.preg.index();
            if it.is_fixed() {
                use_pos[p] = 0;
                block_pos[p] = 0;
            } else if let Some(u) = it.next_use_on_or_after(cur_from, OperandConstraint::Reg) {
                use_pos[p] = use_pos[p].min(u.to_index());
            }
        }
        for &idx in &self.inactive {
            let it = &self.intervals[idx];
            if it.class() != class || it.preg.is_invalid() {
                continue;
            }
            if let Some(isect) = self.intervals[cur].first_intersection(it) {
                let p = it.preg.index();
                if it.is_fixed() {
                    block_pos[p] = block_pos[p].min(isect.to_index());
                    use_pos[p] = use_pos[p].min(isect.to_index());
                } else if let Some(u) = it.next_use_on_or_after(isect, OperandConstraint::Reg) {
                    use_pos[p] = use_pos[p].min(u.to_index());
                }
            }
        }

        // The candidate is the register whose holders can wait the
        // longest; ties go to probe order.
        let mut best: Option<PReg> = None;
        let mut best_up = 0;
        for &p in &regs {
            let up = use_pos[p.index()];
            if up > best_up {
                best_up = up;
                best = Some(p);
            }
        }

        let fm = match first_must {
            None => {
                // No use ever requires a register: spill the whole
                // interval to its canonical slot.
                let slot = self.spillslot_for(self.intervals[cur].vreg);
                self.intervals[cur].allocation = Allocation::stack(slot);
                self.stats.num_spills += 1;
                trace!("blocked: {:?} fully spilled to {}", cur, slot);
                return Ok(());
            }
            Some(fm) => fm,
        };

        let evictable = match best {
            // Eviction must buy us the register up to (at least) our
            // first required use, and strictly past the current
            // position: a holder that itself requires the register
            // right here cannot be evicted.
            Some(_) => best_up >= fm.to_index() && best_up > cur_from.to_index(),
            None => false,
        };

        if !evictable {
            if fm == cur_from {
                // More values need registers at this point than the
                // class has registers.
                return Err(RegAllocError::TooManyLiveRegs);
            }
            // Spill until the first use that requires a register.
            let slot = self.spillslot_for(self.intervals[cur].vreg);
            self.intervals[cur].allocation = Allocation::stack(slot);
            self.stats.num_spills += 1;
            let child = self.split_interval(cur, fm);
            self.enqueue(child);
            trace!("blocked: {:?} spilled until {:?}", cur, fm);
            return Ok(());
        }

        let p = best.unwrap();

        // A fixed pin further along limits how far we can carry the
        // register; split there and requeue the rest.
        if block_pos[p.index()] < cur_to.to_index() {
            let split_pos = ProgPoint::from_index(block_pos[p.index()]);
            debug_assert_eq!(split_pos.pos(), InstPosition::Before);
            debug_assert!(split_pos > cur_from);
            let child = self.split_interval(cur, split_pos);
            self.enqueue(child);
        }

        // Evict the current holders of `p`.
        let active_holders: SmallVec<[IntervalIndex; 4]> = self
            .active
            .iter()
            .copied()
            .filter(|&idx| {
                let it = &self.intervals[idx];
                !it.is_fixed() && it.class() == class && it.preg == p
            })
            .collect();
        for idx in active_holders {
            self.evict_active(idx, cur_from);
        }

        let inactive_holders: SmallVec<[(IntervalIndex, ProgPoint); 4]> = self
            .inactive
            .iter()
            .copied()
            .filter_map(|idx| {
                let it = &self.intervals[idx];
                if !it.is_fixed() && it.class() == class && it.preg == p {
                    self.intervals[cur]
                        .first_intersection(it)
                        .map(|isect| (idx, isect))
                } else {
                    None
                }
            })
            .collect();
        for (idx, isect) in inactive_holders {
            // The holder keeps its register through its current hole;
            // it loses it where the conflict begins. That point is a
            // block entry, so the resolver will route the value.
            debug_assert!(isect > self.intervals[idx].from());
            let child = self.split_interval(idx, isect);
            self.spill_or_requeue(child);
            self.stats.num_evictions += 1;
        }

        self.assign(cur, p);
        Ok(())
    }

    /// Take the register away from an active holder at `at`.
    fn evict_active(&mut self, idx: IntervalIndex, at: ProgPoint) {
        trace!("evict: {:?} ({}) at {:?}", idx, self.intervals[idx].vreg, at);
        let target = if at > self.intervals[idx].from() {
            // The holder keeps the register up to `at`.
            self.split_interval(idx, at)
        } else {
            // The holder starts here and loses the register
            // entirely.
            self.active.retain(|&i| i != idx);
            self.intervals[idx].preg = PReg::invalid();
            self.intervals[idx].allocation = Allocation::none();
            idx
        };
        self.spill_or_requeue(target);
        self.stats.num_evictions += 1;
    }

    /// Place an unallocated interval fragment: spill it to its
    /// canonical slot up to its next register-requiring use (whence a
    /// further sibling is requeued), or requeue it whole if a
    /// register is required immediately.
    fn spill_or_requeue(&mut self, target: IntervalIndex) {
        let t_from = self.intervals[target].from();
        match self.intervals[target].next_use_on_or_after(t_from, OperandConstraint::Reg) {
            None => {
                let slot = self.spillslot_for(self.intervals[target].vreg);
                self.intervals[target].allocation = Allocation::stack(slot);
                self.stats.num_spills += 1;
            }
            Some(mu) if mu > t_from => {
                let slot = self.spillslot_for(self.intervals[target].vreg);
                self.intervals[target].allocation = Allocation::stack(slot);
                self.stats.num_spills += 1;
                let grandchild = self.split_interval(target, mu);
                self.enqueue(grandchild);
            }
            Some(_) => {
                self.enqueue(target);
            }
        }
    }
}
