/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Post-allocation self-check, enabled by `RegallocOptions::verify`:
//! no two values may occupy one register or one spill slot at the
//! same program point, every interval must have a location, and every
//! register-constrained use must have received a register.

use super::data::{Env, Interval};
use crate::{
    Function, InvariantViolation, OperandConstraint, ProgPoint, RegAllocError,
};

fn violation(it: &Interval, pos: ProgPoint, message: &'static str) -> RegAllocError {
    RegAllocError::Invariant(InvariantViolation {
        vreg: it.vreg,
        pos,
        ranges: it.ranges.iter().map(|r| (r.from, r.to)).collect(),
        message,
    })
}

impl<'a, F: Function> Env<'a, F> {
    pub fn verify_allocation(&self) -> Result<(), RegAllocError> {
        // Each interval with any lifetime must have ended up
        // somewhere, and register-constrained uses must have a
        // register. (Fixed-constraint uses are satisfied by fix-up
        // moves regardless of the interval's own location.)
        for it in self.intervals.iter() {
            if it.ranges.is_empty() || it.is_fixed() {
                continue;
            }
            if !it.allocation.is_some() {
                return Err(violation(it, it.from(), "interval has no location"));
            }
            for u in &it.uses {
                if !it.covers(u.pos) && u.pos != it.to() {
                    return Err(violation(it, u.pos, "use outside interval"));
                }
                if u.constraint == OperandConstraint::Reg && !it.allocation.is_reg() {
                    return Err(violation(it, u.pos, "register-constrained use on stack"));
                }
            }
        }

        // No two intervals in one register may overlap. Fixed pin
        // intervals participate: a value may not occupy a register
        // across a point where the program requires that register.
        let mut reg_ranges: Vec<(usize, u32, u32, usize)> = vec![];
        for (idx, it) in self.intervals.iter().enumerate() {
            if it.preg.is_valid() {
                for r in &it.ranges {
                    reg_ranges.push((
                        it.preg.index(),
                        r.from.to_index(),
                        r.to.to_index(),
                        idx,
                    ));
                }
            }
        }
        reg_ranges.sort_unstable();
        for pair in reg_ranges.windows(2) {
            let (p0, _, to0, _) = pair[0];
            let (p1, from1, _, idx1) = pair[1];
            if p0 == p1 && from1 < to0 {
                let it = &self.intervals[super::data::IntervalIndex::new(idx1)];
                return Err(violation(
                    it,
                    ProgPoint::from_index(from1),
                    "two values in one register",
                ));
            }
        }

        // No two vregs may share a spill slot while both live. (Slots
        // are canonical per vreg, so only a slot-assignment bug could
        // trip this.)
        let mut slot_ranges: Vec<(usize, u32, u32, usize)> = vec![];
        for (idx, it) in self.intervals.iter().enumerate() {
            if it.allocation.is_stack() {
                if let Some(slot) = it.allocation.as_stack() {
                    for r in &it.ranges {
                        slot_ranges.push((
                            slot.index(),
                            r.from.to_index(),
                            r.to.to_index(),
                            idx,
                        ));
                    }
                }
            }
        }
        slot_ranges.sort_unstable();
        for pair in slot_ranges.windows(2) {
            let (s0, _, to0, idx0) = pair[0];
            let (s1, from1, _, idx1) = pair[1];
            let v0 = self.intervals[super::data::IntervalIndex::new(idx0)].vreg;
            let it1 = &self.intervals[super::data::IntervalIndex::new(idx1)];
            if s0 == s1 && from1 < to0 && v0 != it1.vreg {
                return Err(violation(
                    it1,
                    ProgPoint::from_index(from1),
                    "two values in one spill slot",
                ));
            }
        }

        Ok(())
    }
}
