/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Lifetime intervals and the allocator environment.

use crate::cfg::CFGInfo;
use crate::bitset::BitSet;
use crate::{
    Allocation, EdgeMoves, Edit, Function, MachineEnv, OperandConstraint, PReg, ProgPoint,
    RegClass, RegallocOptions, SpillSlot, VReg,
};
use core::cmp::Reverse;
use smallvec::{smallvec, SmallVec};
use std::collections::BinaryHeap;

/// A range from `from` (inclusive) to `to` (exclusive) in program
/// points over which a lifetime interval needs its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeRange {
    pub from: ProgPoint,
    pub to: ProgPoint,
}

impl CodeRange {
    #[inline(always)]
    pub fn contains_point(&self, pos: ProgPoint) -> bool {
        pos >= self.from && pos < self.to
    }

    #[inline(always)]
    pub fn overlaps(&self, other: &Self) -> bool {
        other.to > self.from && other.from < self.to
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        (self.to.to_index() - self.from.to_index()) as usize
    }
}

/// A recorded mention of a vreg at a program point, with the
/// constraint the mention carries. Use positions drive split and
/// spill decisions: a `Reg` or `FixedReg` constraint means the value
/// must be in a register at that point.
#[derive(Clone, Copy, Debug)]
pub struct Use {
    pub pos: ProgPoint,
    pub constraint: OperandConstraint,
}

define_index!(IntervalIndex, LiveIntervals, Interval);

/// A lifetime interval: a set of disjoint, sorted `CodeRange`s over
/// which one value (or one physical register's pin) needs a single
/// location.
///
/// Virtual intervals belong to a vreg; splitting divides a vreg's
/// lifetime into several sibling intervals, each with its own
/// allocation. Fixed intervals (`vreg` invalid) pin one physical
/// register at the points where the program requires that specific
/// register.
#[derive(Clone, Debug)]
pub struct Interval {
    /// The vreg this interval carries, or invalid for a fixed
    /// (register-pin) interval.
    pub vreg: VReg,
    /// For fixed intervals, the pinned register. For virtual
    /// intervals, the register assigned by the walk, if any.
    pub preg: PReg,
    /// Disjoint ranges, sorted ascending (after `normalize`).
    pub ranges: SmallVec<[CodeRange; 4]>,
    /// Use positions within this interval, sorted ascending.
    pub uses: SmallVec<[Use; 4]>,
    /// The root interval of this vreg, or invalid if this is the root.
    pub parent: IntervalIndex,
    /// The final location of this interval.
    pub allocation: Allocation,
    /// Preferred register, if any: seeded from fixed constraints and
    /// from the register a split parent held.
    pub hint: PReg,
}

impl Interval {
    pub fn new(vreg: VReg) -> Self {
        Self {
            vreg,
            preg: PReg::invalid(),
            ranges: smallvec![],
            uses: smallvec![],
            parent: IntervalIndex::invalid(),
            allocation: Allocation::none(),
            hint: PReg::invalid(),
        }
    }

    pub fn new_fixed(preg: PReg) -> Self {
        Self {
            vreg: VReg::invalid(),
            preg,
            ranges: smallvec![],
            uses: smallvec![],
            parent: IntervalIndex::invalid(),
            allocation: Allocation::reg(preg),
            hint: PReg::invalid(),
        }
    }

    #[inline(always)]
    pub fn is_fixed(&self) -> bool {
        self.vreg.is_invalid()
    }

    #[inline(always)]
    pub fn class(&self) -> RegClass {
        if self.is_fixed() {
            self.preg.class()
        } else {
            self.vreg.class()
        }
    }

    /// First program point of the interval. Only meaningful once
    /// ranges are normalized (sorted ascending).
    #[inline(always)]
    pub fn from(&self) -> ProgPoint {
        debug_assert!(!self.ranges.is_empty());
        self.ranges[0].from
    }

    /// One past the last program point of the interval.
    #[inline(always)]
    pub fn to(&self) -> ProgPoint {
        debug_assert!(!self.ranges.is_empty());
        self.ranges[self.ranges.len() - 1].to
    }

    /// Does this interval need its value at `pos`?
    pub fn covers(&self, pos: ProgPoint) -> bool {
        let idx = self.ranges.partition_point(|r| r.to <= pos);
        idx < self.ranges.len() && self.ranges[idx].from <= pos
    }

    /// The first program point at which this interval and `other`
    /// both need their values, if any.
    pub fn first_intersection(&self, other: &Interval) -> Option<ProgPoint> {
        let (a, b) = (&self.ranges, &other.ranges);
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            if a[i].to <= b[j].from {
                i += 1;
            } else if b[j].to <= a[i].from {
                j += 1;
            } else {
                return Some(core::cmp::max(a[i].from, b[j].from));
            }
        }
        None
    }

    /// The position of the next use at or after `pos` whose
    /// constraint is at least `min_constraint`.
    pub fn next_use_on_or_after(
        &self,
        pos: ProgPoint,
        min_constraint: OperandConstraint,
    ) -> Option<ProgPoint> {
        let idx = self.uses.partition_point(|u| u.pos < pos);
        self.uses[idx..]
            .iter()
            .find(|u| u.constraint >= min_constraint)
            .map(|u| u.pos)
    }

    // The three methods below are used while building intervals
    // backward (blocks in reverse order, instructions in reverse
    // within each): ranges and uses are accumulated in descending
    // position order and flipped once by `normalize`.

    /// Add a range while building backward. Merges with the
    /// lowest-position range seen so far when overlapping or
    /// adjacent.
    pub fn add_range(&mut self, from: ProgPoint, to: ProgPoint) {
        debug_assert!(from < to);
        if let Some(first) = self.ranges.last_mut() {
            if to >= first.from {
                debug_assert!(from <= first.from);
                first.from = from;
                first.to = core::cmp::max(first.to, to);
                return;
            }
        }
        self.ranges.push(CodeRange { from, to });
    }

    /// Trim the start of the lowest-position range to a def position
    /// while building backward.
    pub fn set_from(&mut self, pos: ProgPoint) {
        debug_assert!(!self.ranges.is_empty());
        let first = self.ranges.last_mut().unwrap();
        debug_assert!(pos < first.to);
        first.from = pos;
    }

    pub fn add_use(&mut self, pos: ProgPoint, constraint: OperandConstraint) {
        self.uses.push(Use { pos, constraint });
    }

    /// Flip build-order (descending) ranges and uses to ascending.
    pub fn normalize(&mut self) {
        self.ranges.reverse();
        self.uses.reverse();
        if cfg!(debug_assertions) {
            for pair in self.ranges.windows(2) {
                debug_assert!(pair[0].to <= pair[1].from);
            }
            for pair in self.uses.windows(2) {
                debug_assert!(pair[0].pos <= pair[1].pos);
            }
        }
    }
}

/// Ordering of inserted moves that share a program point. Moves in
/// distinct priority groups execute as separate sequential batches;
/// moves within one group form a single parallel-move set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MovePrio {
    /// Moves hosted at a successor block's entry for an incoming
    /// edge.
    InEdge = 0,
    /// Moves out of a fixed def register into the value's home, just
    /// after the defining instruction.
    FixedDef = 1,
    /// Split-connection moves (spill stores, reloads, reg-to-reg
    /// shuffles between interval siblings).
    Regular = 2,
    /// Moves into fixed use registers, just before the consuming
    /// instruction.
    FixedUse = 3,
    /// Moves hosted at a predecessor block's end for an outgoing
    /// edge.
    OutEdge = 4,
}

/// A move recorded during allocation/resolution, to be scheduled
/// into the final edit list.
#[derive(Clone, Copy, Debug)]
pub struct InsertedMove {
    pub pos: ProgPoint,
    pub prio: MovePrio,
    pub from: Allocation,
    pub to: Allocation,
    pub to_vreg: VReg,
}

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stats {
    pub num_intervals: usize,
    pub num_splits: usize,
    pub num_spills: usize,
    pub num_evictions: usize,
    pub moves_inserted: usize,
    pub moves_elided: usize,
    pub num_safepoint_records: usize,
}

pub struct Env<'a, F: Function> {
    pub func: &'a F,
    pub env: &'a MachineEnv,
    pub cfginfo: CFGInfo,

    /// VReg for each vreg index, recorded from operand mentions so
    /// that liveness bitsets (which carry bare indices) can be
    /// mapped back to typed vregs.
    pub vregs: Vec<VReg>,

    pub liveins: Vec<BitSet>,
    pub liveouts: Vec<BitSet>,

    pub intervals: LiveIntervals,
    /// Intervals of each vreg, sorted by start point. Index 0 is the
    /// root; splits add siblings.
    pub vreg_intervals: Vec<SmallVec<[IntervalIndex; 4]>>,
    /// Fixed (pin) interval for each PReg index, created on demand.
    pub fixed_intervals: Vec<IntervalIndex>,

    /// Canonical spill slot for each vreg, allocated on first spill.
    pub vreg_spillslot: Vec<SpillSlot>,
    pub num_spillslots: usize,
    /// Scratch stackslots handed out during move scheduling, per
    /// class, reused across batches.
    pub extra_spillslots_by_class: [Vec<Allocation>; 2],

    /// All allocatable registers per class, in probe order: preferred
    /// first, then non-preferred.
    pub allocatable_by_class: [Vec<PReg>; 2],

    /// Worklist of intervals, ordered by (start, vreg, index) so the
    /// walk and all of its tie-breaks are deterministic.
    pub unhandled: BinaryHeap<Reverse<(u32, u32, u32)>>,
    pub active: Vec<IntervalIndex>,
    pub inactive: Vec<IntervalIndex>,

    pub inserted_moves: Vec<InsertedMove>,
    pub edge_moves: Vec<EdgeMoves>,

    pub allocs: Vec<Allocation>,
    pub inst_alloc_offsets: Vec<u32>,
    pub edits: Vec<(ProgPoint, Edit)>,
    pub safepoint_locations: Vec<(ProgPoint, Allocation)>,

    pub stats: Stats,
    pub opts: RegallocOptions,
}

impl<'a, F: Function> Env<'a, F> {
    pub fn new(func: &'a F, env: &'a MachineEnv, cfginfo: CFGInfo, opts: RegallocOptions) -> Self {
        let allocatable_by_class = [
            env.preferred_regs_by_class[0]
                .iter()
                .chain(env.non_preferred_regs_by_class[0].iter())
                .copied()
                .collect(),
            env.preferred_regs_by_class[1]
                .iter()
                .chain(env.non_preferred_regs_by_class[1].iter())
                .copied()
                .collect(),
        ];
        Self {
            func,
            env,
            cfginfo,
            vregs: vec![VReg::invalid(); func.num_vregs()],
            liveins: Vec::with_capacity(func.num_blocks()),
            liveouts: Vec::with_capacity(func.num_blocks()),
            intervals: LiveIntervals::with_capacity(func.num_vregs() * 3 / 2),
            vreg_intervals: vec![smallvec![]; func.num_vregs()],
            fixed_intervals: vec![IntervalIndex::invalid(); PReg::MAX_INDEX],
            vreg_spillslot: vec![SpillSlot::invalid(); func.num_vregs()],
            num_spillslots: 0,
            extra_spillslots_by_class: [vec![], vec![]],
            allocatable_by_class,
            unhandled: BinaryHeap::with_capacity(func.num_vregs()),
            active: vec![],
            inactive: vec![],
            inserted_moves: vec![],
            edge_moves: vec![],
            allocs: vec![],
            inst_alloc_offsets: vec![],
            edits: vec![],
            safepoint_locations: vec![],
            stats: Stats::default(),
            opts,
        }
    }

    /// Get (creating on demand) the root interval for a vreg.
    pub fn vreg_interval(&mut self, vreg: VReg) -> IntervalIndex {
        if self.vreg_intervals[vreg.vreg()].is_empty() {
            let idx = self.intervals.push(Interval::new(vreg));
            self.vreg_intervals[vreg.vreg()].push(idx);
            self.stats.num_intervals += 1;
        }
        self.vreg_intervals[vreg.vreg()][0]
    }

    /// Get (creating on demand) the fixed interval pinning a preg.
    pub fn fixed_interval(&mut self, preg: PReg) -> IntervalIndex {
        if self.fixed_intervals[preg.index()].is_invalid() {
            let idx = self.intervals.push(Interval::new_fixed(preg));
            self.fixed_intervals[preg.index()] = idx;
        }
        self.fixed_intervals[preg.index()]
    }

    /// The canonical spill slot for a vreg, allocated at first use.
    /// Every spilled part of one vreg shares this one slot.
    pub fn spillslot_for(&mut self, vreg: VReg) -> SpillSlot {
        if self.vreg_spillslot[vreg.vreg()].is_invalid() {
            let size = self.func.spillslot_size(vreg.class());
            // Align the slot index to its size.
            let offset = (self.num_spillslots + size - 1) / size * size;
            self.num_spillslots = offset + size;
            self.vreg_spillslot[vreg.vreg()] = SpillSlot::new(offset);
        }
        self.vreg_spillslot[vreg.vreg()]
    }

    /// Split `idx` at `pos`, producing a sibling interval that takes
    /// over all ranges and uses at or after `pos`. Returns the new
    /// sibling's index.
    pub fn split_interval(&mut self, idx: IntervalIndex, pos: ProgPoint) -> IntervalIndex {
        let it = &mut self.intervals[idx];
        debug_assert!(pos > it.from() && pos < it.to());

        let mut split_idx = it.ranges.partition_point(|r| r.to <= pos);
        debug_assert!(split_idx < it.ranges.len());
        let mut child_ranges: SmallVec<[CodeRange; 4]> = smallvec![];
        if it.ranges[split_idx].from < pos {
            // `pos` lands inside a range: divide it.
            child_ranges.push(CodeRange {
                from: pos,
                to: it.ranges[split_idx].to,
            });
            it.ranges[split_idx].to = pos;
            split_idx += 1;
        }
        child_ranges.extend(it.ranges.drain(split_idx..));
        debug_assert!(!child_ranges.is_empty());

        let use_idx = it.uses.partition_point(|u| u.pos < pos);
        let child_uses: SmallVec<[Use; 4]> = it.uses.drain(use_idx..).collect();

        let vreg = it.vreg;
        let parent = if it.parent.is_valid() { it.parent } else { idx };
        let hint = if it.preg.is_valid() { it.preg } else { it.hint };
        let child = Interval {
            vreg,
            preg: PReg::invalid(),
            ranges: child_ranges,
            uses: child_uses,
            parent,
            allocation: Allocation::none(),
            hint,
        };
        let child_idx = self.intervals.push(child);

        let intervals = &self.intervals;
        let list = &mut self.vreg_intervals[vreg.vreg()];
        let insert_at = list.partition_point(|&i| intervals[i].from() <= pos);
        list.insert(insert_at, child_idx);

        self.stats.num_splits += 1;
        trace!(
            "split {:?} of {} at {:?} -> {:?}",
            idx,
            vreg,
            pos,
            child_idx
        );
        child_idx
    }

    /// The interval of `vreg` covering `pos`.
    pub fn interval_at(&self, vreg: VReg, pos: ProgPoint) -> IntervalIndex {
        let list = &self.vreg_intervals[vreg.vreg()];
        debug_assert!(!list.is_empty());
        // Last interval starting at or before `pos`.
        let idx = list.partition_point(|&i| self.intervals[i].from() <= pos);
        debug_assert!(idx > 0, "no interval of {} covers {:?}", vreg, pos);
        list[idx - 1]
    }

    /// The location of `vreg` at `pos`.
    pub fn alloc_at(&self, vreg: VReg, pos: ProgPoint) -> Allocation {
        let it = &self.intervals[self.interval_at(vreg, pos)];
        debug_assert!(it.covers(pos), "{} has no location at {:?}", vreg, pos);
        debug_assert!(it.allocation.is_some());
        it.allocation
    }

    /// Record a move to be scheduled. Split-connection moves landing
    /// on an After point are hoisted to the Before point of the same
    /// instruction: such moves are always spill stores (the value is
    /// still present in the source at the Before point, and copying
    /// it out early cannot clobber anything), and hoisting keeps
    /// them clear of the instruction's own register writes.
    pub fn insert_move(
        &mut self,
        pos: ProgPoint,
        prio: MovePrio,
        from: Allocation,
        to: Allocation,
        to_vreg: VReg,
    ) {
        if from == to {
            return;
        }
        let pos = if prio == MovePrio::Regular && pos.pos() == crate::InstPosition::After {
            debug_assert!(to.is_stack());
            ProgPoint::before(pos.inst())
        } else {
            pos
        };
        trace!(
            "insert_move: {:?} prio {:?}: {} -> {} ({})",
            pos,
            prio,
            from,
            to,
            to_vreg
        );
        self.inserted_moves.push(InsertedMove {
            pos,
            prio,
            from,
            to,
            to_vreg,
        });
        self.stats.moves_inserted += 1;
    }

    /// Push an interval into the unhandled worklist.
    pub fn enqueue(&mut self, idx: IntervalIndex) {
        let it = &self.intervals[idx];
        debug_assert!(!it.ranges.is_empty());
        let key = (
            it.from().to_index(),
            it.vreg.vreg() as u32,
            idx.raw_u32(),
        );
        self.unhandled.push(Reverse(key));
    }

    pub fn pop_unhandled(&mut self) -> Option<IntervalIndex> {
        self.unhandled.pop().map(|Reverse((_, _, idx))| IntervalIndex(idx))
    }

    pub fn scratch_for(&self, class: RegClass) -> Option<PReg> {
        self.env.scratch_by_class[class as usize]
    }

    /// Last-resort register of a class for stack-to-stack shuffles.
    pub fn victim_for(&self, class: RegClass) -> Option<PReg> {
        self.allocatable_by_class[class as usize].first().copied()
    }
}
