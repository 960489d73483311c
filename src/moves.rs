/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Parallel-move resolution: turning a set of moves whose reads all
//! semantically precede all writes into an executable sequence of
//! simple moves, breaking cycles through a scratch location and
//! expanding stack-to-stack moves through a register.

use crate::{Allocation, PReg, RegAllocError, RegClass};
use core::fmt::Debug;
use smallvec::{smallvec, SmallVec};

#[inline(always)]
fn u64_key(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | (lo as u64)
}

/// A list of moves to be performed in sequence, with auxiliary data
/// attached to each.
pub type MoveVec<T> = SmallVec<[(Allocation, Allocation, T); 16]>;

/// A list of moves to be performed in sequence, like a `MoveVec<T>`,
/// except that an unchosen scratch space may occur as well,
/// represented by `Allocation::none()`.
#[derive(Clone, Debug)]
pub enum MoveVecWithScratch<T> {
    /// No scratch was actually used.
    NoScratch(MoveVec<T>),
    /// A scratch space was used.
    Scratch(MoveVec<T>),
}

/// A `ParallelMoves` represents a list of alloc-to-alloc moves that
/// must happen in parallel -- i.e., all reads of sources semantically
/// happen before all writes of destinations, and destinations are
/// allowed to overwrite sources. It can compute a list of sequential
/// moves that will produce the equivalent data movement, possibly
/// using a scratch register if one is necessary.
pub struct ParallelMoves<T: Clone + Copy + Default> {
    parallel_moves: MoveVec<T>,
}

impl<T: Clone + Copy + Default + PartialEq> ParallelMoves<T> {
    pub fn new() -> Self {
        Self {
            parallel_moves: smallvec![],
        }
    }

    pub fn add(&mut self, from: Allocation, to: Allocation, t: T) {
        self.parallel_moves.push((from, to, t));
    }

    pub fn is_empty(&self) -> bool {
        self.parallel_moves.is_empty()
    }

    fn sources_overlap_dests(&self) -> bool {
        // Assumes `parallel_moves` has already been sorted in `resolve()` below.
        for &(_, dst, _) in &self.parallel_moves {
            if self
                .parallel_moves
                .binary_search_by_key(&dst, |&(src, _, _)| src)
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Resolve the parallel-moves problem to a sequence of separate
    /// moves, such that the combined effect of the sequential moves
    /// is as-if all of the moves added to this `ParallelMoves`
    /// resolver happened in parallel.
    ///
    /// Sometimes, if there is a cycle, a scratch location is
    /// necessary to allow the moves to occur sequentially. In this
    /// case, `Allocation::none()` is returned to represent the
    /// scratch location; the caller chooses a concrete location for
    /// it afterward (see `ScratchResolver`).
    pub fn resolve(mut self) -> MoveVecWithScratch<T> {
        // Easy case: zero or one move. Just return our vec.
        if self.parallel_moves.len() <= 1 {
            return MoveVecWithScratch::NoScratch(self.parallel_moves);
        }

        // Sort moves by source so that we can efficiently test for
        // presence.
        self.parallel_moves
            .sort_by_key(|&(src, dst, _)| u64_key(src.bits(), dst.bits()));

        // Do any dests overlap sources? If not, we can also just
        // return the list.
        if !self.sources_overlap_dests() {
            return MoveVecWithScratch::NoScratch(self.parallel_moves);
        }

        // General case: some moves overwrite dests that other moves
        // read as sources. We'll use a general algorithm.
        //
        // *Important property*: because we expect that each location
        // has only one writer (otherwise the effect of the parallel
        // move is undefined), each move can only block one other move
        // (with its one source corresponding to the one writer of
        // that source). Thus, we *can only have simple cycles*: there
        // are no SCCs more complex than a ring of nodes. We leverage
        // this fact below to avoid having to do a full Tarjan SCC DFS
        // (with lowest-index computation, etc.): instead, as soon as
        // we find a cycle, we know we have the full cycle and we can
        // emit a cyclic-move sequence and continue.

        // Sort moves by destination and check that each destination
        // has only one writer.
        self.parallel_moves.sort_by_key(|&(_, dst, _)| dst);
        self.parallel_moves.dedup();
        if cfg!(debug_assertions) {
            let mut last_dst = None;
            for &(_, dst, _) in &self.parallel_moves {
                if last_dst.is_some() {
                    debug_assert!(last_dst.unwrap() != dst);
                }
                last_dst = Some(dst);
            }
        }

        // Construct a mapping from move indices to moves they must
        // come before. Any given move must come before a move that
        // overwrites its destination; we have moves sorted by dest
        // above so we can efficiently find such a move, if any.
        let mut must_come_before: SmallVec<[Option<usize>; 16]> =
            smallvec![None; self.parallel_moves.len()];
        for (i, &(src, _, _)) in self.parallel_moves.iter().enumerate() {
            if let Ok(move_to_dst_idx) = self
                .parallel_moves
                .binary_search_by_key(&src, |&(_, dst, _)| dst)
            {
                must_come_before[i] = Some(move_to_dst_idx);
            }
        }

        // Do a simple stack-based DFS and emit moves in postorder,
        // then reverse at the end for RPO. Unlike Tarjan's SCC
        // algorithm, we can emit a cycle as soon as we find one, as
        // noted above.
        let mut ret: MoveVec<T> = smallvec![];
        let mut stack: SmallVec<[usize; 16]> = smallvec![];
        let mut visited: SmallVec<[bool; 16]> = smallvec![false; self.parallel_moves.len()];
        let mut onstack: SmallVec<[bool; 16]> = smallvec![false; self.parallel_moves.len()];
        let mut scratch_used = false;

        stack.push(0);
        onstack[0] = true;
        loop {
            if stack.is_empty() {
                if let Some(next) = visited.iter().position(|&flag| !flag) {
                    stack.push(next);
                    onstack[next] = true;
                } else {
                    break;
                }
            }

            let top = *stack.last().unwrap();
            visited[top] = true;
            match must_come_before[top] {
                None => {
                    ret.push(self.parallel_moves[top]);
                    onstack[top] = false;
                    stack.pop();
                    while let Some(top) = stack.pop() {
                        ret.push(self.parallel_moves[top]);
                        onstack[top] = false;
                    }
                }
                Some(next) if visited[next] && !onstack[next] => {
                    ret.push(self.parallel_moves[top]);
                    onstack[top] = false;
                    stack.pop();
                    while let Some(top) = stack.pop() {
                        ret.push(self.parallel_moves[top]);
                        onstack[top] = false;
                    }
                }
                Some(next) if !visited[next] && !onstack[next] => {
                    stack.push(next);
                    onstack[next] = true;
                    continue;
                }
                Some(next) => {
                    // Found a cycle -- emit a cyclic-move sequence
                    // for the cycle on the top of stack, then normal
                    // moves below it. Recall that these moves will be
                    // reversed in sequence, so from the original
                    // parallel move set
                    //
                    //     { B := A, C := B, A := B }
                    //
                    // we will generate something like:
                    //
                    //     A := scratch
                    //     B := A
                    //     C := B
                    //     scratch := C
                    //
                    // which will become:
                    //
                    //     scratch := C
                    //     C := B
                    //     B := A
                    //     A := scratch
                    let mut last_dst = None;
                    let mut scratch_src = None;
                    while let Some(move_idx) = stack.pop() {
                        onstack[move_idx] = false;
                        let (mut src, dst, dst_t) = self.parallel_moves[move_idx];
                        if last_dst.is_none() {
                            scratch_src = Some(src);
                            src = Allocation::none();
                            scratch_used = true;
                        } else {
                            debug_assert_eq!(last_dst.unwrap(), src);
                        }
                        ret.push((src, dst, dst_t));

                        last_dst = Some(dst);

                        if move_idx == next {
                            break;
                        }
                    }
                    if let Some(src) = scratch_src {
                        ret.push((src, Allocation::none(), T::default()));
                    }
                }
            }
        }

        ret.reverse();

        if scratch_used {
            MoveVecWithScratch::Scratch(ret)
        } else {
            MoveVecWithScratch::NoScratch(ret)
        }
    }
}

impl<T> MoveVecWithScratch<T> {
    /// Fills in the scratch space, if needed, with the given
    /// register/allocation and returns a final list of moves. The
    /// scratch location must not occur anywhere in the parallel-move
    /// problem given to the resolver that produced this
    /// `MoveVecWithScratch`.
    pub fn with_scratch(self, scratch: Allocation) -> MoveVec<T> {
        match self {
            MoveVecWithScratch::NoScratch(moves) => moves,
            MoveVecWithScratch::Scratch(mut moves) => {
                for (src, dst, _) in &mut moves {
                    debug_assert!(
                        *src != scratch && *dst != scratch,
                        "Scratch location should not also be an actual source or dest of moves"
                    );
                    debug_assert!(
                        !(src.is_none() && dst.is_none()),
                        "Move resolution should not have produced a scratch-to-scratch move"
                    );
                    if src.is_none() {
                        *src = scratch;
                    }
                    if dst.is_none() {
                        *dst = scratch;
                    }
                }
                moves
            }
        }
    }

    /// Unwrap without a scratch register.
    pub fn without_scratch(self) -> Option<MoveVec<T>> {
        match self {
            MoveVecWithScratch::NoScratch(moves) => Some(moves),
            MoveVecWithScratch::Scratch(..) => None,
        }
    }

    /// Do we need a scratch register?
    pub fn needs_scratch(&self) -> bool {
        match self {
            MoveVecWithScratch::NoScratch(..) => false,
            MoveVecWithScratch::Scratch(..) => true,
        }
    }

    /// Do any moves go from stack to stack?
    pub fn stack_to_stack(&self, is_stack_alloc: impl Fn(Allocation) -> bool) -> bool {
        match self {
            MoveVecWithScratch::NoScratch(moves) | MoveVecWithScratch::Scratch(moves) => moves
                .iter()
                .any(|&(src, dst, _)| is_stack_alloc(src) && is_stack_alloc(dst)),
        }
    }
}

/// Final stage of move resolution: choosing concrete scratch
/// locations and ensuring that the final list of moves contains no
/// stack-to-stack moves.
///
/// Our general strategy is in two steps. First, we pick a scratch
/// location to stand in for cycle breaking. If the dedicated scratch
/// register of the class is available, we use it; otherwise we use an
/// extra stackslot. This is fine because at this step stack-to-stack
/// moves are still OK.
///
/// Then, we expand each stack-to-stack move into a stack-to-reg /
/// reg-to-stack pair. For this we need a real register: the dedicated
/// scratch register if it was not already consumed for cycle
/// breaking, or else a "victim" register of the class whose value we
/// save to another stackslot and restore around each expansion.
///
/// Sometimes move elision will be able to clean this up a bit. But,
/// for simplicity reasons, let's keep the concerns separated! So we
/// always do the full expansion above.
pub struct ScratchResolver<GetReg, GetStackSlot, IsStackAlloc>
where
    GetReg: FnMut() -> Option<Allocation>,
    GetStackSlot: FnMut() -> Allocation,
    IsStackAlloc: Fn(Allocation) -> bool,
{
    /// Closure that hands out the dedicated scratch register at most
    /// once, if the class has one.
    find_free_reg: GetReg,
    /// Closure that gets us a stackslot, if needed.
    get_stackslot: GetStackSlot,
    /// Closure to determine whether an `Allocation` refers to a stack
    /// slot.
    is_stack_alloc: IsStackAlloc,
    /// The victim PReg to evict to another stackslot at every
    /// stack-to-stack move if a free PReg is not otherwise available.
    /// Statically chosen; this is a last-ditch option. `None` only if
    /// the class has no registers at all.
    victim: Option<PReg>,
    /// The class, for error reporting.
    class: RegClass,
}

impl<GetReg, GetStackSlot, IsStackAlloc> ScratchResolver<GetReg, GetStackSlot, IsStackAlloc>
where
    GetReg: FnMut() -> Option<Allocation>,
    GetStackSlot: FnMut() -> Allocation,
    IsStackAlloc: Fn(Allocation) -> bool,
{
    pub fn new(
        find_free_reg: GetReg,
        get_stackslot: GetStackSlot,
        is_stack_alloc: IsStackAlloc,
        victim: Option<PReg>,
        class: RegClass,
    ) -> Self {
        Self {
            find_free_reg,
            get_stackslot,
            is_stack_alloc,
            victim,
            class,
        }
    }

    pub fn compute<T: Debug + Copy>(
        mut self,
        moves: MoveVecWithScratch<T>,
    ) -> Result<MoveVec<T>, RegAllocError> {
        // First, do we have a vec with no stack-to-stack moves or use
        // of a scratch location? Fast return if so.
        if !moves.needs_scratch() && !moves.stack_to_stack(&self.is_stack_alloc) {
            return Ok(moves.without_scratch().unwrap_or_default());
        }

        let mut result: MoveVec<T> = smallvec![];

        // Pick a scratch allocation to resolve cycles, but only when
        // there is a cycle: otherwise the dedicated scratch register
        // must stay available for stack-to-stack expansion below.
        let moves = if moves.needs_scratch() {
            let scratch = (self.find_free_reg)().unwrap_or_else(|| (self.get_stackslot)());
            trace!("scratch resolver: scratch alloc {:?}", scratch);
            moves.with_scratch(scratch)
        } else {
            match moves {
                MoveVecWithScratch::NoScratch(moves) | MoveVecWithScratch::Scratch(moves) => moves,
            }
        };

        // State for stack-to-stack expansion, lazily initialized.
        let mut shuffle_reg: Option<Allocation> = None;
        let mut shuffle_reg_save: Option<Allocation> = None;

        for &(src, dst, data) in &moves {
            // Do we have a stack-to-stack move? If so, resolve.
            if (self.is_stack_alloc)(src) && (self.is_stack_alloc)(dst) {
                trace!("scratch resolver: stack to stack: {:?} -> {:?}", src, dst);
                if shuffle_reg.is_none() {
                    if let Some(reg) = (self.find_free_reg)() {
                        trace!(
                            "scratch resolver: have free stack-to-stack scratch preg: {:?}",
                            reg
                        );
                        shuffle_reg = Some(reg);
                    } else {
                        let victim = self.victim.ok_or(RegAllocError::NoScratch(self.class))?;
                        shuffle_reg = Some(Allocation::reg(victim));
                        shuffle_reg_save = Some((self.get_stackslot)());
                        trace!(
                            "scratch resolver: stack-to-stack using victim {:?} with save stackslot {:?}",
                            shuffle_reg,
                            shuffle_reg_save
                        );
                    }
                }
                let reg = shuffle_reg.unwrap();

                match shuffle_reg_save {
                    // If we have a "victimless scratch", then do a
                    // stack-to-scratch / scratch-to-stack sequence.
                    None => {
                        result.push((src, reg, data));
                        result.push((reg, dst, data));
                    }
                    // Otherwise, save the current value in the
                    // shuffle reg (which is our victim) to the extra
                    // stackslot, then do the stack-to-scratch /
                    // scratch-to-stack sequence, then restore it.
                    Some(save) => {
                        result.push((reg, save, data));
                        result.push((src, reg, data));
                        result.push((reg, dst, data));
                        result.push((save, reg, data));
                    }
                }
            } else {
                // Normal move.
                result.push((src, dst, data));
            }
        }

        trace!("scratch resolver: got {:?}", result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RegClass, SpillSlot};
    use std::collections::HashMap;

    fn r(i: usize) -> Allocation {
        Allocation::reg(PReg::new(i, RegClass::Int))
    }

    fn s(i: usize) -> Allocation {
        Allocation::stack(SpillSlot::new(i))
    }

    // Run a parallel-move set through resolution and scratch
    // expansion, then simulate the emitted sequence and check that
    // every destination ends up with its parallel source's value.
    fn check(moves: &[(Allocation, Allocation)], free_regs: &[Allocation], victim: Option<PReg>) {
        let mut par = ParallelMoves::new();
        for &(src, dst) in moves {
            par.add(src, dst, ());
        }
        let resolved = par.resolve();

        let mut avail: Vec<Allocation> = free_regs.to_vec();
        let mut next_slot = 100;
        let resolver = ScratchResolver::new(
            || avail.pop(),
            || {
                let slot = next_slot;
                next_slot += 1;
                s(slot)
            },
            |alloc: Allocation| alloc.is_stack(),
            victim,
            RegClass::Int,
        );
        let sequence = resolver.compute(resolved).unwrap();

        // No stack-to-stack moves may survive.
        for &(src, dst, _) in &sequence {
            assert!(!(src.is_stack() && dst.is_stack()), "{:?} -> {:?}", src, dst);
        }

        // Simulate.
        let mut locations: HashMap<Allocation, Allocation> = HashMap::new();
        for &(src, dst, _) in &sequence {
            let data = locations.get(&src).cloned().unwrap_or(src);
            locations.insert(dst, data);
        }

        let mut expected: HashMap<Allocation, Allocation> = HashMap::new();
        for &(src, dst) in moves {
            expected.insert(dst, src);
        }
        for (loc, data) in locations {
            if let Some(&expected_data) = expected.get(&loc) {
                assert_eq!(expected_data, data);
            } else if data != loc {
                // A modified location that was not a parallel-move
                // dest must be scratch state: a free reg, the victim,
                // or an extra stackslot.
                let is_scratch = free_regs.contains(&loc)
                    || victim.map(Allocation::reg) == Some(loc)
                    || (loc.is_stack() && loc.as_stack().unwrap().index() >= 100);
                assert!(is_scratch, "unexpected write to {:?}", loc);
            }
        }
    }

    #[test]
    fn chain_orders_moves() {
        let mut par = ParallelMoves::new();
        par.add(r(0), r(1), ());
        par.add(r(1), r(2), ());
        let moves = par.resolve().without_scratch().unwrap();
        assert_eq!(moves.len(), 2);
        // The read of r1 must happen before the write of r1.
        assert_eq!(moves[0], (r(1), r(2), ()));
        assert_eq!(moves[1], (r(0), r(1), ()));
    }

    #[test]
    fn fan_out_needs_no_scratch() {
        let mut par = ParallelMoves::new();
        par.add(r(0), r(1), ());
        par.add(r(0), r(2), ());
        let resolved = par.resolve();
        assert!(!resolved.needs_scratch());
        assert_eq!(resolved.without_scratch().unwrap().len(), 2);
    }

    #[test]
    fn swap_uses_scratch() {
        let mut par = ParallelMoves::new();
        par.add(r(0), r(1), ());
        par.add(r(1), r(0), ());
        let resolved = par.resolve();
        assert!(resolved.needs_scratch());
        let moves = resolved.with_scratch(r(9));
        assert_eq!(moves.len(), 3);
        check(&[(r(0), r(1)), (r(1), r(0))], &[r(9)], None);
    }

    #[test]
    fn three_cycle_emits_four_moves() {
        let mut par = ParallelMoves::new();
        par.add(r(0), r(1), ());
        par.add(r(1), r(2), ());
        par.add(r(2), r(0), ());
        let resolved = par.resolve();
        assert!(resolved.needs_scratch());
        let moves = resolved.with_scratch(r(9));
        assert_eq!(moves.len(), 4);
        check(&[(r(0), r(1)), (r(1), r(2)), (r(2), r(0))], &[r(9)], None);
    }

    #[test]
    fn cycle_without_free_reg_uses_stackslot() {
        // No free registers: the cycle breaks through a stackslot,
        // and the resulting stack-to-stack moves expand through the
        // victim register.
        check(
            &[(r(0), r(1)), (r(1), r(0))],
            &[],
            Some(PReg::new(5, RegClass::Int)),
        );
    }

    #[test]
    fn stack_to_stack_with_free_reg() {
        check(&[(s(0), s(1))], &[r(9)], None);
    }

    #[test]
    fn cycle_free_batch_keeps_scratch_reg_for_expansion() {
        // No cycle in the batch, so the single free register must not
        // be burned as a cycle scratch; it is the only way to expand
        // the stack-to-stack move when there is no victim.
        let mut par = ParallelMoves::new();
        par.add(r(0), r(1), ());
        par.add(s(0), s(1), ());
        let resolved = par.resolve();
        assert!(!resolved.needs_scratch());

        let mut free = vec![r(9)];
        let resolver = ScratchResolver::new(
            || free.pop(),
            || s(100),
            |alloc: Allocation| alloc.is_stack(),
            None,
            RegClass::Int,
        );
        let sequence = resolver.compute(resolved).unwrap();
        assert_eq!(
            &sequence[..],
            &[(r(0), r(1), ()), (s(0), r(9), ()), (r(9), s(1), ())][..]
        );
    }

    #[test]
    fn stack_to_stack_with_victim() {
        check(&[(s(0), s(1))], &[], Some(PReg::new(0, RegClass::Int)));
    }

    #[test]
    fn stack_cycle() {
        check(
            &[(s(0), s(1)), (s(1), s(0))],
            &[r(9)],
            Some(PReg::new(0, RegClass::Int)),
        );
    }

    #[test]
    fn no_scratch_available_errors() {
        let mut par = ParallelMoves::new();
        par.add(s(0), s(1), ());
        let resolved = par.resolve();
        let resolver = ScratchResolver::new(
            || None,
            || s(100),
            |alloc: Allocation| alloc.is_stack(),
            None,
            RegClass::Int,
        );
        assert!(matches!(
            resolver.compute(resolved),
            Err(RegAllocError::NoScratch(RegClass::Int))
        ));
    }

    #[test]
    fn permutations() {
        // A grab-bag of shapes: disjoint moves, chains into cycles,
        // fan-out from a cycle member, mixed reg/stack.
        let cases: &[&[(Allocation, Allocation)]] = &[
            &[(r(0), r(1)), (r(2), r(3))],
            &[(r(0), r(1)), (r(1), r(2)), (r(2), r(3))],
            &[(r(0), r(1)), (r(1), r(0)), (r(1), r(2)), (r(0), r(3))],
            &[(r(0), r(1)), (r(1), r(2)), (r(2), r(0)), (r(2), s(0))],
            &[(s(0), r(1)), (r(1), s(0))],
            &[(s(0), s(1)), (s(1), s(2)), (s(2), s(0))],
        ];
        for case in cases {
            check(case, &[r(9)], Some(PReg::new(0, RegClass::Int)));
            check(case, &[], Some(PReg::new(7, RegClass::Int)));
        }
    }
}
