/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Postorder computation over the CFG, with an explicit stack.

use crate::{Block, RegAllocError};
use smallvec::{smallvec, SmallVec};

pub fn calculate<'a, SuccFn: Fn(Block) -> &'a [Block]>(
    num_blocks: usize,
    entry: Block,
    succ_blocks: SuccFn,
) -> Result<Vec<Block>, RegAllocError> {
    struct State<'a> {
        block: Block,
        succs: core::slice::Iter<'a, Block>,
    }

    let mut visited = vec![false; num_blocks];
    let mut stack: SmallVec<[State; 64]> = smallvec![];
    let mut out = Vec::with_capacity(num_blocks);

    let entry_visit = visited
        .get_mut(entry.index())
        .ok_or(RegAllocError::BB(entry))?;
    *entry_visit = true;
    stack.push(State {
        block: entry,
        succs: succ_blocks(entry).iter(),
    });

    while let Some(ref mut state) = stack.last_mut() {
        // Perform one action: push to new succ, skip an
        // already-visited succ, or pop.
        if let Some(&succ) = state.succs.next() {
            let succ_visit = visited
                .get_mut(succ.index())
                .ok_or(RegAllocError::BB(succ))?;
            if !*succ_visit {
                *succ_visit = true;
                stack.push(State {
                    block: succ,
                    succs: succ_blocks(succ).iter(),
                });
            }
        } else {
            out.push(state.block);
            stack.pop();
        }
    }
    Ok(out)
}
