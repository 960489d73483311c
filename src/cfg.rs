/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Lightweight CFG analyses.

use crate::{domtree, postorder, Block, Function, Inst, ProgPoint, RegAllocError};

#[derive(Clone, Debug)]
pub struct CFGInfo {
    /// Postorder traversal of blocks.
    pub postorder: Vec<Block>,
    /// Domtree parents, indexed by block.
    pub domtree: Vec<Block>,
    /// For each instruction, the block it belongs to.
    pub insn_block: Vec<Block>,
    /// For each block, the program point at its first instruction.
    pub block_entry: Vec<ProgPoint>,
    /// For each block, the program point at its last instruction.
    pub block_exit: Vec<ProgPoint>,
}

impl CFGInfo {
    pub fn new<F: Function>(f: &F) -> Result<Self, RegAllocError> {
        let nb = f.num_blocks();

        let postorder = postorder::calculate(nb, f.entry_block(), |block| f.block_succs(block))?;

        // Every block must be reachable: otherwise liveness and
        // dominance queries have no meaning for it.
        if postorder.len() != nb {
            let mut reachable = vec![false; nb];
            for &block in &postorder {
                reachable[block.index()] = true;
            }
            let unreachable = (0..nb)
                .map(Block::new)
                .find(|b| !reachable[b.index()])
                .unwrap_or_else(Block::invalid);
            return Err(RegAllocError::BB(unreachable));
        }

        let domtree = domtree::calculate(nb, |block| f.block_preds(block), &postorder, f.entry_block());

        let mut insn_block = vec![Block::invalid(); f.num_insts()];
        let mut block_entry = vec![ProgPoint::before(Inst::invalid()); nb];
        let mut block_exit = vec![ProgPoint::before(Inst::invalid()); nb];

        // Instruction ranges must be contiguous, ascending in block
        // index, and must cover every instruction exactly once.
        let mut next_inst = 0;
        for block in 0..nb {
            let block = Block::new(block);
            let insns = f.block_insns(block);
            if insns.len() == 0 {
                return Err(RegAllocError::BB(block));
            }
            if insns.from().index() != next_inst {
                return Err(RegAllocError::BB(block));
            }
            next_inst = insns.to().index();

            for inst in insns.iter() {
                insn_block[inst.index()] = block;
            }
            block_entry[block.index()] = ProgPoint::before(insns.first());
            block_exit[block.index()] = ProgPoint::after(insns.last());
        }
        if next_inst != f.num_insts() {
            return Err(RegAllocError::BB(Block::new(nb - 1)));
        }

        Ok(Self {
            postorder,
            domtree,
            insn_block,
            block_entry,
            block_exit,
        })
    }

    pub fn dominates(&self, a: Block, b: Block) -> bool {
        domtree::dominates(&self.domtree[..], a, b)
    }
}
