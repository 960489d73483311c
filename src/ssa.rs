/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! SSA-related validation of the input program.

use crate::cfg::CFGInfo;

use crate::{Block, Function, Inst, OperandKind, RegAllocError, VReg};

/// Where a vreg is defined: by a blockparam at a block entry, or by
/// an instruction def.
#[derive(Clone, Copy, Debug)]
struct DefSite {
    block: Block,
    /// The defining inst; invalid for blockparams.
    inst: Inst,
}

pub fn validate_ssa<F: Function>(f: &F, cfginfo: &CFGInfo) -> Result<(), RegAllocError> {
    // First pass: collect the def site of every vreg, checking that
    // each is defined exactly once. A `Temp` operand counts as a def
    // (its vreg may appear in no other operand anywhere).
    let mut def_site = vec![
        DefSite {
            block: Block::invalid(),
            inst: Inst::invalid(),
        };
        f.num_vregs()
    ];
    let mut is_temp = vec![false; f.num_vregs()];
    let mut define = |vreg: VReg, block: Block, inst: Inst| -> Result<(), RegAllocError> {
        let site = &mut def_site[vreg.vreg()];
        if site.block.is_valid() {
            return Err(RegAllocError::SSA(vreg, inst));
        }
        *site = DefSite { block, inst };
        Ok(())
    };
    for block in 0..f.num_blocks() {
        let block = Block::new(block);
        for &blockparam in f.block_params(block) {
            define(blockparam, block, Inst::invalid())?;
        }
        for iix in f.block_insns(block).iter() {
            for operand in f.inst_operands(iix) {
                match operand.kind() {
                    OperandKind::Def => define(operand.vreg(), block, iix)?,
                    OperandKind::Temp => {
                        define(operand.vreg(), block, iix)?;
                        is_temp[operand.vreg().vreg()] = true;
                    }
                    OperandKind::Use => {}
                }
            }
        }
    }

    // Check, for every use, that the def is either in the same block
    // at an earlier inst, or in some other block that dominates this
    // one. Blockparam defs happen at the block entry and so dominate
    // every inst of their block.
    let check_use = |vreg: VReg, block: Block, iix: Inst| -> Result<(), RegAllocError> {
        let site = def_site[vreg.vreg()];
        if site.block.is_invalid() || is_temp[vreg.vreg()] {
            return Err(RegAllocError::SSA(vreg, iix));
        }
        let dominated = if site.block == block {
            site.inst.is_invalid() || site.inst.index() < iix.index()
        } else {
            cfginfo.dominates(site.block, block)
        };
        if !dominated {
            return Err(RegAllocError::SSA(vreg, iix));
        }
        Ok(())
    };
    for block in 0..f.num_blocks() {
        let block = Block::new(block);
        for iix in f.block_insns(block).iter() {
            for operand in f.inst_operands(iix) {
                if operand.kind() == OperandKind::Use {
                    check_use(operand.vreg(), block, iix)?;
                }
            }
        }
    }

    // Check block structure: every block must end in exactly one
    // branch or ret, branches carry their dataflow purely as
    // blockparam args (no operands), and arg counts match the
    // successors' blockparam counts. Branch args are uses too.
    for block in 0..f.num_blocks() {
        let block = Block::new(block);
        let insns = f.block_insns(block);
        for insn in insns.iter() {
            if insn == insns.last() {
                if !(f.is_branch(insn) || f.is_ret(insn)) {
                    return Err(RegAllocError::BB(block));
                }
                if f.is_branch(insn) {
                    if !f.inst_operands(insn).is_empty() {
                        return Err(RegAllocError::Branch(insn));
                    }
                    for (succ_idx, &succ) in f.block_succs(block).iter().enumerate() {
                        let args = f.branch_blockparams(block, insn, succ_idx);
                        if args.len() != f.block_params(succ).len() {
                            return Err(RegAllocError::Branch(insn));
                        }
                        for &arg in args {
                            check_use(arg, block, insn)?;
                        }
                    }
                }
            } else {
                if f.is_branch(insn) || f.is_ret(insn) {
                    return Err(RegAllocError::BB(block));
                }
            }
        }
    }

    // Check that the entry block has no block args: otherwise it is
    // undefined what their value would be.
    if f.block_params(f.entry_block()).len() > 0 {
        return Err(RegAllocError::BB(f.entry_block()));
    }

    Ok(())
}
