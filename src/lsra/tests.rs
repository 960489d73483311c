/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

use crate::OperandKind::{self, *};
use crate::{
    run, Allocation, Block, Edit, Function, Inst, InstRange, MachineEnv, Operand,
    OperandConstraint, PReg, ProgPoint, RegAllocError, RegClass, RegallocOptions, SpillSlot, VReg,
};

fn v(vreg_num: usize) -> VReg {
    VReg::new(vreg_num, RegClass::Int)
}

fn i(inst: usize) -> Inst {
    Inst::new(inst)
}

fn b(block: usize) -> Block {
    Block::new(block)
}

fn p(hw_enc: usize) -> PReg {
    PReg::new(hw_enc, RegClass::Int)
}

fn alloc(preg: PReg) -> Allocation {
    Allocation::reg(preg)
}

fn stack(slot: usize) -> Allocation {
    Allocation::stack(SpillSlot::new(slot))
}

fn op(kind: OperandKind, vreg_num: usize, constraint: OperandConstraint) -> Operand {
    Operand::new(v(vreg_num), constraint, kind)
}

fn mach_env(no_of_regs: usize) -> MachineEnv {
    MachineEnv {
        preferred_regs_by_class: [
            (0..no_of_regs)
                .map(|no| PReg::new(no, RegClass::Int))
                .collect(),
            vec![],
        ],
        non_preferred_regs_by_class: [vec![], vec![]],
        scratch_by_class: [None, None],
    }
}

fn options() -> RegallocOptions {
    RegallocOptions {
        verify: true,
        ..RegallocOptions::default()
    }
}

enum InstKind {
    Normal,
    Branch(Vec<(Block, Vec<VReg>)>),
    Ret,
}

struct TestInst {
    operands: Vec<Operand>,
    clobbers: Vec<PReg>,
    kind: InstKind,
    safepoint: bool,
}

fn norm(operands: Vec<Operand>) -> TestInst {
    TestInst {
        operands,
        clobbers: vec![],
        kind: InstKind::Normal,
        safepoint: false,
    }
}

fn clobber(clobbers: Vec<PReg>) -> TestInst {
    TestInst {
        operands: vec![],
        clobbers,
        kind: InstKind::Normal,
        safepoint: false,
    }
}

fn safepoint() -> TestInst {
    TestInst {
        operands: vec![],
        clobbers: vec![],
        kind: InstKind::Normal,
        safepoint: true,
    }
}

fn branch(targets: Vec<(Block, Vec<VReg>)>) -> TestInst {
    TestInst {
        operands: vec![],
        clobbers: vec![],
        kind: InstKind::Branch(targets),
        safepoint: false,
    }
}

fn ret() -> TestInst {
    TestInst {
        operands: vec![],
        clobbers: vec![],
        kind: InstKind::Ret,
        safepoint: false,
    }
}

struct TestBlock {
    params: Vec<VReg>,
    insts: Vec<TestInst>,
}

fn block(params: Vec<VReg>, insts: Vec<TestInst>) -> TestBlock {
    TestBlock { params, insts }
}

struct TestFunction {
    insts: Vec<TestInst>,
    inst_ranges: Vec<(usize, usize)>,
    params: Vec<Vec<VReg>>,
    succs: Vec<Vec<Block>>,
    preds: Vec<Vec<Block>>,
    num_vregs: usize,
    reftypes: Vec<VReg>,
}

impl TestFunction {
    fn new(blocks: Vec<TestBlock>) -> Self {
        let mut f = TestFunction {
            insts: vec![],
            inst_ranges: vec![],
            params: vec![],
            succs: vec![vec![]; blocks.len()],
            preds: vec![vec![]; blocks.len()],
            num_vregs: 0,
            reftypes: vec![],
        };
        let mut max_vreg_num_seen = 0;
        for (block_idx, block) in blocks.into_iter().enumerate() {
            let start = f.insts.len();
            for param in &block.params {
                max_vreg_num_seen = max_vreg_num_seen.max(param.vreg());
            }
            f.params.push(block.params);
            for inst in block.insts {
                for op in &inst.operands {
                    max_vreg_num_seen = max_vreg_num_seen.max(op.vreg().vreg());
                }
                if let InstKind::Branch(targets) = &inst.kind {
                    for (succ, args) in targets {
                        f.succs[block_idx].push(*succ);
                        f.preds[succ.index()].push(b(block_idx));
                        for arg in args {
                            max_vreg_num_seen = max_vreg_num_seen.max(arg.vreg());
                        }
                    }
                }
                f.insts.push(inst);
            }
            f.inst_ranges.push((start, f.insts.len()));
        }
        f.num_vregs = max_vreg_num_seen + 1;
        f
    }
}

impl Function for TestFunction {
    fn num_insts(&self) -> usize {
        self.insts.len()
    }

    fn num_blocks(&self) -> usize {
        self.inst_ranges.len()
    }

    fn entry_block(&self) -> Block {
        b(0)
    }

    fn block_insns(&self, block: Block) -> InstRange {
        let (start, end) = self.inst_ranges[block.index()];
        InstRange::new(Inst::new(start), Inst::new(end))
    }

    fn block_succs(&self, block: Block) -> &[Block] {
        &self.succs[block.index()]
    }

    fn block_preds(&self, block: Block) -> &[Block] {
        &self.preds[block.index()]
    }

    fn block_params(&self, block: Block) -> &[VReg] {
        &self.params[block.index()]
    }

    fn is_ret(&self, insn: Inst) -> bool {
        matches!(self.insts[insn.index()].kind, InstKind::Ret)
    }

    fn is_branch(&self, insn: Inst) -> bool {
        matches!(self.insts[insn.index()].kind, InstKind::Branch(_))
    }

    fn branch_blockparams(&self, _block: Block, insn: Inst, succ_idx: usize) -> &[VReg] {
        match &self.insts[insn.index()].kind {
            InstKind::Branch(targets) => &targets[succ_idx].1,
            _ => &[],
        }
    }

    fn inst_operands(&self, insn: Inst) -> &[Operand] {
        &self.insts[insn.index()].operands
    }

    fn inst_clobbers(&self, insn: Inst) -> &[PReg] {
        &self.insts[insn.index()].clobbers
    }

    fn num_vregs(&self) -> usize {
        self.num_vregs
    }

    fn is_safepoint(&self, insn: Inst) -> bool {
        self.insts[insn.index()].safepoint
    }

    fn reftype_vregs(&self) -> &[VReg] {
        &self.reftypes
    }

    fn spillslot_size(&self, _regclass: RegClass) -> usize {
        1
    }
}

use OperandConstraint::*;

#[test]
fn straight_line_reuses_registers() {
    let f = TestFunction::new(vec![block(
        vec![],
        vec![
            /* 0. */ norm(vec![op(Def, 0, Reg)]),
            /* 1. */ norm(vec![op(Def, 1, Reg), op(Use, 0, Reg)]),
            /* 2. */ norm(vec![op(Use, 1, Reg)]),
            /* 3. */ ret(),
        ],
    )]);
    let result = run(&f, &mach_env(2), &options()).unwrap();
    assert_eq!(result.num_spillslots, 0);
    assert!(result.edits.is_empty());
    assert!(result.edge_moves.is_empty());
    assert_eq!(result.inst_allocs(i(0)), &[alloc(p(0))]);
    // v0 dies at inst 1; its register is immediately reused for v1.
    assert_eq!(result.inst_allocs(i(1)), &[alloc(p(0)), alloc(p(0))]);
    assert_eq!(result.inst_allocs(i(2)), &[alloc(p(0))]);
}

#[test]
fn spill_and_reload_under_pressure() {
    // Two values, one register: each value is stored to its slot
    // while the other occupies the register, and reloaded just before
    // its use.
    let f = TestFunction::new(vec![block(
        vec![],
        vec![
            /* 0. */ norm(vec![op(Def, 0, Reg)]),
            /* 1. */ norm(vec![op(Def, 1, Reg)]),
            /* 2. */ norm(vec![op(Use, 0, Reg)]),
            /* 3. */ norm(vec![op(Use, 1, Reg)]),
            /* 4. */ ret(),
        ],
    )]);
    let result = run(&f, &mach_env(1), &options()).unwrap();
    assert_eq!(result.num_spillslots, 2);
    assert_eq!(
        result.edits,
        vec![
            (
                ProgPoint::before(i(1)),
                Edit::Move {
                    from: alloc(p(0)),
                    to: stack(0),
                    vreg: v(0)
                }
            ),
            (
                ProgPoint::before(i(2)),
                Edit::Move {
                    from: alloc(p(0)),
                    to: stack(1),
                    vreg: v(1)
                }
            ),
            (
                ProgPoint::before(i(2)),
                Edit::Move {
                    from: stack(0),
                    to: alloc(p(0)),
                    vreg: v(0)
                }
            ),
            (
                ProgPoint::before(i(3)),
                Edit::Move {
                    from: stack(1),
                    to: alloc(p(0)),
                    vreg: v(1)
                }
            ),
        ]
    );
    for inst in 0..4 {
        assert_eq!(result.inst_allocs(i(inst)), &[alloc(p(0))]);
    }
}

#[test]
fn too_many_live_regs() {
    // Both values must be in the one register at inst 2.
    let f = TestFunction::new(vec![block(
        vec![],
        vec![
            /* 0. */ norm(vec![op(Def, 0, Reg)]),
            /* 1. */ norm(vec![op(Def, 1, Reg)]),
            /* 2. */ norm(vec![op(Use, 0, Reg), op(Use, 1, Reg)]),
            /* 3. */ ret(),
        ],
    )]);
    let result = run(&f, &mach_env(1), &options());
    assert!(matches!(result, Err(RegAllocError::TooManyLiveRegs)));
}

#[test]
fn no_registers_values_live_on_stack() {
    // An empty register class is usable as long as nothing demands a
    // register: every value lives in its slot from def to use, with
    // no moves at all.
    let f = TestFunction::new(vec![block(
        vec![],
        vec![
            /* 0. */ norm(vec![op(Def, 0, Any)]),
            /* 1. */ norm(vec![op(Def, 1, Any)]),
            /* 2. */ norm(vec![op(Use, 0, Any), op(Use, 1, Any)]),
            /* 3. */ ret(),
        ],
    )]);
    let result = run(&f, &mach_env(0), &options()).unwrap();
    assert_eq!(result.num_spillslots, 2);
    assert!(result.edits.is_empty());
    assert_eq!(result.inst_allocs(i(0)), &[stack(0)]);
    assert_eq!(result.inst_allocs(i(1)), &[stack(1)]);
    assert_eq!(result.inst_allocs(i(2)), &[stack(0), stack(1)]);
}

#[test]
fn no_registers_reg_use_fails() {
    let f = TestFunction::new(vec![block(
        vec![],
        vec![
            /* 0. */ norm(vec![op(Def, 0, Any)]),
            /* 1. */ norm(vec![op(Use, 0, Reg)]),
            /* 2. */ ret(),
        ],
    )]);
    let result = run(&f, &mach_env(0), &options());
    assert!(matches!(result, Err(RegAllocError::TooManyLiveRegs)));
}

#[test]
fn should_reg_use_stays_on_stack() {
    // Under pressure, a value whose only remaining use tolerates a
    // stack slot is spilled once and never reloaded.
    let f = TestFunction::new(vec![block(
        vec![],
        vec![
            /* 0. */ norm(vec![op(Def, 0, Reg)]),
            /* 1. */ norm(vec![op(Def, 1, Reg)]),
            /* 2. */ norm(vec![op(Use, 1, Reg)]),
            /* 3. */ norm(vec![op(Use, 0, ShouldReg)]),
            /* 4. */ ret(),
        ],
    )]);
    let result = run(&f, &mach_env(1), &options()).unwrap();
    assert_eq!(result.num_spillslots, 1);
    assert_eq!(
        result.edits,
        vec![(
            ProgPoint::before(i(1)),
            Edit::Move {
                from: alloc(p(0)),
                to: stack(0),
                vreg: v(0)
            }
        )]
    );
    assert_eq!(result.inst_allocs(i(3)), &[stack(0)]);
}

#[test]
fn fixed_reg_fixups() {
    // The value is defined into p1 and consumed from p1, but lives in
    // its home register in between. The copy back into p1 is
    // redundant (p1 still holds the value) and gets elided.
    let f = TestFunction::new(vec![block(
        vec![],
        vec![
            /* 0. */ norm(vec![op(Def, 0, FixedReg(p(1)))]),
            /* 1. */ norm(vec![op(Use, 0, FixedReg(p(1)))]),
            /* 2. */ ret(),
        ],
    )]);
    let result = run(&f, &mach_env(2), &options()).unwrap();
    assert_eq!(result.inst_allocs(i(0)), &[alloc(p(1))]);
    assert_eq!(result.inst_allocs(i(1)), &[alloc(p(1))]);
    assert_eq!(
        result.edits,
        vec![(
            ProgPoint::after(i(0)),
            Edit::Move {
                from: alloc(p(1)),
                to: alloc(p(0)),
                vreg: v(0)
            }
        )]
    );
    assert_eq!(result.stats.moves_elided, 1);
}

#[test]
fn clobber_splits_around_instruction() {
    // One register, clobbered by inst 1: the value is stored before
    // the clobber and reloaded before its use.
    let f = TestFunction::new(vec![block(
        vec![],
        vec![
            /* 0. */ norm(vec![op(Def, 0, Reg)]),
            /* 1. */ clobber(vec![p(0)]),
            /* 2. */ norm(vec![op(Use, 0, Reg)]),
            /* 3. */ ret(),
        ],
    )]);
    let result = run(&f, &mach_env(1), &options()).unwrap();
    assert_eq!(result.num_spillslots, 1);
    assert_eq!(
        result.edits,
        vec![
            (
                ProgPoint::before(i(1)),
                Edit::Move {
                    from: alloc(p(0)),
                    to: stack(0),
                    vreg: v(0)
                }
            ),
            (
                ProgPoint::before(i(2)),
                Edit::Move {
                    from: stack(0),
                    to: alloc(p(0)),
                    vreg: v(0)
                }
            ),
        ]
    );
}

#[test]
fn clobber_avoided_with_spare_register() {
    // With a second register available, the clobber costs nothing:
    // the value simply lives in the other register.
    let f = TestFunction::new(vec![block(
        vec![],
        vec![
            /* 0. */ norm(vec![op(Def, 0, Reg)]),
            /* 1. */ clobber(vec![p(0)]),
            /* 2. */ norm(vec![op(Use, 0, Reg)]),
            /* 3. */ ret(),
        ],
    )]);
    let result = run(&f, &mach_env(2), &options()).unwrap();
    assert!(result.edits.is_empty());
    assert_eq!(result.inst_allocs(i(0)), &[alloc(p(1))]);
    assert_eq!(result.inst_allocs(i(2)), &[alloc(p(1))]);
}

#[test]
fn reload_on_in_edge() {
    // v0 is live into block 2 only. Under single-register pressure it
    // sits in its slot across block 0 and is reloaded at the entry of
    // block 2 (which has one predecessor, so the move is hosted
    // there).
    let f = TestFunction::new(vec![
        block(
            vec![],
            vec![
                /* 0. */ norm(vec![op(Def, 0, Reg)]),
                /* 1. */ norm(vec![op(Def, 1, Reg)]),
                /* 2. */ branch(vec![(b(1), vec![]), (b(2), vec![])]),
            ],
        ),
        block(
            vec![],
            vec![
                /* 3. */ norm(vec![op(Use, 1, Reg)]),
                /* 4. */ ret(),
            ],
        ),
        block(
            vec![],
            vec![
                /* 5. */ norm(vec![op(Use, 0, Reg)]),
                /* 6. */ ret(),
            ],
        ),
    ]);
    let result = run(&f, &mach_env(1), &options()).unwrap();
    assert_eq!(
        result.edits,
        vec![
            (
                ProgPoint::before(i(1)),
                Edit::Move {
                    from: alloc(p(0)),
                    to: stack(0),
                    vreg: v(0)
                }
            ),
            (
                ProgPoint::before(i(5)),
                Edit::Move {
                    from: stack(0),
                    to: alloc(p(0)),
                    vreg: v(0)
                }
            ),
        ]
    );
    assert_eq!(result.inst_allocs(i(3)), &[alloc(p(0))]);
    assert_eq!(result.inst_allocs(i(5)), &[alloc(p(0))]);
}

#[test]
fn blockparam_swap_on_critical_edge() {
    // Block 1 loops to itself with its two parameters swapped. The
    // back edge is critical (block 1 has two predecessors and its
    // branch two successors), so the swap is reported as edge moves,
    // cycle-broken through the scratch register.
    let f = TestFunction::new(vec![
        block(
            vec![],
            vec![
                /* 0. */ norm(vec![op(Def, 0, Reg)]),
                /* 1. */ norm(vec![op(Def, 1, Reg)]),
                /* 2. */ branch(vec![(b(1), vec![v(0), v(1)])]),
            ],
        ),
        block(
            vec![v(2), v(3)],
            vec![
                /* 3. */ branch(vec![(b(1), vec![v(3), v(2)]), (b(2), vec![])]),
            ],
        ),
        block(
            vec![],
            vec![
                /* 4. */ ret(),
            ],
        ),
    ]);
    let mut env = mach_env(2);
    env.scratch_by_class[0] = Some(p(2));
    let result = run(&f, &env, &options()).unwrap();

    // Params land in the same registers their arguments occupy, so
    // the entry edge needs no moves.
    assert!(result.edits.is_empty());
    assert_eq!(result.edge_moves.len(), 1);
    let em = &result.edge_moves[0];
    assert_eq!(em.from, b(1));
    assert_eq!(em.to, b(1));
    assert_eq!(
        em.moves,
        vec![
            Edit::Move {
                from: alloc(p(0)),
                to: alloc(p(2)),
                vreg: VReg::invalid()
            },
            Edit::Move {
                from: alloc(p(1)),
                to: alloc(p(0)),
                vreg: v(2)
            },
            Edit::Move {
                from: alloc(p(2)),
                to: alloc(p(1)),
                vreg: v(3)
            },
        ]
    );
}

#[test]
fn loop_live_through() {
    // v0 and v1 stay in their registers across the loop; nothing
    // moves.
    let f = TestFunction::new(vec![
        block(
            vec![],
            vec![
                /* 0. */ norm(vec![op(Def, 0, Reg)]),
                /* 1. */ norm(vec![op(Def, 1, Reg)]),
                /* 2. */ branch(vec![(b(1), vec![])]),
            ],
        ),
        block(
            vec![],
            vec![
                /* 3. */ norm(vec![op(Use, 1, Reg)]),
                /* 4. */ branch(vec![(b(1), vec![]), (b(2), vec![])]),
            ],
        ),
        block(
            vec![],
            vec![
                /* 5. */ norm(vec![op(Use, 0, Reg)]),
                /* 6. */ ret(),
            ],
        ),
    ]);
    let result = run(&f, &mach_env(2), &options()).unwrap();
    assert!(result.edits.is_empty());
    assert!(result.edge_moves.is_empty());
    assert_eq!(result.inst_allocs(i(3)), &[alloc(p(1))]);
    assert_eq!(result.inst_allocs(i(5)), &[alloc(p(0))]);
}

#[test]
fn loop_phi_reconciled_on_entry_edge() {
    // v0 is evicted to its slot in block 0 (v2 needs the only
    // register), so the loop parameter v1 starts life on the stack at
    // the predecessor's exit but gets the register for the whole
    // loop. The reload lands on the entry edge; around the back edge
    // (block 2, a sole-successor predecessor of the header) the
    // parameter's location agrees with itself and no move is placed.
    let f = TestFunction::new(vec![
        block(
            vec![],
            vec![
                /* 0. */ norm(vec![op(Def, 0, Any)]),
                /* 1. */ norm(vec![op(Def, 2, Reg)]),
                /* 2. */ norm(vec![op(Use, 2, Any)]),
                /* 3. */ branch(vec![(b(1), vec![v(0)])]),
            ],
        ),
        block(
            vec![v(1)],
            vec![
                /* 4. */ norm(vec![op(Use, 1, Any)]),
                /* 5. */ branch(vec![(b(2), vec![]), (b(3), vec![])]),
            ],
        ),
        block(
            vec![],
            vec![
                /* 6. */ branch(vec![(b(1), vec![v(1)])]),
            ],
        ),
        block(
            vec![],
            vec![
                /* 7. */ ret(),
            ],
        ),
    ]);
    let result = run(&f, &mach_env(1), &options()).unwrap();
    assert_eq!(result.num_spillslots, 1);
    assert!(result.edge_moves.is_empty());
    assert_eq!(
        result.edits,
        vec![
            (
                ProgPoint::before(i(1)),
                Edit::Move {
                    from: alloc(p(0)),
                    to: stack(0),
                    vreg: v(0)
                }
            ),
            (
                ProgPoint::before(i(3)),
                Edit::Move {
                    from: stack(0),
                    to: alloc(p(0)),
                    vreg: v(1)
                }
            ),
        ]
    );
    assert_eq!(result.inst_allocs(i(4)), &[alloc(p(0))]);
}

#[test]
fn safepoint_reports_reftype_location() {
    let mut f = TestFunction::new(vec![block(
        vec![],
        vec![
            /* 0. */ norm(vec![op(Def, 0, Reg)]),
            /* 1. */ safepoint(),
            /* 2. */ norm(vec![op(Use, 0, Reg)]),
            /* 3. */ ret(),
        ],
    )]);
    f.reftypes = vec![v(0)];
    let result = run(&f, &mach_env(2), &options()).unwrap();
    assert_eq!(
        result.safepoint_locations,
        vec![(ProgPoint::before(i(1)), alloc(p(0)))]
    );
    assert_eq!(result.stats.num_safepoint_records, 1);
}

#[test]
fn branch_with_operands_rejected() {
    let mut f = TestFunction::new(vec![
        block(
            vec![],
            vec![
                /* 0. */ norm(vec![op(Def, 0, Reg)]),
                /* 1. */ branch(vec![(b(1), vec![])]),
            ],
        ),
        block(
            vec![],
            vec![
                /* 2. */ ret(),
            ],
        ),
    ]);
    f.insts[1].operands = vec![op(Use, 0, Reg)];
    let result = run(&f, &mach_env(2), &options());
    assert!(matches!(result, Err(RegAllocError::Branch(inst)) if inst == i(1)));
}

#[test]
fn use_without_def_rejected() {
    let f = TestFunction::new(vec![block(
        vec![],
        vec![
            /* 0. */ norm(vec![op(Use, 0, Reg)]),
            /* 1. */ ret(),
        ],
    )]);
    let result = run(&f, &mach_env(2), &options());
    assert!(matches!(result, Err(RegAllocError::SSA(vreg, inst)) if vreg == v(0) && inst == i(0)));
}

#[test]
fn unreachable_block_rejected() {
    let f = TestFunction::new(vec![
        block(
            vec![],
            vec![
                /* 0. */ ret(),
            ],
        ),
        block(
            vec![],
            vec![
                /* 1. */ ret(),
            ],
        ),
    ]);
    let result = run(&f, &mach_env(2), &options());
    assert!(matches!(result, Err(RegAllocError::BB(blk)) if blk == b(1)));
}

#[test]
fn deterministic_output() {
    let build = || {
        TestFunction::new(vec![
            block(
                vec![],
                vec![
                    norm(vec![op(Def, 0, Reg)]),
                    norm(vec![op(Def, 1, Reg)]),
                    norm(vec![op(Def, 2, Reg)]),
                    branch(vec![(b(1), vec![v(0), v(1)])]),
                ],
            ),
            block(
                vec![v(3), v(4)],
                vec![
                    norm(vec![op(Use, 3, Reg), op(Use, 4, ShouldReg)]),
                    norm(vec![op(Use, 2, Reg)]),
                    ret(),
                ],
            ),
        ])
    };
    let env = mach_env(2);
    let a = run(&build(), &env, &options()).unwrap();
    let bb = run(&build(), &env, &options()).unwrap();
    assert_eq!(a.edits, bb.edits);
    assert_eq!(a.allocs, bb.allocs);
    assert_eq!(a.inst_alloc_offsets, bb.inst_alloc_offsets);
    assert_eq!(a.num_spillslots, bb.num_spillslots);
}
