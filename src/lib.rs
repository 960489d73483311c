/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! An SSA-based linear-scan register allocator, in the lineage of the
//! "Linear Scan Register Allocation on SSA Form" design used by
//! JIT compiler backends. The client lowers its IR to a
//! register-agnostic instruction stream, describes it through the
//! [`Function`] trait, and receives an [`Output`] mapping every operand
//! to a physical register or spill slot, together with the move/spill
//! edits that must be interleaved with the instruction stream.

#![allow(dead_code)]

/// Logging via the `log` crate, but gated on the `trace-log` feature:
/// lifetime-interval traces are voluminous, so the calls compile away
/// entirely unless asked for.
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(feature = "trace-log") {
            ::log::trace!($($tt)*);
        }
    };
}

macro_rules! trace_enabled {
    () => {
        cfg!(feature = "trace-log") && ::log::log_enabled!(::log::Level::Trace)
    };
}

#[macro_use]
mod index;

pub(crate) mod bitset;
pub(crate) mod cfg;
pub(crate) mod domtree;
pub(crate) mod lsra;
pub(crate) mod moves;
pub(crate) mod postorder;
pub(crate) mod ssa;

pub use index::{Block, Inst, InstRange};

pub use lsra::Stats;

use core::hash::BuildHasherDefault;
use rustc_hash::FxHasher;
pub(crate) type FxHashMap<K, V> = hashbrown::HashMap<K, V, BuildHasherDefault<FxHasher>>;

/// Register classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegClass {
    Int = 0,
    Float = 1,
}

/// A physical register. Contains a physical register number and a class.
///
/// The `hw_enc` field contains the physical register number and is in
/// a logically separate index space per class; in other words, Int
/// register 0 is different than Float register 0.
///
/// Because of bit-packed encodings throughout the implementation,
/// `hw_enc` must fit in 5 bits, i.e., at most 32 registers per class.
///
/// The value returned by `index()`, in contrast, is in a single index
/// space shared by all classes, in order to enable uniform reasoning
/// about physical registers. This is done by putting the class bit at
/// the MSB, or equivalently, declaring that indices 0..31 are the 32
/// integer registers and indices 32..63 are the 32 float registers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PReg {
    hw_enc: u8,
    class: RegClass,
}

impl PReg {
    pub const MAX_BITS: usize = 5;
    pub const MAX: usize = (1 << Self::MAX_BITS) - 1;
    pub const MAX_INDEX: usize = 1 << (Self::MAX_BITS + 1); // including RegClass bit

    /// Create a new PReg. The `hw_enc` range is 5 bits.
    #[inline(always)]
    pub const fn new(hw_enc: usize, class: RegClass) -> Self {
        // We don't have const panics yet (rust-lang/rust#85194) so we
        // need to use a little indexing trick here.
        const HW_ENC_MUST_BE_IN_BOUNDS: &[bool; PReg::MAX + 1] = &[true; PReg::MAX + 1];
        let _ = HW_ENC_MUST_BE_IN_BOUNDS[hw_enc];

        PReg {
            hw_enc: hw_enc as u8,
            class,
        }
    }

    /// The physical register number, as encoded by the ISA for the particular register class.
    #[inline(always)]
    pub fn hw_enc(self) -> usize {
        self.hw_enc as usize
    }

    /// The register class.
    #[inline(always)]
    pub fn class(self) -> RegClass {
        self.class
    }

    /// Get an index into the (not necessarily contiguous) index space of
    /// all physical registers. Allows one to maintain an array of data for
    /// all PRegs and index it efficiently.
    #[inline(always)]
    pub fn index(self) -> usize {
        ((self.class as u8 as usize) << 5) | (self.hw_enc as usize)
    }

    #[inline(always)]
    pub fn from_index(index: usize) -> Self {
        let class = match (index >> 5) & 1 {
            0 => RegClass::Int,
            1 => RegClass::Float,
            _ => unreachable!(),
        };
        PReg::new(index & Self::MAX, class)
    }

    #[inline(always)]
    pub fn invalid() -> Self {
        PReg::new(Self::MAX, RegClass::Int)
    }

    #[inline(always)]
    pub fn is_invalid(self) -> bool {
        self == Self::invalid()
    }

    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self != Self::invalid()
    }
}

impl core::fmt::Debug for PReg {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "PReg(hw = {}, class = {:?}, index = {})",
            self.hw_enc(),
            self.class(),
            self.index()
        )
    }
}

impl core::fmt::Display for PReg {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let class = match self.class() {
            RegClass::Int => "i",
            RegClass::Float => "f",
        };
        write!(f, "p{}{}", self.hw_enc(), class)
    }
}

/// A virtual register. Contains a virtual register number and a class.
///
/// A virtual register ("vreg") corresponds to an SSA value. All
/// dataflow in the input program is specified via flow through a
/// virtual register.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VReg {
    bits: u32,
}

impl VReg {
    pub const MAX_BITS: usize = 20;
    pub const MAX: usize = (1 << Self::MAX_BITS) - 1;

    #[inline(always)]
    pub const fn new(virt_reg: usize, class: RegClass) -> Self {
        // See comment in `PReg::new()`: we are emulating a const
        // assert here until const panics are stable.
        const VIRT_REG_MUST_BE_IN_BOUNDS: &[bool; VReg::MAX + 1] = &[true; VReg::MAX + 1];
        let _ = VIRT_REG_MUST_BE_IN_BOUNDS[virt_reg];

        VReg {
            bits: ((virt_reg as u32) << 1) | (class as u8 as u32),
        }
    }

    #[inline(always)]
    pub fn vreg(self) -> usize {
        (self.bits >> 1) as usize
    }

    #[inline(always)]
    pub fn class(self) -> RegClass {
        match self.bits & 1 {
            0 => RegClass::Int,
            1 => RegClass::Float,
            _ => unreachable!(),
        }
    }

    #[inline(always)]
    pub fn invalid() -> Self {
        VReg::new(Self::MAX, RegClass::Int)
    }

    #[inline(always)]
    pub fn is_invalid(self) -> bool {
        self == Self::invalid()
    }

    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self != Self::invalid()
    }
}

impl Default for VReg {
    fn default() -> Self {
        Self::invalid()
    }
}

impl core::fmt::Debug for VReg {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "VReg(vreg = {}, class = {:?})",
            self.vreg(),
            self.class()
        )
    }
}

impl core::fmt::Display for VReg {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "v{}", self.vreg())
    }
}

/// A spill slot is a space in the stack frame reserved for spilled
/// values. Slots are allocated in units whose size is given by
/// `Function::spillslot_size(class)`; the `index` names the first unit
/// of the slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpillSlot {
    bits: u32,
}

impl SpillSlot {
    #[inline(always)]
    pub fn new(slot: usize) -> Self {
        debug_assert!(slot < (1 << 24));
        SpillSlot { bits: slot as u32 }
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        (self.bits & 0x00ff_ffff) as usize
    }

    #[inline(always)]
    pub fn plus(self, offset: usize) -> Self {
        SpillSlot::new(self.index() + offset)
    }

    #[inline(always)]
    pub fn invalid() -> Self {
        SpillSlot { bits: 0xffff_ffff }
    }

    #[inline(always)]
    pub fn is_invalid(self) -> bool {
        self == Self::invalid()
    }

    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self != Self::invalid()
    }
}

impl core::fmt::Display for SpillSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "stack{}", self.index())
    }
}

impl core::fmt::Debug for SpillSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(self, f)
    }
}

/// An `OperandConstraint` specifies where a vreg's value must be
/// placed at a particular reference to that vreg (i.e., at an
/// `Operand`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperandConstraint {
    /// Any location is fine (register or stack slot).
    Any,
    /// A register is preferred but a stack slot is acceptable.
    ShouldReg,
    /// Operand must be in a register of its class.
    Reg,
    /// Operand must be in the given fixed physical register.
    FixedReg(PReg),
}

impl core::fmt::Display for OperandConstraint {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::ShouldReg => write!(f, "should-reg"),
            Self::Reg => write!(f, "reg"),
            Self::FixedReg(preg) => write!(f, "fixed({})", preg),
        }
    }
}

impl core::fmt::Debug for OperandConstraint {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(self, f)
    }
}

/// The "kind" of an `Operand`: whether the instruction reads the
/// vreg, writes it, or needs a private temporary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperandKind {
    Def = 0,
    Use = 1,
    /// A scratch value private to one instruction. The location is
    /// live across the instruction and may conflict with neither its
    /// inputs nor its outputs. A `Temp` operand's vreg must not appear
    /// anywhere else in the program.
    Temp = 2,
}

/// An `Operand` encodes everything about a mention of a register in
/// an instruction: the virtual register number, the constraint on the
/// chosen location, and the kind of reference (def, use, temp).
///
/// Uses read their location at the point just before the instruction;
/// defs write theirs at the point just after. An instruction's inputs
/// and outputs may therefore share a register; a `Temp` may not share
/// with either.
///
/// Operands are 32 bits, bit-packed:
///
/// ```plain
/// constraint:2 kind:2 class:1 preg:5 unused:2 vreg:20
/// ```
///
/// The `preg` field is only meaningful for `FixedReg` constraints.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Operand {
    bits: u32,
}

impl Operand {
    #[inline(always)]
    pub fn new(vreg: VReg, constraint: OperandConstraint, kind: OperandKind) -> Self {
        let (constraint_field, preg_field) = match constraint {
            OperandConstraint::Any => (0, 0),
            OperandConstraint::ShouldReg => (1, 0),
            OperandConstraint::Reg => (2, 0),
            OperandConstraint::FixedReg(preg) => {
                debug_assert_eq!(preg.class(), vreg.class());
                (3, preg.hw_enc() as u32)
            }
        };
        let class_field = vreg.class() as u8 as u32;
        let kind_field = kind as u8 as u32;
        Operand {
            bits: (vreg.vreg() as u32)
                | (preg_field << 20)
                | (class_field << 25)
                | (kind_field << 26)
                | (constraint_field << 28),
        }
    }

    /// Create an `Operand` that reads the given vreg from any location.
    #[inline(always)]
    pub fn any_use(vreg: VReg) -> Self {
        Operand::new(vreg, OperandConstraint::Any, OperandKind::Use)
    }

    /// Create an `Operand` that writes the given vreg to any location.
    #[inline(always)]
    pub fn any_def(vreg: VReg) -> Self {
        Operand::new(vreg, OperandConstraint::Any, OperandKind::Def)
    }

    /// Create an `Operand` that reads the given vreg, preferring but
    /// not requiring a register.
    #[inline(always)]
    pub fn should_reg_use(vreg: VReg) -> Self {
        Operand::new(vreg, OperandConstraint::ShouldReg, OperandKind::Use)
    }

    /// Create an `Operand` that reads the given vreg from a register
    /// of its class.
    #[inline(always)]
    pub fn reg_use(vreg: VReg) -> Self {
        Operand::new(vreg, OperandConstraint::Reg, OperandKind::Use)
    }

    /// Create an `Operand` that writes the given vreg to a register
    /// of its class.
    #[inline(always)]
    pub fn reg_def(vreg: VReg) -> Self {
        Operand::new(vreg, OperandConstraint::Reg, OperandKind::Def)
    }

    /// Create an `Operand` for a scratch register private to one
    /// instruction, distinct from all of its inputs and outputs.
    #[inline(always)]
    pub fn reg_temp(vreg: VReg) -> Self {
        Operand::new(vreg, OperandConstraint::Reg, OperandKind::Temp)
    }

    /// Create an `Operand` that reads the given vreg from the given
    /// fixed physical register.
    #[inline(always)]
    pub fn reg_fixed_use(vreg: VReg, preg: PReg) -> Self {
        Operand::new(vreg, OperandConstraint::FixedReg(preg), OperandKind::Use)
    }

    /// Create an `Operand` that writes the given vreg to the given
    /// fixed physical register.
    #[inline(always)]
    pub fn reg_fixed_def(vreg: VReg, preg: PReg) -> Self {
        Operand::new(vreg, OperandConstraint::FixedReg(preg), OperandKind::Def)
    }

    /// The virtual register mentioned by this operand.
    #[inline(always)]
    pub fn vreg(self) -> VReg {
        let vreg_idx = (self.bits & VReg::MAX as u32) as usize;
        VReg::new(vreg_idx, self.class())
    }

    /// The register class of this operand's vreg.
    #[inline(always)]
    pub fn class(self) -> RegClass {
        match (self.bits >> 25) & 1 {
            0 => RegClass::Int,
            1 => RegClass::Float,
            _ => unreachable!(),
        }
    }

    /// The kind of this operand: def, use, or temp.
    #[inline(always)]
    pub fn kind(self) -> OperandKind {
        match (self.bits >> 26) & 3 {
            0 => OperandKind::Def,
            1 => OperandKind::Use,
            2 => OperandKind::Temp,
            _ => unreachable!(),
        }
    }

    /// The constraint on the location chosen for this operand.
    #[inline(always)]
    pub fn constraint(self) -> OperandConstraint {
        let preg_field = ((self.bits >> 20) & PReg::MAX as u32) as usize;
        match (self.bits >> 28) & 3 {
            0 => OperandConstraint::Any,
            1 => OperandConstraint::ShouldReg,
            2 => OperandConstraint::Reg,
            3 => OperandConstraint::FixedReg(PReg::new(preg_field, self.class())),
            _ => unreachable!(),
        }
    }

    /// Raw bits of the operand encoding.
    #[inline(always)]
    pub fn bits(self) -> u32 {
        self.bits
    }

    /// Construct an `Operand` from raw bits.
    #[inline(always)]
    pub fn from_bits(bits: u32) -> Self {
        Operand { bits }
    }
}

impl core::fmt::Debug for Operand {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(self, f)
    }
}

impl core::fmt::Display for Operand {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let kind = match self.kind() {
            OperandKind::Def => "def",
            OperandKind::Use => "use",
            OperandKind::Temp => "tmp",
        };
        write!(
            f,
            "{} {}{} {}",
            kind,
            self.vreg(),
            match self.class() {
                RegClass::Int => "i",
                RegClass::Float => "f",
            },
            self.constraint()
        )
    }
}

/// An Allocation represents the end result of register allocation: a
/// physical register or a stack (spill slot) location, for one
/// operand or one point in a vreg's lifetime.
///
/// Allocations are represented as bit-packed u32s:
///
/// ```plain
/// kind:2 unused:6 index:24
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Allocation {
    bits: u32,
}

impl Allocation {
    #[inline(always)]
    pub(crate) fn new(kind: AllocationKind, index: usize) -> Self {
        debug_assert!(index < (1 << 24));
        Allocation {
            bits: ((kind as u8 as u32) << 30) | (index as u32),
        }
    }

    /// Construct a null allocation: the "no location" sentinel.
    #[inline(always)]
    pub fn none() -> Allocation {
        Allocation::new(AllocationKind::None, 0)
    }

    /// Construct an allocation referring to a physical register.
    #[inline(always)]
    pub fn reg(preg: PReg) -> Allocation {
        Allocation::new(AllocationKind::Reg, preg.index())
    }

    /// Construct an allocation referring to a spill slot.
    #[inline(always)]
    pub fn stack(slot: SpillSlot) -> Allocation {
        Allocation::new(AllocationKind::Stack, slot.index())
    }

    #[inline(always)]
    pub fn kind(self) -> AllocationKind {
        match (self.bits >> 30) & 3 {
            0 => AllocationKind::None,
            1 => AllocationKind::Reg,
            2 => AllocationKind::Stack,
            _ => unreachable!(),
        }
    }

    #[inline(always)]
    pub fn is_none(self) -> bool {
        self.kind() == AllocationKind::None
    }

    #[inline(always)]
    pub fn is_some(self) -> bool {
        self.kind() != AllocationKind::None
    }

    #[inline(always)]
    pub fn is_reg(self) -> bool {
        self.kind() == AllocationKind::Reg
    }

    #[inline(always)]
    pub fn is_stack(self) -> bool {
        self.kind() == AllocationKind::Stack
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        (self.bits & ((1 << 24) - 1)) as usize
    }

    #[inline(always)]
    pub fn as_reg(self) -> Option<PReg> {
        if self.kind() == AllocationKind::Reg {
            Some(PReg::from_index(self.index()))
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn as_stack(self) -> Option<SpillSlot> {
        if self.kind() == AllocationKind::Stack {
            Some(SpillSlot::new(self.index()))
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn bits(self) -> u32 {
        self.bits
    }

    #[inline(always)]
    pub fn from_bits(bits: u32) -> Self {
        Allocation { bits }
    }
}

impl core::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(self, f)
    }
}

impl core::fmt::Display for Allocation {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self.kind() {
            AllocationKind::None => write!(f, "none"),
            AllocationKind::Reg => write!(f, "{}", PReg::from_index(self.index())),
            AllocationKind::Stack => write!(f, "{}", SpillSlot::new(self.index())),
        }
    }
}

/// An allocation is one of two "kinds" (or "none"): register or
/// spill/stack slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AllocationKind {
    None = 0,
    Reg = 1,
    Stack = 2,
}

/// A position before or after an instruction at which we can make an
/// edit.
///
/// Uses read their values at the "before" point of their
/// instruction, and defs write theirs at the "after" point; edits at
/// a point execute between the effects of the two neighboring
/// instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InstPosition {
    Before = 0,
    After = 1,
}

/// A program point: a single point before or after a given instruction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgPoint {
    bits: u32,
}

impl core::fmt::Debug for ProgPoint {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "progpoint{}{}",
            self.inst().index(),
            match self.pos() {
                InstPosition::Before => "-pre",
                InstPosition::After => "-post",
            }
        )
    }
}

impl ProgPoint {
    /// Create a new ProgPoint before or after the given instruction.
    #[inline(always)]
    pub fn new(inst: Inst, pos: InstPosition) -> Self {
        let bits = ((inst.0 as u32) << 1) | (pos as u8 as u32);
        ProgPoint { bits }
    }

    /// Create a new ProgPoint before the given instruction.
    #[inline(always)]
    pub fn before(inst: Inst) -> Self {
        Self::new(inst, InstPosition::Before)
    }

    /// Create a new ProgPoint after the given instruction.
    #[inline(always)]
    pub fn after(inst: Inst) -> Self {
        Self::new(inst, InstPosition::After)
    }

    /// Get the instruction that this ProgPoint is before or after.
    #[inline(always)]
    pub fn inst(self) -> Inst {
        // Cast to i32 to do an arithmetic right-shift, which will
        // preserve an `Inst::invalid()` (all-ones) value.
        Inst::new(((self.bits as i32) >> 1) as usize)
    }

    /// Get the "position" (Before or After) relative to the instruction.
    #[inline(always)]
    pub fn pos(self) -> InstPosition {
        match self.bits & 1 {
            0 => InstPosition::Before,
            1 => InstPosition::After,
            _ => unreachable!(),
        }
    }

    /// Get the "next" program point: for After, this is the Before of
    /// the next inst, while for Before, this is After of the same inst.
    #[inline(always)]
    pub fn next(self) -> ProgPoint {
        ProgPoint {
            bits: self.bits + 1,
        }
    }

    /// Get the "previous" program point, the inverse of `.next()`
    /// above.
    #[inline(always)]
    pub fn prev(self) -> ProgPoint {
        ProgPoint {
            bits: self.bits - 1,
        }
    }

    /// Convert to a raw encoding in 32 bits.
    #[inline(always)]
    pub fn to_index(self) -> u32 {
        self.bits
    }

    /// Construct from the raw 32-bit encoding.
    #[inline(always)]
    pub fn from_index(index: u32) -> Self {
        Self { bits: index }
    }
}

/// An instruction to insert into the program to perform some data
/// movement.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Edit {
    /// Move one allocation to another. Each allocation may be a
    /// register or a stack slot (spill slot). However, stack-to-stack
    /// moves will never be generated.
    ///
    /// `vreg` names the value being moved, for clients that want to
    /// track it (e.g. for debug metadata); it is `VReg::invalid()`
    /// for moves that only shuffle scratch state.
    Move {
        from: Allocation,
        to: Allocation,
        vreg: VReg,
    },
}

/// The moves that must execute on one CFG edge whose moves could not
/// be hosted in either endpoint block (a critical edge). The client
/// must split the edge: emit a block that executes `moves` in order,
/// then jumps to `to`.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeMoves {
    pub from: Block,
    pub to: Block,
    pub moves: Vec<Edit>,
}

/// A machine environment tells the allocator which registers are
/// available to allocate and what register may be used as a scratch
/// register for breaking move cycles.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MachineEnv {
    /// Preferred physical registers for each class. These are the
    /// registers that will be allocated first, in order.
    pub preferred_regs_by_class: [Vec<PReg>; 2],

    /// Non-preferred physical registers for each class. These are the
    /// registers that will be allocated if a preferred register is
    /// not available, in order.
    pub non_preferred_regs_by_class: [Vec<PReg>; 2],

    /// A scratch register usable to break move cycles and to expand
    /// stack-to-stack moves, per class. It must not appear in either
    /// allocatable list. If `None` for a class and a cycle of moves
    /// in that class arises, allocation fails with
    /// `RegAllocError::NoScratch`.
    pub scratch_by_class: [Option<PReg>; 2],
}

/// The output of the allocator.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Output {
    /// How many spill slots are needed in the frame?
    pub num_spillslots: usize,

    /// Edits (moves). Guaranteed to be sorted by program point, with
    /// edits at the same point in their required execution order.
    pub edits: Vec<(ProgPoint, Edit)>,

    /// Moves the client must place on split critical edges. Sorted by
    /// `(from, to)`.
    pub edge_moves: Vec<EdgeMoves>,

    /// Allocations for each operand. Mapping from instruction to
    /// allocations provided by `inst_alloc_offsets` below.
    pub allocs: Vec<Allocation>,

    /// Allocation offset in `allocs` for each instruction.
    pub inst_alloc_offsets: Vec<u32>,

    /// Where each reference-typed value lives at each safepoint, for
    /// stack-map construction. Sorted by program point.
    pub safepoint_locations: Vec<(ProgPoint, Allocation)>,

    /// Internal stats from the allocator.
    pub stats: Stats,
}

impl Output {
    /// Get the allocations assigned to a given instruction.
    pub fn inst_allocs(&self, inst: Inst) -> &[Allocation] {
        let start = self.inst_alloc_offsets[inst.index()] as usize;
        let end = if inst.index() + 1 == self.inst_alloc_offsets.len() {
            self.allocs.len()
        } else {
            self.inst_alloc_offsets[inst.index() + 1] as usize
        };
        &self.allocs[start..end]
    }
}

/// An inconsistency found by the post-allocation self-check pass
/// (enabled by `RegallocOptions::verify`). Always indicates an
/// internal bug rather than a client error.
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// The vreg whose placement is inconsistent.
    pub vreg: VReg,
    /// The program point at which the violation was detected.
    pub pos: ProgPoint,
    /// The live ranges of the offending lifetime interval.
    pub ranges: Vec<(ProgPoint, ProgPoint)>,
    /// Description of the violated rule.
    pub message: &'static str,
}

/// An error that prevents allocation.
#[derive(Clone, Debug)]
pub enum RegAllocError {
    /// Invalid basic-block structure: unreachable block, empty block,
    /// a non-terminator in the last position or a terminator
    /// elsewhere, instruction ranges that are not contiguous and
    /// ascending, or parameters on the entry block.
    BB(Block),
    /// Invalid branch: mismatched block-parameter argument counts, or
    /// operands on a branch instruction.
    Branch(Inst),
    /// Invalid SSA for given vreg at given inst: multiple defs, a use
    /// that is not dominated by its def, or a temp vreg mentioned
    /// outside its one instruction.
    SSA(VReg, Inst),
    /// A vreg is live into the entry block.
    EntryLivein,
    /// Register constraints cannot be satisfied: more values require
    /// registers at one program point than the class has registers.
    TooManyLiveRegs,
    /// A move cycle or stack-to-stack move needed the scratch
    /// register for this class, but `MachineEnv::scratch_by_class`
    /// has none.
    NoScratch(RegClass),
    /// The self-check pass found an inconsistent allocation.
    Invariant(InvariantViolation),
}

impl core::fmt::Display for RegAllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RegAllocError {}

/// A trait defined by the client to provide access to its
/// machine-instruction / CFG representation.
pub trait Function {
    // -------------
    // CFG traversal
    // -------------

    /// How many instructions are there?
    fn num_insts(&self) -> usize;

    /// How many blocks are there?
    fn num_blocks(&self) -> usize;

    /// Get the index of the entry block.
    fn entry_block(&self) -> Block;

    /// Provide the range of instruction indices contained in each
    /// block. Instructions must be numbered so that block ranges are
    /// contiguous, ascending in block order, and together cover every
    /// instruction exactly once.
    fn block_insns(&self, block: Block) -> InstRange;

    /// Get CFG successors for a given block.
    fn block_succs(&self, block: Block) -> &[Block];

    /// Get the CFG predecessors for a given block.
    fn block_preds(&self, block: Block) -> &[Block];

    /// Get the block parameters for a given block. These are the
    /// phi-like SSA values defined at the top of the block. The entry
    /// block must have none.
    fn block_params(&self, block: Block) -> &[VReg];

    /// Determine whether an instruction is a return instruction.
    fn is_ret(&self, insn: Inst) -> bool;

    /// Determine whether an instruction is the end-of-block branch. A
    /// branch must carry no operands; all of its dataflow is
    /// expressed through `branch_blockparams`.
    fn is_branch(&self, insn: Inst) -> bool;

    /// If `insn` is a branch at the end of `block`, returns the
    /// outgoing blockparam arguments for the given successor index.
    ///
    /// The number of arguments must match the number of block
    /// parameters on that successor.
    fn branch_blockparams(&self, block: Block, insn: Inst, succ_idx: usize) -> &[VReg];

    // --------------------------
    // Instruction register slots
    // --------------------------

    /// Get the Operands for an instruction.
    fn inst_operands(&self, insn: Inst) -> &[Operand];

    /// Get the clobbers for an instruction: registers the instruction
    /// overwrites without a corresponding def operand. A clobbered
    /// register is unavailable for the whole instruction, both its
    /// before and after points.
    fn inst_clobbers(&self, insn: Inst) -> &[PReg];

    /// Get the number of `VReg`s in use in this function.
    fn num_vregs(&self) -> usize;

    // ----------
    // Safepoints
    // ----------

    /// Is the instruction a safepoint, at which the locations of all
    /// live reference-typed values must be reported?
    fn is_safepoint(&self, _insn: Inst) -> bool {
        false
    }

    /// Get the VRegs that are pointer/reference types.
    fn reftype_vregs(&self) -> &[VReg] {
        &[]
    }

    // -----------
    // Spill slots
    // -----------

    /// Get the size of a spillslot, in allocation units, for the
    /// given register class.
    fn spillslot_size(&self, regclass: RegClass) -> usize;
}

/// Options for allocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegallocOptions {
    /// Add extra verbosity to debug logs.
    pub verbose_log: bool,

    /// Run the allocation self-check after allocation; an internal
    /// inconsistency then reports `RegAllocError::Invariant` rather
    /// than silently producing bad code.
    pub verify: bool,
}

/// Run the allocator.
pub fn run<F: Function>(
    func: &F,
    env: &MachineEnv,
    options: &RegallocOptions,
) -> Result<Output, RegAllocError> {
    lsra::run(func, env, options)
}
