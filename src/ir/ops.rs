//! Decomposed SSA operations.
//!
//! This module defines [`Op`], the operation representation used by every
//! instruction in the IR. Each variant is a simple `op(operands)` form with
//! explicit SSA operands; the producing instruction's identity and result
//! type live on the enclosing [`Inst`](crate::ir::Inst), so the enum holds
//! only the inputs.
//!
//! # Operation Categories
//!
//! - **Constants**: scalar immediates, null, and function addresses
//! - **Arithmetic / bitwise**: binary operations with explicit signedness
//! - **Comparison**: integer compares producing `i1`
//! - **Selection / casts**: `select` and the value-reshaping casts
//! - **Memory**: `alloca`, loads, stores, atomics, element addressing
//! - **Calls**: direct and indirect calls, `invoke` with unwind edge
//! - **Control flow**: jump, conditional branch, switch, return, unreachable
//! - **Phi**: value merges at control-flow joins
//!
//! # Field Documentation
//!
//! Fields follow a consistent naming convention:
//! - `left`, `right`: binary operands
//! - `operand`: unary operand
//! - `value`: a value being stored, matched, or returned
//! - `addr`: address for memory operations
//! - `base`: base pointer for element addressing
//! - `target`, `if_true`, `if_false`, `default`: branch targets (block IDs)

use std::fmt;

use bitflags::bitflags;
use strum::Display;

use crate::ir::{BlockId, FuncId, Ty, ValueId};

bitflags! {
    /// Effect attributes of a callable.
    ///
    /// Attached to function declarations and snapshotted onto every call
    /// operation, so effect queries need no module lookups. The safety and
    /// escape analyses read these exactly the way they would read callee
    /// attributes in a full compiler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FnAttrs: u8 {
        /// Reads and writes no memory; result depends only on arguments.
        const PURE = 1 << 0;
        /// Only reads memory, never writes it.
        const READONLY = 1 << 1;
        /// Never unwinds.
        const NOUNWIND = 1 << 2;
        /// Always returns to its caller.
        const WILLRETURN = 1 << 3;
        /// A lifetime-marker intrinsic; never becomes a real instruction.
        const LIFETIME = 1 << 4;
        /// A debug or pseudo intrinsic; never becomes a real instruction.
        const DEBUG = 1 << 5;
    }
}

impl FnAttrs {
    /// Attributes of a total pure function: no memory, no unwind, returns.
    #[must_use]
    pub fn pure_total() -> Self {
        FnAttrs::PURE | FnAttrs::NOUNWIND | FnAttrs::WILLRETURN
    }
}

/// A compile-time constant value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    /// 1-bit integer.
    I1(bool),
    /// 8-bit integer.
    I8(i8),
    /// 16-bit integer.
    I16(i16),
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// The null pointer.
    NullPtr,
    /// The address of a function, as stored into thunk closures.
    Function(FuncId),
}

impl ConstValue {
    /// The type of this constant.
    #[must_use]
    pub fn ty(&self) -> Ty {
        match self {
            ConstValue::I1(_) => Ty::I1,
            ConstValue::I8(_) => Ty::I8,
            ConstValue::I16(_) => Ty::I16,
            ConstValue::I32(_) => Ty::I32,
            ConstValue::I64(_) => Ty::I64,
            ConstValue::F32(_) => Ty::F32,
            ConstValue::F64(_) => Ty::F64,
            ConstValue::NullPtr => Ty::Ptr,
            ConstValue::Function(_) => Ty::FnPtr,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::I1(v) => write!(f, "{v}"),
            ConstValue::I8(v) => write!(f, "{v}i8"),
            ConstValue::I16(v) => write!(f, "{v}i16"),
            ConstValue::I32(v) => write!(f, "{v}i32"),
            ConstValue::I64(v) => write!(f, "{v}i64"),
            ConstValue::F32(v) => write!(f, "{v}f32"),
            ConstValue::F64(v) => write!(f, "{v}f64"),
            ConstValue::NullPtr => write!(f, "null"),
            ConstValue::Function(id) => write!(f, "@{id}"),
        }
    }
}

/// Binary operation kinds, with signedness folded into the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOpKind {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Signed division.
    Sdiv,
    /// Unsigned division.
    Udiv,
    /// Signed remainder.
    Srem,
    /// Unsigned remainder.
    Urem,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Shift left.
    Shl,
    /// Logical shift right.
    Lshr,
    /// Arithmetic shift right.
    Ashr,
}

/// Integer comparison predicates producing `i1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CmpKind {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Signed less than.
    Slt,
    /// Signed less or equal.
    Sle,
    /// Signed greater than.
    Sgt,
    /// Signed greater or equal.
    Sge,
    /// Unsigned less than.
    Ult,
    /// Unsigned less or equal.
    Ule,
    /// Unsigned greater than.
    Ugt,
    /// Unsigned greater or equal.
    Uge,
}

/// Value-reshaping cast kinds.
///
/// The escape analyzer distinguishes three groups: `PtrToInt` launders an
/// address into an integer (escape), `Bitcast`/`AddrSpace` forward the same
/// bits (recurse), and the integer resizes never apply to pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CastKind {
    /// Integer truncation.
    Trunc,
    /// Zero extension.
    Zext,
    /// Sign extension.
    Sext,
    /// Same-size bit reinterpretation.
    Bitcast,
    /// Pointer to integer conversion.
    PtrToInt,
    /// Integer to pointer conversion.
    IntToPtr,
    /// Address-space reshape of a pointer.
    AddrSpace,
}

/// Atomic read-modify-write operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RmwOpKind {
    /// Exchange the stored value.
    Xchg,
    /// Atomic addition.
    Add,
    /// Atomic subtraction.
    Sub,
    /// Atomic bitwise and.
    And,
    /// Atomic bitwise or.
    Or,
    /// Atomic bitwise xor.
    Xor,
}

/// Byte offset applied by an [`Op::ElemAddr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemOffset {
    /// A compile-time constant byte offset.
    Const(u64),
    /// A dynamically computed byte offset.
    Dynamic(ValueId),
}

/// The callee of a call or invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// A direct call to a module function.
    Direct(FuncId),
    /// An indirect call through a function-pointer value.
    Indirect(ValueId),
}

/// A decomposed SSA operation.
///
/// Every instruction in the IR is one of these. The producing value's
/// identity lives on the enclosing [`Inst`](crate::ir::Inst); operations
/// that produce nothing have result type [`Ty::Void`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Materialize a constant.
    Const(ConstValue),

    /// Binary arithmetic or bitwise operation: `left <kind> right`.
    Binary {
        /// Which operation, including signedness.
        kind: BinaryOpKind,
        /// Left operand.
        left: ValueId,
        /// Right operand.
        right: ValueId,
    },

    /// Integer comparison: `(left <kind> right) : i1`.
    Cmp {
        /// The comparison predicate.
        kind: CmpKind,
        /// Left operand.
        left: ValueId,
        /// Right operand.
        right: ValueId,
    },

    /// Value selection: `cond ? if_true : if_false`.
    Select {
        /// An `i1` selector.
        cond: ValueId,
        /// Value when `cond` is true.
        if_true: ValueId,
        /// Value when `cond` is false.
        if_false: ValueId,
    },

    /// Type cast of a single operand.
    Cast {
        /// Which cast.
        kind: CastKind,
        /// The value being reshaped.
        operand: ValueId,
    },

    /// Stack allocation of one `allocated` slot; produces its address.
    Alloca {
        /// The type whose size is reserved.
        allocated: Ty,
    },

    /// Load through a pointer; the loaded type is the instruction's type.
    Load {
        /// Address to read.
        addr: ValueId,
    },

    /// Store through a pointer: `*addr = value`.
    Store {
        /// Address to write.
        addr: ValueId,
        /// Value being written.
        value: ValueId,
    },

    /// Atomic read-modify-write; produces the previous stored value.
    AtomicRmw {
        /// The combining operation.
        op: RmwOpKind,
        /// Address to update.
        addr: ValueId,
        /// Operand to combine with the stored value.
        value: ValueId,
    },

    /// Atomic compare-exchange; produces the previous stored value.
    CmpXchg {
        /// Address to update.
        addr: ValueId,
        /// Expected current value.
        expected: ValueId,
        /// Replacement stored on success.
        replacement: ValueId,
    },

    /// Address of an element: `base + offset` in bytes.
    ElemAddr {
        /// Base pointer.
        base: ValueId,
        /// Byte offset, constant or dynamic.
        offset: ElemOffset,
    },

    /// Function call.
    Call {
        /// Direct or indirect callee.
        target: CallTarget,
        /// Arguments in signature order.
        args: Vec<ValueId>,
        /// Effect attributes of the callee, snapshotted at build time.
        effects: FnAttrs,
    },

    /// Function call with an unwind edge. Terminates its block.
    Invoke {
        /// Direct or indirect callee.
        target: CallTarget,
        /// Arguments in signature order.
        args: Vec<ValueId>,
        /// Effect attributes of the callee.
        effects: FnAttrs,
        /// Successor on normal return.
        normal: BlockId,
        /// Successor on unwind.
        unwind: BlockId,
    },

    /// Value merge at a control-flow join.
    ///
    /// One `(predecessor, value)` entry per incoming edge. Phi nodes appear
    /// only at the head of a block and are evaluated simultaneously on entry.
    Phi {
        /// Incoming `(block, value)` pairs.
        incoming: Vec<(BlockId, ValueId)>,
    },

    /// Unconditional jump.
    Jump {
        /// Successor block.
        target: BlockId,
    },

    /// Conditional branch on an `i1` value.
    Branch {
        /// The condition.
        cond: ValueId,
        /// Successor when true.
        if_true: BlockId,
        /// Successor when false.
        if_false: BlockId,
    },

    /// Multi-way branch on an integer value.
    ///
    /// The default target is successor index 0; cases follow in order.
    Switch {
        /// The scrutinee.
        value: ValueId,
        /// Target when no case matches.
        default: BlockId,
        /// `(match value, target)` pairs.
        cases: Vec<(i64, BlockId)>,
    },

    /// Return from the function with an optional value.
    Return {
        /// The returned value, `None` for void functions.
        value: Option<ValueId>,
    },

    /// Marks an unreachable program point. Terminates its block.
    Unreachable,
}

impl Op {
    /// Returns all values read by this operation, in operand order.
    ///
    /// Phi incoming values are included; this is what lets the backward
    /// slicer treat phi nodes as ordinary data dependences.
    #[must_use]
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            Op::Const(_) | Op::Alloca { .. } | Op::Unreachable | Op::Jump { .. } => vec![],

            Op::Binary { left, right, .. } | Op::Cmp { left, right, .. } => vec![*left, *right],

            Op::Select {
                cond,
                if_true,
                if_false,
            } => vec![*cond, *if_true, *if_false],

            Op::Cast { operand, .. } => vec![*operand],

            Op::Load { addr } => vec![*addr],
            Op::Store { addr, value } => vec![*addr, *value],
            Op::AtomicRmw { addr, value, .. } => vec![*addr, *value],
            Op::CmpXchg {
                addr,
                expected,
                replacement,
            } => vec![*addr, *expected, *replacement],

            Op::ElemAddr { base, offset } => match offset {
                ElemOffset::Const(_) => vec![*base],
                ElemOffset::Dynamic(v) => vec![*base, *v],
            },

            Op::Call { target, args, .. } | Op::Invoke { target, args, .. } => {
                let mut uses = Vec::with_capacity(args.len() + 1);
                if let CallTarget::Indirect(fptr) = target {
                    uses.push(*fptr);
                }
                uses.extend(args.iter().copied());
                uses
            }

            Op::Phi { incoming } => incoming.iter().map(|&(_, v)| v).collect(),

            Op::Branch { cond, .. } => vec![*cond],
            Op::Switch { value, .. } => vec![*value],
            Op::Return { value } => value.iter().copied().collect(),
        }
    }

    /// Applies `visit` to every operand slot of this operation.
    ///
    /// Phi incoming values, call arguments, indirect callees, and dynamic
    /// element offsets are all visited; successor blocks and constants are
    /// not.
    pub fn for_each_value_mut<F>(&mut self, mut visit: F)
    where
        F: FnMut(&mut ValueId),
    {
        let swap = &mut visit;
        match self {
            Op::Const(_) | Op::Alloca { .. } | Op::Unreachable | Op::Jump { .. } => {}

            Op::Binary { left, right, .. } | Op::Cmp { left, right, .. } => {
                swap(left);
                swap(right);
            }

            Op::Select {
                cond,
                if_true,
                if_false,
            } => {
                swap(cond);
                swap(if_true);
                swap(if_false);
            }

            Op::Cast { operand, .. } => swap(operand),

            Op::Load { addr } => swap(addr),
            Op::Store { addr, value } => {
                swap(addr);
                swap(value);
            }
            Op::AtomicRmw { addr, value, .. } => {
                swap(addr);
                swap(value);
            }
            Op::CmpXchg {
                addr,
                expected,
                replacement,
            } => {
                swap(addr);
                swap(expected);
                swap(replacement);
            }

            Op::ElemAddr { base, offset } => {
                swap(base);
                if let ElemOffset::Dynamic(v) = offset {
                    swap(v);
                }
            }

            Op::Call { target, args, .. } | Op::Invoke { target, args, .. } => {
                if let CallTarget::Indirect(fptr) = target {
                    swap(fptr);
                }
                for arg in args {
                    swap(arg);
                }
            }

            Op::Phi { incoming } => {
                for (_, v) in incoming {
                    swap(v);
                }
            }

            Op::Branch { cond, .. } => swap(cond),
            Op::Switch { value, .. } => swap(value),
            Op::Return { value } => {
                if let Some(v) = value {
                    swap(v);
                }
            }
        }
    }

    /// Replaces every operand occurrence of `from` with `to`.
    ///
    /// Returns the number of operand slots rewritten.
    pub fn replace_uses(&mut self, from: ValueId, to: ValueId) -> usize {
        let mut replaced = 0;
        self.for_each_value_mut(|slot| {
            if *slot == from {
                *slot = to;
                replaced += 1;
            }
        });
        replaced
    }

    /// Rewrites every operand through `map`, leaving unmapped values alone.
    pub fn map_values<F>(&mut self, mut map: F)
    where
        F: FnMut(ValueId) -> Option<ValueId>,
    {
        self.for_each_value_mut(|slot| {
            if let Some(mapped) = map(*slot) {
                *slot = mapped;
            }
        });
    }

    /// Returns `true` if this operation terminates its block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Jump { .. }
                | Op::Branch { .. }
                | Op::Switch { .. }
                | Op::Return { .. }
                | Op::Unreachable
                | Op::Invoke { .. }
        )
    }

    /// Returns `true` for conditional terminators - the only ones that can
    /// act as gates for phi merges.
    #[must_use]
    pub fn is_conditional_terminator(&self) -> bool {
        matches!(self, Op::Branch { .. } | Op::Switch { .. })
    }

    /// Successor blocks of a terminator, in successor-index order.
    ///
    /// For switches the default target is index 0; for invokes the normal
    /// edge precedes the unwind edge. Non-terminators have no successors.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Op::Jump { target } => vec![*target],
            Op::Branch {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            Op::Switch { default, cases, .. } => {
                let mut succs = Vec::with_capacity(cases.len() + 1);
                succs.push(*default);
                succs.extend(cases.iter().map(|&(_, target)| target));
                succs
            }
            Op::Invoke { normal, unwind, .. } => vec![*normal, *unwind],
            _ => vec![],
        }
    }

    /// Redirects successor `index` (in [`successors`](Op::successors) order)
    /// to a new block.
    ///
    /// # Panics
    ///
    /// Panics if the operation is not a terminator with that many successors.
    pub fn set_successor(&mut self, index: usize, block: BlockId) {
        match self {
            Op::Jump { target } if index == 0 => *target = block,
            Op::Branch {
                if_true, if_false, ..
            } => match index {
                0 => *if_true = block,
                1 => *if_false = block,
                _ => panic!("branch has two successors, index {index} out of range"),
            },
            Op::Switch { default, cases, .. } => {
                if index == 0 {
                    *default = block;
                } else {
                    cases[index - 1].1 = block;
                }
            }
            Op::Invoke { normal, unwind, .. } => match index {
                0 => *normal = block,
                1 => *unwind = block,
                _ => panic!("invoke has two successors, index {index} out of range"),
            },
            _ => panic!("set_successor on non-terminator or out-of-range index {index}"),
        }
    }

    /// Incoming `(block, value)` pairs of a phi, `None` for other operations.
    #[must_use]
    pub fn phi_incoming(&self) -> Option<&[(BlockId, ValueId)]> {
        match self {
            Op::Phi { incoming } => Some(incoming),
            _ => None,
        }
    }

    /// Mutable incoming pairs of a phi.
    pub fn phi_incoming_mut(&mut self) -> Option<&mut Vec<(BlockId, ValueId)>> {
        match self {
            Op::Phi { incoming } => Some(incoming),
            _ => None,
        }
    }

    /// Rewrites every phi incoming-block reference `from` to `to`.
    pub fn replace_incoming_block(&mut self, from: BlockId, to: BlockId) {
        if let Op::Phi { incoming } = self {
            for (block, _) in incoming {
                if *block == from {
                    *block = to;
                }
            }
        }
    }

    /// Returns `true` if executing this operation may unwind.
    #[must_use]
    pub fn may_throw(&self) -> bool {
        match self {
            Op::Invoke { .. } => true,
            Op::Call { effects, .. } => !effects.contains(FnAttrs::NOUNWIND),
            _ => false,
        }
    }

    /// Returns `true` if this operation may read or write memory.
    ///
    /// `Alloca` only reserves a slot and is exempt; calls are exempt only
    /// when the callee is known pure.
    #[must_use]
    pub fn may_read_or_write_memory(&self) -> bool {
        match self {
            Op::Load { .. } | Op::Store { .. } | Op::AtomicRmw { .. } | Op::CmpXchg { .. } => true,
            Op::Call { effects, .. } | Op::Invoke { effects, .. } => {
                !effects.contains(FnAttrs::PURE)
            }
            _ => false,
        }
    }

    /// Returns `true` if this operation is guaranteed to transfer control
    /// onward.
    ///
    /// Judged per instruction, via callee attributes: a call without the
    /// `WILLRETURN` attribute may diverge or trap.
    #[must_use]
    pub fn will_return(&self) -> bool {
        match self {
            Op::Call { effects, .. } | Op::Invoke { effects, .. } => {
                effects.contains(FnAttrs::WILLRETURN)
            }
            _ => true,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Const(value) => write!(f, "const {value}"),
            Op::Binary { kind, left, right } => write!(f, "{kind} {left}, {right}"),
            Op::Cmp { kind, left, right } => write!(f, "cmp {kind} {left}, {right}"),
            Op::Select {
                cond,
                if_true,
                if_false,
            } => write!(f, "select {cond}, {if_true}, {if_false}"),
            Op::Cast { kind, operand } => write!(f, "{kind} {operand}"),
            Op::Alloca { allocated } => write!(f, "alloca {allocated}"),
            Op::Load { addr } => write!(f, "load {addr}"),
            Op::Store { addr, value } => write!(f, "store {value} -> {addr}"),
            Op::AtomicRmw { op, addr, value } => write!(f, "atomicrmw {op} {addr}, {value}"),
            Op::CmpXchg {
                addr,
                expected,
                replacement,
            } => write!(f, "cmpxchg {addr}, {expected}, {replacement}"),
            Op::ElemAddr { base, offset } => match offset {
                ElemOffset::Const(off) => write!(f, "elemaddr {base} + {off}"),
                ElemOffset::Dynamic(v) => write!(f, "elemaddr {base} + {v}"),
            },
            Op::Call { target, args, .. } => {
                match target {
                    CallTarget::Direct(id) => write!(f, "call @{id}(")?,
                    CallTarget::Indirect(v) => write!(f, "call {v}(")?,
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Op::Invoke {
                target,
                args,
                normal,
                unwind,
                ..
            } => {
                match target {
                    CallTarget::Direct(id) => write!(f, "invoke @{id}(")?,
                    CallTarget::Indirect(v) => write!(f, "invoke {v}(")?,
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ") to {normal} unwind {unwind}")
            }
            Op::Phi { incoming } => {
                write!(f, "phi ")?;
                for (i, (block, value)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[{block}: {value}]")?;
                }
                Ok(())
            }
            Op::Jump { target } => write!(f, "jump {target}"),
            Op::Branch {
                cond,
                if_true,
                if_false,
            } => write!(f, "br {cond} ? {if_true} : {if_false}"),
            Op::Switch {
                value,
                default,
                cases,
            } => {
                write!(f, "switch {value}, default {default}")?;
                for (case, target) in cases {
                    write!(f, ", [{case}: {target}]")?;
                }
                Ok(())
            }
            Op::Return { value } => match value {
                Some(v) => write!(f, "ret {v}"),
                None => write!(f, "ret"),
            },
            Op::Unreachable => write!(f, "unreachable"),
        }
    }
}
