//! Reference interpreter for IR modules.
//!
//! The evaluator executes functions directly over the in-memory IR. It is
//! the semantic oracle for the transformation's tests: the caller's original
//! expression, the outlined thunk, and the rewritten call site must all
//! produce the same values, and memoized thunks must hit their cache on the
//! second force. Running both sides of a rewrite through the evaluator turns
//! those contracts into executable assertions.
//!
//! # Model
//!
//! - Integers are stored zero-extended in 64 bits; signed operations
//!   sign-extend on demand.
//! - `alloca` bump-allocates from a flat address space; loads and stores
//!   move whole [`EvalValue`]s keyed by address, so function pointers can
//!   round-trip through closure slots without byte encoding.
//! - Direct and indirect calls recurse with a depth limit; every executed
//!   instruction counts against a step limit so divergent IR terminates the
//!   evaluation instead of the test suite.
//!
//! Invokes and unwinding are not modeled; the transformation refuses slices
//! containing them anyway.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ir::{
    BinaryOpKind, BlockId, CallTarget, CastKind, CmpKind, ConstValue, ElemOffset, FuncId, Module,
    Op, RmwOpKind, Ty, ValueId,
};

/// Errors produced by the evaluator.
///
/// These are deliberately separate from the crate's [`Error`](crate::Error):
/// evaluation failures are test-oracle findings, not transformation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The evaluator does not model this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The step budget was exhausted; the IR likely diverges.
    #[error("step limit exceeded")]
    StepLimit,

    /// The call depth budget was exhausted.
    #[error("call depth exceeded")]
    CallDepth,

    /// A load from an address nothing was stored to.
    #[error("read of uninitialized memory at {0:#x}")]
    BadMemory(u64),

    /// Integer division or remainder by zero.
    #[error("division by zero")]
    DivByZero,

    /// Attempt to execute a function with no body.
    #[error("function '{0}' has no body")]
    NoBody(String),

    /// An operand had the wrong kind of value.
    #[error("type error: {0}")]
    Type(String),
}

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvalValue {
    /// An integer, stored zero-extended.
    Int {
        /// The static type, used for masking and sign extension.
        ty: Ty,
        /// The bits, zero-extended to 64.
        bits: u64,
    },
    /// A 32-bit float.
    F32(f32),
    /// A 64-bit float.
    F64(f64),
    /// A pointer into the evaluator's address space.
    Ptr(u64),
    /// A function address.
    Func(FuncId),
    /// The value of nothing: void results and missing returns.
    Undef,
}

impl EvalValue {
    /// Constructs an `i32` value.
    #[must_use]
    pub fn i32(value: i32) -> Self {
        EvalValue::Int {
            ty: Ty::I32,
            bits: u64::from(value as u32),
        }
    }

    /// Constructs an `i64` value.
    #[must_use]
    pub fn i64(value: i64) -> Self {
        EvalValue::Int {
            ty: Ty::I64,
            bits: value as u64,
        }
    }

    /// Constructs an `i1` value.
    #[must_use]
    pub fn bool(value: bool) -> Self {
        EvalValue::Int {
            ty: Ty::I1,
            bits: u64::from(value),
        }
    }

    /// The value sign-extended to `i64`, if this is an integer.
    #[must_use]
    pub fn as_signed(&self) -> Option<i64> {
        match self {
            EvalValue::Int { ty, bits } => Some(sign_extend(*ty, *bits)),
            _ => None,
        }
    }
}

fn width(ty: Ty) -> u32 {
    ty.bit_width().unwrap_or(64)
}

fn mask(ty: Ty, bits: u64) -> u64 {
    let w = width(ty);
    if w >= 64 {
        bits
    } else {
        bits & ((1u64 << w) - 1)
    }
}

fn sign_extend(ty: Ty, bits: u64) -> i64 {
    let w = width(ty);
    if w >= 64 {
        bits as i64
    } else {
        let shift = 64 - w;
        ((bits << shift) as i64) >> shift
    }
}

/// Interprets functions of a module.
///
/// One evaluator owns one address space; allocas from nested calls share it,
/// which is exactly what closure population across a call boundary needs.
#[derive(Debug)]
pub struct Evaluator<'m> {
    module: &'m Module,
    memory: FxHashMap<u64, EvalValue>,
    next_addr: u64,
    steps_remaining: u64,
}

const DEFAULT_STEP_LIMIT: u64 = 1_000_000;
const MAX_CALL_DEPTH: usize = 128;

impl<'m> Evaluator<'m> {
    /// Creates an evaluator for the given module with the default budget.
    #[must_use]
    pub fn new(module: &'m Module) -> Self {
        Self::with_step_limit(module, DEFAULT_STEP_LIMIT)
    }

    /// Creates an evaluator with an explicit step budget.
    #[must_use]
    pub fn with_step_limit(module: &'m Module, steps: u64) -> Self {
        Self {
            module,
            memory: FxHashMap::default(),
            next_addr: 0x1000,
            steps_remaining: steps,
        }
    }

    /// Calls a function with the given arguments and returns its result.
    ///
    /// # Errors
    ///
    /// Returns an [`EvalError`] if execution hits an unmodeled operation,
    /// exhausts its budgets, or trips a runtime fault.
    pub fn call(&mut self, func: FuncId, args: &[EvalValue]) -> Result<EvalValue, EvalError> {
        self.call_at_depth(func, args, 0)
    }

    fn call_at_depth(
        &mut self,
        func: FuncId,
        args: &[EvalValue],
        depth: usize,
    ) -> Result<EvalValue, EvalError> {
        if depth >= MAX_CALL_DEPTH {
            return Err(EvalError::CallDepth);
        }

        let function = self.module.function(func);
        if function.is_declaration() || function.block_count() == 0 {
            return Err(EvalError::NoBody(function.name().to_string()));
        }

        let mut env: FxHashMap<ValueId, EvalValue> = FxHashMap::default();
        for (i, &param) in function.params().iter().enumerate() {
            env.insert(param, args.get(i).copied().unwrap_or(EvalValue::Undef));
        }

        let mut current = function.entry();
        let mut previous: Option<BlockId> = None;

        loop {
            let block = function.block(current);

            // Phi nodes read their operands simultaneously on block entry.
            let phi_count = block.first_non_phi();
            if phi_count > 0 {
                let prev =
                    previous.ok_or_else(|| EvalError::Type("phi in entry block".to_string()))?;
                let mut staged = Vec::with_capacity(phi_count);
                for inst in block.insts().iter().take(phi_count) {
                    self.consume_step()?;
                    let incoming = inst
                        .op()
                        .phi_incoming()
                        .expect("leading instruction counted as phi");
                    let &(_, value) = incoming
                        .iter()
                        .find(|&&(pred, _)| pred == prev)
                        .ok_or_else(|| {
                            EvalError::Type(format!("phi {} has no incoming for {prev}", inst.id()))
                        })?;
                    staged.push((inst.id(), self.lookup(&env, value)?));
                }
                for (id, value) in staged {
                    env.insert(id, value);
                }
            }

            let mut transfer: Option<BlockId> = None;
            for inst in &block.insts()[phi_count..] {
                self.consume_step()?;
                match inst.op() {
                    Op::Jump { target } => {
                        transfer = Some(*target);
                        break;
                    }
                    Op::Branch {
                        cond,
                        if_true,
                        if_false,
                    } => {
                        let taken = self.int_of(&env, *cond)? != 0;
                        transfer = Some(if taken { *if_true } else { *if_false });
                        break;
                    }
                    Op::Switch {
                        value,
                        default,
                        cases,
                    } => {
                        let scrutinee = sign_extend(
                            self.ty_of(&env, *value)?,
                            self.int_of(&env, *value)?,
                        );
                        let target = cases
                            .iter()
                            .find(|&&(case, _)| case == scrutinee)
                            .map_or(*default, |&(_, target)| target);
                        transfer = Some(target);
                        break;
                    }
                    Op::Return { value } => {
                        return match value {
                            Some(v) => self.lookup(&env, *v),
                            None => Ok(EvalValue::Undef),
                        };
                    }
                    Op::Unreachable => {
                        return Err(EvalError::Type("reached unreachable".to_string()));
                    }
                    Op::Invoke { .. } => {
                        return Err(EvalError::Unsupported("invoke".to_string()));
                    }
                    Op::Phi { .. } => {
                        return Err(EvalError::Type("phi past block head".to_string()));
                    }
                    op => {
                        let ty = function.value_ty(inst.id());
                        let result = self.exec_op(&env, op, ty, depth)?;
                        env.insert(inst.id(), result);
                    }
                }
            }

            match transfer {
                Some(next) => {
                    previous = Some(current);
                    current = next;
                }
                None => {
                    return Err(EvalError::Type(format!(
                        "block {current} fell through without terminator"
                    )));
                }
            }
        }
    }

    fn consume_step(&mut self) -> Result<(), EvalError> {
        if self.steps_remaining == 0 {
            return Err(EvalError::StepLimit);
        }
        self.steps_remaining -= 1;
        Ok(())
    }

    fn lookup(
        &self,
        env: &FxHashMap<ValueId, EvalValue>,
        value: ValueId,
    ) -> Result<EvalValue, EvalError> {
        env.get(&value)
            .copied()
            .ok_or_else(|| EvalError::Type(format!("use of unevaluated value {value}")))
    }

    fn int_of(&self, env: &FxHashMap<ValueId, EvalValue>, value: ValueId) -> Result<u64, EvalError> {
        match self.lookup(env, value)? {
            EvalValue::Int { bits, .. } => Ok(bits),
            other => Err(EvalError::Type(format!("expected integer, got {other:?}"))),
        }
    }

    fn ty_of(&self, env: &FxHashMap<ValueId, EvalValue>, value: ValueId) -> Result<Ty, EvalError> {
        match self.lookup(env, value)? {
            EvalValue::Int { ty, .. } => Ok(ty),
            other => Err(EvalError::Type(format!("expected integer, got {other:?}"))),
        }
    }

    fn ptr_of(&self, env: &FxHashMap<ValueId, EvalValue>, value: ValueId) -> Result<u64, EvalError> {
        match self.lookup(env, value)? {
            EvalValue::Ptr(addr) => Ok(addr),
            other => Err(EvalError::Type(format!("expected pointer, got {other:?}"))),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn exec_op(
        &mut self,
        env: &FxHashMap<ValueId, EvalValue>,
        op: &Op,
        result_ty: Ty,
        depth: usize,
    ) -> Result<EvalValue, EvalError> {
        match op {
            Op::Const(value) => Ok(match *value {
                ConstValue::I1(v) => EvalValue::bool(v),
                ConstValue::I8(v) => EvalValue::Int {
                    ty: Ty::I8,
                    bits: u64::from(v as u8),
                },
                ConstValue::I16(v) => EvalValue::Int {
                    ty: Ty::I16,
                    bits: u64::from(v as u16),
                },
                ConstValue::I32(v) => EvalValue::i32(v),
                ConstValue::I64(v) => EvalValue::i64(v),
                ConstValue::F32(v) => EvalValue::F32(v),
                ConstValue::F64(v) => EvalValue::F64(v),
                ConstValue::NullPtr => EvalValue::Ptr(0),
                ConstValue::Function(id) => EvalValue::Func(id),
            }),

            Op::Binary { kind, left, right } => {
                match (self.lookup(env, *left)?, self.lookup(env, *right)?) {
                    (EvalValue::F64(l), EvalValue::F64(r)) => Ok(EvalValue::F64(match kind {
                        BinaryOpKind::Add => l + r,
                        BinaryOpKind::Sub => l - r,
                        BinaryOpKind::Mul => l * r,
                        _ => return Err(EvalError::Unsupported(format!("f64 {kind}"))),
                    })),
                    (EvalValue::F32(l), EvalValue::F32(r)) => Ok(EvalValue::F32(match kind {
                        BinaryOpKind::Add => l + r,
                        BinaryOpKind::Sub => l - r,
                        BinaryOpKind::Mul => l * r,
                        _ => return Err(EvalError::Unsupported(format!("f32 {kind}"))),
                    })),
                    (EvalValue::Int { ty, bits: l }, EvalValue::Int { bits: r, .. }) => {
                        let ls = sign_extend(ty, l);
                        let rs = sign_extend(ty, r);
                        let bits = match kind {
                            BinaryOpKind::Add => ls.wrapping_add(rs) as u64,
                            BinaryOpKind::Sub => ls.wrapping_sub(rs) as u64,
                            BinaryOpKind::Mul => ls.wrapping_mul(rs) as u64,
                            BinaryOpKind::Sdiv => {
                                if rs == 0 {
                                    return Err(EvalError::DivByZero);
                                }
                                ls.wrapping_div(rs) as u64
                            }
                            BinaryOpKind::Udiv => {
                                if r == 0 {
                                    return Err(EvalError::DivByZero);
                                }
                                l / r
                            }
                            BinaryOpKind::Srem => {
                                if rs == 0 {
                                    return Err(EvalError::DivByZero);
                                }
                                ls.wrapping_rem(rs) as u64
                            }
                            BinaryOpKind::Urem => {
                                if r == 0 {
                                    return Err(EvalError::DivByZero);
                                }
                                l % r
                            }
                            BinaryOpKind::And => l & r,
                            BinaryOpKind::Or => l | r,
                            BinaryOpKind::Xor => l ^ r,
                            BinaryOpKind::Shl => l.wrapping_shl(r as u32),
                            BinaryOpKind::Lshr => l.wrapping_shr(r as u32),
                            BinaryOpKind::Ashr => (ls.wrapping_shr(r as u32)) as u64,
                        };
                        Ok(EvalValue::Int {
                            ty,
                            bits: mask(ty, bits),
                        })
                    }
                    (l, r) => Err(EvalError::Type(format!("binary {kind} on {l:?}, {r:?}"))),
                }
            }

            Op::Cmp { kind, left, right } => {
                let lty = self.ty_of(env, *left)?;
                let l = self.int_of(env, *left)?;
                let r = self.int_of(env, *right)?;
                let (ls, rs) = (sign_extend(lty, l), sign_extend(lty, r));
                let result = match kind {
                    CmpKind::Eq => l == r,
                    CmpKind::Ne => l != r,
                    CmpKind::Slt => ls < rs,
                    CmpKind::Sle => ls <= rs,
                    CmpKind::Sgt => ls > rs,
                    CmpKind::Sge => ls >= rs,
                    CmpKind::Ult => l < r,
                    CmpKind::Ule => l <= r,
                    CmpKind::Ugt => l > r,
                    CmpKind::Uge => l >= r,
                };
                Ok(EvalValue::bool(result))
            }

            Op::Select {
                cond,
                if_true,
                if_false,
            } => {
                if self.int_of(env, *cond)? != 0 {
                    self.lookup(env, *if_true)
                } else {
                    self.lookup(env, *if_false)
                }
            }

            Op::Cast { kind, operand } => {
                let input = self.lookup(env, *operand)?;
                match kind {
                    CastKind::Bitcast | CastKind::AddrSpace => Ok(input),
                    CastKind::Trunc | CastKind::Zext => match input {
                        EvalValue::Int { bits, .. } => Ok(EvalValue::Int {
                            ty: result_ty,
                            bits: mask(result_ty, bits),
                        }),
                        other => Err(EvalError::Type(format!("{kind} of {other:?}"))),
                    },
                    CastKind::Sext => match input {
                        EvalValue::Int { ty, bits } => Ok(EvalValue::Int {
                            ty: result_ty,
                            bits: mask(result_ty, sign_extend(ty, bits) as u64),
                        }),
                        other => Err(EvalError::Type(format!("sext of {other:?}"))),
                    },
                    CastKind::PtrToInt => match input {
                        EvalValue::Ptr(addr) => Ok(EvalValue::Int {
                            ty: result_ty,
                            bits: mask(result_ty, addr),
                        }),
                        other => Err(EvalError::Type(format!("ptrtoint of {other:?}"))),
                    },
                    CastKind::IntToPtr => match input {
                        EvalValue::Int { bits, .. } => Ok(EvalValue::Ptr(bits)),
                        other => Err(EvalError::Type(format!("inttoptr of {other:?}"))),
                    },
                }
            }

            Op::Alloca { allocated } => {
                let size = self.module.size_of(*allocated).max(1);
                self.next_addr = self.next_addr.next_multiple_of(8);
                let base = self.next_addr;
                self.next_addr += size;
                Ok(EvalValue::Ptr(base))
            }

            Op::Load { addr } => {
                let address = self.ptr_of(env, *addr)?;
                self.memory
                    .get(&address)
                    .copied()
                    .ok_or(EvalError::BadMemory(address))
            }

            Op::Store { addr, value } => {
                let address = self.ptr_of(env, *addr)?;
                let stored = self.lookup(env, *value)?;
                self.memory.insert(address, stored);
                Ok(EvalValue::Undef)
            }

            Op::AtomicRmw { op, addr, value } => {
                let address = self.ptr_of(env, *addr)?;
                let old = self
                    .memory
                    .get(&address)
                    .copied()
                    .ok_or(EvalError::BadMemory(address))?;
                let operand = self.lookup(env, *value)?;
                let (EvalValue::Int { ty, bits: o }, EvalValue::Int { bits: v, .. }) =
                    (old, operand)
                else {
                    return Err(EvalError::Type("atomicrmw on non-integers".to_string()));
                };
                let bits = match op {
                    RmwOpKind::Xchg => v,
                    RmwOpKind::Add => o.wrapping_add(v),
                    RmwOpKind::Sub => o.wrapping_sub(v),
                    RmwOpKind::And => o & v,
                    RmwOpKind::Or => o | v,
                    RmwOpKind::Xor => o ^ v,
                };
                self.memory.insert(
                    address,
                    EvalValue::Int {
                        ty,
                        bits: mask(ty, bits),
                    },
                );
                Ok(old)
            }

            Op::CmpXchg {
                addr,
                expected,
                replacement,
            } => {
                let address = self.ptr_of(env, *addr)?;
                let old = self
                    .memory
                    .get(&address)
                    .copied()
                    .ok_or(EvalError::BadMemory(address))?;
                if old == self.lookup(env, *expected)? {
                    let new = self.lookup(env, *replacement)?;
                    self.memory.insert(address, new);
                }
                Ok(old)
            }

            Op::ElemAddr { base, offset } => {
                let base_addr = self.ptr_of(env, *base)?;
                let off = match offset {
                    ElemOffset::Const(off) => *off,
                    ElemOffset::Dynamic(v) => self.int_of(env, *v)?,
                };
                Ok(EvalValue::Ptr(base_addr + off))
            }

            Op::Call { target, args, .. } => {
                let callee = match target {
                    CallTarget::Direct(id) => *id,
                    CallTarget::Indirect(v) => match self.lookup(env, *v)? {
                        EvalValue::Func(id) => id,
                        other => {
                            return Err(EvalError::Type(format!(
                                "indirect call through {other:?}"
                            )))
                        }
                    },
                };
                let mut actuals = Vec::with_capacity(args.len());
                for &arg in args {
                    actuals.push(self.lookup(env, arg)?);
                }
                self.call_at_depth(callee, &actuals, depth + 1)
            }

            other => Err(EvalError::Unsupported(format!("{other}"))),
        }
    }
}
