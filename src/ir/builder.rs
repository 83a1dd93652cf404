//! Builder pattern for programmatic IR construction.
//!
//! This module provides a fluent API for building functions without the
//! boilerplate of manual value/block ID management. It's useful for:
//!
//! - Writing unit tests for the transformation passes
//! - Constructing synthetic callers and callees in integration tests
//! - Programmatic IR construction by drivers
//!
//! # Design
//!
//! The builder uses a closure-based API where all blocks are defined within
//! a single expression, making the CFG structure visually clear:
//!
//! ```rust,ignore
//! let func = FunctionBuilder::new("max", &[Ty::I32, Ty::I32], Ty::I32).build_with(|f| {
//!     let (a, b) = (f.arg(0), f.arg(1));
//!     let result = f.declare(Ty::I32);
//!
//!     f.block(0, |b0| {
//!         let cond = b0.cmp(CmpKind::Sgt, a, b);
//!         b0.branch(cond, 1, 2);
//!     });
//!     f.block(1, |b1| b1.jump(3));
//!     f.block(2, |b2| b2.jump(3));
//!     f.block(3, |b3| {
//!         b3.phi_into(result, &[(1, a), (2, b)]);
//!         b3.ret_val(result);
//!     });
//! });
//! ```
//!
//! Values are allocated when operations are performed; operations that
//! produce results return the new [`ValueId`]. Loop-carried values are
//! handled by reserving an ID with [`FunctionCursor::declare`] and defining
//! it later with [`BlockCursor::phi_into`].

use rustc_hash::FxHashMap;

use crate::ir::{
    BinaryOpKind, Block, BlockId, CallTarget, CastKind, CmpKind, ConstValue, ElemOffset, FnAttrs,
    FuncId, Function, Inst, Op, RmwOpKind, Ty, ValueId,
};

/// Builder for constructing functions programmatically.
///
/// Blocks are identified by plain `usize` indices during building and become
/// [`BlockId`]s in the finished function; gaps are filled with empty blocks.
#[derive(Debug)]
pub struct FunctionBuilder {
    /// The function being assembled (owns the value table).
    func: Function,
    /// Blocks built so far, keyed by index.
    blocks: FxHashMap<usize, Block>,
    /// Highest block index seen.
    max_block: usize,
}

impl FunctionBuilder {
    /// Creates a builder for a function with the given signature.
    #[must_use]
    pub fn new(name: impl Into<String>, param_tys: &[Ty], ret: Ty) -> Self {
        Self {
            func: Function::new(name, param_tys, ret),
            blocks: FxHashMap::default(),
            max_block: 0,
        }
    }

    /// Builds the function using a closure that defines all blocks.
    #[must_use]
    pub fn build_with<F>(mut self, f: F) -> Function
    where
        F: FnOnce(&mut FunctionCursor<'_>),
    {
        let mut cursor = FunctionCursor { builder: &mut self };
        f(&mut cursor);

        for index in 0..=self.max_block {
            let id = self.func.add_block();
            if let Some(block) = self.blocks.remove(&index) {
                *self.func.block_mut(id) = block;
            }
        }
        self.func
    }
}

/// Context passed to the build closure for defining blocks.
pub struct FunctionCursor<'a> {
    builder: &'a mut FunctionBuilder,
}

impl FunctionCursor<'_> {
    /// The formal parameter at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn arg(&self, index: usize) -> ValueId {
        self.builder.func.param(index)
    }

    /// Reserves a value ID for later definition (loop-carried phis).
    #[must_use]
    pub fn declare(&mut self, ty: Ty) -> ValueId {
        self.builder.func.fresh_value(ty)
    }

    /// Defines block `id` using a closure.
    pub fn block<F>(&mut self, id: usize, f: F)
    where
        F: FnOnce(&mut BlockCursor<'_>),
    {
        self.builder.max_block = self.builder.max_block.max(id);

        let mut block = Block::new(BlockId::new(id));
        let mut cursor = BlockCursor {
            func: &mut self.builder.func,
            block: &mut block,
        };
        f(&mut cursor);

        self.builder.blocks.insert(id, block);
    }
}

/// Builder for a single block's instructions.
///
/// Operations that produce values return the allocated [`ValueId`];
/// terminators return nothing and should be the last call in the closure.
pub struct BlockCursor<'a> {
    func: &'a mut Function,
    block: &'a mut Block,
}

impl BlockCursor<'_> {
    /// Appends a raw operation with an explicit result type.
    pub fn op(&mut self, ty: Ty, op: Op) -> ValueId {
        let id = self.func.fresh_value(ty);
        self.block.push(Inst::new(id, op));
        id
    }

    /// Adds: `const i32`
    pub fn const_i32(&mut self, value: i32) -> ValueId {
        self.op(Ty::I32, Op::Const(ConstValue::I32(value)))
    }

    /// Adds: `const i64`
    pub fn const_i64(&mut self, value: i64) -> ValueId {
        self.op(Ty::I64, Op::Const(ConstValue::I64(value)))
    }

    /// Adds: `const i1`
    pub fn const_bool(&mut self, value: bool) -> ValueId {
        self.op(Ty::I1, Op::Const(ConstValue::I1(value)))
    }

    /// Adds: `const null`
    pub fn const_null(&mut self) -> ValueId {
        self.op(Ty::Ptr, Op::Const(ConstValue::NullPtr))
    }

    /// Adds: the address of a function.
    pub fn const_fn(&mut self, func: FuncId) -> ValueId {
        self.op(Ty::FnPtr, Op::Const(ConstValue::Function(func)))
    }

    /// Adds a binary operation; the result type follows the left operand.
    pub fn binary(&mut self, kind: BinaryOpKind, left: ValueId, right: ValueId) -> ValueId {
        let ty = self.func.value_ty(left);
        self.op(ty, Op::Binary { kind, left, right })
    }

    /// Adds: `left + right`
    pub fn add(&mut self, left: ValueId, right: ValueId) -> ValueId {
        self.binary(BinaryOpKind::Add, left, right)
    }

    /// Adds: `left - right`
    pub fn sub(&mut self, left: ValueId, right: ValueId) -> ValueId {
        self.binary(BinaryOpKind::Sub, left, right)
    }

    /// Adds: `left * right`
    pub fn mul(&mut self, left: ValueId, right: ValueId) -> ValueId {
        self.binary(BinaryOpKind::Mul, left, right)
    }

    /// Adds an integer comparison producing `i1`.
    pub fn cmp(&mut self, kind: CmpKind, left: ValueId, right: ValueId) -> ValueId {
        self.op(Ty::I1, Op::Cmp { kind, left, right })
    }

    /// Adds: `cond ? if_true : if_false`
    pub fn select(&mut self, cond: ValueId, if_true: ValueId, if_false: ValueId) -> ValueId {
        let ty = self.func.value_ty(if_true);
        self.op(
            ty,
            Op::Select {
                cond,
                if_true,
                if_false,
            },
        )
    }

    /// Adds a cast with an explicit result type.
    pub fn cast(&mut self, kind: CastKind, operand: ValueId, ty: Ty) -> ValueId {
        self.op(ty, Op::Cast { kind, operand })
    }

    /// Adds: `alloca ty`, producing the slot address.
    pub fn alloca(&mut self, allocated: Ty) -> ValueId {
        self.op(Ty::Ptr, Op::Alloca { allocated })
    }

    /// Adds: `load addr` with an explicit loaded type.
    pub fn load(&mut self, addr: ValueId, ty: Ty) -> ValueId {
        self.op(ty, Op::Load { addr })
    }

    /// Adds: `*addr = value`
    pub fn store(&mut self, addr: ValueId, value: ValueId) {
        self.op(Ty::Void, Op::Store { addr, value });
    }

    /// Adds an atomic read-modify-write producing the previous value.
    pub fn atomic_rmw(&mut self, op: RmwOpKind, addr: ValueId, value: ValueId) -> ValueId {
        let ty = self.func.value_ty(value);
        self.op(ty, Op::AtomicRmw { op, addr, value })
    }

    /// Adds an atomic compare-exchange producing the previous value.
    pub fn cmpxchg(&mut self, addr: ValueId, expected: ValueId, replacement: ValueId) -> ValueId {
        let ty = self.func.value_ty(expected);
        self.op(
            ty,
            Op::CmpXchg {
                addr,
                expected,
                replacement,
            },
        )
    }

    /// Adds: `base + offset` with a constant byte offset.
    pub fn elem_addr(&mut self, base: ValueId, offset: u64) -> ValueId {
        self.op(
            Ty::Ptr,
            Op::ElemAddr {
                base,
                offset: ElemOffset::Const(offset),
            },
        )
    }

    /// Adds: `base + offset` with a dynamic byte offset.
    pub fn elem_addr_dyn(&mut self, base: ValueId, offset: ValueId) -> ValueId {
        self.op(
            Ty::Ptr,
            Op::ElemAddr {
                base,
                offset: ElemOffset::Dynamic(offset),
            },
        )
    }

    /// Adds a direct call with explicit return type and callee effects.
    pub fn call(&mut self, callee: FuncId, args: &[ValueId], ret: Ty, effects: FnAttrs) -> ValueId {
        self.op(
            ret,
            Op::Call {
                target: CallTarget::Direct(callee),
                args: args.to_vec(),
                effects,
            },
        )
    }

    /// Adds an indirect call through a function-pointer value.
    pub fn call_indirect(
        &mut self,
        fptr: ValueId,
        args: &[ValueId],
        ret: Ty,
        effects: FnAttrs,
    ) -> ValueId {
        self.op(
            ret,
            Op::Call {
                target: CallTarget::Indirect(fptr),
                args: args.to_vec(),
                effects,
            },
        )
    }

    /// Adds an invoke terminator with normal and unwind edges.
    pub fn invoke(
        &mut self,
        callee: FuncId,
        args: &[ValueId],
        ret: Ty,
        effects: FnAttrs,
        normal: usize,
        unwind: usize,
    ) -> ValueId {
        self.op(
            ret,
            Op::Invoke {
                target: CallTarget::Direct(callee),
                args: args.to_vec(),
                effects,
                normal: BlockId::new(normal),
                unwind: BlockId::new(unwind),
            },
        )
    }

    /// Adds a phi node merging `(predecessor, value)` pairs.
    pub fn phi(&mut self, ty: Ty, incoming: &[(usize, ValueId)]) -> ValueId {
        self.op(
            ty,
            Op::Phi {
                incoming: incoming
                    .iter()
                    .map(|&(block, value)| (BlockId::new(block), value))
                    .collect(),
            },
        )
    }

    /// Defines a previously declared value as a phi node.
    ///
    /// Use with [`FunctionCursor::declare`] for values referenced before
    /// their defining block is built (loop headers).
    pub fn phi_into(&mut self, dest: ValueId, incoming: &[(usize, ValueId)]) {
        self.block.push(Inst::new(
            dest,
            Op::Phi {
                incoming: incoming
                    .iter()
                    .map(|&(block, value)| (BlockId::new(block), value))
                    .collect(),
            },
        ));
    }

    /// Adds: `jump target`
    pub fn jump(&mut self, target: usize) {
        self.op(
            Ty::Void,
            Op::Jump {
                target: BlockId::new(target),
            },
        );
    }

    /// Adds: `br cond ? if_true : if_false`
    pub fn branch(&mut self, cond: ValueId, if_true: usize, if_false: usize) {
        self.op(
            Ty::Void,
            Op::Branch {
                cond,
                if_true: BlockId::new(if_true),
                if_false: BlockId::new(if_false),
            },
        );
    }

    /// Adds a switch with `(match value, target)` cases.
    pub fn switch(&mut self, value: ValueId, default: usize, cases: &[(i64, usize)]) {
        self.op(
            Ty::Void,
            Op::Switch {
                value,
                default: BlockId::new(default),
                cases: cases
                    .iter()
                    .map(|&(case, target)| (case, BlockId::new(target)))
                    .collect(),
            },
        );
    }

    /// Adds: `ret` (void)
    pub fn ret(&mut self) {
        self.op(Ty::Void, Op::Return { value: None });
    }

    /// Adds: `ret value`
    pub fn ret_val(&mut self, value: ValueId) {
        self.op(Ty::Void, Op::Return { value: Some(value) });
    }

    /// Adds: `unreachable`
    pub fn unreachable(&mut self) {
        self.op(Ty::Void, Op::Unreachable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_function() {
        let func = FunctionBuilder::new("sum", &[Ty::I32, Ty::I32], Ty::I32).build_with(|f| {
            let (a, b) = (f.arg(0), f.arg(1));
            f.block(0, |blk| {
                let sum = blk.add(a, b);
                blk.ret_val(sum);
            });
        });

        assert_eq!(func.block_count(), 1);
        assert_eq!(func.instruction_count(), 2);
        assert_eq!(func.param_count(), 2);
    }

    #[test]
    fn test_diamond_control_flow() {
        let func = FunctionBuilder::new("pick", &[Ty::I1], Ty::I32).build_with(|f| {
            let cond = f.arg(0);
            let mut v_then = ValueId::new(0);
            let mut v_else = ValueId::new(0);

            f.block(0, |b| b.branch(cond, 1, 2));
            f.block(1, |b| {
                v_then = b.const_i32(1);
                b.jump(3);
            });
            f.block(2, |b| {
                v_else = b.const_i32(0);
                b.jump(3);
            });
            f.block(3, |b| {
                let merged = b.phi(Ty::I32, &[(1, v_then), (2, v_else)]);
                b.ret_val(merged);
            });
        });

        assert_eq!(func.block_count(), 4);
        assert_eq!(func.block(BlockId::new(3)).phi_count(), 1);
        assert_eq!(
            func.successors(BlockId::new(0)),
            vec![BlockId::new(1), BlockId::new(2)]
        );
    }

    #[test]
    fn test_block_gaps_filled() {
        let func = FunctionBuilder::new("gappy", &[], Ty::Void).build_with(|f| {
            f.block(0, |b| b.jump(2));
            f.block(2, |b| b.ret());
        });

        assert_eq!(func.block_count(), 3);
        assert!(func.block(BlockId::new(1)).insts().is_empty());
    }

    #[test]
    fn test_declared_loop_phi() {
        // for (i = 0; i < n; i++) {}
        let func = FunctionBuilder::new("count", &[Ty::I32], Ty::I32).build_with(|f| {
            let n = f.arg(0);
            let i = f.declare(Ty::I32);

            let mut zero = ValueId::new(0);
            let mut next = ValueId::new(0);

            f.block(0, |b| {
                zero = b.const_i32(0);
                b.jump(1);
            });
            f.block(1, |b| {
                // Defined here, referenced by block 2 before it was built.
                let cond = b.cmp(CmpKind::Slt, i, n);
                b.branch(cond, 2, 3);
            });
            f.block(2, |b| {
                let one = b.const_i32(1);
                next = b.add(i, one);
                b.jump(1);
            });
            f.block(3, |b| b.ret_val(i));

            // Patch the phi in after both incoming values exist.
            f.block(1, |b| {
                b.phi_into(i, &[(0, zero), (2, next)]);
                let cond = b.cmp(CmpKind::Slt, i, n);
                b.branch(cond, 2, 3);
            });
        });

        let header = func.block(BlockId::new(1));
        assert_eq!(header.phi_count(), 1);
        assert_eq!(header.insts()[0].id(), ValueId::new(1));
    }

    #[test]
    fn test_switch_builder() {
        let func = FunctionBuilder::new("dispatch", &[Ty::I32], Ty::Void).build_with(|f| {
            let v = f.arg(0);
            f.block(0, |b| b.switch(v, 3, &[(0, 1), (1, 2)]));
            f.block(1, |b| b.ret());
            f.block(2, |b| b.ret());
            f.block(3, |b| b.ret());
        });

        // Default first, then cases in order.
        assert_eq!(
            func.successors(BlockId::new(0)),
            vec![BlockId::new(3), BlockId::new(1), BlockId::new(2)]
        );
    }
}
