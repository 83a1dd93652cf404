//! SSA intermediate representation.
//!
//! This module provides the IR the lazification transformation operates on:
//! a module of functions in SSA form, with basic blocks, typed values, and
//! decomposed operations. The design follows two rules:
//!
//! - **Every instruction is a value.** An [`Inst`] pairs a [`ValueId`] with
//!   an [`Op`]; operations producing nothing have type [`Ty::Void`]. Branch
//!   and switch terminators therefore have identities and can appear in
//!   backward slices as gate values.
//! - **IDs are per-function.** Cloning instructions across functions
//!   allocates fresh values in the destination and remaps operands through
//!   explicit maps, which is exactly the bookkeeping function outlining
//!   needs anyway.
//!
//! # Architecture
//!
//! - [`types`] - value types, named struct types, and data layout
//! - [`ops`] - the decomposed operation enum and its queries
//! - [`function`] - values, blocks, and functions
//! - [`module`] - the module: function and struct registries
//! - [`builder`] - fluent closure-based construction
//! - [`eval`] - a reference interpreter used as the semantic test oracle

mod builder;
mod eval;
mod function;
mod module;
mod ops;
mod types;

pub use builder::{BlockCursor, FunctionBuilder, FunctionCursor};
pub use eval::{EvalError, EvalValue, Evaluator};
pub use function::{Block, BlockId, Function, Inst, ValueId};
pub use module::{duplicate_symbols, FuncId, Module};
pub use ops::{
    BinaryOpKind, CallTarget, CastKind, CmpKind, ConstValue, ElemOffset, FnAttrs, Op, RmwOpKind,
};
pub use types::{DataLayout, StructId, StructType, Ty};
