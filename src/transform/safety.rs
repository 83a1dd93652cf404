//! Outline safety: may this slice be extracted into a thunk?
//!
//! Forcing a thunk zero, one, or many times must be indistinguishable from
//! computing the argument eagerly at the call site. That holds only when
//! the slice is a pure function of its captured arguments, so each predicate
//! here rejects a way the slice could observe or mutate the world:
//!
//! 1. an instruction may throw
//! 2. an instruction may read or write memory
//! 3. an instruction may not return
//! 4. a stack allocation's address escapes
//! 5. the call site sits in a loop but part of the slice is at the same or
//!    shallower loop depth - lifting it would change trip-count semantics
//! 6. the seed itself is a stack allocation
//! 7. the seed is a single-incoming phi whose predecessor's terminator is
//!    outside the slice, a loop-closed artifact that would synthesize into
//!    invalid code

use log::debug;
use thiserror::Error;

use crate::analysis::{DominatorTree, LoopForest};
use crate::ir::{BlockId, Module, Op, ValueId};
use crate::transform::{escape::address_escapes, ProgramSlice};

/// The specific predicate that rejected a slice.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnsafeReason {
    /// An instruction in the slice may unwind.
    #[error("instruction {0} may throw")]
    MayThrow(ValueId),

    /// An instruction in the slice may read or write memory.
    #[error("instruction {0} may read or write memory")]
    TouchesMemory(ValueId),

    /// An instruction in the slice may never return.
    #[error("instruction {0} may not return")]
    MayDiverge(ValueId),

    /// A sliced stack allocation's address escapes.
    #[error("address of allocation {0} escapes")]
    EscapingAlloca(ValueId),

    /// A slice block sits at the same or shallower loop depth than the
    /// call site.
    #[error("block {0} is at the call site's loop depth or shallower")]
    LoopDepth(BlockId),

    /// The seed instruction is itself a stack allocation.
    #[error("slicing criterion is a stack allocation")]
    SeedIsAlloca,

    /// The seed is a single-incoming phi whose controlling terminator fell
    /// outside the slice.
    #[error("seed is a single-incoming phi with its terminator outside the slice")]
    DanglingLoopPhi,
}

/// Checks every safety predicate, returning the first violation.
///
/// # Errors
///
/// Returns the [`UnsafeReason`] that rejected the slice.
pub fn check_outline(module: &Module, slice: &ProgramSlice) -> Result<(), UnsafeReason> {
    let func = module.function(slice.caller());
    let defs = func.def_map();

    // Per-instruction predicates, in deterministic block order.
    for block in func.blocks() {
        for inst in block.insts() {
            if !slice.contains_inst(inst.id()) {
                continue;
            }
            if inst.op().may_throw() {
                return Err(UnsafeReason::MayThrow(inst.id()));
            }
            if inst.op().may_read_or_write_memory() {
                return Err(UnsafeReason::TouchesMemory(inst.id()));
            }
            if !inst.op().will_return() {
                return Err(UnsafeReason::MayDiverge(inst.id()));
            }
            if let Op::Alloca { allocated } = inst.op() {
                let size = module.size_of(*allocated);
                if address_escapes(module, func, inst.id(), size) {
                    return Err(UnsafeReason::EscapingAlloca(inst.id()));
                }
            }
        }
    }

    // The thunk is forced inside the callee, which runs once per call. If
    // the call sits in a loop and the slice reaches code of that loop (or
    // anything shallower feeding it), evaluation counts would change.
    let &(call_block, _) = defs
        .get(&slice.call_site())
        .expect("call site verified during slice construction");
    let dominators = DominatorTree::compute(func);
    let loops = LoopForest::compute(func, &dominators);
    let call_depth = loops.loop_depth(call_block);
    if call_depth > 0 {
        for block in func.blocks() {
            if slice.contains_block(block.id()) && loops.loop_depth(block.id()) <= call_depth {
                return Err(UnsafeReason::LoopDepth(block.id()));
            }
        }
    }

    let seed_op = defs
        .get(&slice.seed())
        .map(|&(block, index)| func.block(block).insts()[index].op());

    if matches!(seed_op, Some(Op::Alloca { .. })) {
        return Err(UnsafeReason::SeedIsAlloca);
    }

    // Loop-closed SSA can leave a phi with a single incoming edge; when its
    // controlling terminator was not sliced, eliminating the phi during
    // synthesis would produce invalid code.
    if let Some(Op::Phi { incoming }) = seed_op {
        if let [(pred, _)] = incoming.as_slice() {
            let terminator_sliced = func
                .terminator(*pred)
                .is_some_and(|inst| slice.contains_inst(inst.id()));
            if !terminator_sliced {
                return Err(UnsafeReason::DanglingLoopPhi);
            }
        }
    }

    Ok(())
}

/// Convenience wrapper: `true` when every predicate passes.
///
/// Rejections are logged at debug level with their reason.
#[must_use]
pub fn can_outline(module: &Module, slice: &ProgramSlice) -> bool {
    match check_outline(module, slice) {
        Ok(()) => true,
        Err(reason) => {
            debug!(
                "cannot outline slice of '{}': {reason}",
                module.function(slice.caller()).name()
            );
            false
        }
    }
}
