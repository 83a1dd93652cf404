//! Call-site rewriting: demand-driven callees and closure construction.
//!
//! Two mutations complete a lazification. First the callee is cloned with
//! the lazified parameter's type lowered to a closure pointer, and every
//! use of that parameter is replaced by a **force**: load the function
//! pointer out of the closure's field 0 and call it with the closure as the
//! single argument. Second, the original call site allocates the closure on
//! the caller's stack, stores the thunk's address (and, when memoized, a
//! cleared flag), populates the captured-argument slots in `dep_args`
//! order, and redirects the call to the clone.
//!
//! Forcing at every use preserves call-by-name semantics for the
//! non-memoized variant; the memoized thunk's internal guard turns the same
//! callee shape into call-by-need.

use log::debug;

use crate::ir::{
    BlockId, CallTarget, ConstValue, ElemOffset, FnAttrs, FuncId, Module, Op, Ty, ValueId,
};
use crate::transform::{OutlinedThunk, ProgramSlice};
use crate::{Error, Result};

/// Effects of a force call: the thunk never unwinds and always returns,
/// but the memoized variant writes its own closure.
fn force_effects() -> FnAttrs {
    FnAttrs::NOUNWIND | FnAttrs::WILLRETURN
}

/// Clones `callee` with parameter `index` lowered to a closure pointer and
/// every use of it forced on demand.
///
/// # Errors
///
/// [`Error::NotLazifiable`] when the callee is an external declaration or
/// the parameter index is out of range.
pub(crate) fn clone_callee(
    module: &mut Module,
    callee: FuncId,
    index: usize,
    thunk_ret: Ty,
) -> Result<FuncId> {
    let original = module.function(callee);
    if original.is_declaration() {
        return Err(Error::NotLazifiable {
            message: format!("callee '{}' has no body to rewrite", original.name()),
        });
    }
    if index >= original.param_count() {
        return Err(Error::NotLazifiable {
            message: format!(
                "callee '{}' has {} parameters, index {index} out of range",
                original.name(),
                original.param_count()
            ),
        });
    }

    let mut clone = original.clone();
    clone.set_name(module.unique_name(&format!("_lazify_callee_{}_{index}_", original.name())));
    clone.set_param_ty(index, Ty::Ptr);
    insert_forces(&mut clone, index, thunk_ret);

    debug!("cloned callee into '{}'", clone.name());
    Ok(module.add_function(clone))
}

/// Inserts a force in front of every instruction using the lazified
/// parameter and redirects those uses to the forced value.
///
/// Phi uses force in the corresponding predecessor block instead, in front
/// of its terminator.
fn insert_forces(func: &mut crate::ir::Function, index: usize, thunk_ret: Ty) {
    let param = func.param(index);

    for block_index in 0..func.block_count() {
        let block_id = BlockId::new(block_index);
        let mut position = 0;
        while position < func.block(block_id).insts().len() {
            let inst = &func.block(block_id).insts()[position];
            let is_phi = inst.is_phi();
            let uses_param = inst.op().uses().contains(&param);
            if !uses_param || is_phi {
                position += 1;
                continue;
            }

            let forced = emit_force(func, block_id, position, param, thunk_ret);
            let inst = &mut func.block_mut(block_id).insts_mut()[position + 3];
            inst.op_mut().replace_uses(param, forced);
            position += 4;
        }
    }

    // Phi operands: force at the tail of the incoming block.
    for block_index in 0..func.block_count() {
        let block_id = BlockId::new(block_index);
        for phi_index in 0..func.block(block_id).first_non_phi() {
            let incoming = func.block(block_id).insts()[phi_index]
                .op()
                .phi_incoming()
                .expect("leading instruction is a phi")
                .to_vec();
            for (edge, (pred, value)) in incoming.into_iter().enumerate() {
                if value != param {
                    continue;
                }
                let tail = func.block(pred).insts().len().saturating_sub(1);
                let forced = emit_force(func, pred, tail, param, thunk_ret);
                let phi = &mut func.block_mut(block_id).insts_mut()[phi_index];
                if let Some(entries) = phi.op_mut().phi_incoming_mut() {
                    entries[edge].1 = forced;
                }
            }
        }
    }
}

/// Emits `fptr = load (closure + 0); forced = fptr(closure)` at `position`.
fn emit_force(
    func: &mut crate::ir::Function,
    block: BlockId,
    position: usize,
    closure: ValueId,
    thunk_ret: Ty,
) -> ValueId {
    let fptr_addr = func.insert(
        block,
        position,
        Ty::Ptr,
        Op::ElemAddr {
            base: closure,
            offset: ElemOffset::Const(0),
        },
    );
    let fptr = func.insert(block, position + 1, Ty::FnPtr, Op::Load { addr: fptr_addr });
    func.insert(
        block,
        position + 2,
        thunk_ret,
        Op::Call {
            target: CallTarget::Indirect(fptr),
            args: vec![closure],
            effects: force_effects(),
        },
    )
}

/// Builds the closure at the call site and redirects the call to the
/// cloned callee.
///
/// The closure is a stack allocation: field 0 receives the thunk's
/// address, the memo flag (field 2) is cleared when memoized, and the
/// captured-argument slots are populated from the slice's `dep_args` in
/// signature order.
///
/// # Errors
///
/// [`Error::NoDefinition`] when the call site is missing, [`Error::Ir`]
/// when it is not a call instruction.
pub(crate) fn redirect_call_site(
    module: &mut Module,
    slice: &ProgramSlice,
    thunk: &OutlinedThunk,
    new_callee: FuncId,
    arg_index: usize,
    memo: bool,
) -> Result<()> {
    let closure_struct = thunk.closure_type;
    let closure_ty = Ty::Struct(closure_struct);
    let flag_offset = memo.then(|| module.field_offset(closure_struct, 2));
    let captured_base = if memo { 3 } else { 1 };
    let captured_offsets: Vec<u64> = (0..slice.dep_args().len())
        .map(|i| module.field_offset(closure_struct, captured_base + i))
        .collect();
    let thunk_fn = thunk.function;
    let dep_args: Vec<ValueId> = slice.dep_args().to_vec();

    let func = module.function_mut(slice.caller());
    let defs = func.def_map();
    let &(block, call_position) = defs
        .get(&slice.call_site())
        .ok_or(Error::NoDefinition(slice.call_site()))?;

    let mut at = call_position;
    let closure = func.insert(
        block,
        at,
        Ty::Ptr,
        Op::Alloca {
            allocated: closure_ty,
        },
    );
    at += 1;

    // Field 0: the thunk's address.
    let thunk_addr = func.insert(block, at, Ty::FnPtr, Op::Const(ConstValue::Function(thunk_fn)));
    let fptr_slot = func.insert(
        block,
        at + 1,
        Ty::Ptr,
        Op::ElemAddr {
            base: closure,
            offset: ElemOffset::Const(0),
        },
    );
    func.insert(
        block,
        at + 2,
        Ty::Void,
        Op::Store {
            addr: fptr_slot,
            value: thunk_addr,
        },
    );
    at += 3;

    // Field 2: clear the memo flag so the first force computes.
    if let Some(offset) = flag_offset {
        let cleared = func.insert(block, at, Ty::I1, Op::Const(ConstValue::I1(false)));
        let flag_slot = func.insert(
            block,
            at + 1,
            Ty::Ptr,
            Op::ElemAddr {
                base: closure,
                offset: ElemOffset::Const(offset),
            },
        );
        func.insert(
            block,
            at + 2,
            Ty::Void,
            Op::Store {
                addr: flag_slot,
                value: cleared,
            },
        );
        at += 3;
    }

    // Captured arguments, in dep_args order.
    for (arg, offset) in dep_args.iter().zip(&captured_offsets) {
        let slot = func.insert(
            block,
            at,
            Ty::Ptr,
            Op::ElemAddr {
                base: closure,
                offset: ElemOffset::Const(*offset),
            },
        );
        func.insert(
            block,
            at + 1,
            Ty::Void,
            Op::Store {
                addr: slot,
                value: *arg,
            },
        );
        at += 2;
    }

    // The call itself: new callee, closure pointer at the lazified slot.
    let call = &mut func.block_mut(block).insts_mut()[at];
    match call.op_mut() {
        Op::Call {
            target,
            args,
            effects,
        } => {
            *target = CallTarget::Direct(new_callee);
            args[arg_index] = closure;
            // Forcing reads the closure, and the memoized thunk writes it.
            effects.remove(FnAttrs::PURE | FnAttrs::READONLY);
            Ok(())
        }
        other => Err(Error::Ir(format!(
            "call site {} is not a call instruction: {other}",
            slice.call_site()
        ))),
    }
}
