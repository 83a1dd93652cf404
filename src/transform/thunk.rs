//! Thunk ABI: wrapping an outlined slice in a closure.
//!
//! The closure struct is the contract between the outlined function, the
//! rewritten callee, and the call site. Field order is fixed:
//!
//! - non-memoized: `{ fn_ptr, captured_0, .., captured_n-1 }`
//! - memoized: `{ fn_ptr, memoed_value, memo_flag: i1, captured_0, .. }`
//!
//! The outlined function takes a single pointer to this struct. A prelude
//! at its entry loads every captured argument out of the closure and feeds
//! the shadow values the synthesizer reserved. The memoized variant
//! additionally guards the body:
//!
//! ```text
//! check:        flag = load &closure.memo_flag
//!               br flag ? return_memoed : body_entry
//! return_memoed: ret load &closure.memoed_value
//! body...:      store true -> &closure.memo_flag     (before each return)
//!               store result -> &closure.memoed_value
//! ```
//!
//! First force computes and caches; every later force returns the cached
//! value without touching the slice body - call-by-need.
//!
//! Nothing is added to the module until the synthesized function passes the
//! SSA verifier; safety rejections happen before any mutation at all.

use log::debug;

use crate::analysis::{render_issues, verify_function};
use crate::ir::{
    BlockId, ElemOffset, FuncId, Function, Module, Op, StructId, StructType, Ty, ValueId,
};
use crate::transform::outline::{synthesize, SynthesisMaps};
use crate::transform::{safety, ProgramSlice};
use crate::{Error, Result};

/// Index of the first captured-argument field in the closure struct.
fn captured_base(memo: bool) -> usize {
    if memo {
        3
    } else {
        1
    }
}

/// Result of outlining: the thunk function and its closure type, both now
/// members of the module.
#[derive(Debug, Clone, Copy)]
pub struct OutlinedThunk {
    /// The outlined thunk function, signature `fn(ptr) -> T`.
    pub function: FuncId,
    /// The closure struct type describing the thunk's ABI.
    pub closure_type: StructId,
}

/// Outlines the slice as a call-by-name thunk (no memoization).
///
/// # Errors
///
/// [`Error::UnsafeSlice`] when a safety predicate rejects the slice;
/// [`Error::MalformedSsa`] when the synthesized function fails verification.
pub fn outline(module: &mut Module, slice: &ProgramSlice) -> Result<OutlinedThunk> {
    build(module, slice, false)
}

/// Outlines the slice as a call-by-need thunk with memoization.
///
/// # Errors
///
/// [`Error::UnsafeSlice`] when a safety predicate rejects the slice;
/// [`Error::MalformedSsa`] when the synthesized function fails verification.
pub fn memoized_outline(module: &mut Module, slice: &ProgramSlice) -> Result<OutlinedThunk> {
    build(module, slice, true)
}

fn build(module: &mut Module, slice: &ProgramSlice, memo: bool) -> Result<OutlinedThunk> {
    safety::check_outline(module, slice).map_err(|reason| Error::UnsafeSlice { reason })?;

    let caller = module.function(slice.caller());
    let ret_ty = caller.value_ty(slice.seed());
    let captured_tys: Vec<Ty> = slice
        .dep_args()
        .iter()
        .map(|&arg| caller.value_ty(arg))
        .collect();

    let base = if memo {
        format!("_lazify_slice_memo_{}_v{}_", caller.name(), slice.seed().index())
    } else {
        format!("_lazify_slice_{}_v{}_", caller.name(), slice.seed().index())
    };
    let name = module.unique_name(&base);

    let (mut func, maps) = synthesize(module, slice, name)?;

    // The closure type is laid out now but registered only once the thunk
    // verifies, so a failed attempt leaves the module untouched.
    let mut fields = vec![Ty::FnPtr];
    if memo {
        fields.push(ret_ty);
        fields.push(Ty::I1);
    }
    fields.extend(captured_tys);
    let closure = StructType::new(module.unique_name("_lazify_thunk_"), fields);

    insert_prelude(module, &mut func, &maps, &closure, memo);
    if memo {
        add_memoization(module, &mut func, &closure, ret_ty);
    }

    let issues = verify_function(module, &func);
    if !issues.is_empty() {
        return Err(Error::MalformedSsa {
            function: func.name().to_string(),
            details: render_issues(&issues),
        });
    }

    debug!(
        "outlined '{}' ({} insts, memo: {memo})",
        func.name(),
        func.instruction_count()
    );

    let closure_type = module.add_struct(closure);
    let function = module.add_function(func);
    Ok(OutlinedThunk {
        function,
        closure_type,
    })
}

/// Byte offset of a closure field, for a not-yet-registered struct.
fn field_offset(module: &Module, closure: &StructType, field: usize) -> u64 {
    module.layout().field_offset(closure, field, module.structs())
}

/// Loads every captured argument out of the closure at the head of the
/// entry block, defining the shadow values the cloned body already uses.
fn insert_prelude(
    module: &Module,
    func: &mut Function,
    maps: &SynthesisMaps,
    closure: &StructType,
    memo: bool,
) {
    let entry = func.entry();
    let closure_ptr = func.param(0);
    let base = captured_base(memo);

    let mut position = 0;
    for (index, &(_, shadow)) in maps.arg_shadows.iter().enumerate() {
        let offset = field_offset(module, closure, base + index);
        let addr = func.insert(
            entry,
            position,
            Ty::Ptr,
            Op::ElemAddr {
                base: closure_ptr,
                offset: ElemOffset::Const(offset),
            },
        );
        func.define_at(entry, position + 1, shadow, Op::Load { addr });
        position += 2;
    }
}

/// Wraps the body in the memoization guard and caches the result before
/// every return.
fn add_memoization(module: &Module, func: &mut Function, closure: &StructType, ret_ty: Ty) {
    let closure_ptr = func.param(0);
    let value_offset = field_offset(module, closure, 1);
    let flag_offset = field_offset(module, closure, 2);

    // Cache updates go in front of every existing return.
    let return_blocks: Vec<BlockId> = func
        .blocks()
        .iter()
        .filter(|block| {
            matches!(
                block.terminator().map(crate::ir::Inst::op),
                Some(Op::Return { .. })
            )
        })
        .map(crate::ir::Block::id)
        .collect();

    for block in return_blocks {
        let returned = match func.terminator(block).map(crate::ir::Inst::op) {
            Some(Op::Return { value: Some(v) }) => *v,
            _ => continue,
        };
        let at = func.block(block).insts().len() - 1;
        let flag_addr = elem_addr(func, block, at, closure_ptr, flag_offset);
        let true_const = func.insert(block, at + 1, Ty::I1, Op::Const(crate::ir::ConstValue::I1(true)));
        func.insert(
            block,
            at + 2,
            Ty::Void,
            Op::Store {
                addr: flag_addr,
                value: true_const,
            },
        );
        let value_addr = elem_addr(func, block, at + 3, closure_ptr, value_offset);
        func.insert(
            block,
            at + 4,
            Ty::Void,
            Op::Store {
                addr: value_addr,
                value: returned,
            },
        );
    }

    // check: branch on the memo flag.
    let body_entry = func.entry();
    let check = func.add_block();
    let memo_ret = func.add_block();

    let flag_addr = {
        let at = 0;
        elem_addr(func, check, at, closure_ptr, flag_offset)
    };
    let flag = func.append(check, Ty::I1, Op::Load { addr: flag_addr });
    func.append(
        check,
        Ty::Void,
        Op::Branch {
            cond: flag,
            if_true: memo_ret,
            if_false: body_entry,
        },
    );

    // return_memoed: the cached value is initialized iff the flag is set.
    let value_addr = elem_addr(func, memo_ret, 0, closure_ptr, value_offset);
    let cached = func.append(memo_ret, ret_ty, Op::Load { addr: value_addr });
    func.append(
        memo_ret,
        Ty::Void,
        Op::Return {
            value: Some(cached),
        },
    );

    func.set_entry(check);
}

fn elem_addr(
    func: &mut Function,
    block: BlockId,
    at: usize,
    base: ValueId,
    offset: u64,
) -> ValueId {
    func.insert(
        block,
        at,
        Ty::Ptr,
        Op::ElemAddr {
            base,
            offset: ElemOffset::Const(offset),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FnAttrs, FunctionBuilder};

    fn arithmetic_module() -> (Module, ProgramSlice) {
        let mut module = Module::new("m");
        let callee = module.declare_function("g", &[Ty::I32], Ty::I32, FnAttrs::pure_total());

        let mut seed = ValueId::new(0);
        let mut call = ValueId::new(0);
        let func = FunctionBuilder::new("caller", &[Ty::I32, Ty::I32], Ty::I32).build_with(|f| {
            let (a, b) = (f.arg(0), f.arg(1));
            f.block(0, |blk| {
                let sum = blk.add(a, b);
                seed = blk.mul(sum, sum);
                call = blk.call(callee, &[seed], Ty::I32, FnAttrs::pure_total());
                blk.ret_val(call);
            });
        });
        let caller = module.add_function(func);
        let slice = ProgramSlice::build(&module, caller, seed, call).unwrap();
        (module, slice)
    }

    #[test]
    fn test_outline_produces_closure_and_function() {
        let (mut module, slice) = arithmetic_module();
        let thunk = outline(&mut module, &slice).unwrap();

        let func = module.function(thunk.function);
        assert_eq!(func.param_count(), 1);
        assert_eq!(func.value_ty(func.param(0)), Ty::Ptr);
        assert_eq!(func.ret_ty(), Ty::I32);
        assert!(func.name().starts_with("_lazify_slice_caller_"));

        // { fn_ptr, a, b }
        let closure = module.struct_ty(thunk.closure_type);
        assert_eq!(closure.fields(), &[Ty::FnPtr, Ty::I32, Ty::I32]);
    }

    #[test]
    fn test_memoized_closure_layout() {
        let (mut module, slice) = arithmetic_module();
        let thunk = memoized_outline(&mut module, &slice).unwrap();

        // { fn_ptr, memoed_value, memo_flag, a, b }
        let closure = module.struct_ty(thunk.closure_type);
        assert_eq!(
            closure.fields(),
            &[Ty::FnPtr, Ty::I32, Ty::I1, Ty::I32, Ty::I32]
        );
        assert!(module
            .function(thunk.function)
            .name()
            .starts_with("_lazify_slice_memo_caller_"));
    }

    #[test]
    fn test_memoized_entry_checks_flag() {
        let (mut module, slice) = arithmetic_module();
        let thunk = memoized_outline(&mut module, &slice).unwrap();

        let func = module.function(thunk.function);
        let entry = func.block(func.entry());
        // elem_addr, load flag, branch.
        assert_eq!(entry.insts().len(), 3);
        assert!(matches!(
            entry.terminator().map(crate::ir::Inst::op),
            Some(Op::Branch { .. })
        ));
    }

    #[test]
    fn test_unsafe_slice_leaves_module_untouched() {
        let mut module = Module::new("m");
        let callee = module.declare_function("g", &[Ty::I32], Ty::I32, FnAttrs::pure_total());

        let mut seed = ValueId::new(0);
        let mut call = ValueId::new(0);
        let func = FunctionBuilder::new("caller", &[Ty::Ptr], Ty::I32).build_with(|f| {
            let ptr = f.arg(0);
            f.block(0, |blk| {
                seed = blk.load(ptr, Ty::I32);
                call = blk.call(callee, &[seed], Ty::I32, FnAttrs::pure_total());
                blk.ret_val(call);
            });
        });
        let caller = module.add_function(func);
        let slice = ProgramSlice::build(&module, caller, seed, call).unwrap();

        let functions_before = module.function_count();
        let structs_before = module.structs().len();

        let result = memoized_outline(&mut module, &slice);
        assert!(matches!(result, Err(Error::UnsafeSlice { .. })));
        assert_eq!(module.function_count(), functions_before);
        assert_eq!(module.structs().len(), structs_before);
    }

    #[test]
    fn test_outlined_function_verifies() {
        let (mut module, slice) = arithmetic_module();
        for memo in [false, true] {
            let thunk = build(&mut module, &slice, memo).unwrap();
            let func = module.function(thunk.function);
            let issues = verify_function(&module, func);
            assert!(issues.is_empty(), "memo={memo}: {issues:?}");
        }
    }
}
