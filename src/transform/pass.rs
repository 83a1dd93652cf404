//! The lazification pass driver.
//!
//! Walks a caller-supplied list of `(call site, argument index)` candidates
//! and lazifies each one that survives validation and safety analysis.
//! Picking the candidates - deciding which arguments are expensive and
//! which callees sometimes ignore them - is the job of a separate heuristic
//! analysis; the driver takes its output as plain data.
//!
//! Each attempt is atomic with respect to the module: the thunk, closure
//! type, cloned callee, and rewritten call either all appear or none do.
//! Non-fatal rejections ([`Error::NotLazifiable`], [`Error::UnsafeSlice`])
//! are logged and skipped; a verifier failure is an implementation bug and
//! aborts the run.

use log::{debug, info};
use rustc_hash::FxHashSet;

use crate::analysis::{render_issues, verify_function};
use crate::ir::{CallTarget, FuncId, Module, Op, ValueId};
use crate::transform::{
    callsite, memoized_outline, outline, safety, OutlinedThunk, ProgramSlice,
};
use crate::{Error, Result};

/// Configuration for [`LazifyPass`].
#[derive(Debug, Clone)]
pub struct LazifyOptions {
    /// Memoize outlined thunks: call-by-need instead of call-by-name.
    pub memoize: bool,
}

impl Default for LazifyOptions {
    fn default() -> Self {
        Self { memoize: true }
    }
}

/// A candidate handed to the driver: lazify argument `arg_index` of the
/// call instruction `call` inside `caller`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSiteCandidate {
    /// The function containing the call.
    pub caller: FuncId,
    /// The call instruction.
    pub call: ValueId,
    /// Which argument to lazify.
    pub arg_index: usize,
}

/// Counters accumulated across one pass run.
#[derive(Debug, Clone, Default)]
pub struct LazifyStats {
    /// Call sites successfully lazified.
    pub call_sites_lazified: usize,
    /// Distinct `(caller, seed)` pairs lazified.
    pub pairs_lazified: usize,
    /// Cumulative instruction count of all outlined thunks.
    pub total_slice_size: usize,
    /// Instruction count of the largest outlined thunk.
    pub largest_slice: usize,
    /// Instruction count of the smallest outlined thunk, `None` until the
    /// first success.
    pub smallest_slice: Option<usize>,
}

impl LazifyStats {
    fn record(&mut self, slice_size: usize) {
        self.call_sites_lazified += 1;
        self.total_slice_size += slice_size;
        self.largest_slice = self.largest_slice.max(slice_size);
        self.smallest_slice = Some(match self.smallest_slice {
            Some(current) => current.min(slice_size),
            None => slice_size,
        });
    }
}

/// The module-level lazification pass.
///
/// # Examples
///
/// ```rust,ignore
/// use lazify::transform::{CallSiteCandidate, LazifyPass};
///
/// let mut pass = LazifyPass::new();
/// let changed = pass.run(&mut module, &candidates)?;
/// println!("lazified {} call sites", pass.stats().call_sites_lazified);
/// ```
#[derive(Debug, Default)]
pub struct LazifyPass {
    options: LazifyOptions,
    stats: LazifyStats,
    lazified: FxHashSet<(FuncId, ValueId)>,
}

impl LazifyPass {
    /// Creates a pass with default options (memoization on).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pass with explicit options.
    #[must_use]
    pub fn with_options(options: LazifyOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// The counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> &LazifyStats {
        &self.stats
    }

    /// Runs the pass over all candidates. Returns `true` if the module
    /// changed.
    ///
    /// # Errors
    ///
    /// Propagates only fatal errors ([`Error::MalformedSsa`]); per-candidate
    /// rejections are logged and skipped.
    pub fn run(&mut self, module: &mut Module, candidates: &[CallSiteCandidate]) -> Result<bool> {
        let mut changed = false;
        for candidate in candidates {
            match self.lazify_call_site(
                module,
                candidate.caller,
                candidate.call,
                candidate.arg_index,
            ) {
                Ok(()) => changed = true,
                Err(Error::NotLazifiable { message }) => {
                    debug!("skipping candidate {candidate:?}: {message}");
                }
                Err(Error::UnsafeSlice { reason }) => {
                    debug!("skipping candidate {candidate:?}: {reason}");
                }
                Err(fatal) => return Err(fatal),
            }
        }
        Ok(changed)
    }

    /// Lazifies one `(call site, argument index)` pair.
    ///
    /// # Errors
    ///
    /// [`Error::NotLazifiable`] for invalid candidates, [`Error::UnsafeSlice`]
    /// when the safety analysis rejects the slice (both leave the module
    /// unchanged), and [`Error::MalformedSsa`] when verification of a
    /// generated function fails.
    pub fn lazify_call_site(
        &mut self,
        module: &mut Module,
        caller: FuncId,
        call: ValueId,
        arg_index: usize,
    ) -> Result<()> {
        let (seed, callee) = resolve_candidate(module, caller, call, arg_index)?;

        let slice = ProgramSlice::build(module, caller, seed, call)?;
        safety::check_outline(module, &slice)
            .map_err(|reason| Error::UnsafeSlice { reason })?;

        let thunk = if self.options.memoize {
            memoized_outline(module, &slice)?
        } else {
            outline(module, &slice)?
        };

        let thunk_ret = module.function(thunk.function).ret_ty();
        let new_callee = callsite::clone_callee(module, callee, arg_index, thunk_ret)?;
        callsite::redirect_call_site(
            module,
            &slice,
            &thunk,
            new_callee,
            arg_index,
            self.options.memoize,
        )?;

        verify_generated(module, thunk, new_callee, caller)?;

        let slice_size = module.function(thunk.function).instruction_count();
        self.stats.record(slice_size);
        if self.lazified.insert((caller, seed)) {
            self.stats.pairs_lazified += 1;
        }

        info!(
            "lazified argument {arg_index} of call {call} in '{}' (thunk '{}', {} insts)",
            module.function(caller).name(),
            module.function(thunk.function).name(),
            slice_size
        );
        Ok(())
    }
}

/// Validates a candidate before anything is built: the call must exist, be
/// a direct call to a defined callee with enough parameters, and the
/// argument must be an instruction of the caller.
fn resolve_candidate(
    module: &Module,
    caller: FuncId,
    call: ValueId,
    arg_index: usize,
) -> Result<(ValueId, FuncId)> {
    let func = module.function(caller);
    let call_inst = func.inst(call).ok_or(Error::NoDefinition(call))?;

    let Op::Call { target, args, .. } = call_inst.op() else {
        return Err(Error::NotLazifiable {
            message: format!("{call} is not a call instruction"),
        });
    };
    let CallTarget::Direct(callee) = *target else {
        return Err(Error::NotLazifiable {
            message: "cannot lazify arguments of an indirect call".to_string(),
        });
    };
    let Some(&seed) = args.get(arg_index) else {
        return Err(Error::NotLazifiable {
            message: format!("call {call} has no argument {arg_index}"),
        });
    };
    if func.is_param(seed) {
        return Err(Error::NotLazifiable {
            message: format!("argument {seed} is a formal parameter, not an instruction"),
        });
    }

    let callee_func = module.function(callee);
    if callee_func.is_declaration() {
        return Err(Error::NotLazifiable {
            message: format!("callee '{}' has no body to rewrite", callee_func.name()),
        });
    }
    if arg_index >= callee_func.param_count() {
        return Err(Error::NotLazifiable {
            message: format!(
                "callee '{}' takes {} parameters, index {arg_index} out of range",
                callee_func.name(),
                callee_func.param_count()
            ),
        });
    }

    Ok((seed, callee))
}

/// Verifies every function the rewrite produced or mutated.
fn verify_generated(
    module: &Module,
    thunk: OutlinedThunk,
    new_callee: FuncId,
    caller: FuncId,
) -> Result<()> {
    for id in [thunk.function, new_callee, caller] {
        let func = module.function(id);
        let issues = verify_function(module, func);
        if !issues.is_empty() {
            return Err(Error::MalformedSsa {
                function: func.name().to_string(),
                details: render_issues(&issues),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FnAttrs, FunctionBuilder, Ty};

    /// `caller(a, b)`: seed = (a + b) * (a + b), calls `g(a, seed)`.
    /// `g(x, lazy)` returns `lazy + x`.
    fn fixture() -> (Module, CallSiteCandidate) {
        let mut module = Module::new("m");

        let callee_func = FunctionBuilder::new("g", &[Ty::I32, Ty::I32], Ty::I32).build_with(|f| {
            let (x, lazy) = (f.arg(0), f.arg(1));
            f.block(0, |b| {
                let sum = b.add(lazy, x);
                b.ret_val(sum);
            });
        });
        let callee = module.add_function(callee_func);

        let mut call = ValueId::new(0);
        let caller_func =
            FunctionBuilder::new("caller", &[Ty::I32, Ty::I32], Ty::I32).build_with(|f| {
                let (a, b) = (f.arg(0), f.arg(1));
                f.block(0, |blk| {
                    let sum = blk.add(a, b);
                    let seed = blk.mul(sum, sum);
                    call = blk.call(callee, &[a, seed], Ty::I32, FnAttrs::pure_total());
                    blk.ret_val(call);
                });
            });
        let caller = module.add_function(caller_func);

        (
            module,
            CallSiteCandidate {
                caller,
                call,
                arg_index: 1,
            },
        )
    }

    #[test]
    fn test_run_lazifies_candidate() {
        let (mut module, candidate) = fixture();
        let before = module.function_count();

        let mut pass = LazifyPass::new();
        let changed = pass.run(&mut module, &[candidate]).unwrap();

        assert!(changed);
        // Thunk + cloned callee.
        assert_eq!(module.function_count(), before + 2);
        assert_eq!(pass.stats().call_sites_lazified, 1);
        assert_eq!(pass.stats().pairs_lazified, 1);
        assert!(pass.stats().smallest_slice.unwrap() > 0);
        assert!(pass.stats().largest_slice >= pass.stats().smallest_slice.unwrap());
    }

    #[test]
    fn test_rejected_candidate_leaves_module_unchanged() {
        let (mut module, candidate) = fixture();

        // Point at the non-instruction argument (a formal parameter).
        let bad = CallSiteCandidate {
            arg_index: 0,
            ..candidate
        };
        let before = module.function_count();

        let mut pass = LazifyPass::new();
        let changed = pass.run(&mut module, &[bad]).unwrap();

        assert!(!changed);
        assert_eq!(module.function_count(), before);
        assert_eq!(pass.stats().call_sites_lazified, 0);
    }

    #[test]
    fn test_call_site_redirected() {
        let (mut module, candidate) = fixture();
        let mut pass = LazifyPass::new();
        pass.lazify_call_site(&mut module, candidate.caller, candidate.call, 1)
            .unwrap();

        let caller = module.function(candidate.caller);
        let call_inst = caller.inst(candidate.call).unwrap();
        let Op::Call { target, args, .. } = call_inst.op() else {
            panic!("call site must remain a call");
        };
        let CallTarget::Direct(new_callee) = target else {
            panic!("call must stay direct");
        };
        assert!(module
            .function(*new_callee)
            .name()
            .starts_with("_lazify_callee_g_1_"));
        // Argument 1 is now the closure alloca, a pointer.
        assert_eq!(caller.value_ty(args[1]), Ty::Ptr);
    }

    #[test]
    fn test_unsafe_candidate_skipped_not_fatal() {
        // The lazified argument loads from memory: safety must reject it
        // and run() must carry on.
        let mut module = Module::new("m");
        let callee_func = FunctionBuilder::new("g", &[Ty::I32], Ty::I32).build_with(|f| {
            let lazy = f.arg(0);
            f.block(0, |b| b.ret_val(lazy));
        });
        let callee = module.add_function(callee_func);

        let mut call = ValueId::new(0);
        let caller_func = FunctionBuilder::new("caller", &[Ty::Ptr], Ty::I32).build_with(|f| {
            let ptr = f.arg(0);
            f.block(0, |blk| {
                let loaded = blk.load(ptr, Ty::I32);
                call = blk.call(callee, &[loaded], Ty::I32, FnAttrs::pure_total());
                blk.ret_val(call);
            });
        });
        let caller = module.add_function(caller_func);

        let before = module.function_count();
        let mut pass = LazifyPass::new();
        let changed = pass
            .run(
                &mut module,
                &[CallSiteCandidate {
                    caller,
                    call,
                    arg_index: 0,
                }],
            )
            .unwrap();

        assert!(!changed);
        assert_eq!(module.function_count(), before);
    }

    #[test]
    fn test_call_by_name_option() {
        let (mut module, candidate) = fixture();
        let mut pass = LazifyPass::with_options(LazifyOptions { memoize: false });
        pass.lazify_call_site(&mut module, candidate.caller, candidate.call, 1)
            .unwrap();

        // The thunk is the second-to-last function; its closure has no memo
        // fields.
        let closure = module.struct_ty(crate::ir::StructId::new(0));
        assert_eq!(closure.fields()[0], Ty::FnPtr);
        assert_eq!(closure.field_count(), 3); // fn_ptr + two captured args
    }

    #[test]
    fn test_repeat_pair_counts_once() {
        // Two calls with the same seed: both lazified, one pair counted.
        let mut module = Module::new("m");
        let callee_func = FunctionBuilder::new("g", &[Ty::I32], Ty::I32).build_with(|f| {
            let lazy = f.arg(0);
            f.block(0, |b| b.ret_val(lazy));
        });
        let callee = module.add_function(callee_func);

        let mut call_a = ValueId::new(0);
        let mut call_b = ValueId::new(0);
        let caller_func = FunctionBuilder::new("caller", &[Ty::I32], Ty::I32).build_with(|f| {
            let a = f.arg(0);
            f.block(0, |blk| {
                let seed = blk.mul(a, a);
                call_a = blk.call(callee, &[seed], Ty::I32, FnAttrs::pure_total());
                call_b = blk.call(callee, &[seed], Ty::I32, FnAttrs::pure_total());
                let sum = blk.add(call_a, call_b);
                blk.ret_val(sum);
            });
        });
        let caller = module.add_function(caller_func);

        let mut pass = LazifyPass::new();
        let changed = pass
            .run(
                &mut module,
                &[
                    CallSiteCandidate {
                        caller,
                        call: call_a,
                        arg_index: 0,
                    },
                    CallSiteCandidate {
                        caller,
                        call: call_b,
                        arg_index: 0,
                    },
                ],
            )
            .unwrap();

        assert!(changed);
        assert_eq!(pass.stats().call_sites_lazified, 2);
        assert_eq!(pass.stats().pairs_lazified, 1);
    }
}
