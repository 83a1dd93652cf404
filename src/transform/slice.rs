//! Backward program slices.
//!
//! A [`ProgramSlice`] is the set of instructions and blocks that a seed
//! value transitively depends on, together with the formal parameters it
//! captures and the attractor map used later to reroute control flow during
//! outlining. A slice exists only for the duration of one lazification
//! attempt; on success its synthesized function becomes a module member, on
//! failure it is simply dropped.
//!
//! # Extraction
//!
//! Plain breadth-first reachability over the use-def graph, with one twist:
//! when the walk reaches a phi node it also enqueues the node's **gates**
//! (see [`GateMap`]), so every branch condition that could steer the merge
//! is recomputed inside the outlined thunk. Phi incoming blocks are added to
//! the slice's block set even when no instruction of theirs is sliced -
//! the synthesizer needs them as landing pads for rerouted edges.
//!
//! # Attractors
//!
//! For each block of the caller, the nearest post-dominating block that
//! belongs to the slice. The attractor answers: when control would have
//! entered a block the slice does not contain, where must the outlined
//! function continue instead? Blocks with no slice block on their
//! post-dominator chain have no attractor and are elided entirely.

use std::collections::VecDeque;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::PostDominatorTree;
use crate::ir::{BlockId, FuncId, Function, Module, ValueId};
use crate::transform::GateMap;
use crate::{Error, Result};

/// A backward slice of one caller function with respect to a seed value.
#[derive(Debug, Clone)]
pub struct ProgramSlice {
    /// The function being sliced.
    caller: FuncId,
    /// The seed instruction: the lazified argument's definition.
    seed: ValueId,
    /// The call instruction whose argument is being lazified.
    call_site: ValueId,
    /// Blocks with at least one sliced instruction, plus phi incoming blocks.
    blocks: FxHashSet<BlockId>,
    /// Instructions transitively required to compute the seed.
    insts: FxHashSet<ValueId>,
    /// Captured formal parameters, in signature order.
    dep_args: Vec<ValueId>,
    /// Nearest post-dominating slice block for every caller block that has
    /// one.
    attractors: FxHashMap<BlockId, BlockId>,
}

impl ProgramSlice {
    /// Builds the backward slice of `seed` within `caller`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLazifiable`] if `seed` is not defined by an
    /// instruction of `caller`, or [`Error::NoDefinition`] if `call_site`
    /// does not name an instruction.
    pub fn build(
        module: &Module,
        caller: FuncId,
        seed: ValueId,
        call_site: ValueId,
    ) -> Result<Self> {
        let func = module.function(caller);
        let defs = func.def_map();

        if !defs.contains_key(&seed) {
            return Err(Error::NotLazifiable {
                message: format!(
                    "seed {seed} is not defined by an instruction of '{}'",
                    func.name()
                ),
            });
        }
        if !defs.contains_key(&call_site) {
            return Err(Error::NoDefinition(call_site));
        }

        let gates = GateMap::compute(func);
        let (blocks, deps) = backward_dependences(func, &defs, seed, &gates);

        let dep_args: Vec<ValueId> = func
            .params()
            .iter()
            .copied()
            .filter(|p| deps.contains(p))
            .collect();
        let insts: FxHashSet<ValueId> = deps
            .into_iter()
            .filter(|v| defs.contains_key(v))
            .collect();

        let attractors = compute_attractors(func, &blocks);

        let slice = Self {
            caller,
            seed,
            call_site,
            blocks,
            insts,
            dep_args,
            attractors,
        };
        slice.log(func);
        Ok(slice)
    }

    fn log(&self, func: &Function) {
        debug!(
            "sliced '{}' at {}: {} insts across {} blocks, {} captured args",
            func.name(),
            self.seed,
            self.insts.len(),
            self.blocks.len(),
            self.dep_args.len()
        );
    }

    /// The sliced function.
    #[must_use]
    pub fn caller(&self) -> FuncId {
        self.caller
    }

    /// The seed instruction the slice was built for.
    #[must_use]
    pub fn seed(&self) -> ValueId {
        self.seed
    }

    /// The call instruction whose argument is being lazified.
    #[must_use]
    pub fn call_site(&self) -> ValueId {
        self.call_site
    }

    /// Blocks participating in the slice.
    #[must_use]
    pub fn blocks(&self) -> &FxHashSet<BlockId> {
        &self.blocks
    }

    /// Instructions participating in the slice.
    #[must_use]
    pub fn insts(&self) -> &FxHashSet<ValueId> {
        &self.insts
    }

    /// Returns `true` if the instruction is part of the slice.
    #[must_use]
    pub fn contains_inst(&self, value: ValueId) -> bool {
        self.insts.contains(&value)
    }

    /// Returns `true` if the block is part of the slice.
    #[must_use]
    pub fn contains_block(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    /// The caller parameters the slice captures, in signature order.
    ///
    /// This order is the ABI: closure fields are laid out in it, and call
    /// sites populate captured-argument slots in it.
    #[must_use]
    pub fn dep_args(&self) -> &[ValueId] {
        &self.dep_args
    }

    /// The attractor of `block`, if any slice block post-dominates it.
    #[must_use]
    pub fn attractor(&self, block: BlockId) -> Option<BlockId> {
        self.attractors.get(&block).copied()
    }
}

/// Backward reachability from the seed over data and gated control
/// dependences.
fn backward_dependences(
    func: &Function,
    defs: &FxHashMap<ValueId, (BlockId, usize)>,
    seed: ValueId,
    gates: &GateMap,
) -> (FxHashSet<BlockId>, FxHashSet<ValueId>) {
    let mut blocks = FxHashSet::default();
    let mut deps = FxHashSet::default();
    let mut visited = FxHashSet::default();
    let mut queue = VecDeque::new();

    visited.insert(seed);
    queue.push_back(seed);

    while let Some(current) = queue.pop_front() {
        deps.insert(current);

        let Some(&(block, index)) = defs.get(&current) else {
            // A formal parameter: captured, nothing to walk through.
            continue;
        };
        blocks.insert(block);

        let inst = &func.block(block).insts()[index];
        for operand in inst.op().uses() {
            if (defs.contains_key(&operand) || func.is_param(operand)) && visited.insert(operand) {
                queue.push_back(operand);
            }
        }

        if let Some(incoming) = inst.op().phi_incoming() {
            for &(pred, _) in incoming {
                blocks.insert(pred);
            }
            for &gate in gates.of(block) {
                if visited.insert(gate) {
                    queue.push_back(gate);
                }
            }
        }
    }

    (blocks, deps)
}

/// For every caller block, the nearest post-dominating slice block.
fn compute_attractors(
    func: &Function,
    blocks: &FxHashSet<BlockId>,
) -> FxHashMap<BlockId, BlockId> {
    let post_dominators = PostDominatorTree::compute(func);
    let mut attractors = FxHashMap::default();

    for block in func.blocks() {
        let id = block.id();
        if blocks.contains(&id) {
            attractors.insert(id, id);
            continue;
        }
        let mut candidate = post_dominators.immediate_post_dominator(id);
        while let Some(up) = candidate {
            if blocks.contains(&up) {
                attractors.insert(id, up);
                break;
            }
            candidate = post_dominators.immediate_post_dominator(up);
        }
    }

    attractors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CmpKind, FnAttrs, FunctionBuilder, Ty};

    /// Caller for the control-dependent shape: `t = cond ? p + p : q * q`,
    /// then `g(t)`. Returns (module, caller id, seed, call site).
    fn control_dependent_caller() -> (Module, FuncId, ValueId, ValueId) {
        let mut module = Module::new("m");
        let callee = module.declare_function("g", &[Ty::I32], Ty::I32, FnAttrs::pure_total());

        let mut seed = ValueId::new(0);
        let mut call = ValueId::new(0);
        let func = FunctionBuilder::new("caller", &[Ty::I1, Ty::I32, Ty::I32], Ty::I32)
            .build_with(|f| {
                let (cond, p, q) = (f.arg(0), f.arg(1), f.arg(2));
                let mut then_v = ValueId::new(0);
                let mut else_v = ValueId::new(0);
                f.block(0, |b| b.branch(cond, 1, 2));
                f.block(1, |b| {
                    then_v = b.add(p, p);
                    b.jump(3);
                });
                f.block(2, |b| {
                    else_v = b.mul(q, q);
                    b.jump(3);
                });
                f.block(3, |b| {
                    seed = b.phi(Ty::I32, &[(1, then_v), (2, else_v)]);
                    call = b.call(callee, &[seed], Ty::I32, FnAttrs::pure_total());
                    b.ret_val(call);
                });
            });
        let caller = module.add_function(func);
        (module, caller, seed, call)
    }

    #[test]
    fn test_slice_includes_both_arms_and_gate() {
        let (module, caller, seed, call) = control_dependent_caller();
        let slice = ProgramSlice::build(&module, caller, seed, call).unwrap();

        let func = module.function(caller);
        let branch = func.terminator(BlockId::new(0)).unwrap().id();

        assert!(slice.contains_inst(seed));
        assert!(slice.contains_inst(branch), "gate must enter the slice");
        // Both arms' computations.
        let add = func.block(BlockId::new(1)).insts()[0].id();
        let mul = func.block(BlockId::new(2)).insts()[0].id();
        assert!(slice.contains_inst(add));
        assert!(slice.contains_inst(mul));
        // But not the call itself.
        assert!(!slice.contains_inst(call));
    }

    #[test]
    fn test_slice_closure_invariant() {
        // Every operand of every sliced instruction is itself sliced or a
        // captured parameter.
        let (module, caller, seed, call) = control_dependent_caller();
        let slice = ProgramSlice::build(&module, caller, seed, call).unwrap();
        let func = module.function(caller);
        let defs = func.def_map();

        for &inst_id in slice.insts() {
            let &(block, index) = defs.get(&inst_id).unwrap();
            for operand in func.block(block).insts()[index].op().uses() {
                let ok = slice.contains_inst(operand)
                    || slice.dep_args().contains(&operand)
                    || (!defs.contains_key(&operand) && !func.is_param(operand));
                assert!(ok, "operand {operand} of {inst_id} escapes the slice");
            }
        }
    }

    #[test]
    fn test_dep_args_in_signature_order() {
        let (module, caller, seed, call) = control_dependent_caller();
        let slice = ProgramSlice::build(&module, caller, seed, call).unwrap();
        let func = module.function(caller);

        // cond, p and q all feed the slice; order must follow the signature.
        assert_eq!(
            slice.dep_args(),
            &[func.param(0), func.param(1), func.param(2)]
        );
    }

    #[test]
    fn test_attractors_point_into_slice() {
        let (module, caller, seed, call) = control_dependent_caller();
        let slice = ProgramSlice::build(&module, caller, seed, call).unwrap();

        for block in module.function(caller).blocks() {
            if let Some(attractor) = slice.attractor(block.id()) {
                assert!(slice.contains_block(attractor));
            }
            if slice.contains_block(block.id()) {
                assert_eq!(slice.attractor(block.id()), Some(block.id()));
            }
        }
    }

    #[test]
    fn test_seed_must_be_instruction() {
        let (module, caller, _, call) = control_dependent_caller();
        let param = module.function(caller).param(1);
        let result = ProgramSlice::build(&module, caller, param, call);
        assert!(matches!(result, Err(Error::NotLazifiable { .. })));
    }

    #[test]
    fn test_straight_line_slice_is_minimal() {
        // x = a + b; y = x * x; unused = a - b; g(y)
        let mut module = Module::new("m");
        let callee = module.declare_function("g", &[Ty::I32], Ty::I32, FnAttrs::pure_total());

        let mut seed = ValueId::new(0);
        let mut call = ValueId::new(0);
        let mut unused = ValueId::new(0);
        let func = FunctionBuilder::new("caller", &[Ty::I32, Ty::I32], Ty::I32).build_with(|f| {
            let (a, b) = (f.arg(0), f.arg(1));
            f.block(0, |blk| {
                let x = blk.add(a, b);
                unused = blk.sub(a, b);
                seed = blk.mul(x, x);
                call = blk.call(callee, &[seed], Ty::I32, FnAttrs::pure_total());
                blk.ret_val(call);
            });
        });
        let caller = module.add_function(func);

        let slice = ProgramSlice::build(&module, caller, seed, call).unwrap();
        assert!(slice.contains_inst(seed));
        assert!(!slice.contains_inst(unused), "unrelated work stays out");
        assert_eq!(slice.blocks().len(), 1);
        assert_eq!(slice.dep_args().len(), 2);
    }

    #[test]
    fn test_loop_slice_includes_loop_condition() {
        // acc accumulates in a loop; slicing acc must pull in the loop
        // condition through the gate map.
        let mut module = Module::new("m");
        let callee = module.declare_function("g", &[Ty::I32], Ty::I32, FnAttrs::pure_total());

        let mut seed = ValueId::new(0);
        let mut call = ValueId::new(0);
        let func = FunctionBuilder::new("caller", &[Ty::I32], Ty::I32).build_with(|f| {
            let n = f.arg(0);
            let i = f.declare(Ty::I32);
            let acc = f.declare(Ty::I32);
            let mut zero = ValueId::new(0);
            let mut next_i = ValueId::new(0);
            let mut next_acc = ValueId::new(0);

            f.block(0, |b| {
                zero = b.const_i32(0);
                b.jump(1);
            });
            f.block(2, |b| {
                let one = b.const_i32(1);
                next_acc = b.add(acc, i);
                next_i = b.add(i, one);
                b.jump(1);
            });
            f.block(1, |b| {
                b.phi_into(i, &[(0, zero), (2, next_i)]);
                b.phi_into(acc, &[(0, zero), (2, next_acc)]);
                let cond = b.cmp(CmpKind::Slt, i, n);
                b.branch(cond, 2, 3);
            });
            f.block(3, |b| {
                seed = b.add(acc, acc);
                call = b.call(callee, &[seed], Ty::I32, FnAttrs::pure_total());
                b.ret_val(call);
            });
        });
        let caller = module.add_function(func);

        let slice = ProgramSlice::build(&module, caller, seed, call).unwrap();
        let func = module.function(caller);
        let loop_branch = func.terminator(BlockId::new(1)).unwrap().id();
        assert!(slice.contains_inst(loop_branch));
        assert!(slice.contains_block(BlockId::new(2)));
        assert_eq!(slice.dep_args(), &[func.param(0)]);
    }
}
