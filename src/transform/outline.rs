//! Function synthesis: materializing a slice as a standalone function.
//!
//! The synthesizer clones the slice's blocks and instructions into a fresh
//! function whose CFG is a subset of the caller's, then repairs everything
//! the subsetting broke:
//!
//! 1. one empty block per slice block, with both-way maps
//! 2. sliced instructions cloned in original order, result IDs pre-allocated
//!    so forward references (loop phis) resolve
//! 3. operands rewired through the instruction map; captured caller
//!    parameters map to reserved *shadow* values that the thunk prelude
//!    later defines as closure-field loads; phi incoming blocks translate
//!    through the block map
//! 4. blocks whose terminator was not sliced get an unconditional branch to
//!    the attractor of the first original successor that has one
//! 5. cloned branches and switches get each successor remapped through the
//!    attractor map, or redirected to a shared `unreachable` sink
//! 6. dominance-seeded jumps connect any block the attractor pass left
//!    terminatorless to its nearest dominated slice block
//! 7. phi incoming lists are trimmed to actual predecessors
//! 8. the seed's block ends in `ret seed'`
//! 9. the unique predecessor-less block becomes the entry
//!
//! The caller is never mutated here; on any failure the partially built
//! function is simply dropped.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::DominatorTree;
use crate::ir::{BlockId, Function, Module, Op, Ty, ValueId};
use crate::transform::ProgramSlice;
use crate::{Error, Result};

/// Identity maps produced during synthesis, consumed by the thunk wrapper.
#[derive(Debug)]
pub(crate) struct SynthesisMaps {
    /// Original block to its clone.
    pub block_map: FxHashMap<BlockId, BlockId>,
    /// Clone back to its original block.
    pub rev_block_map: FxHashMap<BlockId, BlockId>,
    /// Original instruction to its clone.
    pub inst_map: FxHashMap<ValueId, ValueId>,
    /// `(caller parameter, reserved shadow value)` pairs, in captured-arg
    /// order. The shadows are used by cloned instructions but not yet
    /// defined; the thunk prelude defines them.
    pub arg_shadows: Vec<(ValueId, ValueId)>,
    /// The block holding the synthesized return.
    pub exit_block: BlockId,
}

/// Clones the slice into a new function named `name` with signature
/// `fn(ptr) -> typeof(seed)`.
///
/// The single parameter is the closure pointer; the thunk wrapper inserts
/// the prelude that loads captured arguments out of it.
///
/// # Errors
///
/// Returns [`Error::MalformedSsa`] when the slice has no block left to
/// serve as an entry; structural validity of the result is checked by the
/// caller via the verifier.
pub(crate) fn synthesize(
    module: &Module,
    slice: &ProgramSlice,
    name: String,
) -> Result<(Function, SynthesisMaps)> {
    let caller = module.function(slice.caller());
    let ret_ty = caller.value_ty(slice.seed());

    let mut func = Function::new(name, &[Ty::Ptr], ret_ty);

    // Reserve shadow values for captured parameters; the prelude defines
    // them later, at the head of whichever block becomes the entry.
    let mut value_map: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    let mut arg_shadows = Vec::with_capacity(slice.dep_args().len());
    for &arg in slice.dep_args() {
        let shadow = func.fresh_value(caller.value_ty(arg));
        value_map.insert(arg, shadow);
        arg_shadows.push((arg, shadow));
    }

    // Step 1: one block per slice block, in original order.
    let mut block_map: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    let mut rev_block_map: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    for block in caller.blocks() {
        if slice.contains_block(block.id()) {
            let clone = func.add_block();
            block_map.insert(block.id(), clone);
            rev_block_map.insert(clone, block.id());
        }
    }

    // Step 2a: pre-allocate result values so any reference order works.
    let mut inst_map: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    for block in caller.blocks() {
        for inst in block.insts() {
            if slice.contains_inst(inst.id()) {
                let clone = func.fresh_value(caller.value_ty(inst.id()));
                inst_map.insert(inst.id(), clone);
                value_map.insert(inst.id(), clone);
            }
        }
    }

    // Step 2b/3: clone with operands and phi blocks rewired. Successor
    // blocks of cloned terminators still name original blocks; steps 4-6
    // rewrite every one of them.
    let mut cloned_terminators: FxHashSet<BlockId> = FxHashSet::default();
    for block in caller.blocks() {
        let Some(&target) = block_map.get(&block.id()) else {
            continue;
        };
        for inst in block.insts() {
            if !slice.contains_inst(inst.id()) {
                continue;
            }
            let mut op = inst.op().clone();
            op.map_values(|v| value_map.get(&v).copied());
            if let Some(incoming) = op.phi_incoming_mut() {
                for (pred, _) in incoming {
                    if let Some(&mapped) = block_map.get(pred) {
                        *pred = mapped;
                    }
                }
            }
            if op.is_terminator() {
                cloned_terminators.insert(target);
            }
            func.define(target, inst_map[&inst.id()], op);
        }
    }

    let dominators = DominatorTree::compute(caller);

    // Step 4: attractor routing for blocks with no cloned terminator.
    let block_count = func.block_count();
    for index in 0..block_count {
        let new_block = BlockId::new(index);
        if func.block(new_block).has_terminator() {
            continue;
        }
        let original = rev_block_map[&new_block];
        let Some(term) = caller.terminator(original) else {
            continue;
        };
        for successor in term.op().successors() {
            let Some(target) = slice.attractor(successor).and_then(|a| block_map.get(&a)) else {
                continue;
            };
            let target = *target;
            func.append(new_block, Ty::Void, Op::Jump { target });
            repair_rerouted_phis(
                &mut func,
                target,
                new_block,
                original,
                &dominators,
                &rev_block_map,
            );
            break;
        }
    }

    // Step 5: remap every successor of cloned branches and switches.
    let mut unreachable_sink: Option<BlockId> = None;
    for index in 0..block_count {
        let new_block = BlockId::new(index);
        if !cloned_terminators.contains(&new_block) {
            continue;
        }
        let original = rev_block_map[&new_block];
        let successors = func
            .terminator(new_block)
            .map(|inst| inst.op().successors())
            .unwrap_or_default();

        for (position, successor) in successors.into_iter().enumerate() {
            match slice.attractor(successor).and_then(|a| block_map.get(&a)) {
                Some(&target) => {
                    set_terminator_successor(&mut func, new_block, position, target);
                    if !slice.contains_block(successor) {
                        repair_rerouted_phis(
                            &mut func,
                            target,
                            new_block,
                            original,
                            &dominators,
                            &rev_block_map,
                        );
                    }
                }
                None => {
                    let sink = *unreachable_sink.get_or_insert_with(|| {
                        let sink = func.add_block();
                        func.append(sink, Ty::Void, Op::Unreachable);
                        sink
                    });
                    set_terminator_successor(&mut func, new_block, position, sink);
                }
            }
        }
    }

    // Step 6: dominance-seeded jumps for anything still terminatorless.
    seed_dominance_branches(caller, slice, &mut func, &block_map, &dominators);

    // Step 7: drop phi entries whose block is no longer a predecessor.
    cleanup_phis(&mut func);

    // Step 8: the seed's block returns the cloned seed.
    let new_seed = inst_map[&slice.seed()];
    let exit_block = locate(&func, new_seed);
    {
        let block = func.block_mut(exit_block);
        if block.has_terminator() {
            block.insts_mut().pop();
        }
    }
    func.append(
        exit_block,
        Ty::Void,
        Op::Return {
            value: Some(new_seed),
        },
    );
    // Replacing the exit terminator can remove edges; trim phis once more.
    cleanup_phis(&mut func);

    // Step 9: the unique predecessor-less block is the entry.
    let preds = func.predecessor_map();
    let entry = func
        .blocks()
        .iter()
        .map(crate::ir::Block::id)
        .find(|id| preds[id.index()].is_empty())
        .ok_or_else(|| Error::MalformedSsa {
            function: func.name().to_string(),
            details: "synthesized function has no entry candidate".to_string(),
        })?;
    func.set_entry(entry);

    let maps = SynthesisMaps {
        block_map,
        rev_block_map,
        inst_map,
        arg_shadows,
        exit_block,
    };
    Ok((func, maps))
}

/// Finds the block containing the definition of `value`.
fn locate(func: &Function, value: ValueId) -> BlockId {
    for block in func.blocks() {
        if block.insts().iter().any(|inst| inst.id() == value) {
            return block.id();
        }
    }
    unreachable!("cloned seed is always defined during synthesis");
}

/// Redirects successor `position` of `block`'s terminator.
fn set_terminator_successor(
    func: &mut Function,
    block: BlockId,
    position: usize,
    target: BlockId,
) {
    if let Some(term) = func.block_mut(block).terminator_mut() {
        term.op_mut().set_successor(position, target);
    }
}

/// After rerouting an edge `from_new -> target`, repairs phi incoming
/// entries that still name an *original* caller block: if the rerouted
/// block's original strictly dominates that stale reference, the merge now
/// receives its value along the new edge.
///
/// Incoming entries already translated to clones are left alone - in
/// particular, loop back edges must keep their own incoming blocks.
fn repair_rerouted_phis(
    func: &mut Function,
    target: BlockId,
    from_new: BlockId,
    from_orig: BlockId,
    dominators: &DominatorTree,
    rev_block_map: &FxHashMap<BlockId, BlockId>,
) {
    let phi_count = func.block(target).first_non_phi();
    for index in 0..phi_count {
        let inst = &mut func.block_mut(target).insts_mut()[index];
        if let Some(incoming) = inst.op_mut().phi_incoming_mut() {
            for (pred, _) in incoming {
                if rev_block_map.contains_key(pred) {
                    // A clone; this edge was translated during rewiring.
                    continue;
                }
                if dominators.strictly_dominates(from_orig, *pred) {
                    *pred = from_new;
                }
            }
        }
    }
}

/// Visits the caller's dominator tree and joins slice-block pairs `(P, C)`
/// where `P` is `C`'s nearest dominating slice block and `P`'s clone still
/// lacks a terminator.
fn seed_dominance_branches(
    caller: &Function,
    slice: &ProgramSlice,
    func: &mut Function,
    block_map: &FxHashMap<BlockId, BlockId>,
    dominators: &DominatorTree,
) {
    // Children lists of the dominator tree, in block order.
    let mut children: Vec<Vec<BlockId>> = vec![Vec::new(); caller.block_count()];
    let mut roots = Vec::new();
    for block in caller.blocks() {
        match dominators.immediate_dominator(block.id()) {
            Some(idom) => children[idom.index()].push(block.id()),
            None if dominators.is_reachable(block.id()) => roots.push(block.id()),
            None => {}
        }
    }

    let mut stack: Vec<(BlockId, Option<BlockId>)> =
        roots.into_iter().map(|root| (root, None)).collect();

    while let Some((node, inherited)) = stack.pop() {
        let nearest = if slice.contains_block(node) {
            Some(node)
        } else {
            inherited
        };

        for &child in &children[node.index()] {
            if let (Some(parent), true) = (nearest, slice.contains_block(child)) {
                let parent_new = block_map[&parent];
                if !func.block(parent_new).has_terminator() {
                    let target = block_map[&child];
                    func.append(parent_new, Ty::Void, Op::Jump { target });
                }
            }
            stack.push((child, nearest));
        }
    }
}

/// Drops phi incoming entries whose block is not an actual predecessor,
/// and collapses duplicates onto their first occurrence.
fn cleanup_phis(func: &mut Function) {
    let preds = func.predecessor_map();
    for index in 0..func.block_count() {
        let block_id = BlockId::new(index);
        let allowed: FxHashSet<BlockId> = preds[index].iter().copied().collect();

        let block = func.block_mut(block_id);
        for inst in block.insts_mut().iter_mut() {
            let Some(incoming) = inst.op_mut().phi_incoming_mut() else {
                break;
            };
            let mut seen: FxHashSet<BlockId> = FxHashSet::default();
            incoming.retain(|(pred, _)| allowed.contains(pred) && seen.insert(*pred));
        }
    }
}
