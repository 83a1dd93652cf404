//! Gate map: which branch conditions control a block's execution.
//!
//! A phi node selects among its incoming values based on which predecessor
//! ran, so a backward slice through a phi must also capture the branch or
//! switch whose outcome made that choice - its **gate**. This module
//! computes, for every block, the list of conditional terminators that gate
//! it, given that the function was entered.
//!
//! # Algorithm
//!
//! For each block `B` with more than one predecessor, and each predecessor
//! `P`:
//!
//! 1. If `P` dominates `B` but `B` does not post-dominate `P`, then `P`'s
//!    terminator decides whether `B` runs: a direct gate.
//! 2. Otherwise walk `P`'s dominator chain upward (starting at `P` itself)
//!    until an ancestor `A` that `P` does **not** post-dominate; `A`'s
//!    terminator is the region controller deciding whether control flowed
//!    toward `P` at all. An exhausted chain contributes nothing.
//!
//! Only conditional terminators contribute; unconditional jumps decide
//! nothing. Duplicate entries are fine - slicing deduplicates through its
//! visited set.

use log::trace;

use crate::analysis::{DominatorTree, PostDominatorTree};
use crate::ir::{BlockId, Function, ValueId};

/// For each block, the branch/switch values controlling its execution.
#[derive(Debug, Clone)]
pub struct GateMap {
    gates: Vec<Vec<ValueId>>,
}

impl GateMap {
    /// Computes the gate map for a function.
    #[must_use]
    pub fn compute(func: &Function) -> Self {
        let dominators = DominatorTree::compute(func);
        let post_dominators = PostDominatorTree::compute(func);
        let preds = func.predecessor_map();

        let mut gates = vec![Vec::new(); func.block_count()];

        for block in func.blocks() {
            let merge = block.id();
            let merge_preds = &preds[merge.index()];
            if merge_preds.len() <= 1 {
                continue;
            }

            for &pred in merge_preds {
                if dominators.dominates(pred, merge)
                    && !post_dominators.post_dominates(merge, pred)
                {
                    if let Some(gate) = conditional_terminator(func, pred) {
                        trace!("gate for {merge}: {gate} (direct from {pred})");
                        gates[merge.index()].push(gate);
                    }
                } else if let Some(controller) =
                    region_controller(pred, &dominators, &post_dominators)
                {
                    if let Some(gate) = conditional_terminator(func, controller) {
                        trace!("gate for {merge}: {gate} (controller {controller} of {pred})");
                        gates[merge.index()].push(gate);
                    }
                }
            }
        }

        Self { gates }
    }

    /// The gate values of a block, possibly with duplicates.
    #[must_use]
    pub fn of(&self, block: BlockId) -> &[ValueId] {
        &self.gates[block.index()]
    }
}

/// The terminator value of `block` if it is a conditional branch or switch.
fn conditional_terminator(func: &Function, block: BlockId) -> Option<ValueId> {
    func.terminator(block)
        .filter(|inst| inst.op().is_conditional_terminator())
        .map(crate::ir::Inst::id)
}

/// Walks `from`'s dominator chain for the nearest ancestor that `from` does
/// not post-dominate: the block whose terminator decided whether control
/// headed toward `from`.
fn region_controller(
    from: BlockId,
    dominators: &DominatorTree,
    post_dominators: &PostDominatorTree,
) -> Option<BlockId> {
    let mut current = Some(from);
    while let Some(block) = current {
        if !post_dominators.post_dominates(from, block) {
            return Some(block);
        }
        current = dominators.immediate_dominator(block);
    }
    None
}
