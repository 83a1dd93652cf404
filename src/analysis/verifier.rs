//! SSA well-formedness verification.
//!
//! The verifier is the contract check the transformation runs on every
//! function it creates or mutates: the outlined thunk, the cloned callee,
//! and the rewritten caller. A finding here is never a property of the
//! input program - it means the transformation produced broken IR.
//!
//! Checked properties:
//!
//! - the entry block has no predecessors
//! - every block ends in exactly one terminator, with none mid-block
//! - phi nodes appear only at block heads
//! - every value has at most one definition, and every used value has one
//! - phi nodes have exactly one incoming entry per predecessor
//! - every use is dominated by its definition (phi uses are checked at the
//!   end of the incoming block)
//! - branch targets are in range

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::DominatorTree;
use crate::ir::{BlockId, Function, Module, Op, ValueId};

/// A single verifier finding.
#[derive(Debug, Clone)]
pub struct VerifyIssue {
    /// The block the finding anchors to, when one is known.
    pub block: Option<BlockId>,
    /// Human-readable description of the violation.
    pub message: String,
}

impl VerifyIssue {
    fn new(block: impl Into<Option<BlockId>>, message: impl Into<String>) -> Self {
        Self {
            block: block.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for VerifyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block {
            Some(block) => write!(f, "{block}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Verifies a function, returning all findings.
///
/// An empty result means the function is well-formed SSA. Declarations
/// trivially verify.
#[must_use]
pub fn verify_function(module: &Module, func: &Function) -> Vec<VerifyIssue> {
    let mut issues = Vec::new();

    if func.is_declaration() {
        return issues;
    }
    if func.block_count() == 0 {
        issues.push(VerifyIssue::new(None, "function has no blocks"));
        return issues;
    }
    if func.entry().index() >= func.block_count() {
        issues.push(VerifyIssue::new(None, "entry block out of range"));
        return issues;
    }

    check_block_shape(func, &mut issues);
    check_successor_ranges(func, &mut issues);
    check_call_targets(module, func, &mut issues);
    if !issues.is_empty() {
        // Structural breakage makes the dominance analysis meaningless.
        return issues;
    }

    let preds = func.predecessor_map();
    if !preds[func.entry().index()].is_empty() {
        issues.push(VerifyIssue::new(
            func.entry(),
            "entry block has predecessors",
        ));
    }

    let defs = check_definitions(func, &mut issues);
    check_phis(func, &preds, &mut issues);
    check_dominance(func, &defs, &mut issues);

    issues
}

/// Terminator placement and phi placement within each block.
fn check_block_shape(func: &Function, issues: &mut Vec<VerifyIssue>) {
    for block in func.blocks() {
        match block.insts().last() {
            Some(last) if last.op().is_terminator() => {}
            _ => issues.push(VerifyIssue::new(block.id(), "block has no terminator")),
        }

        let mut seen_non_phi = false;
        for (index, inst) in block.insts().iter().enumerate() {
            if inst.op().is_terminator() && index + 1 != block.insts().len() {
                issues.push(VerifyIssue::new(
                    block.id(),
                    format!("terminator {} not at end of block", inst.id()),
                ));
            }
            if inst.is_phi() {
                if seen_non_phi {
                    issues.push(VerifyIssue::new(
                        block.id(),
                        format!("phi {} past block head", inst.id()),
                    ));
                }
            } else {
                seen_non_phi = true;
            }
        }
    }
}

/// Every successor reference must name an existing block.
fn check_successor_ranges(func: &Function, issues: &mut Vec<VerifyIssue>) {
    for block in func.blocks() {
        for inst in block.insts() {
            for succ in inst.op().successors() {
                if succ.index() >= func.block_count() {
                    issues.push(VerifyIssue::new(
                        block.id(),
                        format!("successor {succ} out of range"),
                    ));
                }
            }
            if let Some(incoming) = inst.op().phi_incoming() {
                for &(pred, _) in incoming {
                    if pred.index() >= func.block_count() {
                        issues.push(VerifyIssue::new(
                            block.id(),
                            format!("phi incoming block {pred} out of range"),
                        ));
                    }
                }
            }
        }
    }
}

/// Direct call and function-address references must name module functions.
fn check_call_targets(module: &Module, func: &Function, issues: &mut Vec<VerifyIssue>) {
    for block in func.blocks() {
        for inst in block.insts() {
            let target = match inst.op() {
                Op::Call { target, .. } | Op::Invoke { target, .. } => Some(*target),
                Op::Const(crate::ir::ConstValue::Function(id)) => {
                    Some(crate::ir::CallTarget::Direct(*id))
                }
                _ => None,
            };
            if let Some(crate::ir::CallTarget::Direct(id)) = target {
                if id.index() >= module.function_count() {
                    issues.push(VerifyIssue::new(
                        block.id(),
                        format!("reference to unknown function {id}"),
                    ));
                }
            }
        }
    }
}

/// Single-definition rule; returns the definition positions for dominance
/// checking.
fn check_definitions(
    func: &Function,
    issues: &mut Vec<VerifyIssue>,
) -> FxHashMap<ValueId, (BlockId, usize)> {
    let mut defs: FxHashMap<ValueId, (BlockId, usize)> = FxHashMap::default();

    for block in func.blocks() {
        for (index, inst) in block.insts().iter().enumerate() {
            if inst.id().index() >= func.value_count() {
                issues.push(VerifyIssue::new(
                    block.id(),
                    format!("value {} not allocated in value table", inst.id()),
                ));
                continue;
            }
            if func.is_param(inst.id()) {
                issues.push(VerifyIssue::new(
                    block.id(),
                    format!("instruction redefines parameter {}", inst.id()),
                ));
            }
            if defs.insert(inst.id(), (block.id(), index)).is_some() {
                issues.push(VerifyIssue::new(
                    block.id(),
                    format!("value {} defined more than once", inst.id()),
                ));
            }
        }
    }

    defs
}

/// Phi incoming lists must mirror the predecessor set exactly.
fn check_phis(func: &Function, preds: &[Vec<BlockId>], issues: &mut Vec<VerifyIssue>) {
    for block in func.blocks() {
        let block_preds: FxHashSet<BlockId> = preds[block.id().index()].iter().copied().collect();

        for inst in block.phis() {
            let incoming = inst.op().phi_incoming().expect("phis() yields phi nodes");

            let mut seen: FxHashSet<BlockId> = FxHashSet::default();
            for &(pred, _) in incoming {
                if !seen.insert(pred) {
                    issues.push(VerifyIssue::new(
                        block.id(),
                        format!("phi {} has duplicate incoming block {pred}", inst.id()),
                    ));
                }
                if !block_preds.contains(&pred) {
                    issues.push(VerifyIssue::new(
                        block.id(),
                        format!("phi {} has incoming from non-predecessor {pred}", inst.id()),
                    ));
                }
            }
            for &pred in &block_preds {
                if !seen.contains(&pred) {
                    issues.push(VerifyIssue::new(
                        block.id(),
                        format!("phi {} missing incoming for predecessor {pred}", inst.id()),
                    ));
                }
            }
        }
    }
}

/// Every use must be dominated by its definition.
fn check_dominance(
    func: &Function,
    defs: &FxHashMap<ValueId, (BlockId, usize)>,
    issues: &mut Vec<VerifyIssue>,
) {
    let dominators = DominatorTree::compute(func);

    for block in func.blocks() {
        if !dominators.is_reachable(block.id()) {
            // Dead blocks are not subject to dominance.
            continue;
        }

        for (index, inst) in block.insts().iter().enumerate() {
            if let Some(incoming) = inst.op().phi_incoming() {
                for &(pred, value) in incoming {
                    if func.is_param(value) {
                        continue;
                    }
                    match defs.get(&value) {
                        // The use site of a phi operand is the end of its
                        // incoming block.
                        Some(&(def_block, _)) => {
                            if !dominators.dominates(def_block, pred) {
                                issues.push(VerifyIssue::new(
                                    block.id(),
                                    format!(
                                        "phi {} operand {value} ({def_block}) does not dominate \
                                         incoming edge from {pred}",
                                        inst.id()
                                    ),
                                ));
                            }
                        }
                        None => issues.push(VerifyIssue::new(
                            block.id(),
                            format!("phi {} uses undefined value {value}", inst.id()),
                        )),
                    }
                }
                continue;
            }

            for value in inst.op().uses() {
                if func.is_param(value) {
                    continue;
                }
                match defs.get(&value) {
                    Some(&(def_block, def_index)) => {
                        let dominated = if def_block == block.id() {
                            def_index < index
                        } else {
                            dominators.dominates(def_block, block.id())
                        };
                        if !dominated {
                            issues.push(VerifyIssue::new(
                                block.id(),
                                format!(
                                    "use of {value} in {} not dominated by its definition \
                                     in {def_block}",
                                    inst.id()
                                ),
                            ));
                        }
                    }
                    None => issues.push(VerifyIssue::new(
                        block.id(),
                        format!("{} uses undefined value {value}", inst.id()),
                    )),
                }
            }
        }
    }
}

/// Collapses findings into one message string, for error reporting.
#[must_use]
pub fn render_issues(issues: &[VerifyIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
