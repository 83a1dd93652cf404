//! Natural loop detection.
//!
//! Loops are found by dominance-based back-edge detection: an edge `n -> h`
//! where `h` dominates `n` makes `h` a loop header, and the natural loop
//! body is everything that reaches the latch without passing through the
//! header. Loops sharing a header are merged; nesting falls out of body
//! containment.
//!
//! The transformation needs exactly one query from all this: the **loop
//! depth** of a block. Lifting a computation out of a call site that sits
//! inside a loop is only sound when every sliced block is nested strictly
//! deeper, so the safety check compares depths across the slice.

use rustc_hash::FxHashSet;

use crate::analysis::DominatorTree;
use crate::ir::{BlockId, Function};

/// A single natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    /// The header block: the single entry point, dominating the body.
    pub header: BlockId,
    /// All blocks in the loop, including the header.
    pub body: FxHashSet<BlockId>,
    /// Back-edge sources jumping to the header from inside the loop.
    pub latches: Vec<BlockId>,
}

impl Loop {
    fn new(header: BlockId) -> Self {
        let mut body = FxHashSet::default();
        body.insert(header);
        Self {
            header,
            body,
            latches: Vec::new(),
        }
    }

    /// Returns `true` if the loop contains `block`.
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(&block)
    }

    /// Number of blocks in the loop.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// All natural loops of a function, with per-block nesting depth.
#[derive(Debug, Clone)]
pub struct LoopForest {
    loops: Vec<Loop>,
    /// Number of loops containing each block; 0 outside any loop.
    depth: Vec<usize>,
}

impl LoopForest {
    /// Detects all natural loops of `func`.
    #[must_use]
    pub fn compute(func: &Function, dominators: &DominatorTree) -> Self {
        let mut loops: Vec<Loop> = Vec::new();

        for block in func.blocks() {
            for succ in func.successors(block.id()) {
                if !dominators.dominates(succ, block.id()) {
                    continue;
                }
                // Back edge block -> succ; succ is a header.
                let header = succ;
                let index = match loops.iter().position(|l| l.header == header) {
                    Some(existing) => existing,
                    None => {
                        loops.push(Loop::new(header));
                        loops.len() - 1
                    }
                };
                loops[index].latches.push(block.id());
            }
        }

        let preds = func.predecessor_map();
        for natural_loop in &mut loops {
            for i in 0..natural_loop.latches.len() {
                let latch = natural_loop.latches[i];
                expand_body(natural_loop, latch, &preds);
            }
        }

        let mut depth = vec![0usize; func.block_count()];
        for natural_loop in &loops {
            for block in &natural_loop.body {
                depth[block.index()] += 1;
            }
        }

        Self { loops, depth }
    }

    /// All detected loops.
    #[must_use]
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Number of loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Returns `true` if the function has no loops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Nesting depth of a block: 0 outside any loop, 1 in a top-level loop,
    /// and so on.
    #[must_use]
    pub fn loop_depth(&self, block: BlockId) -> usize {
        self.depth.get(block.index()).copied().unwrap_or(0)
    }

    /// Returns `true` if the block is inside any loop.
    #[must_use]
    pub fn is_in_loop(&self, block: BlockId) -> bool {
        self.loop_depth(block) > 0
    }
}

/// Grows a loop body backward from a latch until the header.
///
/// The header is already in the body, so the walk never escapes past it.
fn expand_body(natural_loop: &mut Loop, latch: BlockId, preds: &[Vec<BlockId>]) {
    let mut stack = vec![latch];
    while let Some(block) = stack.pop() {
        if !natural_loop.body.insert(block) {
            continue;
        }
        for &pred in &preds[block.index()] {
            stack.push(pred);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Ty};

    #[test]
    fn test_straight_line_has_no_loops() {
        let func = FunctionBuilder::new("straight", &[], Ty::Void).build_with(|f| {
            f.block(0, |b| b.jump(1));
            f.block(1, |b| b.ret());
        });
        let dom = DominatorTree::compute(&func);
        let forest = LoopForest::compute(&func, &dom);

        assert!(forest.is_empty());
        assert_eq!(forest.loop_depth(BlockId::new(0)), 0);
    }

    #[test]
    fn test_single_loop() {
        // 0 -> 1 -> {2, 3}; 2 -> 1.
        let func = FunctionBuilder::new("one_loop", &[Ty::I1], Ty::Void).build_with(|f| {
            let cond = f.arg(0);
            f.block(0, |b| b.jump(1));
            f.block(1, |b| b.branch(cond, 2, 3));
            f.block(2, |b| b.jump(1));
            f.block(3, |b| b.ret());
        });
        let dom = DominatorTree::compute(&func);
        let forest = LoopForest::compute(&func, &dom);

        assert_eq!(forest.len(), 1);
        let l = &forest.loops()[0];
        assert_eq!(l.header, BlockId::new(1));
        assert!(l.contains(BlockId::new(2)));
        assert!(!l.contains(BlockId::new(0)));
        assert!(!l.contains(BlockId::new(3)));

        assert_eq!(forest.loop_depth(BlockId::new(0)), 0);
        assert_eq!(forest.loop_depth(BlockId::new(1)), 1);
        assert_eq!(forest.loop_depth(BlockId::new(2)), 1);
        assert_eq!(forest.loop_depth(BlockId::new(3)), 0);
    }

    #[test]
    fn test_nested_loops() {
        // 0 -> 1 (outer header) -> 2 (inner header) -> {2-latch 3, exit of inner 4}
        // 3 -> 2 back edge; 4 -> 1 back edge via 4 -> {1, 5}.
        let func = FunctionBuilder::new("nested", &[Ty::I1, Ty::I1], Ty::Void).build_with(|f| {
            let (c1, c2) = (f.arg(0), f.arg(1));
            f.block(0, |b| b.jump(1));
            f.block(1, |b| b.jump(2));
            f.block(2, |b| b.branch(c1, 3, 4));
            f.block(3, |b| b.jump(2));
            f.block(4, |b| b.branch(c2, 1, 5));
            f.block(5, |b| b.ret());
        });
        let dom = DominatorTree::compute(&func);
        let forest = LoopForest::compute(&func, &dom);

        assert_eq!(forest.len(), 2);
        // Inner body blocks are in both loops.
        assert_eq!(forest.loop_depth(BlockId::new(2)), 2);
        assert_eq!(forest.loop_depth(BlockId::new(3)), 2);
        // Outer-only blocks.
        assert_eq!(forest.loop_depth(BlockId::new(1)), 1);
        assert_eq!(forest.loop_depth(BlockId::new(4)), 1);
        assert_eq!(forest.loop_depth(BlockId::new(5)), 0);
    }

    #[test]
    fn test_two_latches_one_header() {
        // Two back edges to the same header form one loop.
        let func = FunctionBuilder::new("two_latches", &[Ty::I1, Ty::I1], Ty::Void).build_with(
            |f| {
                let (c1, c2) = (f.arg(0), f.arg(1));
                f.block(0, |b| b.jump(1));
                f.block(1, |b| b.branch(c1, 2, 3));
                f.block(2, |b| b.jump(1));
                f.block(3, |b| b.branch(c2, 1, 4));
                f.block(4, |b| b.ret());
            },
        );
        let dom = DominatorTree::compute(&func);
        let forest = LoopForest::compute(&func, &dom);

        assert_eq!(forest.len(), 1);
        assert_eq!(forest.loops()[0].latches.len(), 2);
        assert_eq!(forest.loop_depth(BlockId::new(3)), 1);
    }
}
