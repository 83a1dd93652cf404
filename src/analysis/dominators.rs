//! Dominator and post-dominator tree computation using the Lengauer-Tarjan
//! algorithm.
//!
//! # Theory
//!
//! A block `d` **dominates** a block `n` if every path from the entry to `n`
//! passes through `d`. The **immediate dominator** of `n` is the unique
//! closest strict dominator; making it `n`'s parent yields the dominator
//! tree. Post-dominance is the same relation on the reversed CFG, rooted at
//! a virtual exit that fans in from every return and unreachable.
//!
//! The transformation leans on both directions: the gate map asks "does this
//! predecessor's branch decide whether the merge runs", the attractor map
//! asks "where must control go once it would have left the slice", and the
//! verifier asks "is every use dominated by its definition".
//!
//! # Algorithm
//!
//! Lengauer-Tarjan with path compression, O(V α(V)): DFS numbering,
//! semidominators via the semidominator theorem, implicit immediate
//! dominators from buckets, then a final explicit pass. Blocks unreachable
//! from the root simply have no dominator; queries involving them answer
//! `false`/`None`.

use crate::ir::{BlockId, Function, Op};

/// Sentinel for "no node" in the internal index arrays.
const UNDEF: usize = usize::MAX;

/// A CFG view of a function: adjacency by block index, with a designated
/// root. [`Cfg::reverse`] appends a virtual exit node so post-dominance is
/// well-defined for functions with several returns.
#[derive(Debug, Clone)]
pub struct Cfg {
    root: usize,
    succs: Vec<Vec<usize>>,
    preds: Vec<Vec<usize>>,
}

impl Cfg {
    /// Builds the forward CFG of a function, rooted at its entry block.
    #[must_use]
    pub fn forward(func: &Function) -> Self {
        let n = func.block_count();
        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];

        for block in func.blocks() {
            let from = block.id().index();
            for succ in func.successors(block.id()) {
                let to = succ.index();
                if !succs[from].contains(&to) {
                    succs[from].push(to);
                    preds[to].push(from);
                }
            }
        }

        Self {
            root: func.entry().index(),
            succs,
            preds,
        }
    }

    /// Builds the reversed CFG with a virtual exit as root.
    ///
    /// The virtual exit occupies index `block_count()` and has an edge to
    /// every block ending in a return or unreachable.
    #[must_use]
    pub fn reverse(func: &Function) -> Self {
        let n = func.block_count();
        let virtual_exit = n;
        let mut succs = vec![Vec::new(); n + 1];
        let mut preds = vec![Vec::new(); n + 1];

        for block in func.blocks() {
            let from = block.id().index();
            for succ in func.successors(block.id()) {
                // Reversed: successor edges become predecessor edges.
                let to = succ.index();
                if !succs[to].contains(&from) {
                    succs[to].push(from);
                    preds[from].push(to);
                }
            }
            let is_exit = matches!(
                block.terminator().map(crate::ir::Inst::op),
                Some(Op::Return { .. } | Op::Unreachable)
            );
            if is_exit {
                succs[virtual_exit].push(from);
                preds[from].push(virtual_exit);
            }
        }

        Self {
            root: virtual_exit,
            succs,
            preds,
        }
    }

    /// Number of nodes, including any virtual exit.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.succs.len()
    }

    /// The root node index.
    #[must_use]
    pub fn root(&self) -> usize {
        self.root
    }
}

/// A dominator tree over CFG node indices.
///
/// This is the shared core behind [`DominatorTree`] and
/// [`PostDominatorTree`]; the wrappers translate between [`BlockId`]s and
/// raw indices and hide the virtual exit.
#[derive(Debug, Clone)]
struct DomTreeCore {
    root: usize,
    /// Immediate dominator per node; `UNDEF` for the root and for nodes
    /// unreachable from it.
    idom: Vec<usize>,
}

impl DomTreeCore {
    fn immediate_dominator(&self, node: usize) -> Option<usize> {
        if node == self.root || self.idom[node] == UNDEF {
            None
        } else {
            Some(self.idom[node])
        }
    }

    fn is_reachable(&self, node: usize) -> bool {
        node == self.root || self.idom[node] != UNDEF
    }

    fn dominates(&self, a: usize, b: usize) -> bool {
        if a == b {
            return true;
        }
        if !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        while let Some(idom) = self.immediate_dominator(current) {
            if idom == a {
                return true;
            }
            current = idom;
        }
        false
    }
}

/// Computes the dominator tree of a [`Cfg`] with Lengauer-Tarjan.
fn compute(cfg: &Cfg) -> DomTreeCore {
    let n = cfg.node_count();
    if n == 0 {
        return DomTreeCore {
            root: cfg.root,
            idom: Vec::new(),
        };
    }

    let mut lt = LengauerTarjan::new(n);
    lt.run(cfg);

    DomTreeCore {
        root: cfg.root,
        idom: lt.idom,
    }
}

/// Internal state for the Lengauer-Tarjan algorithm.
struct LengauerTarjan {
    /// DFS number for each node (0 = not visited).
    dfnum: Vec<usize>,
    /// Node with each DFS number (inverse of `dfnum`).
    vertex: Vec<usize>,
    /// Parent in the DFS tree.
    parent: Vec<usize>,
    /// Semidominator, stored as a node index.
    semi: Vec<usize>,
    /// Immediate dominator (final result).
    idom: Vec<usize>,
    /// Ancestor in the link-eval forest.
    ancestor: Vec<usize>,
    /// Best node on the path to the ancestor (path compression).
    best: Vec<usize>,
    /// Nodes whose semidominator is this node.
    bucket: Vec<Vec<usize>>,
    /// Current DFS counter.
    dfs_counter: usize,
}

impl LengauerTarjan {
    fn new(n: usize) -> Self {
        Self {
            dfnum: vec![0; n],
            vertex: vec![UNDEF; n],
            parent: vec![UNDEF; n],
            semi: (0..n).collect(),
            idom: vec![UNDEF; n],
            ancestor: vec![UNDEF; n],
            best: (0..n).collect(),
            bucket: vec![Vec::new(); n],
            dfs_counter: 0,
        }
    }

    fn run(&mut self, cfg: &Cfg) {
        self.dfs(cfg, cfg.root());

        // Process nodes in reverse DFS order, excluding the root.
        for i in (1..self.dfs_counter).rev() {
            let w = self.vertex[i];
            let parent_w = self.parent[w];

            // Semidominator theorem.
            for &v in &cfg.preds[w] {
                if self.dfnum[v] == 0 {
                    // Unreachable from the root.
                    continue;
                }
                let u = self.eval(v);
                if self.dfnum[self.semi[u]] < self.dfnum[self.semi[w]] {
                    self.semi[w] = self.semi[u];
                }
            }

            let semi_w = self.semi[w];
            self.bucket[semi_w].push(w);
            self.link(parent_w, w);

            // Implicit immediate dominators for parent(w)'s bucket.
            let bucket = std::mem::take(&mut self.bucket[parent_w]);
            for v in bucket {
                let u = self.eval(v);
                self.idom[v] = if self.semi[u] == self.semi[v] {
                    parent_w
                } else {
                    u
                };
            }
        }

        // Explicit pass in DFS order.
        for i in 1..self.dfs_counter {
            let w = self.vertex[i];
            if self.idom[w] != self.semi[w] {
                self.idom[w] = self.idom[self.idom[w]];
            }
        }

        let root = cfg.root();
        self.idom[root] = UNDEF;
    }

    fn dfs(&mut self, cfg: &Cfg, start: usize) {
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if self.dfnum[node] != 0 {
                continue;
            }
            self.dfs_counter += 1;
            self.dfnum[node] = self.dfs_counter;
            self.vertex[self.dfs_counter - 1] = node;

            for &succ in &cfg.succs[node] {
                if self.dfnum[succ] == 0 {
                    self.parent[succ] = node;
                    stack.push(succ);
                }
            }
        }
    }

    fn link(&mut self, w: usize, v: usize) {
        self.ancestor[v] = w;
    }

    fn eval(&mut self, v: usize) -> usize {
        if self.ancestor[v] == UNDEF {
            return v;
        }
        self.compress(v);
        self.best[v]
    }

    fn compress(&mut self, v: usize) {
        let ancestor_v = self.ancestor[v];
        if self.ancestor[ancestor_v] == UNDEF {
            return;
        }
        self.compress(ancestor_v);

        if self.dfnum[self.semi[self.best[ancestor_v]]] < self.dfnum[self.semi[self.best[v]]] {
            self.best[v] = self.best[ancestor_v];
        }
        self.ancestor[v] = self.ancestor[ancestor_v];
    }
}

/// The dominator tree of a function, rooted at its entry block.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    core: DomTreeCore,
}

impl DominatorTree {
    /// Computes the dominator tree for `func`.
    #[must_use]
    pub fn compute(func: &Function) -> Self {
        Self {
            core: compute(&Cfg::forward(func)),
        }
    }

    /// The immediate dominator of `block`, `None` for the entry and for
    /// unreachable blocks.
    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.core.immediate_dominator(block.index()).map(BlockId::new)
    }

    /// Checks if `a` dominates `b`. A block dominates itself.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.core.dominates(a.index(), b.index())
    }

    /// Checks if `a` dominates `b` and `a != b`.
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns `true` if `block` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.core.is_reachable(block.index())
    }

    /// Iterates the dominators of `block`, from the block itself up to the
    /// entry.
    pub fn dominators(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        let mut current = self.core.is_reachable(block.index()).then_some(block.index());
        std::iter::from_fn(move || {
            let node = current?;
            current = self.core.immediate_dominator(node);
            Some(BlockId::new(node))
        })
    }
}

/// The post-dominator tree of a function, rooted at a virtual exit.
///
/// Blocks that cannot reach any function exit (infinite loops) have no
/// post-dominator; queries involving them answer `false`/`None`.
#[derive(Debug, Clone)]
pub struct PostDominatorTree {
    core: DomTreeCore,
    virtual_exit: usize,
}

impl PostDominatorTree {
    /// Computes the post-dominator tree for `func`.
    #[must_use]
    pub fn compute(func: &Function) -> Self {
        let cfg = Cfg::reverse(func);
        let virtual_exit = cfg.root();
        Self {
            core: compute(&cfg),
            virtual_exit,
        }
    }

    /// The immediate post-dominator of `block`.
    ///
    /// `None` when the block's only post-dominator is the virtual exit (it
    /// is itself an exit) or when it cannot reach an exit at all.
    #[must_use]
    pub fn immediate_post_dominator(&self, block: BlockId) -> Option<BlockId> {
        match self.core.immediate_dominator(block.index()) {
            Some(idom) if idom != self.virtual_exit => Some(BlockId::new(idom)),
            _ => None,
        }
    }

    /// Checks if `a` post-dominates `b`: every path from `b` to an exit
    /// passes through `a`. A block post-dominates itself.
    #[must_use]
    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.core.dominates(a.index(), b.index())
    }

    /// Iterates the post-dominators of `block`, from the block itself
    /// upward, stopping before the virtual exit.
    pub fn post_dominators(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        let start = (self.core.is_reachable(block.index()) && block.index() != self.virtual_exit)
            .then_some(block.index());
        let mut current = start;
        std::iter::from_fn(move || {
            let node = current?;
            current = self
                .core
                .immediate_dominator(node)
                .filter(|&up| up != self.virtual_exit);
            Some(BlockId::new(node))
        })
    }
}
