//! Functions, basic blocks, and instructions.
//!
//! A [`Function`] owns its blocks and a per-function value table. Every
//! instruction *is* a value: [`Inst`] pairs a [`ValueId`] with an
//! [`Op`](crate::ir::Op), and instructions that produce nothing (stores,
//! branches) simply have result type [`Ty::Void`]. This is what lets
//! terminators participate in backward slices as gate values.
//!
//! # Structure
//!
//! ```text
//! Function
//! ├── params: Vec<ValueId>     // formal parameters, values 0..n
//! ├── values: Vec<Ty>          // type of every value, indexed by ValueId
//! ├── blocks: Vec<Block>       // basic blocks, indexed by BlockId
//! └── entry: BlockId           // the designated entry block
//! ```
//!
//! Blocks keep their IDs stable for the lifetime of the function; "moving
//! the entry block first" is expressed by redesignating [`Function::entry`]
//! rather than by renumbering.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::ir::{FnAttrs, Op, Ty};

/// A strongly-typed identifier for SSA values within one function.
///
/// Value IDs are assigned sequentially as parameters and instructions are
/// created. They are meaningful only within their owning function; cloning
/// instructions into another function allocates fresh IDs there.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub(crate) u32);

impl ValueId {
    /// Creates a new `ValueId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        ValueId(index as u32)
    }

    /// Returns the raw index value of this identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueId({})", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A strongly-typed identifier for basic blocks within one function.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Creates a new `BlockId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        BlockId(index as u32)
    }

    /// Returns the raw index value of this identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// An SSA instruction: a value identity paired with its operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    /// The value this instruction defines.
    id: ValueId,
    /// The operation performed.
    op: Op,
}

impl Inst {
    /// Creates an instruction defining `id` with operation `op`.
    #[must_use]
    pub fn new(id: ValueId, op: Op) -> Self {
        Self { id, op }
    }

    /// The value this instruction defines.
    #[must_use]
    pub fn id(&self) -> ValueId {
        self.id
    }

    /// The operation performed.
    #[must_use]
    pub fn op(&self) -> &Op {
        &self.op
    }

    /// Mutable access to the operation.
    pub fn op_mut(&mut self) -> &mut Op {
        &mut self.op
    }

    /// Returns `true` if this instruction is a phi node.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self.op, Op::Phi { .. })
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.id, self.op)
    }
}

/// A basic block: an ordered instruction sequence ending in a terminator.
///
/// Phi nodes, when present, appear only at the head of the block. During
/// synthesis a block may temporarily lack a terminator; the verifier
/// enforces its presence on finished functions.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// This block's ID (its index in the owning function).
    id: BlockId,
    /// Instructions in execution order.
    insts: Vec<Inst>,
}

impl Block {
    /// Creates a new empty block.
    #[must_use]
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            insts: Vec::new(),
        }
    }

    /// This block's ID.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// The instructions in execution order.
    #[must_use]
    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    /// Mutable access to the instruction list.
    pub fn insts_mut(&mut self) -> &mut Vec<Inst> {
        &mut self.insts
    }

    /// Appends an instruction.
    pub fn push(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    /// Inserts an instruction at `index`.
    pub fn insert(&mut self, index: usize, inst: Inst) {
        self.insts.insert(index, inst);
    }

    /// The block's terminator, if its last instruction is one.
    #[must_use]
    pub fn terminator(&self) -> Option<&Inst> {
        self.insts.last().filter(|inst| inst.op().is_terminator())
    }

    /// Mutable access to the terminator.
    pub fn terminator_mut(&mut self) -> Option<&mut Inst> {
        self.insts
            .last_mut()
            .filter(|inst| inst.op().is_terminator())
    }

    /// Returns `true` if the block currently ends in a terminator.
    #[must_use]
    pub fn has_terminator(&self) -> bool {
        self.terminator().is_some()
    }

    /// Iterates the leading phi nodes of this block.
    pub fn phis(&self) -> impl Iterator<Item = &Inst> {
        self.insts.iter().take_while(|inst| inst.is_phi())
    }

    /// Number of leading phi nodes.
    #[must_use]
    pub fn phi_count(&self) -> usize {
        self.phis().count()
    }

    /// Index of the first non-phi instruction.
    #[must_use]
    pub fn first_non_phi(&self) -> usize {
        self.phi_count()
    }
}

/// A function in SSA form, or an external declaration.
///
/// Definitions own blocks and instructions; declarations carry only a
/// signature and effect attributes, which calls snapshot at build time.
#[derive(Debug, Clone)]
pub struct Function {
    /// Symbol name, unique within the owning module.
    name: String,
    /// Formal parameter values, in signature order.
    params: Vec<ValueId>,
    /// Return type.
    ret: Ty,
    /// Effect attributes.
    attrs: FnAttrs,
    /// Type of every value, indexed by [`ValueId`].
    values: Vec<Ty>,
    /// Basic blocks, indexed by [`BlockId`].
    blocks: Vec<Block>,
    /// The designated entry block.
    entry: BlockId,
    /// `true` for external declarations with no body.
    is_declaration: bool,
}

impl Function {
    /// Creates a new empty function definition.
    ///
    /// Parameters become values `0..param_tys.len()`; add blocks and
    /// instructions afterwards.
    #[must_use]
    pub fn new(name: impl Into<String>, param_tys: &[Ty], ret: Ty) -> Self {
        let params: Vec<ValueId> = (0..param_tys.len()).map(ValueId::new).collect();
        Self {
            name: name.into(),
            params,
            ret,
            attrs: FnAttrs::empty(),
            values: param_tys.to_vec(),
            blocks: Vec::new(),
            entry: BlockId::new(0),
            is_declaration: false,
        }
    }

    /// Creates an external declaration with the given effect attributes.
    #[must_use]
    pub fn declaration(
        name: impl Into<String>,
        param_tys: &[Ty],
        ret: Ty,
        attrs: FnAttrs,
    ) -> Self {
        let mut func = Self::new(name, param_tys, ret);
        func.attrs = attrs;
        func.is_declaration = true;
        func
    }

    /// The function's symbol name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the function.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Returns `true` for external declarations.
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.is_declaration
    }

    /// The function's effect attributes.
    #[must_use]
    pub fn attrs(&self) -> FnAttrs {
        self.attrs
    }

    /// Sets the effect attributes.
    pub fn set_attrs(&mut self, attrs: FnAttrs) {
        self.attrs = attrs;
    }

    /// The return type.
    #[must_use]
    pub fn ret_ty(&self) -> Ty {
        self.ret
    }

    /// Formal parameters in signature order.
    #[must_use]
    pub fn params(&self) -> &[ValueId] {
        &self.params
    }

    /// The parameter at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn param(&self, index: usize) -> ValueId {
        self.params[index]
    }

    /// Number of formal parameters.
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// The signature index of `value` if it is a formal parameter.
    #[must_use]
    pub fn param_index(&self, value: ValueId) -> Option<usize> {
        self.params.iter().position(|&p| p == value)
    }

    /// Returns `true` if `value` is a formal parameter.
    #[must_use]
    pub fn is_param(&self, value: ValueId) -> bool {
        self.param_index(value).is_some()
    }

    /// Replaces the type of parameter `index`, preserving its identity.
    ///
    /// Used when cloning a callee with one parameter lowered to a closure
    /// pointer.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set_param_ty(&mut self, index: usize, ty: Ty) {
        let value = self.params[index];
        self.values[value.index()] = ty;
    }

    /// The type of a value.
    ///
    /// # Panics
    ///
    /// Panics if the value is out of range.
    #[must_use]
    pub fn value_ty(&self, value: ValueId) -> Ty {
        self.values[value.index()]
    }

    /// Number of values (parameters plus instructions) created so far.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Allocates a fresh value of the given type, without a definition.
    ///
    /// The caller is responsible for eventually defining it with
    /// [`define`](Function::define); the verifier reports values that are
    /// used but never defined.
    pub fn fresh_value(&mut self, ty: Ty) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(ty);
        id
    }

    /// Appends a new empty block and returns its ID.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Block::new(id));
        id
    }

    /// The block with the given ID.
    ///
    /// # Panics
    ///
    /// Panics if the ID is out of range.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Mutable access to a block.
    ///
    /// # Panics
    ///
    /// Panics if the ID is out of range.
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// All blocks, in creation order.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Mutable access to all blocks.
    pub fn blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.blocks
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The designated entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Redesignates the entry block.
    pub fn set_entry(&mut self, block: BlockId) {
        self.entry = block;
    }

    /// Appends an instruction with a freshly allocated result value.
    ///
    /// Returns the new value.
    pub fn append(&mut self, block: BlockId, ty: Ty, op: Op) -> ValueId {
        let id = self.fresh_value(ty);
        self.blocks[block.index()].push(Inst::new(id, op));
        id
    }

    /// Inserts an instruction with a fresh result value at `index` in `block`.
    pub fn insert(&mut self, block: BlockId, index: usize, ty: Ty, op: Op) -> ValueId {
        let id = self.fresh_value(ty);
        self.blocks[block.index()].insert(index, Inst::new(id, op));
        id
    }

    /// Defines a previously reserved value by appending its instruction.
    pub fn define(&mut self, block: BlockId, id: ValueId, op: Op) {
        self.blocks[block.index()].push(Inst::new(id, op));
    }

    /// Defines a previously reserved value by inserting at `index`.
    pub fn define_at(&mut self, block: BlockId, index: usize, id: ValueId, op: Op) {
        self.blocks[block.index()].insert(index, Inst::new(id, op));
    }

    /// The terminator of a block, if present.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<&Inst> {
        self.blocks[block.index()].terminator()
    }

    /// Successor blocks of `block`, in successor-index order.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|inst| inst.op().successors())
            .unwrap_or_default()
    }

    /// Predecessors of every block, indexed by block.
    ///
    /// Duplicate edges (a branch with both arms on one target) are recorded
    /// once.
    #[must_use]
    pub fn predecessor_map(&self) -> Vec<Vec<BlockId>> {
        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); self.blocks.len()];
        for block in &self.blocks {
            for succ in self.successors(block.id()) {
                let entry = &mut preds[succ.index()];
                if !entry.contains(&block.id()) {
                    entry.push(block.id());
                }
            }
        }
        preds
    }

    /// Maps every instruction-defined value to its `(block, index)` position.
    ///
    /// Positions are invalidated by instruction insertion or removal;
    /// analyses build this once per pass over an unchanging function.
    #[must_use]
    pub fn def_map(&self) -> FxHashMap<ValueId, (BlockId, usize)> {
        let mut defs = FxHashMap::default();
        for block in &self.blocks {
            for (index, inst) in block.insts().iter().enumerate() {
                defs.insert(inst.id(), (block.id(), index));
            }
        }
        defs
    }

    /// Finds the instruction defining `value`, scanning all blocks.
    #[must_use]
    pub fn inst(&self, value: ValueId) -> Option<&Inst> {
        self.blocks
            .iter()
            .flat_map(|block| block.insts())
            .find(|inst| inst.id() == value)
    }

    /// Replaces every operand use of `from` with `to` across the function.
    ///
    /// Returns the number of operand slots rewritten.
    pub fn replace_uses(&mut self, from: ValueId, to: ValueId) -> usize {
        let mut replaced = 0;
        for block in &mut self.blocks {
            for inst in block.insts_mut() {
                replaced += inst.op_mut().replace_uses(from, to);
            }
        }
        replaced
    }

    /// Total number of instructions across all blocks.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|block| block.insts().len()).sum()
    }

    /// Iterates all instructions in block order.
    pub fn all_insts(&self) -> impl Iterator<Item = &Inst> {
        self.blocks.iter().flat_map(|block| block.insts())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (i, &param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}: {}", self.value_ty(param))?;
        }
        writeln!(f, ") -> {}", self.ret)?;

        if self.is_declaration {
            return writeln!(f, "  <external>");
        }

        // Entry block prints first, remaining blocks in ID order.
        let order = std::iter::once(self.entry).chain(
            self.blocks
                .iter()
                .map(Block::id)
                .filter(|&id| id != self.entry),
        );
        for id in order {
            let block = self.block(id);
            writeln!(f, "{id}:")?;
            for inst in block.insts() {
                if inst.op().is_terminator() || matches!(inst.op(), Op::Store { .. }) {
                    writeln!(f, "  {}", inst.op())?;
                } else {
                    writeln!(f, "  {inst}")?;
                }
            }
        }
        Ok(())
    }
}
