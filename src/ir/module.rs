//! Modules: the unit of transformation.
//!
//! A [`Module`] owns functions (definitions and external declarations),
//! named struct types, and the target [`DataLayout`]. The lazification pass
//! mutates exactly one module at a time; everything it creates - outlined
//! thunk functions, closure struct types, cloned callees - becomes a
//! permanent member of the module it was derived from.
//!
//! Generated symbol names carry a random numeric suffix so repeated
//! invocations never collide; uniqueness within the module is enforced,
//! reproducibility of the names is not.

use std::fmt;

use rand::Rng;
use rustc_hash::FxHashSet;

use crate::ir::{DataLayout, FnAttrs, Function, StructId, StructType, Ty};

/// A strongly-typed identifier for functions within a module.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncId(pub(crate) u32);

impl FuncId {
    /// Creates a new `FuncId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        FuncId(index as u32)
    }

    /// Returns the raw index value of this identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncId({})", self.0)
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// A module: functions, named struct types, and target layout.
#[derive(Debug, Clone)]
pub struct Module {
    /// Module name, informational only.
    name: String,
    /// Functions, indexed by [`FuncId`].
    functions: Vec<Function>,
    /// Named struct types, indexed by [`StructId`].
    structs: Vec<StructType>,
    /// Target data layout.
    layout: DataLayout,
}

impl Module {
    /// Creates an empty module with the default data layout.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_layout(name, DataLayout::default())
    }

    /// Creates an empty module with an explicit data layout.
    #[must_use]
    pub fn with_layout(name: impl Into<String>, layout: DataLayout) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            structs: Vec::new(),
            layout,
        }
    }

    /// The module's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The target data layout.
    #[must_use]
    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Adds a function and returns its ID.
    pub fn add_function(&mut self, function: Function) -> FuncId {
        let id = FuncId::new(self.functions.len());
        self.functions.push(function);
        id
    }

    /// Declares an external function with the given signature and attributes.
    pub fn declare_function(
        &mut self,
        name: impl Into<String>,
        param_tys: &[Ty],
        ret: Ty,
        attrs: FnAttrs,
    ) -> FuncId {
        self.add_function(Function::declaration(name, param_tys, ret, attrs))
    }

    /// The function with the given ID.
    ///
    /// # Panics
    ///
    /// Panics if the ID is out of range.
    #[must_use]
    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.index()]
    }

    /// Mutable access to a function.
    ///
    /// # Panics
    ///
    /// Panics if the ID is out of range.
    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    /// All functions, in registration order.
    #[must_use]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Number of functions.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Looks a function up by symbol name.
    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name() == name)
            .map(FuncId::new)
    }

    /// Registers a named struct type and returns its ID.
    pub fn add_struct(&mut self, st: StructType) -> StructId {
        let id = StructId::new(self.structs.len());
        self.structs.push(st);
        id
    }

    /// The struct type with the given ID.
    ///
    /// # Panics
    ///
    /// Panics if the ID is out of range.
    #[must_use]
    pub fn struct_ty(&self, id: StructId) -> &StructType {
        &self.structs[id.index()]
    }

    /// All registered struct types.
    #[must_use]
    pub fn structs(&self) -> &[StructType] {
        &self.structs
    }

    /// Allocation size of a type under this module's layout.
    #[must_use]
    pub fn size_of(&self, ty: Ty) -> u64 {
        self.layout.size_of(ty, &self.structs)
    }

    /// Byte offset of `field` within the given struct.
    ///
    /// # Panics
    ///
    /// Panics if the struct ID or field index is out of range.
    #[must_use]
    pub fn field_offset(&self, id: StructId, field: usize) -> u64 {
        self.layout
            .field_offset(self.struct_ty(id), field, &self.structs)
    }

    /// Returns `true` if any function or struct already uses `name`.
    #[must_use]
    pub fn contains_symbol(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name() == name)
            || self.structs.iter().any(|s| s.name() == name)
    }

    /// Produces a module-unique symbol name from a base prefix.
    ///
    /// Appends a random suffix and regenerates on collision. Names are not
    /// reproducible across invocations; collisions within one module are
    /// impossible by construction.
    #[must_use]
    pub fn unique_name(&self, base: &str) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let suffix: u64 = rng.gen_range(1..=1_000_000_000);
            let candidate = format!("{base}{suffix}");
            if !self.contains_symbol(&candidate) {
                return candidate;
            }
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for st in &self.structs {
            write!(f, "type %{} = {{ ", st.name())?;
            for (i, field) in st.fields().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{field}")?;
            }
            writeln!(f, " }}")?;
        }
        for func in &self.functions {
            writeln!(f, "{func}")?;
        }
        Ok(())
    }
}

/// Verifies name uniqueness across a module's symbols.
///
/// Returns the list of duplicated names, empty when all symbols are unique.
#[must_use]
pub fn duplicate_symbols(module: &Module) -> Vec<String> {
    let mut seen = FxHashSet::default();
    let mut duplicates = Vec::new();
    for name in module
        .functions()
        .iter()
        .map(Function::name)
        .chain(module.structs().iter().map(StructType::name))
    {
        if !seen.insert(name) {
            duplicates.push(name.to_string());
        }
    }
    duplicates
}
