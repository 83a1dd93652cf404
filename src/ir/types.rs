//! Value types and data layout.
//!
//! The type system is deliberately small: the scalar types the transformation
//! actually reasons about, an opaque pointer type, a function-pointer type
//! for thunk closures, and named struct types for closure layouts. Types are
//! `Copy` so they can be freely attached to every value.
//!
//! [`DataLayout`] answers the size questions the escape analyzer needs:
//! allocation sizes for `alloca`, access sizes for loads and stores, and
//! byte offsets of closure struct fields.

use std::fmt;

/// A strongly-typed identifier for named struct types registered in a
/// [`Module`](crate::ir::Module).
///
/// Struct IDs are assigned sequentially when struct types are declared and
/// are only meaningful within the module that created them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructId(pub(crate) u32);

impl StructId {
    /// Creates a new `StructId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        StructId(index as u32)
    }

    /// Returns the raw index value of this identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for StructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructId({})", self.0)
    }
}

impl fmt::Display for StructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// The type of an SSA value.
///
/// Pointers are opaque: a `Ptr` carries no pointee type, and typed access
/// goes through the instruction performing it (a load knows what it loads).
/// This mirrors how the transformation treats memory - sizes come from
/// [`DataLayout`], never from pointer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    /// No value. The type of stores, branches, and other pure effects.
    Void,
    /// 1-bit integer, used for branch conditions and the memo flag.
    I1,
    /// 8-bit integer.
    I8,
    /// 16-bit integer.
    I16,
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit IEEE float.
    F32,
    /// 64-bit IEEE float.
    F64,
    /// Opaque pointer.
    Ptr,
    /// Pointer to a function. Calls through it are indirect calls.
    FnPtr,
    /// A named struct type registered in the module.
    Struct(StructId),
}

impl Ty {
    /// Returns `true` for the integer types (including `I1`).
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Ty::I1 | Ty::I8 | Ty::I16 | Ty::I32 | Ty::I64)
    }

    /// Returns `true` for the floating-point types.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Ty::F32 | Ty::F64)
    }

    /// Returns `true` for `Ptr` and `FnPtr`.
    #[must_use]
    pub const fn is_pointer(self) -> bool {
        matches!(self, Ty::Ptr | Ty::FnPtr)
    }

    /// Returns `true` if this is the void type.
    #[must_use]
    pub const fn is_void(self) -> bool {
        matches!(self, Ty::Void)
    }

    /// Bit width of an integer type, `None` otherwise.
    #[must_use]
    pub const fn bit_width(self) -> Option<u32> {
        match self {
            Ty::I1 => Some(1),
            Ty::I8 => Some(8),
            Ty::I16 => Some(16),
            Ty::I32 => Some(32),
            Ty::I64 => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::I1 => write!(f, "i1"),
            Ty::I8 => write!(f, "i8"),
            Ty::I16 => write!(f, "i16"),
            Ty::I32 => write!(f, "i32"),
            Ty::I64 => write!(f, "i64"),
            Ty::F32 => write!(f, "f32"),
            Ty::F64 => write!(f, "f64"),
            Ty::Ptr => write!(f, "ptr"),
            Ty::FnPtr => write!(f, "fnptr"),
            Ty::Struct(id) => write!(f, "%{id}"),
        }
    }
}

/// A named struct type.
///
/// Field order is the ABI: the thunk closure layout in particular is defined
/// by the order fields appear here.
#[derive(Debug, Clone)]
pub struct StructType {
    /// Symbol name of the type, unique within its module.
    name: String,
    /// Field types in layout order.
    fields: Vec<Ty>,
}

impl StructType {
    /// Creates a new struct type with the given name and fields.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<Ty>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Returns the struct's symbol name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the field types in layout order.
    #[must_use]
    pub fn fields(&self) -> &[Ty] {
        &self.fields
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// Target data layout: sizes, alignments, and struct field offsets.
///
/// The layout is conventional: scalars are naturally aligned, structs pad
/// each field to its alignment and round the total size up to the largest
/// field alignment. Only the pointer width is configurable.
#[derive(Debug, Clone)]
pub struct DataLayout {
    /// Size of `Ptr` and `FnPtr` in bytes.
    pointer_size: u64,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self { pointer_size: 8 }
    }
}

impl DataLayout {
    /// Creates a layout with the given pointer width in bytes.
    #[must_use]
    pub fn new(pointer_size: u64) -> Self {
        Self { pointer_size }
    }

    /// Returns the pointer width in bytes.
    #[must_use]
    pub fn pointer_size(&self) -> u64 {
        self.pointer_size
    }

    /// Allocation size of a type in bytes.
    ///
    /// `I1` occupies a full byte in memory. `Void` has size zero.
    ///
    /// # Arguments
    ///
    /// * `ty` - The type to size
    /// * `structs` - The module's struct registry, for `Ty::Struct`
    #[must_use]
    pub fn size_of(&self, ty: Ty, structs: &[StructType]) -> u64 {
        match ty {
            Ty::Void => 0,
            Ty::I1 | Ty::I8 => 1,
            Ty::I16 => 2,
            Ty::I32 | Ty::F32 => 4,
            Ty::I64 | Ty::F64 => 8,
            Ty::Ptr | Ty::FnPtr => self.pointer_size,
            Ty::Struct(id) => self.struct_layout(&structs[id.index()], structs).1,
        }
    }

    /// Alignment of a type in bytes.
    #[must_use]
    pub fn align_of(&self, ty: Ty, structs: &[StructType]) -> u64 {
        match ty {
            Ty::Void => 1,
            Ty::Struct(id) => structs[id.index()]
                .fields()
                .iter()
                .map(|&field| self.align_of(field, structs))
                .max()
                .unwrap_or(1),
            scalar => self.size_of(scalar, structs).max(1),
        }
    }

    /// Byte offsets of each field plus the padded total size of a struct.
    #[must_use]
    pub fn struct_layout(&self, st: &StructType, structs: &[StructType]) -> (Vec<u64>, u64) {
        let mut offsets = Vec::with_capacity(st.field_count());
        let mut offset = 0u64;
        let mut max_align = 1u64;

        for &field in st.fields() {
            let align = self.align_of(field, structs);
            max_align = max_align.max(align);
            offset = offset.next_multiple_of(align);
            offsets.push(offset);
            offset += self.size_of(field, structs);
        }

        (offsets, offset.next_multiple_of(max_align))
    }

    /// Byte offset of a single struct field.
    ///
    /// # Panics
    ///
    /// Panics if `field` is out of range for the struct.
    #[must_use]
    pub fn field_offset(&self, st: &StructType, field: usize, structs: &[StructType]) -> u64 {
        self.struct_layout(st, structs).0[field]
    }
}
