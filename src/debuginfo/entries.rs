//! The normalized debug-entry graph: types, methods, compiled methods,
//! files/directories, loaders, and per-range local values.
//!
//! Cyclic references (a type's superclass link, a field's declared type)
//! are modeled as arena-stable integer indices rather than owning
//! references, and role-polymorphic entities (`TypeEntry`, `LocalValueEntry`)
//! are explicit tagged unions rather than an inheritance hierarchy.

use std::ops::Range as StdRange;

use crate::common::CodeOffset;
use crate::types::{FieldType, MethodDescriptor};

macro_rules! index_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(pub u32);
    };
}

index_type!(
    /// A stable index into the [`DebugEntryModel`](super::DebugEntryModel)'s
    /// type registry.
    TypeIndex
);
index_type!(
    /// A stable index into the method registry.
    MethodIndex
);
index_type!(
    /// A stable index into the compiled-method registry.
    CompiledMethodIndex
);
index_type!(
    /// A stable index into the directory registry. Index `0` is reserved
    /// for the empty path.
    DirIndex
);
index_type!(
    /// A stable index into the file registry.
    FileIndex
);
index_type!(
    /// A stable index into the classloader registry.
    LoaderIndex
);
index_type!(
    /// A stable index into a class entry's field list.
    FieldIndex
);

impl DirIndex {
    /// The reserved index for the empty path.
    pub const EMPTY: Self = Self(0);
}

/// A source directory, keyed by path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    /// The directory's path, as it should appear in `.debug_line`.
    pub path: String,
}

/// A source file, belonging to exactly one directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEntry {
    /// The file's base name (no directory components).
    pub name: String,
    /// The directory this file belongs to.
    pub dir: DirIndex,
}

/// An (optional) classloader identity attached to a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoaderEntry {
    /// An opaque, loader-unique identifying tag.
    pub id: String,
}

/// The 64-bit type-signature triple every [`TypeEntry`] carries.
///
/// Each is a deterministic digest of `name + loaderTag`: equal inputs
/// always produce equal signatures, and distinct `(name, loader)` pairs
/// produce distinct signatures with overwhelming probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeSignatures {
    /// The signature of the type as declared.
    pub type_signature: u64,
    /// The signature used when a compressed-oop representation applies.
    pub compressed_type_signature: u64,
    /// The signature used when referring to this type's in-memory layout
    /// (as opposed to its Java-level identity).
    pub layout_type_signature: u64,
}

impl TypeSignatures {
    /// Derives the three signatures for `name` as loaded by `loader_tag`.
    ///
    /// Grounded on the FNV-1a family of hashes (the standard "deterministic
    /// digest of a short string" choice in this corpus), salted
    /// differently per signature kind so the three outputs are
    /// independent rather than trivially related.
    #[must_use]
    pub fn derive(name: &str, loader_tag: &str) -> Self {
        let base = fnv1a(name, loader_tag, 0);
        Self {
            type_signature: base,
            compressed_type_signature: fnv1a(name, loader_tag, 1),
            layout_type_signature: fnv1a(name, loader_tag, 2),
        }
    }
}

fn fnv1a(name: &str, loader_tag: &str, salt: u64) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = OFFSET_BASIS ^ salt;
    for byte in name.bytes().chain(loader_tag.bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// The common fields every [`TypeEntry`] variant carries.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeEntryCommon {
    /// The type's fully-qualified name (binary name for Java types).
    pub name: String,
    /// The type's size, in bytes.
    pub size: u32,
    /// The byte offset of this type's class metadata within its owning
    /// class's layout (used for `DW_AT_containing_type`-style links).
    pub class_offset: u32,
    /// This type's signature triple.
    pub signatures: TypeSignatures,
}

/// A normalized, role-tagged JVM/foreign type entry.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeEntry {
    /// A JVM primitive (`int`, `long`, ...).
    Primitive(TypeEntryCommon),
    /// The synthetic "object header" pseudo-type every instance begins
    /// with.
    Header(TypeEntryCommon),
    /// An array type.
    Array {
        common: TypeEntryCommon,
        /// The element type.
        element_type: TypeIndex,
    },
    /// A concrete (non-interface, non-enum) class.
    Instance {
        common: TypeEntryCommon,
        /// This class's superclass, if any (`java.lang.Object` has none).
        superclass: Option<TypeIndex>,
        /// This class's declared fields.
        fields: Vec<FieldEntry>,
    },
    /// An interface type.
    Interface(TypeEntryCommon),
    /// An enum type.
    Enum {
        common: TypeEntryCommon,
        superclass: Option<TypeIndex>,
        fields: Vec<FieldEntry>,
    },
    /// A foreign (non-Java) word-sized scalar, from a native/FFI boundary.
    ForeignWord(TypeEntryCommon),
    /// A foreign aggregate/struct type.
    ForeignStruct {
        common: TypeEntryCommon,
        fields: Vec<FieldEntry>,
    },
    /// A foreign pointer type.
    ForeignPointer {
        common: TypeEntryCommon,
        pointee: Option<TypeIndex>,
    },
    /// A foreign integer scalar.
    ForeignInteger(TypeEntryCommon),
    /// A foreign floating-point scalar.
    ForeignFloat(TypeEntryCommon),
}

impl TypeEntry {
    /// The common fields shared by every variant.
    #[must_use]
    pub fn common(&self) -> &TypeEntryCommon {
        match self {
            Self::Primitive(c)
            | Self::Header(c)
            | Self::Interface(c)
            | Self::ForeignWord(c)
            | Self::ForeignInteger(c)
            | Self::ForeignFloat(c) => c,
            Self::Array { common, .. }
            | Self::Instance { common, .. }
            | Self::Enum { common, .. }
            | Self::ForeignStruct { common, .. }
            | Self::ForeignPointer { common, .. } => common,
        }
    }

    /// This type's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.common().name
    }

    /// This type's signature triple.
    #[must_use]
    pub fn signatures(&self) -> TypeSignatures {
        self.common().signatures
    }
}

/// A field belonging to an [`TypeEntry::Instance`]/`Enum`/`ForeignStruct`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    /// The field's name.
    pub name: String,
    /// The field's declared type.
    pub field_type: TypeIndex,
    /// The field's byte offset within instances of the owning type.
    pub offset: u32,
    /// Whether the field is `static`.
    pub is_static: bool,
}

/// A normalized method entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodEntry {
    /// The method's name.
    pub name: String,
    /// The method's descriptor.
    pub descriptor: MethodDescriptor,
    /// The owning class.
    pub owner: TypeIndex,
    /// The method's declared parameters, including a synthetic `this`
    /// parameter prepended for non-static methods.
    pub parameters: Vec<LocalEntry>,
    /// Locals declared beyond the last parameter slot, read from the local
    /// variable table when present and well-formed.
    pub locals: Vec<LocalEntry>,
    /// Line numbers keyed by the bci at which they take effect.
    pub line_numbers: Vec<(u16, u32)>,
    /// Whether the method is `static`.
    pub is_static: bool,
}

impl MethodEntry {
    /// The highest local-variable-table slot occupied by a declared
    /// parameter (including the synthetic `this` slot, if any).
    #[must_use]
    pub fn last_parameter_slot(&self) -> Option<u16> {
        self.parameters.iter().map(|p| p.slot).max()
    }

    /// The declared local (parameter or local-variable-table entry) at
    /// `slot` most recently in scope at `bci`, if any.
    #[must_use]
    pub fn local_at(&self, slot: u16, bci: u32) -> Option<&LocalEntry> {
        self.parameters
            .iter()
            .chain(self.locals.iter())
            .filter(|l| l.slot == slot && l.first_line <= bci)
            .max_by_key(|l| l.first_line)
    }
}

/// A local variable or parameter entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntry {
    /// The local's name.
    pub name: String,
    /// The local's type.
    pub local_type: TypeIndex,
    /// The local-variable-table slot this local occupies.
    pub slot: u16,
    /// The bci of the first instruction for which this local's binding is
    /// in scope.
    pub first_line: u32,
}

/// A literal constant value, as carried by [`LocalValueEntry::Constant`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LiteralConstant {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

/// Where a local's (or parameter's) value lives over some range of native
/// code, as a tagged union.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalValueEntry {
    /// Held in architecture register `idx` (a DWARF register number).
    Register(u16),
    /// Held at `offset` bytes from the frame base on the operand stack.
    Stack(i64),
    /// A compile-time-known constant, optionally anchored at a heap
    /// offset (e.g. an interned `String`'s address).
    Constant {
        heap_offset: Option<u64>,
        constant: LiteralConstant,
    },
    /// No location is available (the value was optimized away or is
    /// out of scope).
    Undefined,
}

/// The JVM-frame value kind of a local slot at one bytecode position,
/// used to drive the per-range-locals promotion/foreign-word rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameValueKind {
    /// Not a live value at this slot (skip it).
    Illegal,
    Int,
    Long,
    Float,
    Double,
    Object,
}

/// A node in a compiled method's range tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Range {
    /// The root of a compilation's range tree.
    Primary {
        lo: CodeOffset,
        hi: CodeOffset,
        /// The native-code offset this range's bytecode position begins
        /// at within the whole compiled method (usually `0`).
        code_offset: CodeOffset,
        children: Vec<Range>,
    },
    /// A non-leaf range for an inlined call site.
    Call {
        lo: CodeOffset,
        hi: CodeOffset,
        line: u32,
        method: MethodIndex,
        file: FileIndex,
        locals: Vec<(LocalEntry, LocalValueEntry)>,
        children: Vec<Range>,
    },
    /// A leaf, straight-line code range.
    Leaf {
        lo: CodeOffset,
        hi: CodeOffset,
        line: u32,
        method: MethodIndex,
        file: FileIndex,
        locals: Vec<(LocalEntry, LocalValueEntry)>,
    },
}

impl Range {
    /// The `[lo, hi)` native-code span this range covers.
    #[must_use]
    pub fn span(&self) -> (CodeOffset, CodeOffset) {
        match self {
            Self::Primary { lo, hi, .. } | Self::Call { lo, hi, .. } | Self::Leaf { lo, hi, .. } => {
                (*lo, *hi)
            }
        }
    }

    /// This range's children, if any.
    #[must_use]
    pub fn children(&self) -> &[Range] {
        match self {
            Self::Primary { children, .. } | Self::Call { children, .. } => children,
            Self::Leaf { .. } => &[],
        }
    }

    /// Checks the well-nestedness invariant: every child's span is
    /// contained within `self`'s, and children at the same depth are
    /// disjoint and ordered.
    #[must_use]
    pub fn is_well_nested(&self) -> bool {
        let (lo, hi) = self.span();
        let children = self.children();
        let spans_ok = children.iter().all(|c| {
            let (clo, chi) = c.span();
            clo >= lo && chi <= hi
        });
        let ordered_and_disjoint = children.windows(2).all(|pair| {
            let (_, prev_hi) = pair[0].span();
            let (next_lo, _) = pair[1].span();
            prev_hi <= next_lo
        });
        spans_ok && ordered_and_disjoint && children.iter().all(Range::is_well_nested)
    }
}

/// A frame-size-change event tying a native-code offset to a stack-pointer
/// adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSizeChange {
    /// The stack pointer was decremented to make room for the frame.
    Extend(CodeOffset),
    /// The stack pointer was incremented back towards the caller's frame.
    Contract(CodeOffset),
}

/// A single compilation's debug-info entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMethodEntry {
    /// The root of this compilation's range tree.
    pub primary: Range,
    /// The ordered sequence of frame-size-change events.
    pub frame_size_changes: Vec<FrameSizeChange>,
    /// The total frame size, in bytes.
    pub frame_size: u32,
    /// The class owning the compiled method.
    pub class_entry: TypeIndex,
}

/// Per-class ownership of methods, compiled methods, files, and
/// directories.
#[derive(Debug, Clone, Default)]
pub struct ClassEntry {
    /// This class's declared methods.
    pub methods: Vec<MethodIndex>,
    /// Compilations of this class's methods.
    pub compiled_methods: Vec<CompiledMethodIndex>,
    /// Source files contributing to this class's debug info.
    pub files: Vec<FileIndex>,
    /// Directories referenced by `files`.
    pub directories: Vec<DirIndex>,
}

/// Error raised when a [`ClassEntry`]'s `lowpc`/`hipc` is queried with no
/// compiled method present.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
#[error("class entry has no compiled methods; lowpc/hipc are undefined")]
pub struct NoCompiledMethods;

impl ClassEntry {
    /// Computes `[lowpc, hipc)` as the min/max of this class's compiled
    /// ranges' endpoints.
    ///
    /// # Errors
    /// Returns [`NoCompiledMethods`] if no compiled method has been
    /// registered for this class yet.
    pub fn pc_bounds(
        &self,
        compiled_methods: &[CompiledMethodEntry],
    ) -> Result<StdRange<CodeOffset>, NoCompiledMethods> {
        let spans: Vec<_> = self
            .compiled_methods
            .iter()
            .map(|&idx| compiled_methods[idx.0 as usize].primary.span())
            .collect();
        let lo = spans.iter().map(|(lo, _)| *lo).min();
        let hi = spans.iter().map(|(_, hi)| *hi).max();
        match (lo, hi) {
            (Some(lo), Some(hi)) => Ok(lo..hi),
            _ => Err(NoCompiledMethods),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn type_signature_deterministic() {
        let a = TypeSignatures::derive("java/lang/String", "boot");
        let b = TypeSignatures::derive("java/lang/String", "boot");
        assert_eq!(a, b);
    }

    #[test]
    fn type_signature_distinguishes_loaders() {
        let a = TypeSignatures::derive("com/example/Foo", "loader-a");
        let b = TypeSignatures::derive("com/example/Foo", "loader-b");
        assert_ne!(a.type_signature, b.type_signature);
    }

    #[test]
    fn well_nested_rejects_overflowing_child() {
        let leaf = Range::Leaf {
            lo: CodeOffset(10),
            hi: CodeOffset(200),
            line: 1,
            method: MethodIndex(0),
            file: FileIndex(0),
            locals: vec![],
        };
        let primary = Range::Primary {
            lo: CodeOffset(0),
            hi: CodeOffset(100),
            code_offset: CodeOffset(0),
            children: vec![leaf],
        };
        assert!(!primary.is_well_nested());
    }

    #[test]
    fn well_nested_accepts_ordered_disjoint_children() {
        let a = Range::Leaf {
            lo: CodeOffset(0),
            hi: CodeOffset(10),
            line: 1,
            method: MethodIndex(0),
            file: FileIndex(0),
            locals: vec![],
        };
        let b = Range::Leaf {
            lo: CodeOffset(10),
            hi: CodeOffset(20),
            line: 2,
            method: MethodIndex(0),
            file: FileIndex(0),
            locals: vec![],
        };
        let primary = Range::Primary {
            lo: CodeOffset(0),
            hi: CodeOffset(20),
            code_offset: CodeOffset(0),
            children: vec![a, b],
        };
        assert!(primary.is_well_nested());
    }

    #[test]
    fn no_compiled_methods_is_illegal() {
        let class = ClassEntry::default();
        assert_eq!(class.pc_bounds(&[]), Err(NoCompiledMethods));
    }
}
