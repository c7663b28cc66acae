//! The external collaborators the core is parametrized over.
//! A full ahead-of-time image builder, JVMCI integration, or a JIT
//! compiler supplies the concrete implementations.
//!
//! These are opaque traits: a full ahead-of-time image builder, JVMCI
//! integration, or a JIT compiler supplies the concrete implementations.
//! The interpreter and debug-info builder only ever call through these
//! traits; they never know how a class file was parsed or how a method was
//! compiled.

use crate::common::{CodeOffset, ConstantPoolIndex, ProgramCounter};
use crate::interp::{AnalysisError, Opcode};
use crate::types::{FieldType, MethodDescriptor};

/// The bytecode-stream collaborator.
///
/// The interpreter never writes to the stream; it only reads the current
/// opcode and decodes operands belonging to it.
pub trait BytecodeStream {
    /// The bci of the instruction currently positioned at.
    fn bci(&self) -> ProgramCounter;

    /// The opcode at the current bci.
    ///
    /// # Errors
    /// Returns [`AnalysisError::MalformedBytecode`] if the byte at the
    /// current bci is not a valid opcode.
    fn current_opcode(&self) -> Result<Opcode, AnalysisError>;

    /// The bci immediately following the current instruction, given its
    /// total encoded length (including any operands already read).
    fn next_bci(&self) -> ProgramCounter;

    /// Reads one unsigned byte operand and advances past it.
    fn read_u8(&mut self) -> Result<u8, AnalysisError>;

    /// Reads one big-endian signed 16-bit operand and advances past it.
    fn read_i16(&mut self) -> Result<i16, AnalysisError>;

    /// Reads one big-endian signed 32-bit operand and advances past it.
    fn read_i32(&mut self) -> Result<i32, AnalysisError>;

    /// Reads a local-variable-table index, one byte normally or two bytes
    /// when the instruction was prefixed by `WIDE`.
    fn read_local_index(&mut self, wide: bool) -> Result<u16, AnalysisError>;

    /// Reads an `IINC`-style signed increment, one byte normally or two
    /// bytes under `WIDE`.
    fn read_increment(&mut self, wide: bool) -> Result<i32, AnalysisError>;

    /// Reads a branch-target offset relative to the opcode's own bci and
    /// resolves it to an absolute [`ProgramCounter`].
    fn read_branch_dest(&mut self, wide: bool) -> Result<ProgramCounter, AnalysisError>;

    /// Reads a constant-pool index, 1 byte (`LDC`) or 2 bytes (everything
    /// else).
    fn read_cp_index(&mut self, narrow: bool) -> Result<ConstantPoolIndex, AnalysisError>;

    /// Skips the zero-to-three padding bytes before a `tableswitch`'s or
    /// `lookupswitch`'s aligned 32-bit operands.
    fn align_switch_padding(&mut self) -> Result<(), AnalysisError>;

    /// Advances the stream past the instruction at the bci it was
    /// positioned at when this opcode's decoding started.
    fn advance_to(&mut self, bci: ProgramCounter) -> Result<(), AnalysisError>;
}

/// A resolved run-time constant value, as produced by `LDC`/`LDC_W`/`LDC2_W`
/// or a dynamically-computed constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String,
    Class(ClassRefHandle),
    MethodHandle,
    MethodType,
    /// A `CONSTANT_Dynamic` resolved to some field type (Scenario F:
    /// a `long`-typed dynamic constant pushed by `LDC2_W`).
    Dynamic(FieldType),
}

impl ConstantValue {
    /// The slot width this constant occupies once pushed.
    #[must_use]
    pub fn slots(&self) -> crate::frame::Slots {
        use crate::frame::Slots;
        match self {
            Self::Long(_) | Self::Double(_) => Slots::Two,
            Self::Dynamic(ft) => ft.slots(),
            _ => Slots::One,
        }
    }
}

/// An opaque handle to a resolved class/interface/array type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassRefHandle(pub String);

/// A resolved field reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    /// The field's declared type.
    pub field_type: FieldType,
    /// Whether the field is `static`.
    pub is_static: bool,
}

/// A resolved method reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMethod {
    /// The method's descriptor.
    pub descriptor: MethodDescriptor,
    /// Whether this call site actually passes a receiver.
    ///
    /// `INVOKEVIRTUAL`'s receiver test consults this rather than assuming
    /// non-static, since the host may have rewritten the call site to a
    /// static target.
    pub has_receiver: bool,
    /// Whether an `INVOKEDYNAMIC`/`INVOKEINTERFACE` call site has a method
    /// handle "appendix" pushed ahead of the return value.
    pub has_appendix: bool,
}

/// The constant-pool collaborator.
pub trait ConstantPool {
    /// Resolves the constant referenced by `cpi` for `LDC`-family opcodes.
    fn lookup_constant(
        &self,
        cpi: ConstantPoolIndex,
        opcode: Opcode,
    ) -> Result<ConstantValue, AnalysisError>;

    /// Resolves the type referenced by `cpi` for `NEW`/`ANEWARRAY`/
    /// `CHECKCAST`/`INSTANCEOF`/`MULTIANEWARRAY`.
    fn lookup_type(
        &self,
        cpi: ConstantPoolIndex,
        opcode: Opcode,
    ) -> Result<ClassRefHandle, AnalysisError>;

    /// Resolves the field referenced by `cpi` for `GETFIELD`/`PUTFIELD`/
    /// `GETSTATIC`/`PUTSTATIC`.
    fn lookup_field(
        &self,
        cpi: ConstantPoolIndex,
        enclosing_method: &MethodDescriptor,
        opcode: Opcode,
    ) -> Result<ResolvedField, AnalysisError>;

    /// Resolves the method referenced by `cpi` for an `INVOKE*` opcode.
    fn lookup_method(
        &self,
        cpi: ConstantPoolIndex,
        opcode: Opcode,
        enclosing_method: &MethodDescriptor,
    ) -> Result<ResolvedMethod, AnalysisError>;

    /// Resolves the bootstrap-method-provided appendix argument for an
    /// `INVOKEDYNAMIC`/indy-rewritten `INVOKEINTERFACE` call site, if any.
    fn lookup_appendix(&self, cpi: ConstantPoolIndex, opcode: Opcode) -> Option<ClassRefHandle>;

    /// Best-effort eager resolution of the type referenced by `cpi`.
    ///
    /// Resolution failures here (including class loading errors) are
    /// **not** analysis errors: they are caught and the type is left
    /// unresolved. `initializing` mirrors whether the caller is about to
    /// run the type's initializer.
    fn load_referenced_type(
        &self,
        cpi: ConstantPoolIndex,
        opcode: Opcode,
        initializing: bool,
    ) -> Option<ClassRefHandle>;
}

/// The offset of a "mark" left by the compiler in a compiled method's
/// native code, used to derive frame-size-change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationMarkKind {
    /// The end of the method prologue, after the stack pointer has been
    /// decremented to make room for the frame.
    PrologueDecdRsp,
    /// The start of the method epilogue, after the stack pointer has been
    /// incremented back to the caller's frame.
    EpilogueIncdRsp,
    /// The very end of the epilogue.
    EpilogueEnd,
}

/// A single compiler-emitted mark.
#[derive(Debug, Clone, Copy)]
pub struct CompilationMark {
    /// Which kind of mark this is.
    pub kind: CompilationMarkKind,
    /// Its native-code offset within the compiled method.
    pub pc_offset: CodeOffset,
}

/// A node in a compilation's frame tree.
///
/// The root corresponds to the primary (outermost) method; internal nodes
/// are inlined call sites; leaves are straight-line code regions.
pub trait FrameTreeNode {
    /// The straight-line native-code range this node covers.
    fn range(&self) -> (CodeOffset, CodeOffset);

    /// The bytecode position (owning method + bci) this node's code
    /// corresponds to, or `None` if this is a substitution/snippet frame
    /// (bci `-1`), which the visitor must skip.
    fn bytecode_position(&self) -> Option<(ClassRefHandle, ProgramCounter)>;

    /// Whether this node is a leaf (straight-line region) as opposed to an
    /// inlined call site.
    fn is_leaf(&self) -> bool;

    /// This node's children, in source order, if it is not a leaf.
    fn children(&self) -> Vec<&dyn FrameTreeNode>;

    /// The number of tracked locals at this node's bytecode position.
    fn num_locals(&self) -> u32;

    /// The [`LocalValueEntry`](crate::debuginfo::LocalValueEntry)-shaped
    /// location of local slot `index` at this node's bytecode position.
    fn local_value(&self, index: u32) -> crate::debuginfo::LocalValueEntry;

    /// The frame kind (used for the `Illegal`/object/primitive promotion
    /// rules) of local slot `index`.
    fn local_kind(&self, index: u32) -> crate::debuginfo::FrameValueKind;
}

/// The compilation-result collaborator.
pub trait CompilationResult {
    /// The total frame size, in bytes, of this compilation.
    fn total_frame_size(&self) -> u32;

    /// The size, in bytes, of the generated native code.
    fn target_code_size(&self) -> u32;

    /// The compiler-emitted marks used to derive frame-size-change events.
    fn marks(&self) -> &[CompilationMark];

    /// A process-wide unique identifier for this compilation.
    fn compilation_id(&self) -> u64;

    /// The root of this compilation's frame tree.
    fn frame_tree_root(&self) -> &dyn FrameTreeNode;
}

/// The structural kind of a [`SharedType`], driving which
/// [`debuginfo::TypeEntry`](crate::debuginfo::TypeEntry) variant
/// `DebugEntryModel::lookup_or_insert_shared_type` constructs for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedTypeKind {
    Primitive,
    Header,
    Array,
    Instance,
    Interface,
    Enum,
    ForeignWord,
    ForeignStruct,
    ForeignPointer,
    ForeignInteger,
    ForeignFloat,
}

/// A field belonging to a [`SharedType`] of kind `Instance`/`Enum`/
/// `ForeignStruct`.
pub struct SharedField<'a> {
    pub name: &'a str,
    pub declared_type: &'a dyn SharedType,
    pub offset: u32,
    pub is_static: bool,
}

/// The host-supplied metadata for one type, consumed by
/// `DebugEntryModel::lookup_or_insert_shared_type`.
///
/// A full ahead-of-time image builder or JVMCI integration exposes its own
/// class/array/foreign-type metadata through this trait rather than the
/// model reaching back into class-loading state it has no access to.
pub trait SharedType {
    /// The fully-qualified (binary) name.
    fn name(&self) -> &str;

    /// The opaque classloader tag this type was defined under, used to
    /// distinguish same-named types loaded by different loaders.
    fn loader_tag(&self) -> &str;

    /// Which `TypeEntry` variant this type should be registered as.
    fn kind(&self) -> SharedTypeKind;

    /// The type's size, in bytes.
    fn size(&self) -> u32;

    /// The byte offset of this type's class metadata within its owning
    /// class's layout.
    fn class_offset(&self) -> u32;

    /// This type's superclass, for `Instance`/`Enum` kinds.
    fn superclass(&self) -> Option<&dyn SharedType> {
        None
    }

    /// This type's declared fields, for `Instance`/`Enum`/`ForeignStruct`
    /// kinds.
    fn fields(&self) -> Vec<SharedField<'_>> {
        Vec::new()
    }

    /// The element type, for the `Array` kind.
    fn element_type(&self) -> Option<&dyn SharedType> {
        None
    }

    /// The pointee type, for the `ForeignPointer` kind.
    fn pointee(&self) -> Option<&dyn SharedType> {
        None
    }

    /// The source file this type was declared in, as a slash-separated
    /// path (e.g. `src/main/java/com/example/Foo.java`), if the host knows
    /// one. When `None`, the model synthesizes a path from `name()`.
    fn source_file(&self) -> Option<&str> {
        None
    }
}

/// One entry from a method's local-variable table, as exposed by a
/// [`SharedMethod`].
#[derive(Debug, Clone)]
pub struct SharedLocal {
    /// The local's declared name.
    pub name: String,
    /// The local's declared type.
    pub local_type: FieldType,
    /// The local-variable-table slot this local occupies.
    pub slot: u16,
    /// The bci of the first instruction for which this binding is in
    /// scope.
    pub start_bci: u16,
}

/// The host-supplied metadata for one method, consumed by
/// `DebugEntryModel::lookup_or_insert_shared_method`.
pub trait SharedMethod {
    /// The method's name.
    fn name(&self) -> &str;

    /// The method's descriptor.
    fn descriptor(&self) -> &MethodDescriptor;

    /// Whether the method is `static`.
    fn is_static(&self) -> bool;

    /// The method's local-variable table, if the class file carries one
    /// and it parsed as well-formed.
    fn local_variable_table(&self) -> Option<&[SharedLocal]> {
        None
    }

    /// `(bci, line)` pairs from the method's line-number table, in
    /// ascending bci order.
    fn line_number_table(&self) -> &[(u16, u32)] {
        &[]
    }
}

/// A CPU architecture's frame-section dialect.
///
/// Only two dialects are in scope: AArch64 and x86_64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchDialect {
    /// The architecture's name, as it appears in `.debug_frame`/ELF
    /// metadata.
    pub arch_name: &'static str,
    /// The DWARF register number used for the heap-base register.
    pub heap_base_register: u16,
    /// The DWARF register number used for the current-thread register.
    pub thread_register: u16,
    /// The size, in bytes, of a return address on this architecture.
    pub return_address_size: u8,
    /// The CIE's initial register rule program.
    pub initial_cie_instructions: &'static [u8],
}

impl ArchDialect {
    /// The AArch64 dialect: heap-base register 27, thread register 28.
    pub const AARCH64: Self = Self {
        arch_name: "aarch64",
        heap_base_register: 27,
        thread_register: 28,
        return_address_size: 8,
        initial_cie_instructions: &[],
    };

    /// The x86_64 dialect: heap-base register 14, thread register 15.
    pub const X86_64: Self = Self {
        arch_name: "x86_64",
        heap_base_register: 14,
        thread_register: 15,
        return_address_size: 8,
        initial_cie_instructions: &[],
    };
}
