//! The normalized debug-entry model, its DWARF section encoding, and the
//! runtime JIT-registration interface.

pub mod dwarf;
pub mod entries;
pub mod jitreg;
pub mod model;
pub mod rangevisitor;
pub mod strtab;

pub use entries::{
    ClassEntry, CompiledMethodEntry, DirEntry, FieldEntry, FileEntry, FrameSizeChange,
    FrameValueKind, LiteralConstant, LoaderEntry, LocalEntry, LocalValueEntry, MethodEntry,
    NoCompiledMethods, Range, TypeEntry, TypeEntryCommon, TypeSignatures,
};
pub use entries::{CompiledMethodIndex, DirIndex, FieldIndex, FileIndex, LoaderIndex, MethodIndex, TypeIndex};
pub use dwarf::EmitterError;
pub use jitreg::{global as global_jit_registry, JitRegistry, RegistrationError};
pub use model::DebugEntryModel;
pub use rangevisitor::{visit, visit_with_mode, PositionResolver, ResolvedPosition, SyntheticLocalTypes, VisitMode};
pub use strtab::{StrOffset, StringTable};
