//! Two-pass DWARF section encoding and ELF image assembly for a batch of
//! compiled methods, plus the architecture-specific frame dialect.

pub mod arch;
pub mod emitter;

pub use arch::cie_for_dialect;
pub use emitter::{DwarfEmitter, DwarfVersion, EmittedImage, EmitterError};
