//! The emitter's CLI/config collaborator.
//!
//! This crate never parses a command line or a config file itself (out of
//! scope); [`EmitterConfig`] only models the shape the host application's
//! config layer is expected to produce before driving a [`DwarfEmitter`].
//!
//! [`DwarfEmitter`]: crate::debuginfo::dwarf::DwarfEmitter

use std::path::PathBuf;

use crate::bindings::ArchDialect;
use crate::debuginfo::dwarf::DwarfVersion;

/// The knobs a DWARF emission run is parametrized by.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Skip emitting per-inlined-frame ranges and locals, collapsing every
    /// inlined call site into its enclosing range.
    pub omit_inlined_ranges: bool,
    /// The deepest inlining level to walk when `omit_inlined_ranges` is
    /// `false`; deeper frames are merged into their parent range.
    pub max_inline_depth: u32,
    /// Whether to resolve bytecode positions back to source file/line
    /// information via `.debug_line`.
    pub use_source_mappings: bool,
    /// Where to look for source files when `use_source_mappings` is set.
    /// `None` disables on-disk source resolution entirely.
    pub source_cache_path: Option<PathBuf>,
    /// Whether to register the emitted image with the process's
    /// [`JitRegistry`](crate::debuginfo::jitreg::JitRegistry) so a live GDB
    /// session picks it up.
    pub jit_registration_enabled: bool,
    /// The DWARF version to target.
    pub dwarf_version: DwarfVersion,
    /// The CPU architecture's frame-section dialect.
    pub arch_dialect: ArchDialect,
}

impl EmitterConfig {
    /// Defaults for an AArch64 target: DWARF v5, no source resolution, JIT
    /// registration on (the common case for a live JIT rather than a
    /// batch AOT image builder).
    #[must_use]
    pub fn aarch64_defaults() -> Self {
        Self {
            omit_inlined_ranges: false,
            max_inline_depth: u32::MAX,
            use_source_mappings: false,
            source_cache_path: None,
            jit_registration_enabled: true,
            dwarf_version: DwarfVersion::V5,
            arch_dialect: ArchDialect::AARCH64,
        }
    }

    /// Defaults for an x86_64 target: otherwise identical to
    /// [`Self::aarch64_defaults`].
    #[must_use]
    pub fn x86_64_defaults() -> Self {
        Self {
            arch_dialect: ArchDialect::X86_64,
            ..Self::aarch64_defaults()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn x86_64_defaults_only_differ_in_dialect() {
        let aarch64 = EmitterConfig::aarch64_defaults();
        let x86_64 = EmitterConfig::x86_64_defaults();
        assert_eq!(x86_64.arch_dialect, ArchDialect::X86_64);
        assert_eq!(x86_64.dwarf_version, aarch64.dwarf_version);
        assert_eq!(x86_64.jit_registration_enabled, aarch64.jit_registration_enabled);
    }
}
