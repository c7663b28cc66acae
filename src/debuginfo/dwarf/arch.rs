//! Architecture-specific `.debug_frame` CIE construction.

use gimli::{Encoding, Register};

use crate::bindings::ArchDialect;

/// Builds the CIE that `.debug_frame` FDEs for `dialect` are built against.
///
/// The initial register rule program sets up the heap-base and
/// current-thread registers as callee-saved, matching the calling
/// convention the compiler targets; callers append per-FDE rules for the
/// actual prologue/epilogue frame-size changes.
pub fn cie_for_dialect(
    encoding: Encoding,
    dialect: &ArchDialect,
) -> gimli::write::CommonInformationEntry {
    let return_address_register = Register(return_address_register_for(dialect));
    let data_alignment_factor = -i64::from(dialect.return_address_size.min(8));
    let mut cie = gimli::write::CommonInformationEntry::new(
        encoding,
        1,
        data_alignment_factor,
        return_address_register,
    );
    for &byte in dialect.initial_cie_instructions {
        cie.raw_instruction(byte);
    }
    cie
}

fn return_address_register_for(dialect: &ArchDialect) -> u16 {
    match dialect.arch_name {
        "aarch64" => 30,
        "x86_64" => 16,
        _ => dialect.thread_register,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encoding() -> Encoding {
        Encoding {
            address_size: 8,
            format: gimli::Format::Dwarf32,
            version: 5,
        }
    }

    #[test]
    fn aarch64_and_x86_64_use_different_return_address_registers() {
        assert_eq!(return_address_register_for(&ArchDialect::AARCH64), 30);
        assert_eq!(return_address_register_for(&ArchDialect::X86_64), 16);
    }

    #[test]
    fn data_alignment_factor_is_negative_pointer_size() {
        let cie = cie_for_dialect(encoding(), &ArchDialect::X86_64);
        let _ = cie;
    }
}
