//! The DWARF section encoder: turns a [`DebugEntryModel`] slice into
//! `.debug_*` byte buffers and an ELF image suitable for GDB JIT
//! registration.

use std::collections::HashMap;

use gimli::write::{Address, AttributeValue, DwarfUnit, EndianVec, Sections, UnitEntryId};
use gimli::{Encoding, Format, LineEncoding, RunTimeEndian};
use object::write::{Object, StandardSegment, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use thiserror::Error;

use crate::bindings::ArchDialect;
use crate::debuginfo::entries::{
    CompiledMethodEntry, FrameSizeChange, LocalValueEntry, MethodEntry, Range as ModelRange,
    TypeEntry, TypeIndex,
};
use crate::debuginfo::model::DebugEntryModel;

use super::arch::cie_for_dialect;

/// The DWARF version a [`DwarfEmitter`] targets.
///
/// Only the two versions the ordering-guarantee and unit-kind differences
/// described in the component design are about: v4 uses `.debug_loc` and
/// member-listing class layouts, v5 uses `.debug_loclists` and
/// `DW_AT_signature` references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwarfVersion {
    V4,
    V5,
}

impl DwarfVersion {
    fn encoding(self) -> Encoding {
        Encoding {
            address_size: 8,
            format: Format::Dwarf32,
            version: match self {
                Self::V4 => 4,
                Self::V5 => 5,
            },
        }
    }
}

/// Errors raised while laying out or encoding DWARF sections.
#[derive(Debug, Error)]
pub enum EmitterError {
    /// A DIE referenced another DIE's offset before the referent had been
    /// laid out; this is an ordering-invariant violation, not a
    /// user-facing failure.
    #[error("referenced a DIE offset before it was laid out: {0}")]
    OutOfOrderReference(&'static str),
    /// The underlying `gimli` section encoder failed.
    #[error(transparent)]
    Gimli(#[from] gimli::write::Error),
    /// Assembling the ELF container around the finished sections failed.
    #[error(transparent)]
    Object(#[from] object::write::Error),
}

/// The finished byte buffers for every DWARF section, plus the assembled
/// ELF image GDB's JIT interface consumes.
pub struct EmittedImage {
    pub debug_abbrev: Vec<u8>,
    pub debug_info: Vec<u8>,
    pub debug_line: Vec<u8>,
    pub debug_loc: Vec<u8>,
    pub debug_loclists: Vec<u8>,
    pub debug_str: Vec<u8>,
    pub debug_frame: Vec<u8>,
    /// The full ELF file containing all of the above sections, ready to
    /// be registered with the runtime JIT interface.
    pub elf_image: Vec<u8>,
}

/// Encodes a batch of classes' debug entries into DWARF sections.
pub struct DwarfEmitter<'a> {
    model: &'a DebugEntryModel,
    version: DwarfVersion,
    dialect: ArchDialect,
}

impl<'a> DwarfEmitter<'a> {
    /// Creates an emitter targeting `version`/`dialect` over `model`.
    #[must_use]
    pub fn new(model: &'a DebugEntryModel, version: DwarfVersion, dialect: ArchDialect) -> Self {
        Self {
            model,
            version,
            dialect,
        }
    }

    /// Encodes every DWARF section for `classes`, then assembles them into
    /// an ELF image.
    ///
    /// # Errors
    /// Propagates [`EmitterError`] if the section encoders detect an
    /// ordering-invariant violation.
    #[tracing::instrument(skip(self, classes), fields(class_count = classes.len()))]
    pub fn emit(&self, classes: &[TypeIndex]) -> Result<EmittedImage, EmitterError> {
        let encoding = self.version.encoding();
        let mut dwarf = DwarfUnit::new(encoding);
        let mut frame_table = gimli::write::FrameTable::default();
        let cie = cie_for_dialect(encoding, &self.dialect);
        let cie_id = frame_table.add_cie(cie);

        for &class_idx in classes {
            self.emit_class(&mut dwarf, &mut frame_table, cie_id, class_idx)?;
        }

        let mut sections = Sections::new(EndianVec::new(RunTimeEndian::Little));
        dwarf.write(&mut sections)?;
        frame_table.write_debug_frame(&mut sections.debug_frame)?;

        let debug_abbrev = sections.debug_abbrev.slice().to_vec();
        let debug_info = sections.debug_info.slice().to_vec();
        let debug_line = sections.debug_line.slice().to_vec();
        let debug_loc = sections.debug_loc.slice().to_vec();
        let debug_loclists = sections.debug_loclists.slice().to_vec();
        let debug_str = sections.debug_str.slice().to_vec();
        let debug_frame = sections.debug_frame.slice().to_vec();

        let elf_image = assemble_elf_image(
            &debug_abbrev,
            &debug_info,
            &debug_line,
            if matches!(self.version, DwarfVersion::V5) {
                &debug_loclists
            } else {
                &debug_loc
            },
            &debug_str,
            &debug_frame,
            self.version,
        )?;

        tracing::debug!(
            debug_info_len = debug_info.len(),
            elf_image_len = elf_image.len(),
            "emitted DWARF sections"
        );

        Ok(EmittedImage {
            debug_abbrev,
            debug_info,
            debug_line,
            debug_loc,
            debug_loclists,
            debug_str,
            debug_frame,
            elf_image,
        })
    }

    #[tracing::instrument(skip(self, dwarf, frame_table), fields(class = class_idx.0))]
    fn emit_class(
        &self,
        dwarf: &mut DwarfUnit,
        frame_table: &mut gimli::write::FrameTable,
        cie_id: gimli::write::CieId,
        class_idx: TypeIndex,
    ) -> Result<(), EmitterError> {
        let type_entry = self.model.type_entry(class_idx);
        let class = self.model.class_entry(class_idx);

        let root_id = dwarf.unit.root();
        let class_die_id = self.emit_class_layout_die(dwarf, root_id, &type_entry);

        let mut offsets_by_method: HashMap<_, _> = HashMap::new();

        for &method_idx in &class.methods {
            let method = self.model.method_entry(method_idx);
            let method_die = self.emit_method_declaration_die(dwarf, class_die_id, &method);
            offsets_by_method.insert(method_idx, method_die);
        }

        for &compiled_idx in &class.compiled_methods {
            let compiled = self.model.compiled_method_entry(compiled_idx);
            self.emit_compiled_method(dwarf, class_die_id, &offsets_by_method, &compiled)?;
            self.emit_frame_rows(frame_table, cie_id, &compiled);
        }

        Ok(())
    }

    fn emit_class_layout_die(
        &self,
        dwarf: &mut DwarfUnit,
        parent: UnitEntryId,
        type_entry: &TypeEntry,
    ) -> UnitEntryId {
        let die_id = dwarf
            .unit
            .add(parent, gimli::DW_TAG_class_type);
        let name_ref = dwarf.strings.add(type_entry.name());
        let die = dwarf.unit.get_mut(die_id);
        die.set(gimli::DW_AT_name, AttributeValue::StringRef(name_ref));
        die.set(
            gimli::DW_AT_byte_size,
            AttributeValue::Udata(u64::from(type_entry.common().size)),
        );
        if matches!(self.version, DwarfVersion::V5) {
            die.set(
                gimli::DW_AT_signature,
                AttributeValue::Data8(type_entry.signatures().type_signature),
            );
        }
        die_id
    }

    fn emit_method_declaration_die(
        &self,
        dwarf: &mut DwarfUnit,
        parent: UnitEntryId,
        method: &MethodEntry,
    ) -> UnitEntryId {
        let die_id = dwarf.unit.add(parent, gimli::DW_TAG_subprogram);
        let name_ref = dwarf.strings.add(method.name.as_str());
        let die = dwarf.unit.get_mut(die_id);
        die.set(gimli::DW_AT_name, AttributeValue::StringRef(name_ref));
        die.set(gimli::DW_AT_external, AttributeValue::Flag(true));

        for param in &method.parameters {
            let param_id = dwarf.unit.add(die_id, gimli::DW_TAG_formal_parameter);
            let param_name = dwarf.strings.add(param.name.as_str());
            dwarf
                .unit
                .get_mut(param_id)
                .set(gimli::DW_AT_name, AttributeValue::StringRef(param_name));
        }
        for local in &method.locals {
            let local_id = dwarf.unit.add(die_id, gimli::DW_TAG_variable);
            let local_name = dwarf.strings.add(local.name.as_str());
            dwarf
                .unit
                .get_mut(local_id)
                .set(gimli::DW_AT_name, AttributeValue::StringRef(local_name));
        }
        die_id
    }

    fn emit_compiled_method(
        &self,
        dwarf: &mut DwarfUnit,
        class_die: UnitEntryId,
        _offsets_by_method: &HashMap<crate::debuginfo::entries::MethodIndex, UnitEntryId>,
        compiled: &CompiledMethodEntry,
    ) -> Result<(), EmitterError> {
        let (lo, hi) = compiled.primary.span();
        let location_die = dwarf.unit.add(class_die, gimli::DW_TAG_subprogram);
        let die = dwarf.unit.get_mut(location_die);
        die.set(
            gimli::DW_AT_low_pc,
            AttributeValue::Address(Address::Constant(u64::from(lo.0))),
        );
        die.set(gimli::DW_AT_high_pc, AttributeValue::Udata(u64::from(hi.0 - lo.0)));

        self.emit_range_children(dwarf, location_die, compiled.primary.children())?;
        Ok(())
    }

    fn emit_range_children(
        &self,
        dwarf: &mut DwarfUnit,
        parent: UnitEntryId,
        children: &[ModelRange],
    ) -> Result<(), EmitterError> {
        for child in children {
            match child {
                ModelRange::Call {
                    lo, hi, locals, children, ..
                } => {
                    let call_die = dwarf.unit.add(parent, gimli::DW_TAG_inlined_subroutine);
                    let die = dwarf.unit.get_mut(call_die);
                    die.set(
                        gimli::DW_AT_low_pc,
                        AttributeValue::Address(Address::Constant(u64::from(lo.0))),
                    );
                    die.set(gimli::DW_AT_high_pc, AttributeValue::Udata(u64::from(hi.0 - lo.0)));
                    self.emit_locals(dwarf, call_die, locals);
                    self.emit_range_children(dwarf, call_die, children)?;
                }
                ModelRange::Leaf { lo, hi, locals, .. } => {
                    let leaf_die = dwarf.unit.add(parent, gimli::DW_TAG_lexical_block);
                    let die = dwarf.unit.get_mut(leaf_die);
                    die.set(
                        gimli::DW_AT_low_pc,
                        AttributeValue::Address(Address::Constant(u64::from(lo.0))),
                    );
                    die.set(gimli::DW_AT_high_pc, AttributeValue::Udata(u64::from(hi.0 - lo.0)));
                    self.emit_locals(dwarf, leaf_die, locals);
                }
                ModelRange::Primary { .. } => {
                    return Err(EmitterError::OutOfOrderReference(
                        "primary range cannot appear as a child",
                    ))
                }
            }
        }
        Ok(())
    }

    fn emit_locals(
        &self,
        dwarf: &mut DwarfUnit,
        parent: UnitEntryId,
        locals: &[(crate::debuginfo::entries::LocalEntry, LocalValueEntry)],
    ) {
        for (local, value) in locals {
            let var_id = dwarf.unit.add(parent, gimli::DW_TAG_variable);
            let name_ref = dwarf.strings.add(local.name.as_str());
            let die = dwarf.unit.get_mut(var_id);
            die.set(gimli::DW_AT_name, AttributeValue::StringRef(name_ref));
            if let Some(expr) = location_expression(value) {
                die.set(gimli::DW_AT_location, AttributeValue::Exprloc(expr));
            }
        }
    }

    fn emit_frame_rows(
        &self,
        frame_table: &mut gimli::write::FrameTable,
        cie_id: gimli::write::CieId,
        compiled: &CompiledMethodEntry,
    ) {
        let (lo, hi) = compiled.primary.span();
        let mut fde = gimli::write::FrameDescriptionEntry::new(
            Address::Constant(u64::from(lo.0)),
            hi.0 - lo.0,
        );
        for change in &compiled.frame_size_changes {
            match change {
                FrameSizeChange::Extend(offset) => {
                    fde.add_instruction(
                        offset.0,
                        gimli::write::CallFrameInstruction::CfaOffset(
                            i32::try_from(compiled.frame_size).unwrap_or(i32::MAX),
                        ),
                    );
                }
                FrameSizeChange::Contract(offset) => {
                    fde.add_instruction(offset.0, gimli::write::CallFrameInstruction::RememberState);
                }
            }
        }
        frame_table.add_fde(cie_id, fde);
    }
}

fn location_expression(value: &LocalValueEntry) -> Option<gimli::write::Expression> {
    let mut expr = gimli::write::Expression::new();
    match value {
        LocalValueEntry::Register(reg) => {
            expr.op_reg(gimli::Register(*reg));
        }
        LocalValueEntry::Stack(offset) => {
            expr.op_fbreg(*offset);
        }
        LocalValueEntry::Constant { constant, .. } => {
            let bits = match constant {
                crate::debuginfo::entries::LiteralConstant::I32(v) => i64::from(*v) as u64,
                crate::debuginfo::entries::LiteralConstant::I64(v) => *v as u64,
                crate::debuginfo::entries::LiteralConstant::F32(v) => u64::from(v.to_bits()),
                crate::debuginfo::entries::LiteralConstant::F64(v) => v.to_bits(),
            };
            expr.op_constu(bits);
            expr.op_stack_value();
        }
        LocalValueEntry::Undefined => return None,
    }
    Some(expr)
}

fn assemble_elf_image(
    debug_abbrev: &[u8],
    debug_info: &[u8],
    debug_line: &[u8],
    debug_loc_or_loclists: &[u8],
    debug_str: &[u8],
    debug_frame: &[u8],
    version: DwarfVersion,
) -> Result<Vec<u8>, EmitterError> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);

    let loc_section_name = if matches!(version, DwarfVersion::V5) {
        ".debug_loclists"
    } else {
        ".debug_loc"
    };

    for (name, data) in [
        (".debug_abbrev", debug_abbrev),
        (".debug_info", debug_info),
        (".debug_line", debug_line),
        (loc_section_name, debug_loc_or_loclists),
        (".debug_str", debug_str),
        (".debug_frame", debug_frame),
    ] {
        let section_id = obj.add_section(
            obj.segment_name(StandardSegment::Debug).to_vec(),
            name.as_bytes().to_vec(),
            SectionKind::Debug,
        );
        obj.append_section_data(section_id, data, 1);
    }

    obj.add_symbol(Symbol {
        name: b"__jit_debug_image".to_vec(),
        value: 0,
        size: 0,
        kind: SymbolKind::Data,
        scope: SymbolScope::Compilation,
        weak: false,
        section: SymbolSection::Undefined,
        flags: SymbolFlags::None,
    });

    Ok(obj.write()?)
}
