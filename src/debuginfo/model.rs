//! The process-wide debug-entry registry.
//!
//! Every registration method follows the same compare-and-put discipline:
//! callers present a key plus a closure that builds the entry if absent;
//! if another thread won the race, the loser's freshly-built entry is
//! discarded and the winner's index is returned. This makes registration
//! idempotent under concurrent compilation without requiring callers to
//! pre-check membership themselves.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::entries::{
    ClassEntry, CompiledMethodEntry, DirEntry, FieldEntry, FileEntry, FrameSizeChange, LocalEntry,
    LocalValueEntry, LoaderEntry, MethodEntry, Range, TypeEntry, TypeEntryCommon, TypeIndex,
    TypeSignatures,
};
use super::rangevisitor::{self, PositionResolver, SyntheticLocalTypes, VisitMode};
use super::strtab::StringTable;
use crate::bindings::{
    ArchDialect, CompilationMarkKind, CompilationResult, SharedMethod, SharedType, SharedTypeKind,
};
use crate::debuginfo::entries::{CompiledMethodIndex, DirIndex, FileIndex, LoaderIndex};
use crate::types::{FieldType, PrimitiveType};

/// The key methods are uniqued on: owning class plus name and descriptor
/// string (overloads differ only by descriptor).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodKey {
    owner: TypeIndex,
    name: String,
    descriptor: String,
}

/// The process-wide store of normalized debug entries.
///
/// Entries are never removed, and a stable index always keeps referring to
/// the same logical entry once assigned. Type entries are the one
/// exception to "never mutated in place": `lookup_or_insert_shared_type`
/// reserves an index with a placeholder variant before recursing into
/// fields/superclass (so cyclic type graphs resolve against the
/// already-reserved index instead of recursing forever), then patches that
/// slot in place once post-processing completes.
pub struct DebugEntryModel {
    types: Mutex<Vec<TypeEntry>>,
    type_by_signature: Mutex<HashMap<u64, TypeIndex>>,
    methods: Mutex<Vec<MethodEntry>>,
    method_by_key: Mutex<HashMap<MethodKey, MethodIndexSlot>>,
    compiled_methods: Mutex<Vec<CompiledMethodEntry>>,
    compiled_method_by_id: Mutex<HashMap<u64, CompiledMethodIndex>>,
    dirs: Mutex<Vec<DirEntry>>,
    dir_by_path: Mutex<HashMap<String, DirIndex>>,
    files: Mutex<Vec<FileEntry>>,
    file_by_key: Mutex<HashMap<(DirIndex, String), FileIndex>>,
    loaders: Mutex<Vec<LoaderEntry>>,
    loader_by_id: Mutex<HashMap<String, LoaderIndex>>,
    classes: Mutex<HashMap<TypeIndex, ClassEntry>>,
    strings: Mutex<StringTable>,
}

type MethodIndexSlot = super::entries::MethodIndex;

impl DebugEntryModel {
    /// Creates an empty model, with directory index 0 reserved for the
    /// empty path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: Mutex::new(Vec::new()),
            type_by_signature: Mutex::new(HashMap::new()),
            methods: Mutex::new(Vec::new()),
            method_by_key: Mutex::new(HashMap::new()),
            compiled_methods: Mutex::new(Vec::new()),
            compiled_method_by_id: Mutex::new(HashMap::new()),
            dirs: Mutex::new(vec![DirEntry {
                path: String::new(),
            }]),
            dir_by_path: Mutex::new(HashMap::from([(String::new(), DirIndex::EMPTY)])),
            files: Mutex::new(Vec::new()),
            file_by_key: Mutex::new(HashMap::new()),
            loaders: Mutex::new(Vec::new()),
            loader_by_id: Mutex::new(HashMap::new()),
            classes: Mutex::new(HashMap::new()),
            strings: Mutex::new(StringTable::new()),
        }
    }

    /// Looks up (or registers) the type with the given signature, building
    /// it with `build` only if it is not already present.
    pub fn lookup_or_insert_type(
        &self,
        signature: u64,
        build: impl FnOnce() -> TypeEntry,
    ) -> TypeIndex {
        let mut by_sig = self.type_by_signature.lock();
        if let Some(&idx) = by_sig.get(&signature) {
            return idx;
        }
        let mut types = self.types.lock();
        let idx = TypeIndex(types.len() as u32);
        types.push(build());
        by_sig.insert(signature, idx);
        idx
    }

    /// Reads back a previously-registered type by index.
    #[must_use]
    pub fn type_entry(&self, idx: TypeIndex) -> TypeEntry {
        self.types.lock()[idx.0 as usize].clone()
    }

    /// Looks up (or registers) the type described by `shared`: §4.2's
    /// `lookupTypeEntry`.
    ///
    /// A placeholder variant is inserted under the usual compare-and-put
    /// discipline first, so that self-referential field types and mutual
    /// superclass/field cycles resolve against an already-reserved index
    /// rather than recursing into the same insertion. Only the thread that
    /// wins the insertion race then post-processes the entry (populating
    /// fields, the superclass link, and the source-file entry); later
    /// lookups of the same signature return the completed entry without
    /// re-running post-processing.
    pub fn lookup_or_insert_shared_type(&self, shared: &dyn SharedType) -> TypeIndex {
        let signature = TypeSignatures::derive(shared.name(), shared.loader_tag()).type_signature;
        let mut by_sig = self.type_by_signature.lock();
        if let Some(&idx) = by_sig.get(&signature) {
            return idx;
        }
        let mut types = self.types.lock();
        let idx = TypeIndex(types.len() as u32);
        types.push(placeholder_type_entry(shared));
        by_sig.insert(signature, idx);
        drop(types);
        drop(by_sig);

        self.post_process_shared_type(idx, shared);
        idx
    }

    /// Populates `idx`'s fields, superclass link, and source-file entry
    /// from `shared`. Only ever called once per type, right after its
    /// placeholder was inserted by [`Self::lookup_or_insert_shared_type`].
    fn post_process_shared_type(&self, idx: TypeIndex, shared: &dyn SharedType) {
        let superclass = shared
            .superclass()
            .map(|s| self.lookup_or_insert_shared_type(s));
        let element_type = shared
            .element_type()
            .map(|e| self.lookup_or_insert_shared_type(e));
        let pointee = shared
            .pointee()
            .map(|p| self.lookup_or_insert_shared_type(p));
        let fields: Vec<FieldEntry> = shared
            .fields()
            .into_iter()
            .map(|f| FieldEntry {
                name: f.name.to_owned(),
                field_type: self.lookup_or_insert_shared_type(f.declared_type),
                offset: f.offset,
                is_static: f.is_static,
            })
            .collect();

        let common = shared_type_common(shared);
        let completed = match shared.kind() {
            SharedTypeKind::Primitive => TypeEntry::Primitive(common),
            SharedTypeKind::Header => TypeEntry::Header(common),
            SharedTypeKind::Array => TypeEntry::Array {
                common,
                element_type: element_type.expect("array type must resolve an element type"),
            },
            SharedTypeKind::Instance => TypeEntry::Instance {
                common,
                superclass,
                fields,
            },
            SharedTypeKind::Interface => TypeEntry::Interface(common),
            SharedTypeKind::Enum => TypeEntry::Enum {
                common,
                superclass,
                fields,
            },
            SharedTypeKind::ForeignWord => TypeEntry::ForeignWord(common),
            SharedTypeKind::ForeignStruct => TypeEntry::ForeignStruct { common, fields },
            SharedTypeKind::ForeignPointer => TypeEntry::ForeignPointer { common, pointee },
            SharedTypeKind::ForeignInteger => TypeEntry::ForeignInteger(common),
            SharedTypeKind::ForeignFloat => TypeEntry::ForeignFloat(common),
        };
        self.types.lock()[idx.0 as usize] = completed;

        let (dir, name) = match shared.source_file() {
            Some(path) => split_known_source_path(path),
            None => synthesize_source_path(shared.name()),
        };
        let dir_idx = self.lookup_or_insert_dir(&dir);
        self.lookup_or_insert_file(idx, dir_idx, &name);
    }

    /// Resolves a JVM field-type descriptor (as carried by a parameter or
    /// local-variable-table entry) to a registered [`TypeIndex`].
    ///
    /// Parameters and locals only ever carry a descriptor, not the full
    /// class metadata a [`SharedType`] exposes, so this registers a
    /// minimal type keyed on the same `(name, loaderTag)` signature scheme
    /// rather than requiring the caller to resolve every parameter type's
    /// class ahead of time.
    fn resolve_descriptor_type(&self, field_type: &FieldType, loader_tag: &str) -> TypeIndex {
        let name = descriptor_type_name(field_type);
        let signature = TypeSignatures::derive(&name, loader_tag).type_signature;
        self.lookup_or_insert_type(signature, || {
            TypeEntry::Primitive(TypeEntryCommon {
                size: descriptor_type_size(field_type),
                class_offset: 0,
                signatures: TypeSignatures::derive(&name, loader_tag),
                name,
            })
        })
    }

    /// Looks up (or registers) a method by owner/name/descriptor.
    pub fn lookup_or_insert_method(
        &self,
        owner: TypeIndex,
        name: &str,
        descriptor: &str,
        build: impl FnOnce() -> MethodEntry,
    ) -> MethodIndexSlot {
        let key = MethodKey {
            owner,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        };
        let mut by_key = self.method_by_key.lock();
        if let Some(&idx) = by_key.get(&key) {
            return idx;
        }
        let mut methods = self.methods.lock();
        let idx = MethodIndexSlot(methods.len() as u32);
        methods.push(build());
        by_key.insert(key, idx);

        self.classes
            .lock()
            .entry(owner)
            .or_default()
            .methods
            .push(idx);
        idx
    }

    /// Reads back a previously-registered method by index.
    #[must_use]
    pub fn method_entry(&self, idx: MethodIndexSlot) -> MethodEntry {
        self.methods.lock()[idx.0 as usize].clone()
    }

    /// Looks up (or registers) the method described by `shared`: §4.2's
    /// `lookupMethodEntry`.
    ///
    /// Builds the parameter list (descriptor-derived, with a synthetic
    /// `this` prepended for non-static methods), the locals list (read
    /// from the local-variable table, restricted to slots strictly beyond
    /// the last parameter slot), and the line-number table, keyed by the
    /// owner/name/descriptor triple.
    pub fn lookup_or_insert_shared_method(
        &self,
        owner: TypeIndex,
        loader_tag: &str,
        shared: &dyn SharedMethod,
    ) -> MethodIndexSlot {
        let descriptor_string = shared.descriptor().descriptor_string();
        let name = shared.name().to_owned();
        self.lookup_or_insert_method(owner, &name, &descriptor_string, || {
            self.build_shared_method_entry(owner, loader_tag, shared)
        })
    }

    fn build_shared_method_entry(
        &self,
        owner: TypeIndex,
        loader_tag: &str,
        shared: &dyn SharedMethod,
    ) -> MethodEntry {
        let descriptor = shared.descriptor();
        let mut parameters = Vec::new();
        let mut slot: u16 = 0;
        if !shared.is_static() {
            parameters.push(LocalEntry {
                name: "this".to_owned(),
                local_type: owner,
                slot,
                first_line: 0,
            });
            slot += 1;
        }
        let lvt = shared.local_variable_table();
        for param_type in &descriptor.parameters_types {
            let name = lvt
                .and_then(|table| table.iter().find(|l| l.slot == slot))
                .map(|l| l.name.clone())
                .unwrap_or_else(|| format!("arg{slot}"));
            parameters.push(LocalEntry {
                name,
                local_type: self.resolve_descriptor_type(param_type, loader_tag),
                slot,
                first_line: 0,
            });
            slot += param_type.slots().count();
        }

        let last_parameter_slot = parameters.iter().map(|p| p.slot).max();
        let locals = lvt
            .map(|table| {
                table
                    .iter()
                    .filter(|l| last_parameter_slot.map_or(true, |last| l.slot > last))
                    .map(|l| LocalEntry {
                        name: l.name.clone(),
                        local_type: self.resolve_descriptor_type(&l.local_type, loader_tag),
                        slot: l.slot,
                        first_line: u32::from(l.start_bci),
                    })
                    .collect()
            })
            .unwrap_or_default();

        MethodEntry {
            name: shared.name().to_owned(),
            descriptor: descriptor.clone(),
            owner,
            parameters,
            locals,
            line_numbers: shared.line_number_table().to_vec(),
            is_static: shared.is_static(),
        }
    }

    /// Looks up (or registers) a compiled method by its compiler-assigned
    /// unique compilation id.
    pub fn lookup_or_insert_compiled_method(
        &self,
        compilation_id: u64,
        owner: TypeIndex,
        build: impl FnOnce() -> CompiledMethodEntry,
    ) -> CompiledMethodIndex {
        let mut by_id = self.compiled_method_by_id.lock();
        if let Some(&idx) = by_id.get(&compilation_id) {
            return idx;
        }
        let mut compiled = self.compiled_methods.lock();
        let idx = CompiledMethodIndex(compiled.len() as u32);
        compiled.push(build());
        by_id.insert(compilation_id, idx);

        self.classes
            .lock()
            .entry(owner)
            .or_default()
            .compiled_methods
            .push(idx);
        idx
    }

    /// Reads back a previously-registered compiled method by index.
    #[must_use]
    pub fn compiled_method_entry(&self, idx: CompiledMethodIndex) -> CompiledMethodEntry {
        self.compiled_methods.lock()[idx.0 as usize].clone()
    }

    /// Registers a compilation: §4.2's `lookupCompiledMethodEntry`.
    ///
    /// Flattens `compilation`'s frame tree into a `Range` tree (via
    /// [`rangevisitor::visit_with_mode`]), derives `frame_size_changes`
    /// from its compilation marks, and prepends the calling-convention
    /// synthetic prologue range ahead of the flattened tree's first real
    /// location.
    #[allow(clippy::too_many_arguments)]
    pub fn lookup_or_insert_compilation(
        &self,
        owner: TypeIndex,
        root_method: MethodIndexSlot,
        compilation: &dyn CompilationResult,
        resolver: &dyn PositionResolver,
        synthetic_types: &SyntheticLocalTypes,
        dialect: &ArchDialect,
        mode: VisitMode,
    ) -> CompiledMethodIndex {
        let compilation_id = compilation.compilation_id();
        self.lookup_or_insert_compiled_method(compilation_id, owner, || {
            let primary = rangevisitor::visit_with_mode(
                compilation.frame_tree_root(),
                resolver,
                synthetic_types,
                self,
                mode,
            );
            let frame_size_changes =
                derive_frame_size_changes(compilation.marks(), compilation.target_code_size());
            let method = self.method_entry(root_method);
            let primary =
                prepend_synthetic_prologue(primary, &method, root_method, &frame_size_changes, dialect);
            CompiledMethodEntry {
                primary,
                frame_size_changes,
                frame_size: compilation.total_frame_size(),
                class_entry: owner,
            }
        })
    }

    /// Looks up (or registers) a directory by its normalized path.
    pub fn lookup_or_insert_dir(&self, raw_path: &str) -> DirIndex {
        let normalized = normalize_dir_path(raw_path);
        if normalized.is_empty() {
            return DirIndex::EMPTY;
        }
        let mut by_path = self.dir_by_path.lock();
        if let Some(&idx) = by_path.get(&normalized) {
            return idx;
        }
        let mut dirs = self.dirs.lock();
        let idx = DirIndex(dirs.len() as u32);
        dirs.push(DirEntry {
            path: normalized.clone(),
        });
        by_path.insert(normalized, idx);
        idx
    }

    /// Looks up (or registers) a file by (directory, base name), also
    /// recording the dir/file pair against the owning class.
    pub fn lookup_or_insert_file(
        &self,
        owner: TypeIndex,
        dir: DirIndex,
        name: &str,
    ) -> FileIndex {
        let key = (dir, name.to_owned());
        let mut by_key = self.file_by_key.lock();
        if let Some(&idx) = by_key.get(&key) {
            return idx;
        }
        let mut files = self.files.lock();
        let idx = FileIndex(files.len() as u32);
        files.push(FileEntry {
            name: name.to_owned(),
            dir,
        });
        by_key.insert(key, idx);

        let mut classes = self.classes.lock();
        let class = classes.entry(owner).or_default();
        if !class.directories.contains(&dir) {
            class.directories.push(dir);
        }
        class.files.push(idx);
        idx
    }

    /// Looks up (or registers) a classloader by its opaque identifying tag.
    pub fn lookup_or_insert_loader(&self, id: &str) -> LoaderIndex {
        let mut by_id = self.loader_by_id.lock();
        if let Some(&idx) = by_id.get(id) {
            return idx;
        }
        let mut loaders = self.loaders.lock();
        let idx = LoaderIndex(loaders.len() as u32);
        loaders.push(LoaderEntry { id: id.to_owned() });
        by_id.insert(id.to_owned(), idx);
        idx
    }

    /// Reads back a class's registered methods/files/directories.
    #[must_use]
    pub fn class_entry(&self, ty: TypeIndex) -> ClassEntry {
        self.classes.lock().get(&ty).cloned().unwrap_or_default()
    }

    /// Interns a string into this model's `.debug_str` table.
    pub fn intern_string(&self, s: &str) -> super::strtab::StrOffset {
        self.strings.lock().intern(s)
    }

    /// A snapshot of this model's interned string table, for section
    /// encoding.
    #[must_use]
    pub fn string_table_snapshot(&self) -> StringTable {
        self.strings.lock().clone()
    }
}

impl Default for DebugEntryModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalizes a directory path that is already known (e.g. supplied by
/// `SharedType::source_file`): converts backslashes to forward slashes,
/// collapses repeated separators and `.` components, and strips a
/// trailing separator. `..` components are left as-is; this model never
/// needs to resolve them against a filesystem root.
///
/// This is distinct from [`synthesize_source_path`], which derives a path
/// from a type's dotted name when no source file is known at all.
fn normalize_dir_path(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let mut out_components: Vec<&str> = Vec::new();
    for component in unified.split('/') {
        match component {
            "" | "." => continue,
            other => out_components.push(other),
        }
    }
    out_components.join("/")
}

/// Splits an already-known source-file path (e.g. `SharedType::source_file`)
/// into its directory and base name.
fn split_known_source_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((dir, name)) => (dir.to_owned(), name.to_owned()),
        None => (String::new(), path.to_owned()),
    }
}

/// Synthesizes a source path from a type's dotted/slashed binary name, per
/// §4.2's file-path-synthesis rule: split into directory components plus a
/// simple name, drop a leading `$` from the simple name, truncate at the
/// first remaining `$` (so nested/anonymous classes attribute to their
/// enclosing top-level class's file), and append `.java`. An empty name
/// synthesizes `_nofile_.java` in the empty directory.
fn synthesize_source_path(type_name: &str) -> (String, String) {
    if type_name.is_empty() {
        return (String::new(), "_nofile_.java".to_owned());
    }
    let mut components: Vec<&str> = type_name.split('/').collect();
    let simple = components.pop().unwrap_or("");
    let dir = components.join("/");

    let simple = simple.strip_prefix('$').unwrap_or(simple);
    let trimmed = simple.split('$').next().unwrap_or(simple);
    let file_name = if trimmed.is_empty() {
        "_nofile_.java".to_owned()
    } else {
        format!("{trimmed}.java")
    };
    (dir, file_name)
}

fn shared_type_common(shared: &dyn SharedType) -> TypeEntryCommon {
    TypeEntryCommon {
        name: shared.name().to_owned(),
        size: shared.size(),
        class_offset: shared.class_offset(),
        signatures: TypeSignatures::derive(shared.name(), shared.loader_tag()),
    }
}

/// The bare variant shell inserted under compare-and-put before
/// post-processing resolves its fields/superclass/pointee/element type.
fn placeholder_type_entry(shared: &dyn SharedType) -> TypeEntry {
    let common = shared_type_common(shared);
    match shared.kind() {
        SharedTypeKind::Primitive => TypeEntry::Primitive(common),
        SharedTypeKind::Header => TypeEntry::Header(common),
        SharedTypeKind::Array => TypeEntry::Array {
            common,
            element_type: TypeIndex(0),
        },
        SharedTypeKind::Instance => TypeEntry::Instance {
            common,
            superclass: None,
            fields: Vec::new(),
        },
        SharedTypeKind::Interface => TypeEntry::Interface(common),
        SharedTypeKind::Enum => TypeEntry::Enum {
            common,
            superclass: None,
            fields: Vec::new(),
        },
        SharedTypeKind::ForeignWord => TypeEntry::ForeignWord(common),
        SharedTypeKind::ForeignStruct => TypeEntry::ForeignStruct {
            common,
            fields: Vec::new(),
        },
        SharedTypeKind::ForeignPointer => TypeEntry::ForeignPointer {
            common,
            pointee: None,
        },
        SharedTypeKind::ForeignInteger => TypeEntry::ForeignInteger(common),
        SharedTypeKind::ForeignFloat => TypeEntry::ForeignFloat(common),
    }
}

fn descriptor_type_name(field_type: &FieldType) -> String {
    match field_type {
        FieldType::Base(p) => p.java_name().to_owned(),
        FieldType::Object(c) => c.binary_name.clone(),
        FieldType::Array(_) => field_type.descriptor_string(),
    }
}

fn descriptor_type_size(field_type: &FieldType) -> u32 {
    match field_type {
        FieldType::Base(PrimitiveType::Long | PrimitiveType::Double) => 8,
        FieldType::Base(_) => 4,
        FieldType::Object(_) | FieldType::Array(_) => 8,
    }
}

/// Derives `CompiledMethodEntry::frame_size_changes` from a compilation's
/// marks: a `PrologueDecdRsp` mark is an `Extend`, an `EpilogueIncdRsp`
/// mark is a `Contract`, and an `EpilogueEnd` mark short of the end of the
/// generated code implies another `Extend` (the method falls back through
/// to a second, un-epilogued exit).
fn derive_frame_size_changes(
    marks: &[crate::bindings::CompilationMark],
    code_size: u32,
) -> Vec<FrameSizeChange> {
    let mut changes = Vec::new();
    let mut epilogue_end = None;
    for mark in marks {
        match mark.kind {
            CompilationMarkKind::PrologueDecdRsp => {
                changes.push(FrameSizeChange::Extend(mark.pc_offset));
            }
            CompilationMarkKind::EpilogueIncdRsp => {
                changes.push(FrameSizeChange::Contract(mark.pc_offset));
            }
            CompilationMarkKind::EpilogueEnd => epilogue_end = Some(mark.pc_offset),
        }
    }
    if let Some(offset) = epilogue_end {
        if offset.0 < code_size {
            changes.push(FrameSizeChange::Extend(offset));
        }
    }
    changes.sort_by_key(|c| match c {
        FrameSizeChange::Extend(o) | FrameSizeChange::Contract(o) => *o,
    });
    changes
}

/// The calling-convention parameter locations for one of the (up to two)
/// synthetic prologue leaves: pre-extend offsets add the architecture's
/// return-address size, since the return address still sits between the
/// parameters and the frame base until the stack pointer is decremented.
fn calling_convention_locals(
    method: &MethodEntry,
    dialect: &ArchDialect,
    pre_extend: bool,
) -> Vec<(LocalEntry, LocalValueEntry)> {
    method
        .parameters
        .iter()
        .map(|param| {
            let stack_slot_offset = i64::from(param.slot) * 8;
            let offset = if pre_extend {
                stack_slot_offset + i64::from(dialect.return_address_size)
            } else {
                stack_slot_offset
            };
            (param.clone(), LocalValueEntry::Stack(offset))
        })
        .collect()
}

/// Synthesizes §4.2's calling-convention prologue range, `[lo,
/// firstLocationOffset)`, ahead of `primary`'s flattened children, and
/// returns `primary` unchanged if there is nothing to synthesize (no
/// children, or the first child already starts at `lo`).
///
/// When the stack-decrement mark falls strictly inside
/// `[lo, firstLocationOffset)`, the range is split there so the
/// pre-decrement and post-decrement halves carry different parameter
/// offsets; this is distinct from the rangevisitor's own per-call-site
/// prologue leaf, which is driven by the frame tree's own child structure
/// rather than by the compiler's stack-pointer marks.
fn prepend_synthetic_prologue(
    primary: Range,
    method: &MethodEntry,
    method_idx: MethodIndexSlot,
    frame_size_changes: &[FrameSizeChange],
    dialect: &ArchDialect,
) -> Range {
    let Range::Primary {
        lo,
        hi,
        code_offset,
        mut children,
    } = primary
    else {
        return primary;
    };

    let first_location_offset = children.first().map(|c| c.span().0).unwrap_or(hi);
    if first_location_offset <= lo {
        return Range::Primary {
            lo,
            hi,
            code_offset,
            children,
        };
    }

    let file = match children.first() {
        Some(Range::Call { file, .. } | Range::Leaf { file, .. }) => *file,
        _ => FileIndex(0),
    };
    let stack_decrement = frame_size_changes.iter().find_map(|c| match c {
        FrameSizeChange::Extend(offset) => Some(*offset),
        FrameSizeChange::Contract(_) => None,
    });

    let prologue_ranges = match stack_decrement {
        Some(decrement) if decrement > lo && decrement < first_location_offset => vec![
            Range::Leaf {
                lo,
                hi: decrement,
                line: 0,
                method: method_idx,
                file,
                locals: calling_convention_locals(method, dialect, true),
            },
            Range::Leaf {
                lo: decrement,
                hi: first_location_offset,
                line: 0,
                method: method_idx,
                file,
                locals: calling_convention_locals(method, dialect, false),
            },
        ],
        Some(decrement) if decrement <= lo => vec![Range::Leaf {
            lo,
            hi: first_location_offset,
            line: 0,
            method: method_idx,
            file,
            locals: calling_convention_locals(method, dialect, false),
        }],
        _ => vec![Range::Leaf {
            lo,
            hi: first_location_offset,
            line: 0,
            method: method_idx,
            file,
            locals: calling_convention_locals(method, dialect, true),
        }],
    };

    for range in prologue_ranges.into_iter().rev() {
        children.insert(0, range);
    }
    Range::Primary {
        lo,
        hi,
        code_offset,
        children,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::debuginfo::entries::{TypeEntryCommon, TypeSignatures};

    fn dummy_type(name: &str) -> TypeEntry {
        TypeEntry::Primitive(TypeEntryCommon {
            name: name.to_owned(),
            size: 4,
            class_offset: 0,
            signatures: TypeSignatures::derive(name, "boot"),
        })
    }

    #[test]
    fn repeated_lookup_returns_same_index() {
        let model = DebugEntryModel::new();
        let a = model.lookup_or_insert_type(1, || dummy_type("int"));
        let b = model.lookup_or_insert_type(1, || dummy_type("int"));
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_signatures_get_distinct_indices() {
        let model = DebugEntryModel::new();
        let a = model.lookup_or_insert_type(1, || dummy_type("int"));
        let b = model.lookup_or_insert_type(2, || dummy_type("long"));
        assert_ne!(a, b);
    }

    #[test]
    fn dir_path_normalization_collapses_separators() {
        assert_eq!(normalize_dir_path("a//b/./c/"), "a/b/c");
        assert_eq!(normalize_dir_path("a\\b\\c"), "a/b/c");
        assert_eq!(normalize_dir_path(""), "");
        assert_eq!(normalize_dir_path("."), "");
    }

    #[test]
    fn empty_dir_path_reuses_reserved_index() {
        let model = DebugEntryModel::new();
        assert_eq!(model.lookup_or_insert_dir(""), DirIndex::EMPTY);
        assert_eq!(model.lookup_or_insert_dir("."), DirIndex::EMPTY);
    }

    #[test]
    fn file_registration_tracks_owning_class() {
        let model = DebugEntryModel::new();
        let owner = model.lookup_or_insert_type(1, || dummy_type("com/example/Foo"));
        let dir = model.lookup_or_insert_dir("src/main/java");
        let file = model.lookup_or_insert_file(owner, dir, "Foo.java");
        let class = model.class_entry(owner);
        assert!(class.files.contains(&file));
        assert!(class.directories.contains(&dir));
    }

    #[test]
    fn source_path_synthesis_splits_package_and_name() {
        assert_eq!(
            synthesize_source_path("com/example/Foo"),
            ("com/example".to_owned(), "Foo.java".to_owned())
        );
    }

    #[test]
    fn source_path_synthesis_truncates_nested_class_at_dollar() {
        assert_eq!(
            synthesize_source_path("com/example/Foo$Inner"),
            ("com/example".to_owned(), "Foo.java".to_owned())
        );
    }

    #[test]
    fn source_path_synthesis_drops_leading_dollar() {
        assert_eq!(
            synthesize_source_path("com/example/$Proxy1"),
            ("com/example".to_owned(), "Proxy1.java".to_owned())
        );
    }

    #[test]
    fn source_path_synthesis_empty_name_is_nofile() {
        assert_eq!(
            synthesize_source_path(""),
            (String::new(), "_nofile_.java".to_owned())
        );
    }

    struct FakeType {
        name: String,
        loader: String,
        kind: SharedTypeKind,
        size: u32,
        superclass: Option<Box<FakeType>>,
        fields: Vec<(String, FakeType, u32, bool)>,
        source_file: Option<String>,
    }

    impl FakeType {
        fn leaf(name: &str, kind: SharedTypeKind) -> Self {
            Self {
                name: name.to_owned(),
                loader: "boot".to_owned(),
                kind,
                size: 4,
                superclass: None,
                fields: Vec::new(),
                source_file: None,
            }
        }
    }

    impl crate::bindings::SharedType for FakeType {
        fn name(&self) -> &str {
            &self.name
        }
        fn loader_tag(&self) -> &str {
            &self.loader
        }
        fn kind(&self) -> SharedTypeKind {
            self.kind
        }
        fn size(&self) -> u32 {
            self.size
        }
        fn class_offset(&self) -> u32 {
            0
        }
        fn superclass(&self) -> Option<&dyn crate::bindings::SharedType> {
            self.superclass
                .as_deref()
                .map(|t| t as &dyn crate::bindings::SharedType)
        }
        fn fields(&self) -> Vec<crate::bindings::SharedField<'_>> {
            self.fields
                .iter()
                .map(|(name, ty, offset, is_static)| crate::bindings::SharedField {
                    name,
                    declared_type: ty,
                    offset: *offset,
                    is_static: *is_static,
                })
                .collect()
        }
        fn source_file(&self) -> Option<&str> {
            self.source_file.as_deref()
        }
    }

    #[test]
    fn shared_type_builds_instance_with_superclass_and_fields() {
        let model = DebugEntryModel::new();
        let superclass = FakeType::leaf("java/lang/Object", SharedTypeKind::Instance);
        let field_type = FakeType::leaf("int", SharedTypeKind::Primitive);
        let class = FakeType {
            superclass: Some(Box::new(superclass)),
            fields: vec![("count".to_owned(), field_type, 8, false)],
            ..FakeType::leaf("com/example/Counter", SharedTypeKind::Instance)
        };
        let idx = model.lookup_or_insert_shared_type(&class);
        let TypeEntry::Instance {
            superclass, fields, ..
        } = model.type_entry(idx)
        else {
            panic!("expected an instance entry");
        };
        assert!(superclass.is_some());
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "count");
        assert_eq!(fields[0].offset, 8);

        let class_entry = model.class_entry(idx);
        assert_eq!(class_entry.files.len(), 1);
        let file = model.files.lock()[class_entry.files[0].0 as usize].clone();
        assert_eq!(file.name, "Counter.java");
    }

    #[test]
    fn shared_type_lookup_is_idempotent() {
        let model = DebugEntryModel::new();
        let a = model.lookup_or_insert_shared_type(&FakeType::leaf(
            "com/example/Foo",
            SharedTypeKind::Instance,
        ));
        let b = model.lookup_or_insert_shared_type(&FakeType::leaf(
            "com/example/Foo",
            SharedTypeKind::Instance,
        ));
        assert_eq!(a, b);
        assert_eq!(model.class_entry(a).files.len(), 1);
    }

    struct FakeMethod {
        name: String,
        descriptor: crate::types::MethodDescriptor,
        is_static: bool,
        lvt: Vec<crate::bindings::SharedLocal>,
        lines: Vec<(u16, u32)>,
    }

    impl crate::bindings::SharedMethod for FakeMethod {
        fn name(&self) -> &str {
            &self.name
        }
        fn descriptor(&self) -> &crate::types::MethodDescriptor {
            &self.descriptor
        }
        fn is_static(&self) -> bool {
            self.is_static
        }
        fn local_variable_table(&self) -> Option<&[crate::bindings::SharedLocal]> {
            Some(&self.lvt)
        }
        fn line_number_table(&self) -> &[(u16, u32)] {
            &self.lines
        }
    }

    #[test]
    fn shared_method_prepends_this_and_filters_locals_past_last_parameter() {
        use crate::bindings::SharedLocal;
        use crate::types::{FieldType, PrimitiveType};

        let model = DebugEntryModel::new();
        let owner = model.lookup_or_insert_type(1, || dummy_type("com/example/Foo"));
        let method = FakeMethod {
            name: "add".to_owned(),
            descriptor: "(I)I".parse().unwrap(),
            is_static: false,
            lvt: vec![
                SharedLocal {
                    name: "x".to_owned(),
                    local_type: FieldType::Base(PrimitiveType::Int),
                    slot: 1,
                    start_bci: 0,
                },
                SharedLocal {
                    name: "tmp".to_owned(),
                    local_type: FieldType::Base(PrimitiveType::Int),
                    slot: 2,
                    start_bci: 4,
                },
            ],
            lines: vec![(0, 10), (4, 11)],
        };
        let idx = model.lookup_or_insert_shared_method(owner, "boot", &method);
        let entry = model.method_entry(idx);

        assert_eq!(entry.parameters.len(), 2);
        assert_eq!(entry.parameters[0].name, "this");
        assert_eq!(entry.parameters[0].slot, 0);
        assert_eq!(entry.parameters[1].slot, 1);

        assert_eq!(entry.locals.len(), 1);
        assert_eq!(entry.locals[0].name, "tmp");
        assert_eq!(entry.locals[0].slot, 2);

        assert_eq!(entry.line_numbers, vec![(0, 10), (4, 11)]);
    }

    #[test]
    fn frame_size_changes_map_marks_and_extend_trailing_epilogue() {
        use crate::bindings::{CompilationMark, CompilationMarkKind};
        use crate::common::CodeOffset;

        let marks = vec![
            CompilationMark {
                kind: CompilationMarkKind::PrologueDecdRsp,
                pc_offset: CodeOffset(20),
            },
            CompilationMark {
                kind: CompilationMarkKind::EpilogueIncdRsp,
                pc_offset: CodeOffset(190),
            },
            CompilationMark {
                kind: CompilationMarkKind::EpilogueEnd,
                pc_offset: CodeOffset(195),
            },
        ];
        let changes = derive_frame_size_changes(&marks, 200);
        assert_eq!(
            changes,
            vec![
                FrameSizeChange::Extend(CodeOffset(20)),
                FrameSizeChange::Contract(CodeOffset(190)),
                FrameSizeChange::Extend(CodeOffset(195)),
            ]
        );
    }

    #[test]
    fn frame_size_changes_ignore_epilogue_end_at_code_boundary() {
        use crate::bindings::{CompilationMark, CompilationMarkKind};
        use crate::common::CodeOffset;

        let marks = vec![CompilationMark {
            kind: CompilationMarkKind::EpilogueEnd,
            pc_offset: CodeOffset(200),
        }];
        let changes = derive_frame_size_changes(&marks, 200);
        assert!(changes.is_empty());
    }

    struct FakeFrameNode {
        lo: u32,
        hi: u32,
        bci: Option<u16>,
        is_leaf: bool,
        children: Vec<FakeFrameNode>,
    }

    impl crate::bindings::FrameTreeNode for FakeFrameNode {
        fn range(&self) -> (crate::common::CodeOffset, crate::common::CodeOffset) {
            (crate::common::CodeOffset(self.lo), crate::common::CodeOffset(self.hi))
        }
        fn bytecode_position(
            &self,
        ) -> Option<(crate::bindings::ClassRefHandle, crate::common::ProgramCounter)> {
            self.bci.map(|b| {
                (
                    crate::bindings::ClassRefHandle("com/example/Foo".to_owned()),
                    crate::common::ProgramCounter(b),
                )
            })
        }
        fn is_leaf(&self) -> bool {
            self.is_leaf
        }
        fn children(&self) -> Vec<&dyn crate::bindings::FrameTreeNode> {
            self.children
                .iter()
                .map(|c| c as &dyn crate::bindings::FrameTreeNode)
                .collect()
        }
        fn num_locals(&self) -> u32 {
            0
        }
        fn local_value(&self, _index: u32) -> LocalValueEntry {
            LocalValueEntry::Undefined
        }
        fn local_kind(&self, _index: u32) -> crate::debuginfo::entries::FrameValueKind {
            crate::debuginfo::entries::FrameValueKind::Illegal
        }
    }

    struct FakeCompilation {
        marks: Vec<crate::bindings::CompilationMark>,
        code_size: u32,
        root: FakeFrameNode,
    }

    impl crate::bindings::CompilationResult for FakeCompilation {
        fn total_frame_size(&self) -> u32 {
            64
        }
        fn target_code_size(&self) -> u32 {
            self.code_size
        }
        fn marks(&self) -> &[crate::bindings::CompilationMark] {
            &self.marks
        }
        fn compilation_id(&self) -> u64 {
            1
        }
        fn frame_tree_root(&self) -> &dyn crate::bindings::FrameTreeNode {
            &self.root
        }
    }

    struct FakeResolver {
        method: MethodIndexSlot,
    }

    impl PositionResolver for FakeResolver {
        fn resolve(
            &self,
            _class: &crate::bindings::ClassRefHandle,
            bci: crate::common::ProgramCounter,
        ) -> Option<super::rangevisitor::ResolvedPosition> {
            Some(super::rangevisitor::ResolvedPosition {
                method: self.method,
                file: FileIndex(0),
                line: u32::from(bci.0),
            })
        }
    }

    #[test]
    fn compilation_registration_splits_prologue_at_stack_decrement() {
        use crate::bindings::{ArchDialect, CompilationMark, CompilationMarkKind};
        use crate::common::CodeOffset;
        use crate::debuginfo::entries::MethodEntry;

        let model = DebugEntryModel::new();
        let owner = model.lookup_or_insert_type(1, || dummy_type("com/example/Foo"));
        let method_idx = model.lookup_or_insert_method(owner, "run", "(I)V", || MethodEntry {
            name: "run".to_owned(),
            descriptor: "(I)V".parse().unwrap(),
            owner,
            parameters: vec![
                LocalEntry {
                    name: "this".to_owned(),
                    local_type: owner,
                    slot: 0,
                    first_line: 0,
                },
                LocalEntry {
                    name: "x".to_owned(),
                    local_type: owner,
                    slot: 1,
                    first_line: 0,
                },
            ],
            locals: vec![],
            line_numbers: vec![],
            is_static: false,
        });

        let root = FakeFrameNode {
            lo: 0,
            hi: 200,
            bci: Some(0),
            is_leaf: false,
            children: vec![FakeFrameNode {
                lo: 50,
                hi: 200,
                bci: Some(5),
                is_leaf: true,
                children: vec![],
            }],
        };
        let compilation = FakeCompilation {
            marks: vec![
                CompilationMark {
                    kind: CompilationMarkKind::PrologueDecdRsp,
                    pc_offset: CodeOffset(20),
                },
                CompilationMark {
                    kind: CompilationMarkKind::EpilogueIncdRsp,
                    pc_offset: CodeOffset(190),
                },
            ],
            code_size: 200,
            root,
        };
        let resolver = FakeResolver { method: method_idx };
        let synthetic_types = SyntheticLocalTypes::register(&model);

        let compiled_idx = model.lookup_or_insert_compilation(
            owner,
            method_idx,
            &compilation,
            &resolver,
            &synthetic_types,
            &ArchDialect::X86_64,
            VisitMode::TopLevelOnly,
        );
        let compiled = model.compiled_method_entry(compiled_idx);

        let Range::Primary { children, .. } = compiled.primary else {
            panic!("expected a primary range");
        };
        assert_eq!(children.len(), 3);
        assert!(matches!(
            children[0],
            Range::Leaf { lo: CodeOffset(0), hi: CodeOffset(20), .. }
        ));
        assert!(matches!(
            children[1],
            Range::Leaf { lo: CodeOffset(20), hi: CodeOffset(50), .. }
        ));
        assert!(matches!(
            children[2],
            Range::Leaf { lo: CodeOffset(50), hi: CodeOffset(200), .. }
        ));

        assert_eq!(
            compiled.frame_size_changes,
            vec![
                FrameSizeChange::Extend(CodeOffset(20)),
                FrameSizeChange::Contract(CodeOffset(190)),
            ]
        );
    }
}
