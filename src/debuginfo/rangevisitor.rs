//! Flattens a compilation's frame tree into the debug-entry model's range
//! tree, synthesizing prologue leaves, merging adjacent leaves, and
//! repairing misattributed root-level leaves along the way.

use crate::bindings::{ClassRefHandle, FrameTreeNode};
use crate::common::{CodeOffset, ProgramCounter};
use crate::debuginfo::entries::{
    FileIndex, FrameValueKind, LocalEntry, LocalValueEntry, MethodIndex, Range, TypeEntry,
    TypeEntryCommon, TypeIndex, TypeSignatures,
};
use crate::debuginfo::model::DebugEntryModel;

/// How deeply the visitor descends into inlined call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitMode {
    /// Descend at most one level: inlined calls are themselves emitted as
    /// leaves rather than expanded.
    TopLevelOnly,
    /// Descend up to `max_depth` levels, expanding inlined calls into
    /// `Call` ranges with their own children.
    MultiLevel {
        /// The maximum nesting depth to expand (0 == same as top-level-only).
        max_depth: u32,
    },
}

/// Resolves a frame-tree node's bytecode position to the debug-entry
/// model's method/file/line coordinates.
///
/// This is the seam between the interpreter/metadata world (a class
/// reference plus a bci) and the debug-entry model's own indices; a host
/// wires this up against its constant-pool and method-registration
/// collaborators.
pub trait PositionResolver {
    /// Resolves `(class, bci)` to the method it belongs to, the file it
    /// was declared in, and the source line active at `bci`.
    fn resolve(&self, class: &ClassRefHandle, bci: ProgramCounter) -> Option<ResolvedPosition>;
}

/// The result of resolving a frame-tree node's bytecode position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPosition {
    pub method: MethodIndex,
    pub file: FileIndex,
    pub line: u32,
}

/// Preregistered synthetic types used to name untracked locals, keyed by
/// [`FrameValueKind`].
#[derive(Debug, Clone, Copy)]
pub struct SyntheticLocalTypes {
    pub int_ty: TypeIndex,
    pub long_ty: TypeIndex,
    pub float_ty: TypeIndex,
    pub double_ty: TypeIndex,
    pub object_ty: TypeIndex,
}

impl SyntheticLocalTypes {
    /// Registers (or reuses, if already present) the five placeholder
    /// types this visitor needs to name untracked locals.
    pub fn register(model: &DebugEntryModel) -> Self {
        let mut make = |name: &'static str, signature: u64| {
            model.lookup_or_insert_type(signature, || {
                TypeEntry::Primitive(TypeEntryCommon {
                    name: name.to_owned(),
                    size: 4,
                    class_offset: 0,
                    signatures: TypeSignatures::derive(name, "<synthetic>"),
                })
            })
        };
        Self {
            int_ty: make("int", synthetic_signature(0)),
            long_ty: make("long", synthetic_signature(1)),
            float_ty: make("float", synthetic_signature(2)),
            double_ty: make("double", synthetic_signature(3)),
            object_ty: make("java/lang/Object", synthetic_signature(4)),
        }
    }

    fn type_for(&self, kind: FrameValueKind) -> TypeIndex {
        match kind {
            FrameValueKind::Int => self.int_ty,
            FrameValueKind::Long => self.long_ty,
            FrameValueKind::Float => self.float_ty,
            FrameValueKind::Double => self.double_ty,
            FrameValueKind::Object | FrameValueKind::Illegal => self.object_ty,
        }
    }
}

/// A reserved signature space for synthetic placeholder types, outside the
/// range any real `(name, loaderTag)` digest plausibly occupies.
fn synthetic_signature(ordinal: u64) -> u64 {
    0xFFFF_FFFF_0000_0000 | ordinal
}

/// State threaded through the recursive descent, replacing an untyped
/// argument vector with named fields.
struct VisitCtx<'a> {
    root_method: MethodIndex,
    depth: u32,
    mode: &'a VisitMode,
}

/// Visits `root`'s frame tree and produces the flattened `Primary` range
/// the debug-info model stores against a compiled method.
pub fn visit(
    root: &dyn FrameTreeNode,
    resolver: &dyn PositionResolver,
    synthetic_types: &SyntheticLocalTypes,
    model: &DebugEntryModel,
) -> Range {
    visit_with_mode(root, resolver, synthetic_types, model, VisitMode::TopLevelOnly)
}

/// As [`visit`], but with an explicit descent mode.
pub fn visit_with_mode(
    root: &dyn FrameTreeNode,
    resolver: &dyn PositionResolver,
    synthetic_types: &SyntheticLocalTypes,
    model: &DebugEntryModel,
    mode: VisitMode,
) -> Range {
    let (lo, hi) = root.range();
    let root_method = root
        .bytecode_position()
        .and_then(|(class, bci)| resolver.resolve(&class, bci))
        .map(|p| p.method)
        .unwrap_or(MethodIndex(0));

    let ctx = VisitCtx {
        root_method,
        depth: 0,
        mode: &mode,
    };
    let children = visit_children(root, resolver, synthetic_types, model, &ctx);
    Range::Primary {
        lo,
        hi,
        code_offset: lo,
        children: repair_bad_leaves(children, root_method),
    }
}

fn visit_children(
    node: &dyn FrameTreeNode,
    resolver: &dyn PositionResolver,
    synthetic_types: &SyntheticLocalTypes,
    model: &DebugEntryModel,
    ctx: &VisitCtx<'_>,
) -> Vec<Range> {
    let mut out = Vec::new();
    for child in node.children() {
        if child.bytecode_position().is_none() {
            continue;
        }
        let Some(built) = visit_node(child, resolver, synthetic_types, model, ctx) else {
            continue;
        };
        out.push(built);
    }
    merge_adjacent_leaves(out)
}

fn visit_node(
    node: &dyn FrameTreeNode,
    resolver: &dyn PositionResolver,
    synthetic_types: &SyntheticLocalTypes,
    model: &DebugEntryModel,
    ctx: &VisitCtx<'_>,
) -> Option<Range> {
    let (class, bci) = node.bytecode_position()?;
    let position = resolver.resolve(&class, bci)?;
    let (lo, hi) = node.range();
    let locals = collect_locals(node, synthetic_types, model, position.method, u32::from(bci.0));

    let can_descend = match ctx.mode {
        VisitMode::TopLevelOnly => false,
        VisitMode::MultiLevel { max_depth } => ctx.depth < *max_depth,
    };

    if node.is_leaf() || !can_descend {
        return Some(Range::Leaf {
            lo,
            hi,
            line: position.line,
            method: position.method,
            file: position.file,
            locals,
        });
    }

    let grandchildren = node.children();
    let first_child_start = grandchildren
        .first()
        .and_then(|c| c.bytecode_position().map(|_| c.range().0));

    let child_ctx = VisitCtx {
        root_method: ctx.root_method,
        depth: ctx.depth + 1,
        mode: ctx.mode,
    };
    let mut children = visit_children(node, resolver, synthetic_types, model, &child_ctx);

    if let Some(first_start) = first_child_start {
        if first_start > lo {
            let prologue = Range::Leaf {
                lo,
                hi: first_start,
                line: position.line,
                method: position.method,
                file: position.file,
                locals: locals.clone(),
            };
            children.insert(0, prologue);
            children = merge_adjacent_leaves(children);
        }
    }

    Some(Range::Call {
        lo,
        hi,
        line: position.line,
        method: position.method,
        file: position.file,
        locals,
        children,
    })
}

/// Merges adjacent `Leaf` ranges that share a method/file and whose spans
/// are contiguous, stopping the run whenever a `Call` range intervenes.
fn merge_adjacent_leaves(ranges: Vec<Range>) -> Vec<Range> {
    let mut out: Vec<Range> = Vec::with_capacity(ranges.len());
    for range in ranges {
        if let (
            Some(Range::Leaf {
                hi: prev_hi,
                method: prev_method,
                file: prev_file,
                ..
            }),
            Range::Leaf {
                lo, hi, method, file, ..
            },
        ) = (out.last(), &range)
        {
            if *prev_hi == *lo && *prev_method == *method && *prev_file == *file {
                if let Some(Range::Leaf { hi: last_hi, .. }) = out.last_mut() {
                    *last_hi = *hi;
                    continue;
                }
            }
        }
        out.push(range);
    }
    out
}

/// A leaf directly under the primary range that claims a method other
/// than the root's is rewritten to attribute to the root method, per the
/// inliner-artifact workaround this visitor compensates for.
fn repair_bad_leaves(children: Vec<Range>, root_method: MethodIndex) -> Vec<Range> {
    children
        .into_iter()
        .map(|range| match range {
            Range::Leaf {
                lo,
                hi,
                line,
                method,
                file,
                locals,
            } if method != root_method => Range::Leaf {
                lo,
                hi,
                line,
                method: root_method,
                file,
                locals,
            },
            other => other,
        })
        .collect()
}

/// Builds the per-range locals list for one bytecode frame.
///
/// For each tracked slot: if the owning method's local-variable table
/// already declares an entry in scope at `bci`, that declared entry is
/// used verbatim (applying the boolean/byte/short/char-to-int and
/// foreign-word-vs-long promotions the frame kind implies). Otherwise, a
/// slot at or below the last parameter slot is skipped rather than
/// misattributed to a parameter; slots beyond it get a synthesized name.
fn collect_locals(
    node: &dyn FrameTreeNode,
    synthetic_types: &SyntheticLocalTypes,
    model: &DebugEntryModel,
    method: MethodIndex,
    bci: u32,
) -> Vec<(LocalEntry, LocalValueEntry)> {
    if node.bytecode_position().is_none() {
        return Vec::new();
    }

    let method_entry = model.method_entry(method);
    let last_parameter_slot = method_entry.last_parameter_slot();

    let mut out = Vec::new();
    for slot in 0..node.num_locals() {
        let kind = node.local_kind(slot);
        if kind == FrameValueKind::Illegal {
            continue;
        }
        let value = node.local_value(slot);
        let slot_u16 = slot as u16;

        if let Some(declared) = method_entry.local_at(slot_u16, bci) {
            out.push((declared.clone(), value));
            continue;
        }

        if let Some(last) = last_parameter_slot {
            if slot_u16 <= last {
                continue;
            }
        }

        let entry = LocalEntry {
            name: format!("__{}{}", kind_char(kind), slot),
            local_type: synthetic_types.type_for(kind),
            slot: slot_u16,
            first_line: bci,
        };
        out.push((entry, value));
    }
    out
}

fn kind_char(kind: FrameValueKind) -> char {
    match kind {
        FrameValueKind::Illegal => '?',
        FrameValueKind::Int => 'i',
        FrameValueKind::Long => 'j',
        FrameValueKind::Float => 'f',
        FrameValueKind::Double => 'd',
        FrameValueKind::Object => 'a',
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::debuginfo::entries::LiteralConstant;

    struct FakeResolver;

    impl PositionResolver for FakeResolver {
        fn resolve(&self, _class: &ClassRefHandle, bci: ProgramCounter) -> Option<ResolvedPosition> {
            Some(ResolvedPosition {
                method: MethodIndex(0),
                file: FileIndex(0),
                line: u32::from(bci.0) / 10 + 1,
            })
        }
    }

    struct FakeNode {
        lo: u32,
        hi: u32,
        bci: Option<u16>,
        is_leaf: bool,
        children: Vec<FakeNode>,
    }

    impl FrameTreeNode for FakeNode {
        fn range(&self) -> (CodeOffset, CodeOffset) {
            (CodeOffset(self.lo), CodeOffset(self.hi))
        }

        fn bytecode_position(&self) -> Option<(ClassRefHandle, ProgramCounter)> {
            self.bci
                .map(|b| (ClassRefHandle("com/example/Foo".to_owned()), ProgramCounter(b)))
        }

        fn is_leaf(&self) -> bool {
            self.is_leaf
        }

        fn children(&self) -> Vec<&dyn FrameTreeNode> {
            self.children.iter().map(|c| c as &dyn FrameTreeNode).collect()
        }

        fn num_locals(&self) -> u32 {
            0
        }

        fn local_value(&self, _index: u32) -> LocalValueEntry {
            LocalValueEntry::Undefined
        }

        fn local_kind(&self, _index: u32) -> FrameValueKind {
            FrameValueKind::Illegal
        }
    }

    fn model_and_types() -> (DebugEntryModel, SyntheticLocalTypes) {
        let model = DebugEntryModel::new();
        let types = SyntheticLocalTypes::register(&model);
        let owner = model.lookup_or_insert_type(999, || {
            TypeEntry::Primitive(TypeEntryCommon {
                name: "com/example/Foo".to_owned(),
                size: 0,
                class_offset: 0,
                signatures: TypeSignatures::derive("com/example/Foo", "boot"),
            })
        });
        model.lookup_or_insert_method(owner, "run", "()V", || crate::debuginfo::entries::MethodEntry {
            name: "run".to_owned(),
            descriptor: "()V".parse().unwrap(),
            owner,
            parameters: vec![],
            locals: vec![],
            line_numbers: vec![],
            is_static: false,
        });
        (model, types)
    }

    #[test]
    fn synthesizes_prologue_leaf_before_first_child() {
        let (model, types) = model_and_types();
        let root = FakeNode {
            lo: 100,
            hi: 400,
            bci: Some(0),
            is_leaf: false,
            children: vec![FakeNode {
                lo: 100,
                hi: 400,
                bci: Some(0),
                is_leaf: false,
                children: vec![FakeNode {
                    lo: 120,
                    hi: 400,
                    bci: Some(5),
                    is_leaf: true,
                    children: vec![],
                }],
            }],
        };
        let resolver = FakeResolver;
        let tree = visit_with_mode(
            &root,
            &resolver,
            &types,
            &model,
            VisitMode::MultiLevel { max_depth: 4 },
        );
        let Range::Primary { children, .. } = tree else {
            panic!("expected primary range");
        };
        assert_eq!(children.len(), 1);
        let Range::Call { children: inner, .. } = &children[0] else {
            panic!("expected call range");
        };
        assert!(matches!(inner[0], Range::Leaf { lo: CodeOffset(100), hi: CodeOffset(120), .. }));
    }

    #[test]
    fn merges_adjacent_leaves_sharing_method() {
        let leaves = vec![
            Range::Leaf {
                lo: CodeOffset(120),
                hi: CodeOffset(140),
                line: 1,
                method: MethodIndex(0),
                file: FileIndex(0),
                locals: vec![],
            },
            Range::Leaf {
                lo: CodeOffset(140),
                hi: CodeOffset(160),
                line: 1,
                method: MethodIndex(0),
                file: FileIndex(0),
                locals: vec![],
            },
        ];
        let merged = merge_adjacent_leaves(leaves);
        assert_eq!(merged.len(), 1);
        assert!(matches!(
            merged[0],
            Range::Leaf { lo: CodeOffset(120), hi: CodeOffset(160), .. }
        ));
    }

    #[test]
    fn bad_leaf_is_reattributed_to_root_method() {
        let leaves = vec![Range::Leaf {
            lo: CodeOffset(0),
            hi: CodeOffset(10),
            line: 1,
            method: MethodIndex(7),
            file: FileIndex(0),
            locals: vec![],
        }];
        let repaired = repair_bad_leaves(leaves, MethodIndex(0));
        assert!(matches!(
            repaired[0],
            Range::Leaf { method: MethodIndex(0), .. }
        ));
    }

    #[test]
    fn skips_substitution_frames() {
        let (model, types) = model_and_types();
        let root = FakeNode {
            lo: 0,
            hi: 100,
            bci: Some(0),
            is_leaf: false,
            children: vec![FakeNode {
                lo: 10,
                hi: 20,
                bci: None,
                is_leaf: true,
                children: vec![],
            }],
        };
        let resolver = FakeResolver;
        let tree = visit(&root, &resolver, &types, &model);
        let Range::Primary { children, .. } = tree else {
            panic!("expected primary range");
        };
        assert!(children.is_empty());
    }

    #[test]
    fn literal_constant_variants_are_distinct() {
        assert_ne!(LiteralConstant::I32(1), LiteralConstant::I32(2));
    }
}
