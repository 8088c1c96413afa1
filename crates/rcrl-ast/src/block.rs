use clang::{Entity, EntityKind};

use crate::span::{Point, Span};

/// The classification of a top-level construct, as recognised by
/// [`crate::Inspector`].
///
/// Every variant here corresponds to one libclang `CXCursorKind` that the
/// classifier treats specially; anything else collapses to `Invalid`, which
/// the fragment classifier (in `rcrl-core`) treats as "not a declaration" —
/// i.e. part of a once-action, not a parse failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Include,
    Macro,
    UsingDirective,
    UsingDeclaration,
    NamespaceAlias,
    Namespace,
    TypeAlias,
    TypeAliasTemplate,
    Typedef,
    Struct,
    Class,
    Union,
    Enum,
    EnumConstant,
    FunctionTemplate,
    ClassTemplate,
    ClassTemplatePartialSpec,
    Function,
    Variable,
    Invalid,
}

impl BlockKind {
    /// Whether a block of this kind is a persistent declaration (kept
    /// across fragments, exported via the session header) as opposed to
    /// a once-action.
    ///
    /// Per `spec.md` §3, every kind other than `Invalid` is persistent —
    /// `Invalid` is the catch-all for "this cursor is not a top-level
    /// declaration", which is exactly the once-action case.
    pub fn is_persistent(self) -> bool {
        !matches!(self, BlockKind::Invalid)
    }

    fn from_entity_kind(kind: EntityKind) -> Option<Self> {
        use BlockKind::*;
        Some(match kind {
            EntityKind::UsingDirective => UsingDirective,
            EntityKind::UsingDeclaration => UsingDeclaration,
            EntityKind::TypeAliasDecl => TypeAlias,
            EntityKind::TypeAliasTemplateDecl => TypeAliasTemplate,
            EntityKind::TypedefDecl => Typedef,
            EntityKind::StructDecl => Struct,
            EntityKind::ClassDecl => Class,
            EntityKind::UnionDecl => Union,
            EntityKind::EnumDecl => Enum,
            EntityKind::EnumConstantDecl => EnumConstant,
            EntityKind::FunctionTemplate => FunctionTemplate,
            EntityKind::ClassTemplate => ClassTemplate,
            EntityKind::ClassTemplatePartialSpecialization => ClassTemplatePartialSpec,
            EntityKind::FunctionDecl => Function,
            EntityKind::VarDecl => Variable,
            _ => return None,
        })
    }
}

/// A top-level construct in the working source, tagged with its
/// classification and carrying the live AST entity so the emitter can
/// later query types, arguments, and variadic-ness without re-walking the
/// tree.
///
/// `'tu` is the lifetime of the owning [`crate::Inspector`]'s translation
/// unit.
#[derive(Debug, Clone, Copy)]
pub struct CodeBlock<'tu> {
    pub span: Span,
    pub kind: BlockKind,
    pub entity: Entity<'tu>,
}

impl<'tu> CodeBlock<'tu> {
    pub fn start(&self) -> Point {
        self.span.start
    }

    pub fn end(&self) -> Point {
        self.span.end
    }
}

/// The recorded extent and rendered opening line of a `namespace { ... }`
/// that a [`CodeBlock`] may need to be re-opened inside of.
///
/// This is the Rust name for the `(start, end, "<namespace_header> {")`
/// tuples `spec.md` §4.2 describes.
#[derive(Debug, Clone)]
pub struct NamespaceOpener {
    pub span: Span,
    /// The `namespace foo {` text, spliced verbatim out of the source up
    /// to and including the first `{` found after the namespace keyword.
    /// Carries no synthetic whitespace — callers that want it formatted
    /// on its own line add that themselves.
    pub header: String,
    /// The position in the source immediately after `header`'s last
    /// character, i.e. just past the `{`. Used by once-action generation
    /// to resume its gap walk at the right place after "consuming" a
    /// namespace's opening line.
    pub header_end: Point,
}

/// Classify a libclang entity per `spec.md` §4.1:
///
/// > its location is from the main file, AND it is an inclusion
/// > directive, OR a macro definition, OR a namespace alias, OR it
/// > `isDeclaration && !isInvalidDeclaration && isCursorDefinition` for
/// > all other kinds.
pub(crate) fn classify(entity: &Entity<'_>) -> Option<BlockKind> {
    if !entity.is_in_main_file() {
        return None;
    }

    match entity.get_kind() {
        EntityKind::InclusionDirective => Some(BlockKind::Include),
        EntityKind::MacroDefinition => Some(BlockKind::Macro),
        EntityKind::NamespaceAlias => Some(BlockKind::NamespaceAlias),
        EntityKind::Namespace => Some(BlockKind::Namespace),
        kind => {
            if entity.is_declaration() && !entity.is_invalid_declaration() && entity.is_definition()
            {
                BlockKind::from_entity_kind(kind)
            } else {
                None
            }
        }
    }
}
