use std::path::{Path, PathBuf};

use clang::{Clang, Entity, EntityKind, Index, TranslationUnit};

use crate::{
    block::{CodeBlock, NamespaceOpener, classify},
    span::{Point, Span},
};

/// Drives libclang over the working source file and produces the flat,
/// source-ordered list of top-level [`CodeBlock`]s that `rcrl-core`'s
/// fragment classifier consumes.
///
/// `Clang` and `Index` are leaked once per `Inspector` rather than held by
/// reference: libclang's `TranslationUnit<'i>` borrows its `Index<'i>`,
/// and an `Inspector` that owns both the index and the translation unit it
/// parses from would be self-referential. A session creates exactly one
/// `Inspector` and keeps it for the session's lifetime, so leaking a
/// `Clang`/`Index` pair once per session is a fixed, small cost — not a
/// per-fragment leak — and mirrors how libclang's own `CXIndex` is meant
/// to be created once and reused for every reparse.
pub struct Inspector {
    index: &'static Index<'static>,
    unit: TranslationUnit<'static>,
    source_path: PathBuf,
    flags: Vec<String>,
}

impl Inspector {
    /// Parse `source_path` for the first time with the given compiler
    /// flags.
    #[tracing::instrument(level = "info", skip(flags))]
    pub fn new(source_path: &Path, flags: Vec<String>) -> Result<Self, ParseError> {
        let clang = Clang::new().map_err(ParseError::ClangUnavailable)?;
        let clang: &'static Clang = Box::leak(Box::new(clang));
        let index: &'static Index<'static> = Box::leak(Box::new(Index::new(clang, false, false)));

        let unit = parse_translation_unit(index, source_path, &flags)?;

        Ok(Inspector {
            index,
            unit,
            source_path: source_path.to_path_buf(),
            flags,
        })
    }

    /// Reparse the same translation unit because the file on disk changed,
    /// per `spec.md` §4.1's `reparse` operation.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn reparse(&mut self) -> Result<(), ParseError> {
        self.unit = parse_translation_unit(self.index, &self.source_path, &self.flags)?;
        Ok(())
    }

    /// Dispose the translation unit and reparse with a new flag set, per
    /// `spec.md` §4.1's `reconfigure` operation.
    #[tracing::instrument(level = "debug", skip(self, flags))]
    pub fn reconfigure(&mut self, flags: Vec<String>) -> Result<(), ParseError> {
        self.flags = flags;
        self.reparse()
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Every line of the working source, each including its trailing
    /// newline, used by the emitter to splice verbatim text out of
    /// `Span`s.
    pub fn file_content(&self) -> Result<Vec<String>, ParseError> {
        let contents = std::fs::read_to_string(&self.source_path)
            .map_err(|e| ParseError::Io(self.source_path.clone(), e))?;
        Ok(split_keeping_newlines(&contents))
    }

    /// Walk the translation unit's top-level entities and produce the
    /// ordered blocks and namespace openers the emitter needs.
    ///
    /// Recursion only ever happens into `Namespace` entities, per
    /// `spec.md` §4.1.
    pub fn top_level_blocks(&self) -> Inspection<'_> {
        let mut blocks = Vec::new();
        let mut namespaces = Vec::new();
        let lines = self.file_content().unwrap_or_default();

        walk(self.unit.get_entity(), &lines, &mut blocks, &mut namespaces);

        Inspection { blocks, namespaces }
    }

    /// Diagnostics libclang itself produced while parsing, for logging
    /// only — `spec.md` §4.1 is explicit that these never drive control
    /// flow; the compiler's exit code is authoritative.
    pub fn libclang_diagnostics(&self) -> Vec<String> {
        self.unit
            .get_diagnostics()
            .iter()
            .map(|d| d.get_text())
            .collect()
    }
}

/// The result of one `Inspector::top_level_blocks` call.
pub struct Inspection<'tu> {
    pub blocks: Vec<CodeBlock<'tu>>,
    pub namespaces: Vec<NamespaceOpener>,
}

fn walk<'tu>(
    root: Entity<'tu>,
    lines: &[String],
    blocks: &mut Vec<CodeBlock<'tu>>,
    namespaces: &mut Vec<NamespaceOpener>,
) {
    for child in root.get_children() {
        let Some(kind) = classify(&child) else {
            continue;
        };
        let span = entity_span(&child, kind);
        blocks.push(CodeBlock {
            span,
            kind,
            entity: child,
        });

        if kind == crate::BlockKind::Namespace {
            let (header, header_end) = namespace_header(lines, span.start);
            namespaces.push(NamespaceOpener {
                span,
                header,
                header_end,
            });
            walk(child, lines, blocks, namespaces);
        }
    }
}

/// Compute a block's extent, applying the one adjustment `spec.md` §4.1
/// calls out: macro definitions have their start forced to column 1 so
/// the `#define` token itself is captured (libclang's cursor extent for a
/// macro definition starts at the macro name, after the `#define `).
fn entity_span(entity: &Entity<'_>, kind: crate::BlockKind) -> Span {
    let range = entity
        .get_range()
        .expect("a classified entity always has a source range");
    let mut start = point_of(range.get_start());
    let end = point_of(range.get_end());

    if kind == crate::BlockKind::Macro {
        start.column = 1;
    }

    Span::new(start, end)
}

fn point_of(location: clang::source::SourceLocation<'_>) -> Point {
    let file_location = location.get_file_location();
    Point::new(file_location.line, file_location.column)
}

/// Scan forward from a namespace's start position to the first `{`,
/// returning the verbatim text up to and including it together with the
/// position just past it, per `spec.md` §4.2: "the emitter... emits only
/// the opening `namespace X {` line (read by scanning forward from the
/// namespace's start position up to the first `{`)".
fn namespace_header(lines: &[String], start: Point) -> (String, Point) {
    let mut header = String::new();
    let mut line_idx = (start.line - 1) as usize;
    let mut col_idx = (start.column - 1) as usize;

    while let Some(line) = lines.get(line_idx) {
        let rest = &line[col_idx.min(line.len())..];
        if let Some(brace) = rest.find('{') {
            header.push_str(&rest[..=brace]);
            let end = Point::new((line_idx + 1) as u32, (col_idx + brace + 2) as u32);
            return (header, end);
        }
        header.push_str(rest);
        line_idx += 1;
        col_idx = 0;
    }

    (header, Point::new((line_idx + 1) as u32, 1))
}

fn parse_translation_unit(
    index: &'static Index<'static>,
    source_path: &Path,
    flags: &[String],
) -> Result<TranslationUnit<'static>, ParseError> {
    index
        .parser(source_path)
        .arguments(flags)
        .detailed_preprocessing_record(true)
        .keep_going(true)
        .retain_excluded_conditional_blocks(true)
        .skip_function_bodies(false)
        .parse()
        .map_err(|e| ParseError::Parse(source_path.to_path_buf(), e.to_string()))
}

fn split_keeping_newlines(src: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for ch in src.chars() {
        current.push(ch);
        if ch == '\n' {
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("libclang is not available: {0}")]
    ClangUnavailable(String),
    #[error("failed to read \"{0}\": {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse \"{0}\": {1}")]
    Parse(PathBuf, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    #[ignore = "requires a system libclang; run with `cargo test -- --ignored` where available"]
    fn classifies_a_variable_and_a_statement() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "fragment.cpp", "int a = 5;\na++;\n");

        let inspector = Inspector::new(&path, vec!["-std=c++17".into()]).unwrap();
        let inspection = inspector.top_level_blocks();

        assert_eq!(inspection.blocks.len(), 1);
        assert_eq!(inspection.blocks[0].kind, crate::BlockKind::Variable);
    }

    #[test]
    #[ignore = "requires a system libclang; run with `cargo test -- --ignored` where available"]
    fn recurses_into_namespaces_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "fragment.cpp",
            "namespace n { int x = 7; struct S { int y; }; }\n",
        );

        let inspector = Inspector::new(&path, vec!["-std=c++17".into()]).unwrap();
        let inspection = inspector.top_level_blocks();

        let kinds: Vec<_> = inspection.blocks.iter().map(|b| b.kind).collect();
        assert!(kinds.contains(&crate::BlockKind::Namespace));
        assert!(kinds.contains(&crate::BlockKind::Variable));
        assert!(kinds.contains(&crate::BlockKind::Struct));
        assert_eq!(inspection.namespaces.len(), 1);
    }
}
