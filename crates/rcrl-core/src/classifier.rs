//! The Fragment Classifier & Emitter (C2): turns the blocks `rcrl-ast`
//! found into the generated source file and the header append, per
//! `spec.md` §4.2 / `SPEC_FULL.md` §4.2.

use rcrl_ast::{BlockKind, CodeBlock, NamespaceOpener, Point, Span, slice};

/// The platform visibility macros, written once to the top of a session's
/// persistent header (right after `#pragma once`) and never regenerated.
pub const MACRO_PREAMBLE: &str = "\
#if defined(_WIN32)
#  define RCRL_EXPORT __declspec(dllexport)
#  define RCRL_IMPORT __declspec(dllimport)
#else
#  define RCRL_EXPORT __attribute__((visibility(\"default\")))
#  define RCRL_IMPORT
#endif
";

/// Generate the complete working-source file for one compile, per
/// `spec.md` §4.2's "Generation of the source": every declaration block
/// emitted verbatim (wrapped back in whatever namespaces it was found
/// in), followed by a once-action initializer holding everything that
/// isn't a declaration.
///
/// The working source on disk already starts with the session's
/// `#include` of its persistent header, which `rcrl-ast` classifies as
/// an ordinary `Include` block — it flows through the same declaration
/// loop as anything else the user typed, so it doesn't need special
/// casing here.
#[tracing::instrument(level = "debug", skip_all)]
pub fn generate_source(
    blocks: &[CodeBlock<'_>],
    namespaces: &[NamespaceOpener],
    lines: &[String],
    counter: &mut u64,
) -> String {
    let mut out = String::new();

    for block in blocks {
        if block.kind == BlockKind::Namespace {
            // The namespace's own `{` line is only ever emitted as part of
            // wrapping its *children*; it has no standalone emission.
            continue;
        }

        let (prefix, suffix) = wrap(namespaces, block.span);
        out.push_str(&prefix);
        emit_declaration(&mut out, block, lines);
        out.push_str(&suffix);
    }

    out.push_str(&format!(
        "\nstatic int __rcrl_once_{n} = [](){{\n",
        n = *counter
    ));
    *counter += 1;
    out.push_str(&generate_once_body(blocks, lines));
    out.push_str("  return 0;\n}();\n");

    out
}

fn emit_declaration(out: &mut String, block: &CodeBlock<'_>, lines: &[String]) {
    let text = slice(lines, block.span);

    if needs_export_marker(block.kind) {
        out.push_str(MACRO_EXPORT);
        out.push(' ');
    }
    out.push_str(&text);

    if matches!(block.kind, BlockKind::Include | BlockKind::Macro) {
        out.push('\n');
    } else {
        out.push_str(";\n");
    }
}

const MACRO_EXPORT: &str = "RCRL_EXPORT";
const MACRO_IMPORT: &str = "RCRL_IMPORT";

fn needs_export_marker(kind: BlockKind) -> bool {
    matches!(kind, BlockKind::Function | BlockKind::Variable)
}

/// Collect every enclosing [`NamespaceOpener`] for `span`, outer-to-inner,
/// and return the text to open them before the block and close them
/// after.
fn wrap(namespaces: &[NamespaceOpener], span: Span) -> (String, String) {
    let mut prefix = String::new();
    let mut depth = 0usize;

    for ns in namespaces {
        if span.is_nested_in(&ns.span) {
            prefix.push_str(&ns.header);
            prefix.push('\n');
            depth += 1;
        }
    }

    (prefix, "}\n".repeat(depth))
}

/// Build the once-action initializer body, per `spec.md` §4.2: every span
/// of source text that lies *outside* any recorded block's extent,
/// walked in source order.
///
/// A `Namespace` block's extent covers its entire `namespace X { ... }`,
/// closing brace included, and is skipped in full: the once body is a
/// single global lambda, and a `namespace` definition is not a legal
/// statement inside one, so nothing within a namespace's extent — not
/// even the namespace's own opening/closing braces — may be spliced in
/// here. `pos` only ever advances (`pos.max(block.end())`, never
/// reassigned outright) so that the nested blocks `rcrl-ast` also
/// records for a namespace's children don't drag it backwards past the
/// enclosing namespace's end once it's been skipped.
fn generate_once_body(blocks: &[CodeBlock<'_>], lines: &[String]) -> String {
    let mut out = String::new();
    let mut pos = Point::START;

    for block in blocks {
        copy_gap(lines, pos, block.start(), &mut out);
        pos = pos.max(block.end());
    }

    if let Some(last_line) = lines.len().checked_sub(1) {
        let end_of_file = Point::new((last_line + 1) as u32, lines[last_line].len() as u32 + 1);
        copy_gap(lines, pos, end_of_file, &mut out);
    }

    out
}

fn copy_gap(lines: &[String], from: Point, to: Point, out: &mut String) {
    if from >= to {
        return;
    }
    out.push_str(&slice(lines, Span::new(from, to)));
}

/// Generate the text to append to the persistent header after a
/// successful compile, per `spec.md` §4.2's "Generation of the header".
#[tracing::instrument(level = "debug", skip_all)]
pub fn generate_header_append(
    blocks: &[CodeBlock<'_>],
    namespaces: &[NamespaceOpener],
    lines: &[String],
    header_file_name: &str,
    counter: &mut u64,
) -> Result<String, ClassifyError> {
    let mut out = String::new();

    for block in blocks {
        if block.kind == BlockKind::Namespace {
            continue;
        }
        if block.kind == BlockKind::Include && is_self_include(lines, block.span, header_file_name)
        {
            continue;
        }

        let (prefix, suffix) = wrap(namespaces, block.span);
        out.push_str(&prefix);

        match block.kind {
            BlockKind::Variable => emit_variable_decl(&mut out, block, counter)?,
            BlockKind::Function => emit_function_decl(&mut out, block, lines, counter)?,
            _ => emit_declaration(&mut out, block, lines),
        }

        out.push_str(&suffix);
    }

    Ok(out)
}

fn is_self_include(lines: &[String], span: Span, header_file_name: &str) -> bool {
    slice(lines, span).contains(header_file_name)
}

fn emit_variable_decl(
    out: &mut String,
    block: &CodeBlock<'_>,
    counter: &mut u64,
) -> Result<(), ClassifyError> {
    let ty = block
        .entity
        .get_type()
        .ok_or_else(|| ClassifyError::MissingType(block.start()))?
        .get_display_name();
    let name = block
        .entity
        .get_name()
        .ok_or_else(|| ClassifyError::MissingName(block.start()))?;

    let alias = format!("_{}_t", *counter);
    *counter += 1;

    out.push_str(&format!("using {alias} = {ty};\n"));
    out.push_str(&format!("{MACRO_IMPORT} extern {alias} {name};\n"));

    Ok(())
}

fn emit_function_decl(
    out: &mut String,
    block: &CodeBlock<'_>,
    lines: &[String],
    counter: &mut u64,
) -> Result<(), ClassifyError> {
    let ret_ty = block
        .entity
        .get_result_type()
        .ok_or_else(|| ClassifyError::MissingType(block.start()))?
        .get_display_name();
    let name = block
        .entity
        .get_name()
        .ok_or_else(|| ClassifyError::MissingName(block.start()))?;

    let alias = format!("_{}_t", *counter);
    *counter += 1;

    let mut params: Vec<String> = Vec::new();
    for arg in block.entity.get_arguments().unwrap_or_default() {
        let range = arg
            .get_range()
            .ok_or_else(|| ClassifyError::MissingType(block.start()))?;
        params.push(slice(
            lines,
            Span::new(point_of(range.get_start()), point_of(range.get_end())),
        ));
    }

    let is_variadic = block
        .entity
        .get_type()
        .map(|t| t.is_variadic())
        .unwrap_or(false);
    if is_variadic {
        params.push("...".to_string());
    }

    out.push_str(&format!("using {alias} = {ret_ty};\n"));
    out.push_str(&format!(
        "{MACRO_IMPORT} extern {alias} {name}({args});\n",
        args = params.join(", ")
    ));

    Ok(())
}

fn point_of(location: clang::source::SourceLocation<'_>) -> Point {
    let file_location = location.get_file_location();
    Point::new(file_location.line, file_location.column)
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("could not resolve the type of the declaration at {0}")]
    MissingType(Point),
    #[error("could not resolve the name of the declaration at {0}")]
    MissingName(Point),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_produces_balanced_braces_for_nested_namespaces() {
        let outer = NamespaceOpener {
            span: Span::new(Point::new(1, 1), Point::new(10, 1)),
            header: "namespace outer {".into(),
            header_end: Point::new(1, 18),
        };
        let inner = NamespaceOpener {
            span: Span::new(Point::new(2, 1), Point::new(9, 1)),
            header: "namespace inner {".into(),
            header_end: Point::new(2, 18),
        };
        let namespaces = [outer, inner];

        let (prefix, suffix) = wrap(&namespaces, Span::new(Point::new(3, 1), Point::new(3, 10)));

        assert_eq!(
            prefix,
            "namespace outer {\nnamespace inner {\n"
        );
        assert_eq!(suffix, "}\n}\n");
    }

    #[test]
    fn copy_gap_is_empty_when_there_is_no_gap() {
        let lines = vec!["int a = 1;\n".to_string()];
        let mut out = String::new();
        copy_gap(&lines, Point::new(1, 1), Point::new(1, 1), &mut out);
        assert!(out.is_empty());
    }
}
