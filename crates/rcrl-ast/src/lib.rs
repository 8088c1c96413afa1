//! RCRL — AST Inspector
//!
//! This crate is the "C1" component of the RCRL engine: it drives a real
//! C/C++ front-end (libclang, via the [`clang`] crate) over the session's
//! working source file and produces a flat, source-ordered list of
//! top-level [`CodeBlock`]s tagged with their [`BlockKind`].
//!
//! It knows nothing about fragments, headers, or once-actions — that
//! classification lives in `rcrl-core`, which consumes an [`Inspection`]
//! to decide what's persistent and what's a once-action, and to emit the
//! generated source/header text.
//!
//! ```no_run
//! use std::path::Path;
//! use rcrl_ast::Inspector;
//!
//! let inspector = Inspector::new(Path::new("session.cpp"), vec!["-std=c++17".into()])?;
//! let inspection = inspector.top_level_blocks();
//! for block in &inspection.blocks {
//!     println!("{:?} at {}", block.kind, block.start());
//! }
//! # Ok::<(), rcrl_ast::ParseError>(())
//! ```

mod block;
mod inspector;
mod span;

pub use crate::{
    block::{BlockKind, CodeBlock, NamespaceOpener},
    inspector::{Inspection, Inspector, ParseError},
    span::{Point, Span, slice},
};
