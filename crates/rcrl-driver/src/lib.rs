//! rcrl — command-line driver
//!
//! This crate wires `rcrl-core`'s [`rcrl_core::Session`] up to a
//! terminal: it reads fragments from stdin, compiles each one, reports
//! the compiler's output, and loads the result before prompting for the
//! next fragment. See [`cli::main`] for the entry point used by the
//! `rcrl` binary.

mod cli;

pub use crate::cli::main;
