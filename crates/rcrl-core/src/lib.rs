//! RCRL — session engine.
//!
//! This crate is everything downstream of `rcrl-ast`'s block
//! classification: turning a fragment's blocks into generated C++ text
//! (`classifier`), compiling that text into a shared library (`build`),
//! loading the result into the running process (`modules`), and tying
//! all three together behind the session state machine the driver talks
//! to (`session`).

mod build;
mod classifier;
mod modules;
mod session;
mod text;

pub use crate::{
    build::{Build, BuildError, Workspace},
    classifier::ClassifyError,
    modules::{LoadError, ModuleStack},
    session::{Session, SessionError},
    text::Text,
};
