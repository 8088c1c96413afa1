//! The Session Façade (C5): the single entry point the driver talks to,
//! tying the AST inspector, classifier, build driver, and module manager
//! together behind the state machine `spec.md` §4.5 describes.

use std::{path::PathBuf, process::ExitStatus};

use rcrl_ast::{Inspector, ParseError};

use crate::{
    build::{Build, BuildError, Workspace},
    classifier::{self, ClassifyError, MACRO_PREAMBLE},
    modules::{LoadError, ModuleStack},
    text::Text,
};

/// The session's state machine, per `spec.md` §4.5. Every public method
/// on [`Session`] other than `new_session` only makes sense in exactly
/// one of these states; calling it in the wrong one is a
/// [`SessionError::ProtocolMisuse`], not a silent no-op.
#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing in flight; `compile` may be called.
    Idle,
    /// A build is running; `try_get_exit_status` may be polled.
    Compiling,
    /// A build finished successfully and its header append has already
    /// been committed; `load` must be called before the next `compile`.
    AwaitingLoad,
}

/// One REPL session: a working directory, a compiler, an accumulating
/// persistent header, and the stack of modules built from it so far.
pub struct Session {
    inspector: Inspector,
    workspace: Workspace,
    cc: Text,
    flags: Vec<String>,
    counter: u64,
    state: State,
    modules: ModuleStack,
    build: Option<Build>,
    pending_library: Option<PathBuf>,
    pending_header_append: Option<String>,
    finished_output: String,
}

impl Session {
    /// Set up a fresh working directory with an empty persistent header
    /// and start the AST inspector over an empty working source, per
    /// `spec.md` §4.5's `new_session` operation.
    #[tracing::instrument(level = "info", skip(flags))]
    pub fn new_session(
        cc: Text,
        workspace: Workspace,
        flags: Vec<String>,
    ) -> Result<Self, SessionError> {
        std::fs::create_dir_all(&workspace.dir).map_err(SessionError::Io)?;

        let header_path = workspace.header_path();
        std::fs::write(&header_path, initial_header_contents()).map_err(SessionError::Io)?;

        let source_path = workspace.source_path();
        std::fs::write(&source_path, self_include(&workspace)).map_err(SessionError::Io)?;

        let inspector = Inspector::new(&source_path, flags.clone())?;

        Ok(Session {
            inspector,
            workspace,
            cc,
            flags,
            counter: 0,
            state: State::Idle,
            modules: ModuleStack::new(),
            build: None,
            pending_library: None,
            pending_header_append: None,
            finished_output: String::new(),
        })
    }

    /// Reconfigure the compiler flags used for both parsing and building.
    ///
    /// Only valid while `Idle`, per `spec.md` §4.5/§6: a build already in
    /// flight is reading the current working source under the current
    /// flags, so reconfiguring the inspector out from under it would race
    /// the in-flight compile.
    ///
    /// This never unloads already-loaded modules — it only changes what
    /// flags the *next* compile uses, matching the original RCRL parser's
    /// behaviour of treating a flag change as configuration, not a reset.
    #[tracing::instrument(level = "debug", skip(self, flags))]
    pub fn set_flags(&mut self, flags: Vec<String>) -> Result<(), SessionError> {
        self.require(State::Idle, "set_flags")?;

        self.flags = flags.clone();
        self.inspector.reconfigure(flags)?;
        Ok(())
    }

    pub fn is_compiling(&self) -> bool {
        self.state == State::Compiling
    }

    /// Write `fragment` as the session's new working source, classify
    /// it, and start a build. Per `spec.md` §4.5, this may only be
    /// called while the session is `Idle`.
    ///
    /// Returns `Ok(false)` without touching any session state or
    /// starting a build if `fragment` is empty once line endings are
    /// normalized and surrounding whitespace is trimmed, per `spec.md`
    /// §8's boundary behaviour for an empty fragment.
    #[tracing::instrument(level = "info", skip(self, fragment))]
    pub fn compile(&mut self, fragment: &str) -> Result<bool, SessionError> {
        self.require(State::Idle, "compile")?;

        let normalized = fragment.replace('\r', "\n");
        if normalized.trim().is_empty() {
            return Ok(false);
        }

        let source_path = self.workspace.source_path();
        let contents = format!("{}{normalized}", self_include(&self.workspace));
        std::fs::write(&source_path, contents).map_err(SessionError::Io)?;

        self.inspector.reparse()?;
        for diagnostic in self.inspector.libclang_diagnostics() {
            // Never a reason to fail the fragment on its own — per
            // `spec.md` §4.1 the compiler's own exit code is the
            // authority on whether this fragment is valid; libclang's
            // parse is best-effort and only needs to be good enough to
            // classify top-level blocks.
            tracing::debug!(diagnostic, "libclang diagnostic while reparsing fragment");
        }
        let inspection = self.inspector.top_level_blocks();
        let lines = self.inspector.file_content()?;

        let build_id = self.counter;
        let generated = classifier::generate_source(
            &inspection.blocks,
            &inspection.namespaces,
            &lines,
            &mut self.counter,
        );
        let header_append = classifier::generate_header_append(
            &inspection.blocks,
            &inspection.namespaces,
            &lines,
            &header_file_name(&self.workspace),
            &mut self.counter,
        )?;
        drop(inspection);

        std::fs::write(&source_path, generated).map_err(SessionError::Io)?;

        let library_path = self.workspace.next_library_path(build_id);
        let build = Build::spawn(&self.cc, &source_path, &library_path, &self.flags)?;

        self.build = Some(build);
        self.pending_library = Some(library_path);
        self.pending_header_append = Some(header_append);
        self.state = State::Compiling;
        Ok(true)
    }

    /// Poll the in-flight build, per `spec.md` §4.5's `try_get_exit_status`.
    ///
    /// Returns `Ok(None)` while the compiler is still running. Once it
    /// exits, the header append is committed on success (moving the
    /// session to `AwaitingLoad`) or discarded on failure (moving back to
    /// `Idle`) — a failed compile never extends the persistent header.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn try_get_exit_status(&mut self) -> Result<Option<ExitStatus>, SessionError> {
        self.require(State::Compiling, "try_get_exit_status")?;

        let build = self.build.as_mut().expect("Compiling state always has a build");
        let Some(result) = build.try_exit_status() else {
            return Ok(None);
        };
        let captured = build.captured_output();

        self.finished_output = captured;
        self.build = None;

        let status = result?;
        if status.success() {
            self.commit_header_append()?;
            self.state = State::AwaitingLoad;
        } else {
            self.pending_header_append = None;
            self.pending_library = None;
            self.state = State::Idle;
        }

        Ok(Some(status))
    }

    fn commit_header_append(&mut self) -> Result<(), SessionError> {
        let append = self
            .pending_header_append
            .take()
            .expect("a successful build always has a pending header append");
        if append.is_empty() {
            return Ok(());
        }
        let header_path = self.workspace.header_path();
        let mut existing = std::fs::read_to_string(&header_path).map_err(SessionError::Io)?;
        existing.push_str(&append);
        std::fs::write(&header_path, existing).map_err(SessionError::Io)
    }

    /// Load the module built by the last successful compile, per
    /// `spec.md` §4.5's `load` operation. Only valid in `AwaitingLoad`.
    ///
    /// When `redirect_stdout` is set, the fragment's static
    /// initializers have their standard output captured to
    /// `<base>_stdout.txt` and the captured text is returned instead of
    /// going to the host's own stdout, per `spec.md` §4.4/§6.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn load(&mut self, redirect_stdout: bool) -> Result<String, SessionError> {
        self.require(State::AwaitingLoad, "load")?;

        let library_path = self
            .pending_library
            .take()
            .expect("AwaitingLoad always has a pending library");
        let capture_path = redirect_stdout.then(|| self.workspace.stdout_capture_path());
        let output = self.modules.load(&library_path, capture_path.as_deref())?;
        self.state = State::Idle;
        Ok(output)
    }

    /// Drain the captured stdout/stderr of the most recent build.
    pub fn take_compiler_output(&mut self) -> String {
        if let Some(build) = &self.build {
            return build.captured_output();
        }
        std::mem::take(&mut self.finished_output)
    }

    pub fn loaded_module_count(&self) -> usize {
        self.modules.loaded_count()
    }

    /// Unload every loaded module, in reverse of load order, and reset
    /// the persistent header back to its initial contents, per
    /// `spec.md` §4.5's `cleanup` operation. Only valid in `Idle`;
    /// leaves the session in `Idle`, ready for further `compile` calls
    /// with a clean header — this is not session teardown, it's a reset.
    ///
    /// When `redirect_stdout` is set, destructors run during unload have
    /// their standard output captured the same way `load` does.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn cleanup(&mut self, redirect_stdout: bool) -> Result<String, SessionError> {
        self.require(State::Idle, "cleanup")?;

        let capture_path = redirect_stdout.then(|| self.workspace.stdout_capture_path());
        let output = self.modules.unload_all(capture_path.as_deref())?;

        let header_path = self.workspace.header_path();
        std::fs::write(&header_path, initial_header_contents()).map_err(SessionError::Io)?;

        Ok(output)
    }

    fn require(&self, expected: State, op: &'static str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::ProtocolMisuse {
                op,
                state: self.state,
            })
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // A safety net for sessions dropped without an explicit cleanup()
        // call — still unload modules in reverse order, but leave the
        // working directory and header behind for postmortem inspection.
        if let Err(e) = self.modules.unload_all(None) {
            tracing::warn!(error = %e, "failed to unload modules while dropping session");
        }
    }
}

fn initial_header_contents() -> String {
    format!("#pragma once\n{MACRO_PREAMBLE}")
}

fn header_file_name(workspace: &Workspace) -> String {
    workspace
        .header_path()
        .file_name()
        .expect("header_path always has a file name")
        .to_string_lossy()
        .into_owned()
}

fn self_include(workspace: &Workspace) -> String {
    format!("#include \"{}\"\n", header_file_name(workspace))
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Idle => "idle",
            State::Compiling => "compiling",
            State::AwaitingLoad => "awaiting_load",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{op} is not valid while the session is {state:?}")]
    ProtocolMisuse { op: &'static str, state: State },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}
