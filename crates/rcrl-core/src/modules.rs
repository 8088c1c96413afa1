//! The Module Manager (C4): keeps the stack of shared libraries a
//! session has loaded so far, per `spec.md` §4.4.

#[cfg(unix)]
use std::io::Write;
use std::path::{Path, PathBuf};

use libloading::Library;

/// One compiled module the session has loaded, in the order it was
/// loaded.
struct LoadedModule {
    path: PathBuf,
    #[allow(dead_code)]
    library: Library,
}

/// The stack of shared libraries loaded into the running process for one
/// session.
///
/// Per `spec.md` §4.4, modules are always unloaded in the reverse of the
/// order they were loaded in — later fragments may reference symbols
/// from earlier ones, never the other way around, so tearing down in
/// forward order would leave dangling references.
#[derive(Default)]
pub struct ModuleStack {
    modules: Vec<LoadedModule>,
}

impl ModuleStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a freshly built library with global, eager symbol
    /// resolution, per `spec.md` §4.4: later fragments must be able to
    /// resolve symbols from earlier ones at load time, the same way
    /// repeated `dlopen(RTLD_LAZY | RTLD_GLOBAL)` calls would behave on
    /// the same process.
    ///
    /// `built_library` already lives at a path unique to this build
    /// (`Workspace::next_library_path`, keyed by the session's code-gen
    /// counter at the time the build started) — the build driver
    /// compiles straight into it rather than into a shared `<base>.ext`
    /// that this method would then have to copy aside, so there's no
    /// separate copy step here.
    ///
    /// A load failure here is unrecoverable for the process per
    /// `spec.md` §4.4's "Non-goals": once a module has failed to load,
    /// the set of symbols available to the next compile is undefined, so
    /// the driver is expected to abort rather than continue with a
    /// session in an unknown state.
    ///
    /// `capture_path` optionally redirects the process's real stdout
    /// file descriptor for the duration of the load, so the fragment's
    /// static initializers' `cout`/`printf` output can be routed into
    /// the host's output pane instead of the host's own stdout — see
    /// `spec.md` §4.4's "stdout capture" contract.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn load(
        &mut self,
        built_library: &Path,
        capture_path: Option<&Path>,
    ) -> Result<String, LoadError> {
        let path = built_library.to_path_buf();
        let ((), captured) = with_stdout_capture(capture_path, || {
            let library = unsafe { load_global(&path) }
                .map_err(|e| LoadError::Load(path.clone(), e.to_string()))?;
            self.modules.push(LoadedModule {
                path: path.clone(),
                library,
            });
            Ok(())
        })?;
        Ok(captured)
    }

    pub fn loaded_count(&self) -> usize {
        self.modules.len()
    }

    pub fn loaded_paths(&self) -> Vec<&Path> {
        self.modules.iter().map(|m| m.path.as_path()).collect()
    }

    /// Unload every module, most-recently-loaded first.
    ///
    /// A single library's unload failing is logged and skipped rather
    /// than aborting the rest of the teardown — leaking one `Library`
    /// handle is preferable to leaving the remaining modules loaded with
    /// no way to get back to them.
    ///
    /// `capture_path` optionally redirects stdout for the duration of
    /// the teardown, the same way `load` does, so destructors that print
    /// on the way out are captured too.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn unload_all(&mut self, capture_path: Option<&Path>) -> Result<String, LoadError> {
        let modules = std::mem::take(&mut self.modules);
        let ((), captured) = with_stdout_capture(capture_path, || {
            for module in modules.into_iter().rev() {
                tracing::debug!(path = %module.path.display(), "unloading module");
                drop(module.library);
            }
            Ok(())
        })?;
        Ok(captured)
    }
}

/// Redirects the process's real standard output file descriptor to a
/// file for the duration of a `load`/`cleanup` call, per `spec.md` §4.4's
/// "stdout capture" contract: a loaded fragment's static initializer (or
/// a module's destructors, on unload) may `printf`/`cout <<` directly to
/// fd 1, which a Rust-level `Stdio::piped()` on the *host* process can't
/// intercept after the fact — the redirection has to happen at the file
/// descriptor the C++ runtime actually writes to.
///
/// Grounded on `examples/original_source/src/rcrl/rcrl.cpp`'s
/// `CopyAndLoadNewPlugin`/`CleanupPlugins`, which do the same
/// `dup`/`freopen`/`dup2` dance around `fileno(stdout)`.
#[cfg(unix)]
struct StdoutCapture {
    saved_fd: std::os::raw::c_int,
    capture_path: PathBuf,
}

#[cfg(unix)]
impl StdoutCapture {
    fn begin(capture_path: &Path) -> std::io::Result<Self> {
        std::io::stdout().flush()?;

        let saved_fd = unsafe { libc::dup(libc::STDOUT_FILENO) };
        if saved_fd < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let file = std::fs::File::create(capture_path)?;
        let res = unsafe { libc::dup2(std::os::unix::io::AsRawFd::as_raw_fd(&file), libc::STDOUT_FILENO) };
        drop(file);
        if res < 0 {
            unsafe { libc::close(saved_fd) };
            return Err(std::io::Error::last_os_error());
        }

        Ok(StdoutCapture {
            saved_fd,
            capture_path: capture_path.to_path_buf(),
        })
    }

    fn finish(self) -> std::io::Result<String> {
        std::io::stdout().flush()?;
        let res = unsafe { libc::dup2(self.saved_fd, libc::STDOUT_FILENO) };
        unsafe { libc::close(self.saved_fd) };
        if res < 0 {
            return Err(std::io::Error::last_os_error());
        }
        std::fs::read_to_string(&self.capture_path)
    }
}

/// Run `f`, optionally redirecting the process's standard output to
/// `capture_path` for its duration, per `spec.md` §4.4/§6's optional
/// "redirect_stdout" behaviour. Returns whatever was written while
/// redirected, or an empty string when `capture_path` is `None`.
///
/// Windows has no `dup`/`dup2` on `STDOUT_FILENO`-style integer file
/// descriptors (its C runtime uses a different, MSVCRT-specific
/// mechanism); stdout capture is a POSIX-only feature of this port, and
/// `redirect_stdout` is silently a no-op there.
#[cfg(unix)]
fn with_stdout_capture<T>(
    capture_path: Option<&Path>,
    f: impl FnOnce() -> Result<T, LoadError>,
) -> Result<(T, String), LoadError> {
    let Some(path) = capture_path else {
        return f().map(|v| (v, String::new()));
    };

    let capture = StdoutCapture::begin(path).map_err(LoadError::Capture)?;
    let result = f();
    let captured = capture.finish().map_err(LoadError::Capture)?;

    result.map(|v| (v, captured))
}

#[cfg(windows)]
fn with_stdout_capture<T>(
    _capture_path: Option<&Path>,
    f: impl FnOnce() -> Result<T, LoadError>,
) -> Result<(T, String), LoadError> {
    f().map(|v| (v, String::new()))
}

#[cfg(unix)]
unsafe fn load_global(path: &Path) -> std::io::Result<Library> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL).map(Library::from) }
}

#[cfg(windows)]
unsafe fn load_global(path: &Path) -> Result<Library, libloading::Error> {
    // Windows has no equivalent of RTLD_GLOBAL: a loaded DLL's exports are
    // always visible process-wide to `GetProcAddress` once it's mapped in,
    // so a plain load already gives us the behaviour `spec.md` §4.4 asks for.
    unsafe { Library::new(path) }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to load module \"{0}\": {1}")]
    Load(PathBuf, String),
    #[error("failed to redirect stdout for capture: {0}")]
    Capture(#[source] std::io::Error),
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn with_stdout_capture_is_a_no_op_without_a_path() {
        let (value, captured) = with_stdout_capture(None, || Ok(42)).unwrap();
        assert_eq!(value, 42);
        assert!(captured.is_empty());
    }

    #[test]
    fn with_stdout_capture_redirects_and_restores_real_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let capture_path = dir.path().join("captured.txt");

        // Written with a raw `libc::write` on fd 1 rather than
        // `print!`/`println!`, since the test harness's own output
        // capture intercepts those macros above the file descriptor
        // level — this exercises the actual fd redirection the way a
        // loaded fragment's C++ `printf`/`cout` would.
        let message = b"hello from a loaded fragment";
        let (value, captured) = with_stdout_capture(Some(&capture_path), || {
            let written =
                unsafe { libc::write(libc::STDOUT_FILENO, message.as_ptr().cast(), message.len()) };
            assert_eq!(written as usize, message.len());
            Ok(7)
        })
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(captured.as_bytes(), message);
    }
}
