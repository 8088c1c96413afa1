//! The Build Driver (C3): compiles the generated working source into a
//! shared library, per `spec.md` §4.3.

use std::{
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::oneshot,
};

use crate::text::Text;

/// The flags every invocation carries regardless of user-supplied flags,
/// per `spec.md` §4.3: the output must be a position-independent shared
/// object, and symbols are hidden by default so only explicitly exported
/// declarations cross the module boundary.
fn mandatory_flags() -> Vec<&'static str> {
    let mut flags = vec!["-shared", "-fPIC", "-fvisibility=hidden"];
    if cfg!(target_os = "macos") {
        flags.push("-Wl,-undefined,error");
    } else {
        flags.push("-Wl,--no-undefined");
    }
    flags
}

/// A compile in flight: the spawned child process plus handles onto its
/// captured output and eventual exit status.
pub struct Build {
    output: Arc<Mutex<String>>,
    exit_status: oneshot::Receiver<std::io::Result<ExitStatus>>,
}

impl Build {
    /// Start compiling `source` into `output_library`, per `spec.md`
    /// §4.3's "Starting a build".
    ///
    /// `cc` is the compiler driver to invoke (e.g. `c++`, `clang++`);
    /// `extra_flags` are the session's current user-supplied flags,
    /// appended after the mandatory ones.
    #[tracing::instrument(level = "info", skip(extra_flags))]
    pub fn spawn(
        cc: &Text,
        source: &Path,
        output_library: &Path,
        extra_flags: &[String],
    ) -> Result<Self, BuildError> {
        let mut cmd = Command::new(cc.as_str());
        cmd.args(mandatory_flags())
            .args(extra_flags)
            .arg(source)
            .arg("-o")
            .arg(output_library)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| BuildError::SpawnFailed {
            cc: cc.clone(),
            error: e.to_string().into(),
        })?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let output = Arc::new(Mutex::new(String::new()));
        tokio::spawn(pump(stdout, Arc::clone(&output)));
        tokio::spawn(pump(stderr, Arc::clone(&output)));

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let status = child.wait().await;
            // The receiver may already be gone if the session was torn
            // down mid-build; that's fine, there's nobody left to tell.
            let _ = tx.send(status);
        });

        Ok(Build {
            output,
            exit_status: rx,
        })
    }

    /// A live snapshot of everything the compiler has written to stdout
    /// or stderr so far, interleaved in the order the OS delivered it.
    pub fn captured_output(&self) -> String {
        self.output.lock().unwrap().clone()
    }

    /// Non-blocking poll for the compiler's exit status, per `spec.md`
    /// §4.3's "Polling a build": `None` while the process is still
    /// running, `Some` exactly once after it exits.
    pub fn try_exit_status(&mut self) -> Option<Result<ExitStatus, BuildError>> {
        match self.exit_status.try_recv() {
            Ok(Ok(status)) => Some(Ok(status)),
            Ok(Err(e)) => Some(Err(BuildError::WaitFailed(e.to_string().into()))),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(BuildError::WaitFailed("build task was dropped".into())))
            }
        }
    }
}

async fn pump(
    reader: impl tokio::io::AsyncRead + Unpin,
    sink: Arc<Mutex<String>>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let mut buf = sink.lock().unwrap();
                buf.push_str(&line);
                buf.push('\n');
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
}

/// Where a session's generated files and build artifacts live.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub dir: PathBuf,
    pub base_name: String,
}

impl Workspace {
    pub fn source_path(&self) -> PathBuf {
        self.dir.join(format!("{}.cpp", self.base_name))
    }

    pub fn header_path(&self) -> PathBuf {
        self.dir.join(format!("{}.hpp", self.base_name))
    }

    /// Where a `redirect_stdout`-requested `load`/`cleanup` captures the
    /// fragment's standard output, per `spec.md` §6's on-disk layout
    /// (`<base>_stdout.txt`).
    pub fn stdout_capture_path(&self) -> PathBuf {
        self.dir.join(format!("{}_stdout.txt", self.base_name))
    }

    /// A fresh, uniquely named path for the next compiled module, per
    /// `spec.md` §4.4: every successful build produces a library the
    /// module manager can load under its own name, never overwriting a
    /// previously loaded one.
    pub fn next_library_path(&self, counter: u64) -> PathBuf {
        let extension = if cfg!(target_os = "windows") {
            "dll"
        } else if cfg!(target_os = "macos") {
            "dylib"
        } else {
            "so"
        };
        self.dir
            .join(format!("{}_{}.{}", self.base_name, counter, extension))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("unable to start \"{cc}\": {error}")]
    SpawnFailed { cc: Text, error: Text },
    #[error("failed to wait on the compiler process: {0}")]
    WaitFailed(Text),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_library_path_is_unique_per_counter() {
        let ws = Workspace {
            dir: PathBuf::from("/tmp/rcrl-test"),
            base_name: "session".into(),
        };
        assert_ne!(ws.next_library_path(0), ws.next_library_path(1));
    }

    #[test]
    fn mandatory_flags_always_include_shared_and_pic() {
        let flags = mandatory_flags();
        assert!(flags.contains(&"-shared"));
        assert!(flags.contains(&"-fPIC"));
    }
}
