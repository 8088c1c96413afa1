//! Integration tests for the session state machine.
//!
//! These exercise real libclang parsing (via `rcrl-ast`), so they're
//! gated behind `--ignored` on hosts without a system libclang. They
//! stand in for a real C++ toolchain with a tiny fake "compiler" shell
//! script, so they don't need one installed to check the state machine
//! itself.

use std::path::PathBuf;

use rcrl_core::{Session, SessionError, Text, Workspace};

fn fake_compiler(dir: &std::path::Path, succeed: bool) -> PathBuf {
    let path = dir.join("fake-cc.sh");
    let body = if succeed {
        "#!/bin/sh\nfor a in \"$@\"; do :; done\n# find the -o argument and create it\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then\n    touch \"$2\"\n    exit 0\n  fi\n  shift\ndone\nexit 0\n"
    } else {
        "#!/bin/sh\necho 'fake compile error' 1>&2\nexit 1\n"
    };
    std::fs::write(&path, body).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }

    path
}

async fn wait_for_exit(session: &mut Session) -> std::process::ExitStatus {
    loop {
        if let Some(status) = session.try_get_exit_status().unwrap() {
            return status;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}

#[tokio::test]
#[ignore = "requires a system libclang; run with `cargo test -- --ignored` where available"]
async fn a_successful_compile_can_be_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let cc = fake_compiler(dir.path(), true);
    let workspace = Workspace {
        dir: dir.path().join("work"),
        base_name: "session".into(),
    };

    let mut session =
        Session::new_session(Text::from(cc.to_str().unwrap()), workspace, vec!["-std=c++17".into()])
            .unwrap();

    assert!(!session.is_compiling());
    assert!(session.compile("int answer = 42;\n").unwrap());
    assert!(session.is_compiling());

    let status = wait_for_exit(&mut session).await;
    assert!(status.success());
    assert!(!session.is_compiling());

    session.load(false).unwrap();
    assert_eq!(session.loaded_module_count(), 1);

    session.cleanup(false).unwrap();
    assert_eq!(session.loaded_module_count(), 0);
}

#[tokio::test]
#[ignore = "requires a system libclang; run with `cargo test -- --ignored` where available"]
async fn an_empty_fragment_is_rejected_without_starting_a_build() {
    let dir = tempfile::tempdir().unwrap();
    let cc = fake_compiler(dir.path(), true);
    let workspace = Workspace {
        dir: dir.path().join("work"),
        base_name: "session".into(),
    };

    let mut session =
        Session::new_session(Text::from(cc.to_str().unwrap()), workspace, vec!["-std=c++17".into()])
            .unwrap();

    assert!(!session.compile("   \n\t\n").unwrap());
    assert!(!session.is_compiling());
}

#[tokio::test]
#[ignore = "requires a system libclang; run with `cargo test -- --ignored` where available"]
async fn cleanup_resets_the_header_and_the_session_stays_usable() {
    let dir = tempfile::tempdir().unwrap();
    let cc = fake_compiler(dir.path(), true);
    let workspace = Workspace {
        dir: dir.path().join("work"),
        base_name: "session".into(),
    };
    let header_path = workspace.dir.join("session.hpp");

    let mut session =
        Session::new_session(Text::from(cc.to_str().unwrap()), workspace, vec!["-std=c++17".into()])
            .unwrap();
    let header_after_new_session = std::fs::read_to_string(&header_path).unwrap();

    session.compile("int answer = 42;\n").unwrap();
    wait_for_exit(&mut session).await;
    session.load(false).unwrap();

    let header_with_declaration = std::fs::read_to_string(&header_path).unwrap();
    assert_ne!(header_with_declaration, header_after_new_session);

    session.cleanup(false).unwrap();
    let header_after_cleanup = std::fs::read_to_string(&header_path).unwrap();
    assert_eq!(header_after_cleanup, header_after_new_session);

    // The session is still usable after cleanup — it's a reset, not teardown.
    assert!(session.compile("int second_answer = 7;\n").unwrap());
}

#[tokio::test]
#[ignore = "requires a system libclang; run with `cargo test -- --ignored` where available"]
async fn a_failed_compile_does_not_extend_the_header_and_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let cc = fake_compiler(dir.path(), false);
    let workspace = Workspace {
        dir: dir.path().join("work"),
        base_name: "session".into(),
    };
    let header_path = workspace.dir.join("session.hpp");

    let mut session =
        Session::new_session(Text::from(cc.to_str().unwrap()), workspace, vec!["-std=c++17".into()])
            .unwrap();
    let header_before = std::fs::read_to_string(&header_path).unwrap();

    session.compile("int answer = 42;\n").unwrap();
    let status = wait_for_exit(&mut session).await;
    assert!(!status.success());
    assert!(!session.is_compiling());

    let header_after = std::fs::read_to_string(&header_path).unwrap();
    assert_eq!(header_before, header_after);

    // Idle again: compile() must be callable, not rejected as a protocol
    // misuse left over from the failed attempt.
    session.compile("int second_try = 7;\n").unwrap();
}

#[tokio::test]
#[ignore = "requires a system libclang; run with `cargo test -- --ignored` where available"]
async fn load_before_a_compile_finishes_is_a_protocol_misuse() {
    let dir = tempfile::tempdir().unwrap();
    let cc = fake_compiler(dir.path(), true);
    let workspace = Workspace {
        dir: dir.path().join("work"),
        base_name: "session".into(),
    };

    let mut session =
        Session::new_session(Text::from(cc.to_str().unwrap()), workspace, vec!["-std=c++17".into()])
            .unwrap();

    let err = session.load(false).unwrap_err();
    assert!(matches!(err, SessionError::ProtocolMisuse { .. }));
}
