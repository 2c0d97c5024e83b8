//! Process-level tests for the one-shot pipeline, using a shell-script stand-in
//! for the Mumei verifier.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use forge_core::oneshot::{compile_in_sandbox, CompileRequest};
use forge_core::report::ReportState;
use forge_core::verifier::{run_verifier, VerifierConfig};

fn write_stub(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let p = dir.join(format!("mumei-stub-{}.sh", uuid::Uuid::new_v4()));
    std::fs::write(&p, format!("#!/bin/sh\n{body}")).expect("write stub");
    let mut perm = std::fs::metadata(&p).expect("stat stub").permissions();
    perm.set_mode(0o755);
    std::fs::set_permissions(&p, perm).expect("chmod stub");
    p
}

fn config_with(stub: PathBuf, root: &Path) -> VerifierConfig {
    VerifierConfig {
        program: stub,
        tooling_root: root.to_path_buf(),
    }
}

#[tokio::test]
async fn artifact_scan_includes_exactly_what_was_produced() {
    let dir = tempfile::tempdir().unwrap();
    // $1 = source, $3 = output base (after --output).
    let stub = write_stub(
        dir.path(),
        "base=\"$3\"\nprintf 'fn main() {}\\n' > \"$base.rs\"\nprintf 'target triple\\n' > \"$base.ll\"\nexit 0\n",
    );
    let config = config_with(stub, dir.path());

    let req = CompileRequest::new("atom cut(a, b) {}".into(), None);
    let res = compile_in_sandbox(&config, &req, Duration::from_secs(10))
        .await
        .unwrap();

    assert!(res.outcome.ok);
    assert!(!res.outcome.timeout);
    let keys: Vec<&str> = res.outcome.artifacts.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["ll", "rs"]);
    assert_eq!(res.outcome.artifacts["rs"], "fn main() {}\n");
    assert!(matches!(res.report, ReportState::NotFound));
}

#[tokio::test]
async fn passing_source_verifies_identically_twice() {
    let dir = tempfile::tempdir().unwrap();
    // Artifact derived from the source bytes, so identical inputs must yield
    // identical artifacts.
    let stub = write_stub(
        dir.path(),
        "base=\"$3\"\ncat \"$1\" > \"$base.rs\"\nexit 0\n",
    );
    let config = config_with(stub, dir.path());

    let req = CompileRequest::new("atom cut(a, b) requires a >= b {}".into(), None);
    let first = compile_in_sandbox(&config, &req, Duration::from_secs(10))
        .await
        .unwrap();
    let second = compile_in_sandbox(&config, &req, Duration::from_secs(10))
        .await
        .unwrap();

    assert!(first.outcome.ok && second.outcome.ok);
    assert_eq!(first.outcome.artifacts, second.outcome.artifacts);
}

#[tokio::test]
async fn concurrent_requests_never_see_each_other() {
    let dir = tempfile::tempdir().unwrap();
    // Echo the request's own source back as the artifact; fail if someone
    // else's source file is visible next to ours.
    let stub = write_stub(
        dir.path(),
        "base=\"$3\"\nsandbox=$(dirname \"$1\")\ncount=$(ls \"$sandbox\" | wc -l)\n[ \"$count\" -eq 1 ] || exit 9\ncat \"$1\" > \"$base.rs\"\nexit 0\n",
    );
    let config = config_with(stub, dir.path());

    let mk = |tag: &str| CompileRequest::new(format!("atom {tag}() {{}}"), Some(tag.to_string()));
    let left = mk("left");
    let right = mk("right");
    let (a, b) = tokio::join!(
        compile_in_sandbox(&config, &left, Duration::from_secs(10)),
        compile_in_sandbox(&config, &right, Duration::from_secs(10)),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert!(a.outcome.ok, "stub saw foreign files: {:?}", a.outcome);
    assert!(b.outcome.ok, "stub saw foreign files: {:?}", b.outcome);
    assert!(a.outcome.artifacts["rs"].contains("left"));
    assert!(b.outcome.artifacts["rs"].contains("right"));
}

#[tokio::test]
async fn failing_verify_surfaces_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let stub = write_stub(
        dir.path(),
        concat!(
            "sandbox=$(dirname \"$3\")\n",
            "cat > \"$sandbox/report.json\" <<'EOF'\n",
            "{\"status\":\"failed\",\"atom\":\"cut\",\"input_a\":3,\"input_b\":-1,\"reason\":\"requires a > b violated\"}\n",
            "EOF\n",
            "echo 'logical flaw detected' >&2\n",
            "exit 1\n",
        ),
    );
    let config = config_with(stub, dir.path());

    let req = CompileRequest::new("atom cut(a, b) {}".into(), None);
    let res = compile_in_sandbox(&config, &req, Duration::from_secs(10))
        .await
        .unwrap();

    assert!(!res.outcome.ok);
    assert_eq!(res.outcome.returncode, Some(1));
    assert!(res.outcome.stderr.contains("logical flaw detected"));
    match res.report {
        ReportState::Found(r) => assert_eq!(r.atom.as_deref(), Some("cut")),
        other => panic!("expected Found, got {other:?}"),
    }
}

#[tokio::test]
async fn hung_verifier_is_a_distinguished_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let stub = write_stub(dir.path(), "sleep 5\nexit 0\n");
    let config = config_with(stub, dir.path());
    let source = dir.path().join("blade.mm");
    std::fs::write(&source, "atom cut() {}").unwrap();

    let outcome = run_verifier(&config, &source, None, Duration::from_millis(200))
        .await
        .unwrap();
    assert!(outcome.timeout);
    assert!(!outcome.ok);
    assert_eq!(outcome.returncode, None);
}

#[tokio::test]
async fn missing_executable_is_a_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with(dir.path().join("does-not-exist"), dir.path());
    let source = dir.path().join("blade.mm");
    std::fs::write(&source, "atom cut() {}").unwrap();

    let err = run_verifier(&config, &source, None, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.contains("failed to spawn verifier"), "got: {err}");
}
