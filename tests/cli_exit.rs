//! Process-level behavior of the `msgraph` binary.

use std::process::{Command, Output};

fn run_msgraph(args: &[&str]) -> Output {
    let dir = tempfile::tempdir().unwrap();
    Command::new(env!("CARGO_BIN_EXE_msgraph"))
        .args(args)
        .current_dir(dir.path())
        .env_remove("APPLICATION_ID")
        .env_remove("TENANT_ID")
        .env_remove("CLIENT_SECRET")
        .env_remove("RUST_LOG")
        // Unroutable so an accidental network call fails fast
        .env("AUTHORITY_HOST", "http://127.0.0.1:9")
        .env("GRAPH_BASE_URL", "http://127.0.0.1:9/v1.0")
        .output()
        .unwrap()
}

#[test]
fn missing_credentials_exit_with_failure() {
    let output = run_msgraph(&["--flow", "app-only", "--no-cache", "me"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("APPLICATION_ID"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn unknown_flow_is_a_usage_error() {
    let output = run_msgraph(&["--flow", "implicit", "me"]);
    assert_eq!(output.status.code(), Some(2));
}
