//! Tests for the argument handling of the demo client binary.
//!
//! Only code paths which return before a Kubernetes client is built are
//! exercised here, so no cluster (or kubeconfig) is needed.

use std::process::Command;

#[test]
fn unknown_operations_print_guidance_and_exit_successfully() {
    let output = Command::new(env!("CARGO_BIN_EXE_conversion-demo-client"))
        .args(["replace", "test"])
        .output()
        .expect("the demo client binary must run");

    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("unknown operation \"replace\""));
    assert!(stdout.contains("createv1"));
    assert!(stdout.contains("deletev2"));
}

#[test]
fn missing_arguments_print_usage_and_exit_with_failure() {
    let output = Command::new(env!("CARGO_BIN_EXE_conversion-demo-client"))
        .arg("createv1")
        .output()
        .expect("the demo client binary must run");

    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"));
}

#[test]
fn help_exits_successfully() {
    let output = Command::new(env!("CARGO_BIN_EXE_conversion-demo-client"))
        .arg("--help")
        .output()
        .expect("the demo client binary must run");

    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Demo client for the CronJob conversion webhook"));
}
