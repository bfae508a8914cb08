//! Integration tests for the `sti` binary

use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn sti() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sti"));
    cmd.env_remove("STI_CONFIG").env("RUST_LOG", "info");
    cmd
}

#[test]
fn test_help_lists_options() {
    let output = sti().arg("--help").output().unwrap();
    assert!(output.status.success());

    let help = String::from_utf8_lossy(&output.stdout);
    assert!(help.contains("--config"));
    assert!(help.contains("--verbose"));
}

#[test]
fn test_no_probes_exits_cleanly() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sti.yaml");
    fs::write(
        &path,
        "influxURL: http://127.0.0.1:1\ninfluxBucket: test\ninterval: 1s\n",
    )
    .unwrap();

    let output = sti().arg("--config").arg(&path).output().unwrap();
    assert!(output.status.success(), "{output:?}");

    let logs = String::from_utf8_lossy(&output.stdout);
    assert!(logs.contains("no_probes"), "{logs}");
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sti.yaml");
    fs::write(&path, "interval: whenever\n").unwrap();

    let output = sti().arg("--config").arg(&path).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_missing_config_fails() {
    let dir = TempDir::new().unwrap();
    let output = sti()
        .arg("--config")
        .arg(dir.path().join("missing.yaml"))
        .output()
        .unwrap();
    assert!(!output.status.success());
}
