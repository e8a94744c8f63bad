// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const CONFIG_KEYS: &[&str] = &[
    "TEE_OS_FAMILY",
    "TEE_CODENAME",
    "TEE_ARCH",
    "SGX_VERSION",
    "DCAP_VERSION",
    "SGX_SDK_URL",
    "RUST_TOOLCHAIN",
];

/// `teeprov` in `dir` with no profile configuration inherited
fn teeprov(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("teeprov").unwrap();
    cmd.current_dir(dir.path());
    for key in CONFIG_KEYS {
        cmd.env_remove(key);
    }
    for (key, _) in std::env::vars().filter(|(k, _)| k.ends_with("_DIST")) {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn test_graph_lists_stages_in_order() {
    let dir = TempDir::new().unwrap();

    teeprov(&dir)
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. binutils (prebuilt)"))
        .stdout(predicate::str::contains("5. rust (prebuilt) [depends: sdk]"));
}

#[test]
fn test_graph_mermaid() {
    let dir = TempDir::new().unwrap();

    teeprov(&dir)
        .args(["graph", "--format", "mermaid"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("graph TD"))
        .stdout(predicate::str::contains("psw --> dcap"));
}

#[test]
fn test_profile_without_codename_is_configuration_error() {
    let dir = TempDir::new().unwrap();

    teeprov(&dir)
        .arg("profile")
        .assert()
        .failure()
        .stderr(predicate::str::contains("TEE_CODENAME"));
}

#[test]
fn test_profile_json() {
    let dir = TempDir::new().unwrap();

    let output = teeprov(&dir)
        .args(["profile", "--format", "json", "--codename", "jammy"])
        .env("SGX_VERSION", "2.17")
        .env("DCAP_VERSION", "1.14")
        .env("SDK_DIST", "source")
        .output()
        .unwrap();

    assert!(output.status.success());
    let profile: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(profile["codename"], "jammy");
    assert_eq!(profile["distro_id"], "ubuntu22.04");
    assert_eq!(profile["modes"]["sdk"], "source");
    assert_eq!(profile["modes"]["psw"], "prebuilt");
}

#[test]
fn test_unknown_mode_selector_rejected() {
    let dir = TempDir::new().unwrap();

    teeprov(&dir)
        .args(["profile", "--codename", "focal", "--mode", "kernel=source"])
        .env("SGX_VERSION", "2.15")
        .env("DCAP_VERSION", "1.12.1")
        .env("SGX_SDK_URL", "https://example/sdk-2.15.bin")
        .assert()
        .failure()
        .stderr(predicate::str::contains("KERNEL_DIST"));
}

#[test]
fn test_provision_dry_run_plans_without_changes() {
    let dir = TempDir::new().unwrap();

    teeprov(&dir)
        .args(["provision", "--dry-run", "--codename", "focal"])
        .env("SGX_VERSION", "2.15")
        .env("DCAP_VERSION", "1.12.1")
        .env("SGX_SDK_URL", "https://example/sdk-2.15.bin")
        .assert()
        .success()
        .stdout(predicate::str::contains("binutils"))
        .stdout(predicate::str::contains("Dry run"));

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_validate_builtin_manifest() {
    let dir = TempDir::new().unwrap();

    teeprov(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Manifest parsed (5 stages)"))
        .stdout(predicate::str::contains("Profile not checked"));
}

#[test]
fn test_init_writes_manifest_once() {
    let dir = TempDir::new().unwrap();

    teeprov(&dir).arg("init").assert().success();
    let written = std::fs::read_to_string(dir.path().join(".teeprov.yaml")).unwrap();
    assert!(written.contains("name: sgx-environment"));

    teeprov(&dir)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    teeprov(&dir).args(["init", "--force"]).assert().success();
}
