#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::Command;

fn missing_port() -> PathBuf {
    PathBuf::from(format!(
        "/tmp/keyflight-missing-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

fn keyflight() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_keyflight"));
    cmd.arg("--log-level").arg("error");
    cmd
}

#[test]
fn version_prints_package_version() {
    let output = keyflight().arg("version").output().expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("keyflight {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn extended_version_reports_target() {
    let output = keyflight()
        .arg("version")
        .arg("--extended")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: keyflight"));
    assert!(stdout.contains("target_os:"));
}

#[test]
fn info_on_missing_port_returns_transport_error() {
    let output = keyflight()
        .arg("info")
        .arg(missing_port())
        .arg("--settle")
        .arg("0")
        .output()
        .expect("info should run");

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connect failed"), "{stderr}");
}

#[test]
fn zero_handshake_timeout_is_a_usage_error() {
    let output = keyflight()
        .arg("info")
        .arg(missing_port())
        .arg("--handshake-timeout")
        .arg("0")
        .output()
        .expect("info should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn malformed_module_spec_is_a_usage_error() {
    let output = keyflight()
        .arg("upload")
        .arg(missing_port())
        .arg("--module")
        .arg("1:encoder:5:VOL_UP")
        .output()
        .expect("upload should run");

    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pin2"), "{stderr}");
}

#[test]
fn out_of_range_pin_is_rejected_before_connecting() {
    let output = keyflight()
        .arg("upload")
        .arg(missing_port())
        .arg("--module")
        .arg("1:button:99:CTRL+F")
        .output()
        .expect("upload should run");

    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("out of range"), "{stderr}");
}

#[test]
fn duplicate_module_ids_are_rejected() {
    let output = keyflight()
        .arg("upload")
        .arg(missing_port())
        .arg("--module")
        .arg("1:button:2:A")
        .arg("--module")
        .arg("1:button:3:B")
        .output()
        .expect("upload should run");

    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn ports_emits_json_array() {
    let output = keyflight()
        .arg("--format")
        .arg("json")
        .arg("ports")
        .output()
        .expect("ports should run");

    // Containers without udev cannot enumerate ports.
    if !output.status.success() {
        assert_eq!(output.status.code(), Some(3));
        return;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let payload: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("ports should emit json");
    assert!(payload.is_array());
}

#[test]
fn zero_monitor_count_is_a_usage_error() {
    let output = keyflight()
        .arg("monitor")
        .arg(missing_port())
        .arg("--count")
        .arg("0")
        .output()
        .expect("monitor should run");

    assert_eq!(output.status.code(), Some(64));
}
