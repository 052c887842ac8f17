// Copyright 2025 PSFP Controller Developers
// SPDX-License-Identifier: Apache-2.0

//! Startup behavior of the psfp-controller binary

use std::path::Path;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

const ENV_OVERRIDES: &[&str] = &[
    "PSFP_CONFIG_PATH",
    "PSFP_DEVICE_ADDRESS",
    "PSFP_P4INFO",
    "PSFP_DEVICE_CONFIG",
    "PSFP_RULES",
    "PSFP_DEBUG",
];

fn controller(config: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_psfp-controller"));
    command.arg("--config").arg(config).args(args);
    for var in ENV_OVERRIDES {
        command.env_remove(var);
    }
    command.output().expect("spawn psfp-controller")
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("psfp_controller.toml");
    // Nothing listens here; reaching it would hang until the connect timeout
    std::fs::write(
        &path,
        "[device]\naddress = \"192.0.2.1:50051\"\nconnect_timeout_ms = 30000\n",
    )
    .unwrap();
    path
}

#[test]
fn test_missing_p4info_prints_usage_and_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let image = dir.path().join("sdn-psfp.json");
    std::fs::write(&image, "{}").unwrap();

    let started = Instant::now();
    let output = controller(
        &config,
        &[
            "--p4info",
            "/nonexistent/sdn-psfp.p4info.json",
            "--bmv2-json",
            image.to_str().unwrap(),
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage:"), "stderr: {}", stderr);
    assert!(stderr.contains("p4info file not found: /nonexistent/sdn-psfp.p4info.json"));
    // No connection was attempted
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[test]
fn test_missing_bmv2_json_prints_usage_and_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let p4info = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/sdn-psfp.p4info.json");

    let output = controller(
        &config,
        &[
            "--p4info",
            p4info.to_str().unwrap(),
            "--bmv2-json",
            "/nonexistent/sdn-psfp.json",
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage:"));
    assert!(stderr.contains("BMv2 JSON file not found"));
}

#[test]
fn test_missing_config_file_fails() {
    let output = controller(Path::new("/nonexistent/psfp_controller.toml"), &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Config file not found"));
}
